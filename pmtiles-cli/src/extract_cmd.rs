//! `extract` subcommand: pull a subset of tiles from a local or remote
//! archive into a new, standalone archive.

use clap::Parser;
use pmtiles::extract::{BoundingBox, Extractor, Region};

use crate::open::{ReaderHandle, open_mmap_or_http};

#[derive(Parser, Debug)]
#[command(about = "Extract a bounding box or GeoJSON region into a new archive")]
pub struct Args {
    /// Path or URL of the source archive; must be clustered
    #[arg(value_name = "SOURCE")]
    source: String,
    /// Output archive path
    #[arg(value_name = "OUTPUT")]
    output: String,
    /// North/east/south/west bounding box, e.g. "37.8,-122.4,37.7,-122.5"
    #[arg(long, value_name = "N,E,S,W", conflicts_with = "region")]
    bbox: Option<String>,
    /// Path to a GeoJSON file (Polygon, MultiPolygon, Feature, or FeatureCollection)
    #[arg(long, value_name = "FILE", conflicts_with = "bbox")]
    region: Option<String>,
    /// Minimum zoom level to extract; defaults to the source archive's minimum
    #[arg(long)]
    min_zoom: Option<u8>,
    /// Maximum zoom level to extract; defaults to the source archive's maximum
    #[arg(long)]
    max_zoom: Option<u8>,
}

fn parse_bbox(s: &str) -> Result<BoundingBox, Box<dyn std::error::Error>> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [n, e, s, w] = parts.as_slice() else {
        return Err("--bbox expects exactly 4 comma-separated values: N,E,S,W".into());
    };
    Ok(BoundingBox::from_nesw(
        n.parse()?,
        e.parse()?,
        s.parse()?,
        w.parse()?,
    ))
}

pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut output = std::fs::File::create(&args.output)?;

    let stats = match open_mmap_or_http(&args.source).await? {
        ReaderHandle::Mmap(reader) => run_extraction(&reader, &args, &mut output).await?,
        ReaderHandle::Http(reader) => run_extraction(&reader, &args, &mut output).await?,
    };

    println!("extracted {} tiles", stats.addressed_tiles());
    println!("tile contents: {}", stats.tile_contents());
    println!("transferred {} bytes", stats.total_tile_transfer_bytes());

    Ok(())
}

async fn run_extraction<B, C>(
    reader: &pmtiles::AsyncPmTilesReader<B, C>,
    args: &Args,
    output: &mut std::fs::File,
) -> Result<pmtiles::extract::ExtractStats, Box<dyn std::error::Error>>
where
    B: pmtiles::AsyncBackend + Sync + Send,
    C: pmtiles::DirectoryCache + Sync + Send,
{
    let mut extractor = Extractor::new(reader);
    if let Some(min_zoom) = args.min_zoom {
        extractor = extractor.min_zoom(min_zoom);
    }
    if let Some(max_zoom) = args.max_zoom {
        extractor = extractor.max_zoom(max_zoom);
    }

    if let Some(region_path) = &args.region {
        let geojson = std::fs::read_to_string(region_path)?;
        let region = Region::from_geojson_str(&geojson)?;
        Ok(extractor.extract_region_to_writer(&region, output).await?)
    } else if let Some(bbox) = &args.bbox {
        let bbox = parse_bbox(bbox)?;
        Ok(extractor.extract_bbox_to_writer(bbox, output).await?)
    } else {
        Err("extract requires either --bbox or --region".into())
    }
}
