//! `merge` subcommand: combine disjoint clustered archives into one.

use std::sync::Arc;

use clap::Parser;
use pmtiles::{AsyncPmTilesReader, MmapBackend, merge_archives};

#[derive(Parser, Debug)]
#[command(about = "Merge several disjoint clustered archives into one")]
pub struct Args {
    /// Input archives to merge; their tile-id sets must be pairwise disjoint
    #[arg(value_name = "INPUT", required = true, num_args = 1..)]
    inputs: Vec<String>,
    /// Output archive path
    #[arg(value_name = "OUTPUT")]
    output: String,
}

pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.inputs.len() < 2 {
        return Err("merge requires at least two input archives".into());
    }

    let mut readers = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        let backend = MmapBackend::try_from(path.as_str()).await?;
        let reader = AsyncPmTilesReader::try_from_source(backend).await?;
        readers.push(Arc::new(reader));
    }

    let mut out = std::fs::File::create(&args.output)?;
    let stats = merge_archives(&readers, &mut out).await?;

    println!("merged {} archives into {}", readers.len(), args.output);
    println!("addressed tiles: {}", stats.addressed_tiles);
    println!("tile entries: {}", stats.tile_entries);
    println!("tile contents: {}", stats.tile_contents);
    println!("tile data bytes: {}", stats.tile_data_length);

    Ok(())
}
