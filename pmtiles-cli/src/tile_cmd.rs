//! `tile` subcommand: write a single tile's raw bytes to stdout.

use std::io::Write;

use clap::Parser;
use pmtiles::TileCoord;

use crate::open::{ReaderHandle, open_mmap_or_http};

#[derive(Parser, Debug)]
#[command(about = "Fetch a single tile and write its bytes to stdout")]
pub struct Args {
    /// Path to `PMTiles` archive (local file or HTTP URL)
    #[arg(value_name = "PATH")]
    path: String,
    /// Zoom level
    z: u8,
    /// Tile column
    x: u64,
    /// Tile row
    y: u64,
}

pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let coord = TileCoord::new(args.z, args.x, args.y)?;

    let data = match open_mmap_or_http(&args.path).await? {
        ReaderHandle::Mmap(reader) => reader.get_tile(coord).await?,
        ReaderHandle::Http(reader) => reader.get_tile(coord).await?,
    };

    match data {
        Some(bytes) => {
            std::io::stdout().write_all(&bytes)?;
            Ok(())
        }
        None => Err(format!("no tile at {}/{}/{}", args.z, args.x, args.y).into()),
    }
}
