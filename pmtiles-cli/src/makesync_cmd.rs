//! `makesync` subcommand: emit a content-addressed sidecar for an archive.

use std::sync::Arc;

use clap::Parser;
use pmtiles::{AsyncPmTilesReader, MmapBackend, make_sync_file};

#[derive(Parser, Debug)]
#[command(about = "Emit a .sync sidecar describing an archive's content-addressed blocks")]
pub struct Args {
    /// Path to the local `PMTiles` archive
    #[arg(value_name = "INPUT")]
    input: String,
    /// Target block size in kilobytes
    #[arg(long, default_value_t = 256)]
    block_size_kb: u64,
}

pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let backend = MmapBackend::try_from(args.input.as_str()).await?;
    let reader = Arc::new(AsyncPmTilesReader::try_from_source(backend).await?);

    let sync_path = format!("{}.sync", args.input);
    let mut out = std::fs::File::create(&sync_path)?;
    make_sync_file(&reader, args.block_size_kb, &mut out).await?;

    println!("wrote {sync_path}");
    Ok(())
}
