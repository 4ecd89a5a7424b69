//! `sync` subcommand: bring a local archive up to date with a remote one
//! using a `.sync` sidecar, fetching only the blocks that actually differ.

use std::path::Path;
use std::sync::Arc;

use bytesize::ByteSize;
use clap::Parser;
use pmtiles::{
    AsyncPmTilesReader, MmapBackend, SyncAction, apply_sync_plan, parse_sync_file,
    resolve_remote_offsets, sync_archive,
};

use crate::open::{ReaderHandle, open_mmap_or_http};

#[derive(Parser, Debug)]
#[command(about = "Sync a local archive against a remote one using a .sync sidecar")]
pub struct Args {
    /// Path to the local `PMTiles` archive to update
    #[arg(value_name = "EXISTING")]
    existing: String,
    /// URL or path of the remote/reference archive the sidecar describes
    #[arg(value_name = "REMOTE")]
    remote: String,
    /// Path to a `.sync` sidecar, typically downloaded alongside the remote archive
    #[arg(value_name = "SYNCFILE")]
    sync_file: String,
}

pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let backend = MmapBackend::try_from(args.existing.as_str()).await?;
    let local = Arc::new(AsyncPmTilesReader::try_from_source(backend).await?);

    let sync_bytes = std::fs::read(&args.sync_file)?;
    let (_header, blocks) = parse_sync_file(&sync_bytes)?;

    let dest = Path::new(&args.existing);
    let plan = match open_mmap_or_http(&args.remote).await? {
        ReaderHandle::Mmap(reader) => {
            let remote = Arc::new(reader);
            let resolved = resolve_remote_offsets(&remote, &blocks).await?;
            let plan = sync_archive(&local, &resolved).await?;
            apply_sync_plan(&local, &remote, &plan, dest).await?;
            plan
        }
        ReaderHandle::Http(reader) => {
            let remote = Arc::new(reader);
            let resolved = resolve_remote_offsets(&remote, &blocks).await?;
            let plan = sync_archive(&local, &resolved).await?;
            apply_sync_plan(&local, &remote, &plan, dest).await?;
            plan
        }
    };

    let have = plan.actions.iter().filter(|a| matches!(a, SyncAction::Have { .. })).count();
    let wanted = plan.actions.len() - have;

    println!("{have} block(s) already present locally");
    println!("{wanted} block(s) fetched from remote ({})", ByteSize::b(plan.wanted_bytes));
    println!("total archive size: {}", ByteSize::b(plan.total_bytes));

    Ok(())
}
