//! `verify` subcommand: re-walk an archive's directories and report any
//! invariant violations.

use std::sync::Arc;

use clap::Parser;
use pmtiles::{AsyncPmTilesReader, DirectoryCache, describe_issue, verify_archive};

use crate::open::{ReaderHandle, open_mmap_or_http};

#[derive(Parser, Debug)]
#[command(about = "Verify an archive's internal consistency")]
pub struct Args {
    /// Path to `PMTiles` archive (local file or HTTP URL)
    #[arg(value_name = "PATH")]
    path: String,
}

pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let report = match open_mmap_or_http(&args.path).await? {
        ReaderHandle::Mmap(reader) => verify_reader(Arc::new(reader)).await?,
        ReaderHandle::Http(reader) => verify_reader(Arc::new(reader)).await?,
    };

    if report.is_ok() {
        println!("OK: no issues found");
        return Ok(());
    }

    for issue in &report.issues {
        println!("{}", describe_issue(issue));
    }
    Err(format!("{} issue(s) found", report.issues.len()).into())
}

async fn verify_reader<B, C>(
    reader: Arc<AsyncPmTilesReader<B, C>>,
) -> Result<pmtiles::VerifyReport, Box<dyn std::error::Error>>
where
    B: pmtiles::AsyncBackend + Send + Sync,
    C: DirectoryCache + Send + Sync,
{
    Ok(verify_archive(&reader).await?)
}
