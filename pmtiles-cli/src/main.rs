mod extract_cmd;
mod makesync_cmd;
mod merge_cmd;
mod open;
mod show;
mod sync_cmd;
mod tile_cmd;
mod verify_cmd;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pmtiles")]
#[command(about = "PMTiles CLI tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect a local or remote archive
    Show(show::Args),
    /// Fetch a single tile and write its bytes to stdout
    Tile(tile_cmd::Args),
    /// Re-walk an archive's directories and report any invariant violations
    Verify(verify_cmd::Args),
    /// Merge several disjoint clustered archives into one
    Merge(merge_cmd::Args),
    /// Extract a bounding box or GeoJSON region into a new archive
    Extract(extract_cmd::Args),
    /// Emit a .sync sidecar for an archive
    Makesync(makesync_cmd::Args),
    /// Sync a local archive against a remote one using a .sync sidecar
    Sync(sync_cmd::Args),
    /// Print the CLI version
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger from RUST_LOG environment variable
    // Example: RUST_LOG=debug pmtiles show ...
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Show(args) => show::run(args).await,
        Commands::Tile(args) => tile_cmd::run(args).await,
        Commands::Verify(args) => verify_cmd::run(args).await,
        Commands::Merge(args) => merge_cmd::run(args).await,
        Commands::Extract(args) => extract_cmd::run(args).await,
        Commands::Makesync(args) => makesync_cmd::run(args).await,
        Commands::Sync(args) => sync_cmd::run(args).await,
        Commands::Version => {
            println!("pmtiles-cli {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
