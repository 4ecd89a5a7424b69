//! Shared "open a local or remote archive" helper used by every subcommand
//! that reads an existing archive.

use pmtiles::{AsyncPmTilesReader, HttpBackend, MmapBackend};
use reqwest::Client;

/// Opens `path` as either an HTTP(S) URL or a local file, mirroring the
/// dispatch `show` already does.
///
/// # Errors
/// Propagates whatever error opening the backend or parsing the header produces.
pub async fn open_mmap_or_http(
    path: &str,
) -> Result<ReaderHandle, Box<dyn std::error::Error>> {
    if path.starts_with("http://") || path.starts_with("https://") {
        let client = Client::builder()
            .user_agent(format!("pmtiles-rs-cli/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        let backend = HttpBackend::try_from(client, path)?;
        let reader = AsyncPmTilesReader::try_from_source(backend).await?;
        Ok(ReaderHandle::Http(reader))
    } else {
        let backend = MmapBackend::try_from(path).await?;
        let reader = AsyncPmTilesReader::try_from_source(backend).await?;
        Ok(ReaderHandle::Mmap(reader))
    }
}

/// Either backend `show` and other read-only commands can open; avoids
/// forcing every caller to be generic over the backend type.
pub enum ReaderHandle {
    /// A `file://`-style local archive opened with `mmap`.
    Mmap(AsyncPmTilesReader<MmapBackend>),
    /// An `http(s)://` archive fetched via range requests.
    Http(AsyncPmTilesReader<HttpBackend>),
}
