//! Single-coordinator byte-range cache shared by all archives a server process
//! has open. A `CacheKey` pins a byte range to a specific archive and `ETag`;
//! `Coordinator::fetch` coalesces concurrent requests for the same key into
//! one fetch (mirroring [`crate::cache::HashMapCacheV2`]'s slot-coalescing
//! pattern, generalized from directories to arbitrary byte ranges) and evicts
//! by total cached bytes via `moka`'s weigher.
//!
//! `offset == length == 0` is reserved for the header+root-directory fetch:
//! callers publish the header under `(name, etag, 0, 0)` and the root
//! directory under `(name, etag, root_offset, root_length)` from that same
//! read, per the format's fixed 16 KiB initial fetch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use moka::future::Cache;

use crate::async_reader::AsyncBackend;
use crate::{PmtError, PmtResult};

/// Identifies one cached byte range: a specific archive, at a specific
/// `ETag`, at a specific offset/length. `offset == length == 0` is the
/// header slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Archive name as it appears in the request path.
    pub archive_name: Arc<str>,
    /// `ETag` of the remote object this range was read from, if known.
    pub etag: Option<Arc<str>>,
    /// Byte offset within the archive.
    pub offset: u64,
    /// Byte length of the range.
    pub length: u64,
}

impl CacheKey {
    /// The distinguished key for an archive's header+root-directory fetch.
    #[must_use]
    pub fn root(archive_name: Arc<str>, etag: Option<Arc<str>>) -> Self {
        Self {
            archive_name,
            etag,
            offset: 0,
            length: 0,
        }
    }
}

/// Coalescing, size-bounded cache of archive byte ranges.
///
/// Built on `moka`'s `get_with`, which already provides the single-flight
/// semantics the format's coordinator design calls for: concurrent requests
/// for a key not yet cached share one fetch instead of issuing duplicates.
pub struct Coordinator {
    cache: Cache<CacheKey, Bytes>,
    /// Last `ETag` observed per archive, used to pin `If-Match` on the next
    /// fetch and as the purge key when a read reports `RefreshRequired`.
    etags: RwLock<HashMap<Arc<str>, Arc<str>>>,
}

impl Coordinator {
    /// Creates a coordinator that evicts least-recently-used entries once the
    /// sum of cached byte lengths exceeds `cache_size_bytes`.
    #[must_use]
    pub fn new(cache_size_bytes: u64) -> Self {
        let cache = Cache::builder()
            .weigher(|_key: &CacheKey, value: &Bytes| {
                u32::try_from(value.len()).unwrap_or(u32::MAX)
            })
            .max_capacity(cache_size_bytes)
            .build();
        Self {
            cache,
            etags: RwLock::new(HashMap::new()),
        }
    }

    /// The `ETag` this coordinator last observed for `archive_name`, if any.
    #[must_use]
    pub fn known_etag(&self, archive_name: &str) -> Option<Arc<str>> {
        self.etags.read().unwrap().get(archive_name).cloned()
    }

    fn remember_etag(&self, archive_name: &Arc<str>, etag: Arc<str>) {
        self.etags
            .write()
            .unwrap()
            .insert(archive_name.clone(), etag);
    }

    fn forget_etag(&self, archive_name: &str) {
        self.etags.write().unwrap().remove(archive_name);
    }

    /// Fetches a byte range from `backend` through the cache, pinning the
    /// request to whatever `ETag` this coordinator last observed for
    /// `archive_name` (if any) via `If-Match`.
    ///
    /// On a `RefreshRequired` response the coordinator purges every cached
    /// range for `archive_name` and forgets the tracked `ETag`, so the
    /// caller's retry goes out unconditionally and cannot itself trigger a
    /// further `RefreshRequired` — bounding the retry to exactly one.
    ///
    /// # Errors
    /// Propagates whatever error the backend read returns, or
    /// `PmtError::RefreshRequired` if the pinned `ETag` no longer matches.
    pub async fn fetch_range<B>(
        &self,
        backend: &B,
        archive_name: &Arc<str>,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, Arc<PmtError>>
    where
        B: AsyncBackend + Sync + Send,
    {
        let if_match = self.known_etag(archive_name);
        let stale_etag = if_match.clone();
        let key = CacheKey {
            archive_name: archive_name.clone(),
            etag: if_match.clone(),
            offset,
            length,
        };

        // moka's cached value type is just `Bytes`; the etag the backend
        // observed on a live fetch is smuggled out through this side channel
        // so it can be recorded even when the fetch was coalesced into
        // another caller's in-flight request.
        let observed_etag: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let observed_etag_for_fetch = observed_etag.clone();

        #[allow(clippy::cast_possible_truncation)]
        let fetch = async move {
            let (bytes, etag) = backend
                .read_with_etag(offset as usize, length as usize, if_match.as_deref())
                .await?;
            *observed_etag_for_fetch.lock().unwrap() = etag;
            Ok(bytes)
        };

        match self.cache.try_get_with(key, fetch).await {
            Ok(bytes) => {
                if let Some(etag) = observed_etag.lock().unwrap().take() {
                    self.remember_etag(archive_name, Arc::from(etag));
                }
                Ok(bytes)
            }
            Err(err) => {
                if matches!(err.as_ref(), PmtError::RefreshRequired(_)) {
                    self.purge_archive(archive_name, stale_etag.as_deref()).await;
                    self.forget_etag(archive_name);
                }
                Err(err)
            }
        }
    }

    /// Returns the cached bytes for `key`, running `fetch` to populate it on
    /// a miss. Concurrent callers for the same `key` share one `fetch` call.
    ///
    /// The error side is `Arc<PmtError>` rather than `PmtError` because
    /// `moka` hands the same error back to every waiter that shared the
    /// failed fetch, and `PmtError` isn't `Clone` (it wraps non-`Clone`
    /// I/O and HTTP error types).
    ///
    /// # Errors
    /// Propagates whatever error `fetch` returns.
    pub async fn fetch<F>(&self, key: CacheKey, fetch: F) -> Result<Bytes, Arc<PmtError>>
    where
        F: Future<Output = PmtResult<Bytes>>,
    {
        self.cache.try_get_with(key, fetch).await
    }

    /// Purges every cached range belonging to `archive_name` whose `etag`
    /// equals either `purge_etag` or the entry's own (stale) etag. Used when
    /// a range read returns `RefreshRequired` mid-request: the whole
    /// archive's cache state is dropped so the retry cannot observe a mix of
    /// directory bytes from two different remote versions.
    pub async fn purge_archive(&self, archive_name: &str, purge_etag: Option<&str>) {
        let archive_name = archive_name.to_string();
        let purge_etag = purge_etag.map(str::to_string);
        self.cache
            .invalidate_entries_if(move |key, _value| {
                key.archive_name.as_ref() == archive_name
                    && purge_etag
                        .as_deref()
                        .is_none_or(|p| key.etag.as_deref() == Some(p))
            })
            .ok();
    }

    /// Number of distinct ranges currently cached, for diagnostics.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_fetches_for_same_key_coalesce() {
        let coordinator = Arc::new(Coordinator::new(1024 * 1024));
        let fetch_count = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::root(Arc::from("demo"), Some(Arc::from("etag-1")));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            let fetch_count = fetch_count.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .fetch(key, async {
                        fetch_count.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        Ok(Bytes::from_static(b"hello"))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), Bytes::from_static(b"hello"));
        }
        assert_eq!(fetch_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn purge_drops_matching_archive_entries() {
        let coordinator = Coordinator::new(1024 * 1024);
        let key_a = CacheKey::root(Arc::from("demo"), Some(Arc::from("etag-1")));
        let key_b = CacheKey::root(Arc::from("other"), Some(Arc::from("etag-2")));

        coordinator.fetch(key_a.clone(), async { Ok(Bytes::from_static(b"a")) }).await.unwrap();
        coordinator.fetch(key_b.clone(), async { Ok(Bytes::from_static(b"b")) }).await.unwrap();
        coordinator.cache.run_pending_tasks().await;
        assert_eq!(coordinator.entry_count(), 2);

        coordinator.purge_archive("demo", Some("etag-1")).await;
        coordinator.cache.run_pending_tasks().await;
        assert_eq!(coordinator.entry_count(), 1);
    }

    struct FlakyBackend {
        calls: AtomicUsize,
    }

    impl AsyncBackend for FlakyBackend {
        async fn read(&self, _offset: usize, _length: usize) -> PmtResult<Bytes> {
            unreachable!("read_with_etag is overridden")
        }

        async fn read_with_etag(
            &self,
            _offset: usize,
            _length: usize,
            if_match: Option<&str>,
        ) -> PmtResult<(Bytes, Option<String>)> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Ok((Bytes::from_static(b"v1"), Some("etag-1".to_string())))
            } else if if_match == Some("etag-1") {
                Err(PmtError::RefreshRequired(Some("etag-2".to_string())))
            } else {
                Ok((Bytes::from_static(b"v2"), Some("etag-2".to_string())))
            }
        }
    }

    #[tokio::test]
    async fn fetch_range_tracks_etag_and_retries_once_after_refresh() {
        let coordinator = Coordinator::new(1024 * 1024);
        let backend = FlakyBackend { calls: AtomicUsize::new(0) };
        let name: Arc<str> = Arc::from("demo");

        let first = coordinator.fetch_range(&backend, &name, 0, 2).await.unwrap();
        assert_eq!(first, Bytes::from_static(b"v1"));
        assert_eq!(coordinator.known_etag("demo").as_deref(), Some("etag-1"));

        let err = coordinator.fetch_range(&backend, &name, 10, 2).await.unwrap_err();
        assert!(matches!(err.as_ref(), PmtError::RefreshRequired(_)));
        assert_eq!(coordinator.known_etag("demo"), None);

        let retried = coordinator.fetch_range(&backend, &name, 10, 2).await.unwrap();
        assert_eq!(retried, Bytes::from_static(b"v2"));
        assert_eq!(coordinator.known_etag("demo").as_deref(), Some("etag-2"));
    }
}
