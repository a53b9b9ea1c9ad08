use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tracing::{debug, info, warn};

use crate::store::{ArchiveRecord, ArchiveStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Transport-level failure (connect, read, truncation).
    Transport(String),
    /// Origin answered with a non-success status.
    Status(u16),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Transport(msg) => write!(f, "archive download failed: {msg}"),
            FetchError::Status(code) => write!(f, "archive origin returned status {code}"),
        }
    }
}

impl std::error::Error for FetchError {}

/// An in-progress download: the advertised total (when the origin reports
/// one) and the chunk stream.
pub struct ArchiveFetch {
    pub total: Option<u64>,
    pub stream: BoxStream<'static, Result<Bytes, FetchError>>,
}

/// Byte source for archive downloads. Abstracted so the download/caching
/// logic is testable without a live origin.
pub trait ArchiveSource: Send + Sync {
    fn fetch(
        &self,
        url: &str,
    ) -> impl std::future::Future<Output = Result<ArchiveFetch, FetchError>> + Send;
}

/// Production source: streamed HTTP GET against the remote archive origin.
#[derive(Debug, Clone, Default)]
pub struct HttpArchiveSource {
    client: reqwest::Client,
}

impl HttpArchiveSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl ArchiveSource for HttpArchiveSource {
    async fn fetch(&self, url: &str) -> Result<ArchiveFetch, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status().as_u16()));
        }
        let total = resp.content_length();
        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| FetchError::Transport(e.to_string())));
        Ok(ArchiveFetch {
            total,
            stream: Box::pin(stream),
        })
    }
}

/// Idempotent archive acquisition: served from the durable store when
/// present, otherwise streamed from the origin, cached with exactly one
/// all-or-nothing `put`, and returned.
///
/// `on_progress` receives cumulative `(bytes_loaded, bytes_total)` values;
/// `bytes_loaded` is monotonically non-decreasing and ends equal to the
/// total when the origin reports one. A failed or aborted download writes
/// nothing. Store read/write failures degrade to download/serve-from-memory
/// rather than propagating.
pub async fn ensure_archive_cached<S, F>(
    store: &mut impl ArchiveStore,
    source: &S,
    archive_id: &str,
    source_url: &str,
    mut on_progress: F,
) -> Result<Bytes, FetchError>
where
    S: ArchiveSource,
    F: FnMut(u64, Option<u64>),
{
    match store.get(archive_id) {
        Ok(Some(record)) => {
            debug!(archive_id, bytes = record.len(), "archive served from cache");
            let len = record.len() as u64;
            on_progress(len, Some(len));
            return Ok(record.payload);
        }
        Ok(None) => {}
        Err(err) => {
            warn!(archive_id, error = %err, "archive store read failed, falling back to download");
        }
    }

    let fetch = source.fetch(source_url).await?;
    let total = fetch.total;
    let mut stream = fetch.stream;

    let mut buf = BytesMut::with_capacity(total.unwrap_or(0) as usize);
    on_progress(0, total);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buf.extend_from_slice(&chunk);
        on_progress(buf.len() as u64, total);
    }
    if let Some(total) = total
        && (buf.len() as u64) != total
    {
        return Err(FetchError::Transport(format!(
            "truncated download: got {} of {total} bytes",
            buf.len()
        )));
    }

    let payload = buf.freeze();
    let record = ArchiveRecord {
        archive_id: archive_id.to_string(),
        payload: payload.clone(),
        stored_at_ms: now_ms(),
    };
    match store.put(record) {
        Ok(()) => info!(archive_id, bytes = payload.len(), "archive cached"),
        Err(err) => {
            warn!(archive_id, error = %err, "archive store write failed, serving from memory only");
        }
    }
    Ok(payload)
}

/// Explicit cache clear: one archive, or everything when `archive_id` is
/// `None`.
pub fn clear_cache(
    store: &mut impl ArchiveStore,
    archive_id: Option<&str>,
) -> Result<(), StoreError> {
    match archive_id {
        Some(id) => store.remove(id).map(|_| ()),
        None => store.clear(),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use futures_util::stream;
    use pretty_assertions::assert_eq;

    use super::{ArchiveFetch, ArchiveSource, FetchError, clear_cache, ensure_archive_cached};
    use crate::store::{ArchiveStore, MemoryArchiveStore};

    /// Source yielding a fixed payload in 16-byte chunks, with optional
    /// mid-stream failure injection.
    struct StaticSource {
        payload: Vec<u8>,
        advertised_total: Option<u64>,
        fail_after_chunks: Option<usize>,
        fetches: AtomicUsize,
    }

    impl StaticSource {
        fn new(payload: Vec<u8>) -> Self {
            let total = payload.len() as u64;
            Self {
                payload,
                advertised_total: Some(total),
                fail_after_chunks: None,
                fetches: AtomicUsize::new(0),
            }
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl ArchiveSource for StaticSource {
        async fn fetch(&self, _url: &str) -> Result<ArchiveFetch, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let mut chunks: Vec<Result<Bytes, FetchError>> = self
                .payload
                .chunks(16)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            if let Some(n) = self.fail_after_chunks {
                chunks.truncate(n);
                chunks.push(Err(FetchError::Transport("connection reset".to_string())));
            }
            Ok(ArchiveFetch {
                total: self.advertised_total,
                stream: Box::pin(stream::iter(chunks)),
            })
        }
    }

    fn payload() -> Vec<u8> {
        (0..=255u8).cycle().take(1000).collect()
    }

    #[tokio::test]
    async fn cold_miss_downloads_caches_and_reports_progress() {
        let mut store = MemoryArchiveStore::new();
        let source = StaticSource::new(payload());
        let mut progress: Vec<(u64, Option<u64>)> = Vec::new();

        let bytes = ensure_archive_cached(&mut store, &source, "geo-pack-v1", "http://origin/geo", |loaded, total| {
            progress.push((loaded, total));
        })
        .await
        .unwrap();

        assert_eq!(&bytes[..], &payload()[..]);
        assert_eq!(source.fetches(), 1);

        // Progress is monotonically non-decreasing and ends at the total.
        for pair in progress.windows(2) {
            assert!(pair[1].0 >= pair[0].0);
        }
        let last = progress.last().unwrap();
        assert_eq!(*last, (1000, Some(1000)));

        // Cached payload is byte-identical.
        let record = store.get("geo-pack-v1").unwrap().unwrap();
        assert_eq!(record.payload, bytes);
    }

    #[tokio::test]
    async fn warm_path_skips_the_second_download() {
        let mut store = MemoryArchiveStore::new();
        let source = StaticSource::new(payload());

        let first =
            ensure_archive_cached(&mut store, &source, "geo-pack-v1", "http://origin/geo", |_, _| {})
                .await
                .unwrap();
        let second =
            ensure_archive_cached(&mut store, &source, "geo-pack-v1", "http://origin/geo", |_, _| {})
                .await
                .unwrap();

        assert_eq!(first, second);
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn midstream_failure_writes_nothing() {
        let mut store = MemoryArchiveStore::new();
        let mut source = StaticSource::new(payload());
        source.fail_after_chunks = Some(3);

        let result =
            ensure_archive_cached(&mut store, &source, "geo-pack-v1", "http://origin/geo", |_, _| {})
                .await;

        assert!(matches!(result, Err(FetchError::Transport(_))));
        assert_eq!(store.get("geo-pack-v1").unwrap(), None);
    }

    #[tokio::test]
    async fn truncated_stream_is_an_error_and_writes_nothing() {
        let mut store = MemoryArchiveStore::new();
        let mut source = StaticSource::new(payload());
        // Origin advertises more than it delivers.
        source.advertised_total = Some(5000);

        let result =
            ensure_archive_cached(&mut store, &source, "geo-pack-v1", "http://origin/geo", |_, _| {})
                .await;

        assert!(matches!(result, Err(FetchError::Transport(_))));
        assert_eq!(store.get("geo-pack-v1").unwrap(), None);
    }

    #[tokio::test]
    async fn clear_cache_by_id_and_all() {
        let mut store = MemoryArchiveStore::new();
        let source = StaticSource::new(payload());
        let _ = ensure_archive_cached(&mut store, &source, "a", "http://origin/a", |_, _| {})
            .await
            .unwrap();
        let _ = ensure_archive_cached(&mut store, &source, "b", "http://origin/b", |_, _| {})
            .await
            .unwrap();

        clear_cache(&mut store, Some("a")).unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        assert!(store.get("b").unwrap().is_some());

        clear_cache(&mut store, None).unwrap();
        assert!(store.is_empty());
    }
}
