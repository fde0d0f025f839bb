//! Cache-aside for the external public stats document.
//!
//! The upstream document is fetched rarely and served from the store:
//!
//! 1. Without `force_refresh`, any cached snapshot is returned as-is (age is
//!    bounded only by the TTL it was stored with).
//! 2. On a miss or a forced refresh, one upstream fetch is attempted with a
//!    short timeout. A valid document is stored with a TTL and returned.
//! 3. If the fetch fails (timeout, non-2xx, malformed shape) the previous
//!    cached snapshot is returned unchanged, or `None` if there is none.
//!
//! Nothing past [`StatsCache::get_snapshot`] ever sees an error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::kv::{Key, KeyPart, KvStore};

/// Default upstream timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_millis(800);

/// Default lifetime of a cached snapshot.
pub const DEFAULT_SNAPSHOT_TTL: Duration = Duration::from_secs(3600);

/// Why a refresh did not produce a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("upstream timed out")]
    Timeout,

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("upstream request failed: {0}")]
    Http(String),

    #[error("malformed snapshot: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

/// Public stats document published by the upstream app.
///
/// Only the fields below are required; anything else is carried through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub generated_at: String,
    pub aggregation: String,
    pub calendar: Map<String, Value>,
    pub categories: Vec<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Snapshot {
    /// Parse and validate an upstream document.
    pub fn from_value(value: Value) -> Result<Self, FetchError> {
        let snapshot: Self =
            serde_json::from_value(value).map_err(|e| FetchError::Malformed(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    fn validate(&self) -> Result<(), FetchError> {
        if self.generated_at.trim().is_empty() {
            return Err(FetchError::Malformed("generatedAt is empty".to_string()));
        }
        if self.aggregation.trim().is_empty() {
            return Err(FetchError::Malformed("aggregation is empty".to_string()));
        }
        Ok(())
    }
}

/// Where snapshots come from.
pub trait SnapshotSource: Send + Sync {
    /// Fetch the raw upstream document.
    fn fetch(&self) -> impl Future<Output = Result<Value, FetchError>> + Send;
}

/// Fetches the snapshot over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    url: String,
}

impl HttpSnapshotSource {
    /// The request is abandoned (and its connection dropped) once `timeout` elapses.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("folio/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Http(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self) -> Result<Value, FetchError> {
        let resp = self.client.get(&self.url).send().await?;

        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status().as_u16()));
        }

        Ok(resp.json::<Value>().await?)
    }
}

/// Store-backed cache of the external stats snapshot.
pub struct StatsCache<S> {
    kv: Arc<dyn KvStore>,
    source: S,
    key: Key,
    ttl: Duration,
}

impl<S: SnapshotSource> StatsCache<S> {
    pub fn new(kv: Arc<dyn KvStore>, source: S, ttl: Duration) -> Self {
        Self {
            kv,
            source,
            key: Key::new(vec![
                KeyPart::from("external_stats"),
                KeyPart::from("memoato"),
            ]),
            ttl,
        }
    }

    /// Cached snapshot, refreshed from upstream on a miss or when forced.
    pub async fn get_snapshot(&self, force_refresh: bool) -> Option<Snapshot> {
        let cached = self.cached();

        if !force_refresh {
            if let Some(snapshot) = cached {
                counter!("stats_cache_hits_total").increment(1);
                return Some(snapshot);
            }
        }

        match self.refresh().await {
            Ok(snapshot) => {
                counter!("stats_cache_refresh_total", "outcome" => "ok").increment(1);
                Some(snapshot)
            }
            Err(err) => {
                counter!("stats_cache_refresh_total", "outcome" => "failed").increment(1);
                tracing::warn!(
                    error = %err,
                    fallback = cached.is_some(),
                    "stats snapshot refresh failed"
                );
                cached
            }
        }
    }

    /// Read the cached snapshot. Unreadable entries count as a miss.
    fn cached(&self) -> Option<Snapshot> {
        let entry = match self.kv.get(&self.key) {
            Ok(entry) => entry?,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read cached stats snapshot");
                return None;
            }
        };

        match serde_json::from_value(entry.value) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(error = %e, "failed to deserialize cached stats snapshot");
                None
            }
        }
    }

    async fn refresh(&self) -> Result<Snapshot, FetchError> {
        let raw = self.source.fetch().await?;
        let snapshot = Snapshot::from_value(raw)?;

        match serde_json::to_value(&snapshot) {
            Ok(value) => {
                if let Err(e) = self.kv.set(&self.key, value, Some(self.ttl)) {
                    // Still serve the fresh snapshot; it just isn't cached.
                    tracing::warn!(error = %e, "failed to store stats snapshot");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize stats snapshot"),
        }

        tracing::debug!(generated_at = %snapshot.generated_at, "stats snapshot refreshed");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn document(generated_at: &str) -> Value {
        json!({
            "generatedAt": generated_at,
            "aggregation": "daily",
            "calendar": {"2024-05-01": 3},
            "categories": [{"name": "reading", "count": 12}],
            "version": 2
        })
    }

    /// Source that replays scripted responses and counts calls.
    struct StubSource {
        responses: Mutex<Vec<Result<Value, FetchError>>>,
        calls: AtomicU32,
    }

    impl StubSource {
        fn new(responses: Vec<Result<Value, FetchError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SnapshotSource for StubSource {
        async fn fetch(&self) -> Result<Value, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Err(FetchError::Http("no scripted response".to_string()))
            } else {
                responses.remove(0)
            }
        }
    }

    fn cache(
        responses: Vec<Result<Value, FetchError>>,
    ) -> (StatsCache<StubSource>, Arc<MemoryStore>) {
        let kv = Arc::new(MemoryStore::new());
        let cache = StatsCache::new(
            kv.clone(),
            StubSource::new(responses),
            DEFAULT_SNAPSHOT_TTL,
        );
        (cache, kv)
    }

    #[test]
    fn test_snapshot_keeps_extra_fields() {
        let snapshot = Snapshot::from_value(document("2024-05-01T00:00:00Z")).unwrap();
        assert_eq!(snapshot.aggregation, "daily");
        assert_eq!(snapshot.extra.get("version"), Some(&json!(2)));

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value, document("2024-05-01T00:00:00Z"));
    }

    #[test]
    fn test_snapshot_validation() {
        let mut missing_categories = document("t");
        missing_categories.as_object_mut().unwrap().remove("categories");
        assert!(matches!(
            Snapshot::from_value(missing_categories),
            Err(FetchError::Malformed(_))
        ));

        let mut bad_calendar = document("t");
        bad_calendar["calendar"] = json!([1, 2]);
        assert!(Snapshot::from_value(bad_calendar).is_err());

        let mut bad_category = document("t");
        bad_category["categories"] = json!(["reading"]);
        assert!(Snapshot::from_value(bad_category).is_err());

        assert!(Snapshot::from_value(document("  ")).is_err());
        assert!(Snapshot::from_value(json!("not an object")).is_err());
    }

    #[tokio::test]
    async fn test_miss_fetches_and_stores() {
        let (cache, kv) = cache(vec![Ok(document("first"))]);

        let snapshot = cache.get_snapshot(false).await.unwrap();
        assert_eq!(snapshot.generated_at, "first");
        assert_eq!(cache.source.calls(), 1);
        assert_eq!(kv.len(), 1);
    }

    #[tokio::test]
    async fn test_cached_value_served_without_fetch() {
        let (cache, _kv) = cache(vec![Ok(document("first")), Ok(document("second"))]);
        cache.get_snapshot(false).await.unwrap();

        for _ in 0..3 {
            let snapshot = cache.get_snapshot(false).await.unwrap();
            assert_eq!(snapshot.generated_at, "first");
        }
        assert_eq!(cache.source.calls(), 1);
    }

    #[tokio::test]
    async fn test_force_refresh_replaces_cache() {
        let (cache, _kv) = cache(vec![Ok(document("first")), Ok(document("second"))]);
        cache.get_snapshot(false).await.unwrap();

        let snapshot = cache.get_snapshot(true).await.unwrap();
        assert_eq!(snapshot.generated_at, "second");
        assert_eq!(cache.get_snapshot(false).await.unwrap().generated_at, "second");
        assert_eq!(cache.source.calls(), 2);
    }

    #[tokio::test]
    async fn test_force_refresh_timeout_keeps_previous() {
        let (cache, kv) = cache(vec![Ok(document("first")), Err(FetchError::Timeout)]);
        cache.get_snapshot(false).await.unwrap();
        let before = kv.get(&cache.key).unwrap().unwrap();

        let snapshot = cache.get_snapshot(true).await.unwrap();
        assert_eq!(snapshot.generated_at, "first");

        let after = kv.get(&cache.key).unwrap().unwrap();
        assert_eq!(after.versionstamp, before.versionstamp);
        assert_eq!(after.value, before.value);
    }

    #[tokio::test]
    async fn test_malformed_without_cache_returns_none() {
        let mut doc = document("first");
        doc.as_object_mut().unwrap().remove("categories");
        let (cache, kv) = cache(vec![Ok(doc)]);

        assert!(cache.get_snapshot(false).await.is_none());
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn test_upstream_error_without_cache_returns_none() {
        let (cache, kv) = cache(vec![Err(FetchError::Status(503))]);
        assert!(cache.get_snapshot(true).await.is_none());
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_cache_entry_is_a_miss() {
        let (cache, kv) = cache(vec![Ok(document("fresh"))]);
        kv.set(&cache.key, json!({"garbage": true}), None).unwrap();

        let snapshot = cache.get_snapshot(false).await.unwrap();
        assert_eq!(snapshot.generated_at, "fresh");
        assert_eq!(cache.source.calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_cache_refetches() {
        let kv = Arc::new(MemoryStore::new());
        let cache = StatsCache::new(
            kv,
            StubSource::new(vec![Ok(document("first")), Ok(document("second"))]),
            Duration::from_millis(0),
        );
        cache.get_snapshot(false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let snapshot = cache.get_snapshot(false).await.unwrap();
        assert_eq!(snapshot.generated_at, "second");
    }

    #[test]
    fn test_http_source_builds() {
        let url = "https://example.com/stats.json";
        let source = HttpSnapshotSource::new(url, DEFAULT_FETCH_TIMEOUT).unwrap();
        assert_eq!(source.url(), "https://example.com/stats.json");
    }

    /// Accepts connections and hands each socket to `respond`.
    async fn local_upstream<F, Fut>(respond: F) -> String
    where
        F: Fn(tokio::net::TcpStream) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(respond(socket));
            }
        });
        format!("http://{addr}/api/public-stats")
    }

    #[tokio::test]
    async fn test_http_source_times_out_on_silent_upstream() {
        // Accept, read nothing, never answer
        let url = local_upstream(|socket| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        })
        .await;
        let source = HttpSnapshotSource::new(url, Duration::from_millis(100)).unwrap();

        let started = std::time::Instant::now();
        let result = source.fetch().await;

        assert!(matches!(result, Err(FetchError::Timeout)), "got {result:?}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_http_source_reports_error_status() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let url = local_upstream(|mut socket| async move {
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\n\
                content-length: 0\r\nconnection: close\r\n\r\n";
            let _ = socket.write_all(response).await;
        })
        .await;
        let source = HttpSnapshotSource::new(url, DEFAULT_FETCH_TIMEOUT).unwrap();

        let result = source.fetch().await;
        assert!(matches!(result, Err(FetchError::Status(503))), "got {result:?}");
    }

    #[tokio::test]
    async fn test_silent_upstream_falls_back_to_cached_snapshot() {
        let url = local_upstream(|socket| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        })
        .await;
        let kv = Arc::new(MemoryStore::new());
        let source = HttpSnapshotSource::new(url, Duration::from_millis(100)).unwrap();
        let cache = StatsCache::new(kv.clone(), source, DEFAULT_SNAPSHOT_TTL);

        assert!(cache.get_snapshot(false).await.is_none());

        let cached = Snapshot::from_value(document("cached")).unwrap();
        kv.set(&cache.key, serde_json::to_value(&cached).unwrap(), None)
            .unwrap();

        let snapshot = cache.get_snapshot(true).await.unwrap();
        assert_eq!(snapshot.generated_at, "cached");
    }
}
