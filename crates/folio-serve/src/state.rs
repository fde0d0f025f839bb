//! Application state shared across all request handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use folio_core::{
    Analytics, CounterStore, HttpSnapshotSource, KvStore, Likes, MemoryStore, RetryPolicy,
    SqliteStore, StatsCache,
};

use crate::cache::{self, ResponseCache};
use crate::config::Config;

/// Timeout for resolving a Lightning address upstream.
const LIGHTNING_TIMEOUT: Duration = Duration::from_secs(3);

/// How often expired click events and snapshots are purged from the store.
pub const PURGE_INTERVAL: Duration = Duration::from_secs(600);

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,

    /// Backing key-value store.
    pub store: Arc<dyn KvStore>,

    /// Page-view and click tracking.
    pub analytics: Analytics,

    /// Per-entity like counters.
    pub likes: Likes,

    /// External public stats snapshot cache.
    pub stats: Arc<StatsCache<HttpSnapshotSource>>,

    /// Short-lived cache for the aggregate stats report.
    pub report_cache: ResponseCache,

    /// HTTP client for well-known resolution (Lightning).
    pub http: reqwest::Client,
}

impl AppState {
    /// Create application state, opening the configured store.
    ///
    /// Without `FOLIO_DB_PATH` counters live in memory and vanish on restart.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn KvStore> = match &config.db_path {
            Some(path) => {
                let store = SqliteStore::open(path)
                    .with_context(|| format!("failed to open kv store at {}", path.display()))?;
                let purged = store.purge_expired()?;
                tracing::info!(purged, "expired entries purged at startup");
                Arc::new(store)
            }
            None => {
                tracing::warn!("FOLIO_DB_PATH not set, using in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        Self::with_store(config, store)
    }

    /// Create application state over an existing store.
    pub fn with_store(config: Config, store: Arc<dyn KvStore>) -> anyhow::Result<Self> {
        let counters = CounterStore::new(store.clone(), RetryPolicy::default());
        let analytics =
            Analytics::new(store.clone(), counters.clone()).with_retention(config.click_retention);
        let likes = Likes::new(counters);

        let source =
            HttpSnapshotSource::new(config.memoato_stats_url.clone(), config.memoato_fetch_timeout)
                .context("failed to build stats client")?;
        let stats = StatsCache::new(store.clone(), source, config.memoato_cache_ttl);

        let http = reqwest::Client::builder()
            .timeout(LIGHTNING_TIMEOUT)
            .build()
            .context("failed to build http client")?;

        tracing::info!(
            recent_clicks = config.recent_clicks,
            report_cache_ttl_secs = cache::REPORT_TTL.as_secs(),
            "application state initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            analytics,
            likes,
            stats: Arc::new(stats),
            report_cache: cache::new_cache(cache::REPORT_TTL),
            http,
        })
    }

    /// Purge expired entries every `every` in a background task.
    ///
    /// The first purge runs one interval after startup; `new` already purges
    /// a freshly opened database.
    pub fn spawn_purge_task(&self, every: Duration) -> JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match store.purge_expired() {
                    Ok(0) => {}
                    Ok(purged) => tracing::debug!(purged, "expired entries purged"),
                    Err(e) => tracing::warn!(error = %e, "failed to purge expired entries"),
                }
            }
        })
    }
}
