//! Core storage and counting logic for the folio personal site.
//!
//! This crate provides:
//! - A small key-value store interface with in-memory and SQLite backends
//! - Keyed counters with optimistic-concurrency increments and bounded retry
//! - Per-entity like counts
//! - Page-view / click tracking with a recent-clicks log
//! - A cache-aside wrapper for an external public stats document
//! - Prometheus metrics helpers
//!
//! Storage is always injected as an `Arc<dyn KvStore>`; nothing here holds
//! global state, so every component can be tested against [`MemoryStore`].

mod error;

pub mod analytics;
pub mod counter;
pub mod kv;
pub mod likes;
pub mod metrics;
pub mod retry;
pub mod snapshot;

pub use analytics::{Analytics, ClickEvent, StatsReport, TrackError, TrackEvent};
pub use counter::{CounterError, CounterStore};
pub use error::{Result, StoreError};
pub use kv::{KvStore, MemoryStore, SqliteStore};
pub use likes::{EntityId, InvalidId, Likes};
pub use retry::RetryPolicy;
pub use snapshot::{FetchError, HttpSnapshotSource, Snapshot, SnapshotSource, StatsCache};
