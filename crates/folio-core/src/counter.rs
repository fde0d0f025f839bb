//! Named integer counters over a [`KvStore`].
//!
//! Each counter lives at `[category, name]` and holds a JSON unsigned
//! integer. Increments are read → compare-and-set → retry on conflict, so two
//! writers racing on the same key never lose an update; the loser simply
//! retries. Counters on different keys never contend.
//!
//! Tracking is best-effort: [`CounterStore::increment`] logs and swallows
//! failures, and callers ignore its result. Use
//! [`CounterStore::try_increment`] when the failure matters.

use std::collections::BTreeMap;
use std::sync::Arc;

use metrics::counter;
use serde_json::Value;

use crate::error::StoreError;
use crate::kv::{Check, Commit, Key, KeyPart, KvStore, ListOptions};
use crate::retry::{self, Attempt, RetryError, RetryPolicy};

/// Category for page-view counts keyed by path.
pub const PAGE_VIEWS: &str = "page_views";

/// Category for click counts keyed by `clickType:target`.
pub const CLICK_COUNTS: &str = "click_counts";

/// Category for like counts keyed by project id or blog slug.
pub const LIKES: &str = "likes";

/// Why an increment did not apply.
#[derive(Debug, thiserror::Error)]
pub enum CounterError {
    /// Every attempt lost the compare-and-set race.
    #[error("increment of {key} abandoned after {attempts} conflicting attempts")]
    Exhausted { key: String, attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Keyed counters with optimistic-concurrency increments.
#[derive(Clone)]
pub struct CounterStore {
    kv: Arc<dyn KvStore>,
    policy: RetryPolicy,
}

impl CounterStore {
    pub fn new(kv: Arc<dyn KvStore>, policy: RetryPolicy) -> Self {
        Self { kv, policy }
    }

    fn key(category: &str, name: &str) -> Key {
        Key::new(vec![KeyPart::from(category), KeyPart::from(name)])
    }

    /// Increment a counter, returning the new value.
    ///
    /// Never fails: on store errors or retry exhaustion the failure is logged
    /// and `None` is returned.
    pub async fn increment(&self, category: &str, name: &str) -> Option<u64> {
        match self.try_increment(category, name).await {
            Ok(value) => Some(value),
            Err(err) => {
                counter!("counter_increment_dropped_total", "category" => category.to_string())
                    .increment(1);
                tracing::warn!(category, name, error = %err, "counter increment dropped");
                None
            }
        }
    }

    /// Increment a counter, returning the new value or why it did not apply.
    pub async fn try_increment(&self, category: &str, name: &str) -> Result<u64, CounterError> {
        let key = Self::key(category, name);

        let key_ref = &key;
        let outcome = retry::retry(&self.policy, move |attempt| async move {
            self.attempt_increment(key_ref, attempt)
        })
        .await;

        match outcome {
            Ok(value) => {
                counter!("counter_increments_total", "category" => category.to_string())
                    .increment(1);
                Ok(value)
            }
            Err(RetryError::Exhausted { attempts }) => Err(CounterError::Exhausted {
                key: key.to_string(),
                attempts,
            }),
            Err(RetryError::Operation(err)) => Err(CounterError::Store(err)),
        }
    }

    /// One read → compare-and-set round.
    fn attempt_increment(&self, key: &Key, attempt: u32) -> Result<Attempt<u64>, StoreError> {
        let current = self.kv.get(key)?;
        let next = current.as_ref().map(|e| read_count(&e.value)).unwrap_or(0) + 1;

        match self.kv.compare_and_set(
            key,
            Check::unchanged(current.as_ref()),
            Value::from(next),
            None,
        )? {
            Commit::Committed(_) => Ok(Attempt::Done(next)),
            Commit::Conflict => {
                counter!("counter_cas_conflicts_total").increment(1);
                tracing::debug!(%key, attempt, "counter compare-and-set conflict");
                Ok(Attempt::Retry)
            }
        }
    }

    /// Current value of a counter (0 if it was never incremented).
    pub fn get(&self, category: &str, name: &str) -> Result<u64, StoreError> {
        Ok(self
            .kv
            .get(&Self::key(category, name))?
            .map(|e| read_count(&e.value))
            .unwrap_or(0))
    }

    /// All counters in a category, keyed by name.
    pub fn list_by_category(&self, category: &str) -> Result<BTreeMap<String, u64>, StoreError> {
        let prefix = Key::new(vec![KeyPart::from(category)]);
        let entries = self.kv.list_prefix(&prefix, ListOptions::default())?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| match entry.key.parts() {
                [_, KeyPart::Str(name)] => Some((name.clone(), read_count(&entry.value))),
                _ => None,
            })
            .collect())
    }
}

/// Interpret a stored value as a count. Anything but an unsigned integer reads as 0.
fn read_count(value: &Value) -> u64 {
    value.as_u64().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{Entry, MemoryStore};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn counters() -> CounterStore {
        CounterStore::new(Arc::new(MemoryStore::new()), RetryPolicy::default())
    }

    /// Store wrapper that reports a conflict for the first `conflicts` writes.
    struct ContendedStore {
        inner: MemoryStore,
        conflicts: AtomicU32,
    }

    impl KvStore for ContendedStore {
        fn get(&self, key: &Key) -> crate::Result<Option<Entry>> {
            self.inner.get(key)
        }

        fn compare_and_set(
            &self,
            key: &Key,
            check: Check,
            value: Value,
            expire_in: Option<Duration>,
        ) -> crate::Result<Commit> {
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                return Ok(Commit::Conflict);
            }
            self.inner.compare_and_set(key, check, value, expire_in)
        }

        fn list_prefix(&self, prefix: &Key, options: ListOptions) -> crate::Result<Vec<Entry>> {
            self.inner.list_prefix(prefix, options)
        }

        fn delete(&self, key: &Key) -> crate::Result<()> {
            self.inner.delete(key)
        }

        fn clear(&self) -> crate::Result<u64> {
            self.inner.clear()
        }

        fn purge_expired(&self) -> crate::Result<u64> {
            self.inner.purge_expired()
        }
    }

    fn contended(conflicts: u32) -> CounterStore {
        let store = ContendedStore {
            inner: MemoryStore::new(),
            conflicts: AtomicU32::new(conflicts),
        };
        CounterStore::new(Arc::new(store), RetryPolicy::immediate(5))
    }

    #[tokio::test]
    async fn test_get_never_incremented_is_zero() {
        let counters = counters();
        assert_eq!(counters.get(PAGE_VIEWS, "/never").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_increment_sequential() {
        let counters = counters();
        assert_eq!(counters.increment(PAGE_VIEWS, "/").await, Some(1));
        assert_eq!(counters.increment(PAGE_VIEWS, "/").await, Some(2));
        assert_eq!(counters.get(PAGE_VIEWS, "/").unwrap(), 2);
        assert_eq!(counters.get(PAGE_VIEWS, "/about").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_increment_survives_conflicts() {
        let counters = contended(4);
        assert_eq!(counters.try_increment(LIKES, "memoato").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_increment_exhaustion_is_swallowed() {
        let counters = contended(5);

        let err = counters.try_increment(LIKES, "memoato").await.unwrap_err();
        assert!(matches!(err, CounterError::Exhausted { attempts: 5, .. }));

        // Best-effort form reports nothing and the counter is untouched
        let counters = contended(5);
        assert_eq!(counters.increment(LIKES, "memoato").await, None);
        assert_eq!(counters.get(LIKES, "memoato").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_non_integer_value_reads_as_zero_and_is_overwritten() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(&CounterStore::key(PAGE_VIEWS, "/"), Value::from("junk"), None)
            .unwrap();
        let counters = CounterStore::new(kv, RetryPolicy::default());

        assert_eq!(counters.get(PAGE_VIEWS, "/").unwrap(), 0);
        assert_eq!(counters.increment(PAGE_VIEWS, "/").await, Some(1));
    }

    #[tokio::test]
    async fn test_list_by_category() {
        let counters = counters();
        for _ in 0..3 {
            counters.increment(CLICK_COUNTS, "menu:home").await;
        }
        counters.increment(CLICK_COUNTS, "link:projects").await;
        counters.increment(PAGE_VIEWS, "/").await;

        let clicks = counters.list_by_category(CLICK_COUNTS).unwrap();
        let expected: BTreeMap<String, u64> = [
            ("menu:home".to_string(), 3),
            ("link:projects".to_string(), 1),
        ]
        .into_iter()
        .collect();
        assert_eq!(clicks, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_lose_nothing() {
        let counters = counters();

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let counters = counters.clone();
                tokio::spawn(async move { counters.increment(PAGE_VIEWS, "/hot").await })
            })
            .collect();

        let mut applied = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                applied += 1;
            }
        }

        assert!(applied > 0);
        assert_eq!(counters.get(PAGE_VIEWS, "/hot").unwrap(), applied);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_on_sqlite() {
        let kv = Arc::new(crate::kv::SqliteStore::open_in_memory().unwrap());
        let counters = CounterStore::new(kv, RetryPolicy::default());

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let counters = counters.clone();
                let page = if i % 2 == 0 { "/a" } else { "/b" };
                tokio::spawn(async move { counters.increment(PAGE_VIEWS, page).await })
            })
            .collect();

        let mut applied = 0;
        for handle in handles {
            applied += u64::from(handle.await.unwrap().is_some());
        }

        let total: u64 = counters.list_by_category(PAGE_VIEWS).unwrap().values().sum();
        assert_eq!(total, applied);
    }
}
