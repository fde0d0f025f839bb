//! In-memory [`KvStore`] backend.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use super::encoding::{self, prefix_range};
use super::{Check, Commit, Entry, Key, KvStore, ListOptions, Versionstamp};
use crate::error::Result;

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    versionstamp: Versionstamp,
    /// Absolute expiry in Unix milliseconds.
    expires_at: Option<i64>,
}

impl Slot {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<Vec<u8>, Slot>,
    version: u64,
}

/// A process-local store backed by a `BTreeMap`.
///
/// Suitable for tests and for running the site without a database; nothing
/// survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = super::now_millis();
        self.inner
            .lock()
            .entries
            .values()
            .filter(|slot| slot.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &Key) -> Result<Option<Entry>> {
        let encoded = encoding::encode(key);
        let now = super::now_millis();
        let mut inner = self.inner.lock();

        let Some(slot) = inner.entries.get(&encoded).cloned() else {
            return Ok(None);
        };
        if !slot.is_live(now) {
            inner.entries.remove(&encoded);
            return Ok(None);
        }

        Ok(Some(Entry {
            key: key.clone(),
            value: slot.value,
            versionstamp: slot.versionstamp,
        }))
    }

    fn compare_and_set(
        &self,
        key: &Key,
        check: Check,
        value: Value,
        expire_in: Option<Duration>,
    ) -> Result<Commit> {
        let encoded = encoding::encode(key);
        let now = super::now_millis();
        let mut inner = self.inner.lock();

        let current = inner
            .entries
            .get(&encoded)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.versionstamp);

        if !check.holds(current) {
            return Ok(Commit::Conflict);
        }

        inner.version += 1;
        let versionstamp = Versionstamp(inner.version);
        inner.entries.insert(
            encoded,
            Slot {
                value,
                versionstamp,
                expires_at: super::expiry_millis(expire_in),
            },
        );

        Ok(Commit::Committed(versionstamp))
    }

    fn list_prefix(&self, prefix: &Key, options: ListOptions) -> Result<Vec<Entry>> {
        let (start, end) = prefix_range(prefix);
        let now = super::now_millis();
        let limit = options.limit.unwrap_or(usize::MAX);
        let bounds = (Bound::Excluded(start), Bound::Excluded(end));
        let mut inner = self.inner.lock();

        let expired: Vec<Vec<u8>> = inner
            .entries
            .range::<Vec<u8>, _>(bounds.clone())
            .filter(|(_, slot)| !slot.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            inner.entries.remove(k);
        }

        let range = inner.entries.range::<Vec<u8>, _>(bounds);

        let entry = |(k, slot): (&Vec<u8>, &Slot)| -> Result<Entry> {
            encoding::decode(k).map(|key| Entry {
                key,
                value: slot.value.clone(),
                versionstamp: slot.versionstamp,
            })
        };

        if options.reverse {
            range.rev().take(limit).map(entry).collect()
        } else {
            range.take(limit).map(entry).collect()
        }
    }

    fn delete(&self, key: &Key) -> Result<()> {
        self.inner.lock().entries.remove(&encoding::encode(key));
        Ok(())
    }

    fn clear(&self) -> Result<u64> {
        let now = super::now_millis();
        let mut inner = self.inner.lock();
        let removed = inner
            .entries
            .values()
            .filter(|slot| slot.is_live(now))
            .count();
        inner.entries.clear();
        Ok(removed as u64)
    }

    fn purge_expired(&self) -> Result<u64> {
        let now = super::now_millis();
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, slot| slot.is_live(now));
        Ok((before - inner.entries.len()) as u64)
    }
}
