//! Key-value store interface.
//!
//! Counters, likes, the click log and the stats cache all talk to storage
//! through [`KvStore`], which is injected rather than reached through global
//! state. The interface is deliberately small:
//!
//! - point reads ([`KvStore::get`])
//! - optimistic writes ([`KvStore::compare_and_set`])
//! - prefix-ordered listing ([`KvStore::list_prefix`])
//! - deletion ([`KvStore::delete`], [`KvStore::clear`])
//!
//! Two backends are provided: [`MemoryStore`] for tests and ephemeral runs,
//! and [`SqliteStore`] for a durable single-file database.
//!
//! # Keys
//!
//! Keys are ordered tuples such as `["page_views", "/blog"]`. Both backends
//! order keys through the same binary encoding (see [`encoding`]), so listing
//! a prefix yields identical order regardless of backend.

pub mod encoding;
mod memory;
mod schema;
mod sqlite;

use std::fmt;
use std::time::Duration;

use serde_json::Value;

use crate::error::Result;

pub use self::memory::MemoryStore;
pub use self::sqlite::SqliteStore;

/// One component of a [`Key`].
///
/// Integers sort before strings; integers sort numerically and strings
/// sort bytewise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    Int(i64),
    Str(String),
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// An ordered tuple key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Key(Vec<KeyPart>);

impl Key {
    /// Build a key from its parts.
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    /// The key's components.
    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    /// Return a new key with `part` appended.
    pub fn child(&self, part: impl Into<KeyPart>) -> Self {
        let mut parts = self.0.clone();
        parts.push(part.into());
        Self(parts)
    }

    /// The last component, if any.
    pub fn last(&self) -> Option<&KeyPart> {
        self.0.last()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{part}")?;
        }
        write!(f, "]")
    }
}

/// Build a [`Key`] from a list of parts.
///
/// ```
/// use folio_core::key;
/// let k = key!["click_events", 1_700_000_000_000i64];
/// assert_eq!(k.parts().len(), 2);
/// ```
#[macro_export]
macro_rules! key {
    ($($part:expr),* $(,)?) => {
        $crate::kv::Key::new(vec![$($crate::kv::KeyPart::from($part)),*])
    };
}

/// Opaque write version of an entry. Strictly increasing per store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Versionstamp(pub u64);

/// A stored value together with its key and current version.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: Key,
    pub value: Value,
    pub versionstamp: Versionstamp,
}

/// Condition that must hold for a [`KvStore::compare_and_set`] to commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    /// Unconditional write.
    Any,
    /// The key must not exist (or must have expired).
    Absent,
    /// The key must still be at this version.
    Version(Versionstamp),
}

impl Check {
    /// The check that asserts "unchanged since this read".
    pub fn unchanged(entry: Option<&Entry>) -> Self {
        match entry {
            Some(entry) => Self::Version(entry.versionstamp),
            None => Self::Absent,
        }
    }

    pub(crate) fn holds(&self, current: Option<Versionstamp>) -> bool {
        match (self, current) {
            (Self::Any, _) => true,
            (Self::Absent, None) => true,
            (Self::Version(expected), Some(actual)) => *expected == actual,
            _ => false,
        }
    }
}

/// Outcome of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    Committed(Versionstamp),
    /// The check failed; nothing was written.
    Conflict,
}

impl Commit {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

/// Options for [`KvStore::list_prefix`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// Maximum number of entries to return (`None` = unbounded).
    pub limit: Option<usize>,
    /// Return entries in descending key order.
    pub reverse: bool,
}

impl ListOptions {
    /// Newest-first listing of at most `limit` entries.
    pub fn latest(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            reverse: true,
        }
    }
}

/// A document store with single-key optimistic concurrency.
///
/// Every operation is atomic with respect to other operations on the same
/// key. No multi-key transactions are offered.
pub trait KvStore: Send + Sync {
    /// Read a key. Absent and expired keys return `None`.
    fn get(&self, key: &Key) -> Result<Option<Entry>>;

    /// Write `value` if `check` holds against the current version.
    ///
    /// `expire_in` makes the entry invisible once the duration has elapsed.
    fn compare_and_set(
        &self,
        key: &Key,
        check: Check,
        value: Value,
        expire_in: Option<Duration>,
    ) -> Result<Commit>;

    /// List entries whose keys strictly extend `prefix`.
    ///
    /// Expired entries in the scanned range are removed along the way.
    fn list_prefix(&self, prefix: &Key, options: ListOptions) -> Result<Vec<Entry>>;

    /// Delete a key. Deleting an absent key is not an error.
    fn delete(&self, key: &Key) -> Result<()>;

    /// Remove every entry. Returns the number of entries removed.
    fn clear(&self) -> Result<u64>;

    /// Delete every expired entry. Returns the number of entries removed.
    fn purge_expired(&self) -> Result<u64>;

    /// Unconditional write.
    fn set(&self, key: &Key, value: Value, expire_in: Option<Duration>) -> Result<Commit> {
        self.compare_and_set(key, Check::Any, value, expire_in)
    }
}

/// Convert an optional TTL into an absolute expiry (Unix milliseconds).
pub(crate) fn expiry_millis(expire_in: Option<Duration>) -> Option<i64> {
    expire_in.map(|ttl| now_millis().saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64))
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
