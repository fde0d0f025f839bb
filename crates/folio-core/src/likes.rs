//! Per-entity like counts.
//!
//! One flat counter per project id or blog slug. There is no per-client
//! deduplication: every call to [`Likes::like`] counts.

use std::fmt;

use crate::counter::{CounterStore, LIKES};
use crate::error::StoreError;

/// Maximum accepted length of an entity id.
pub const MAX_ID_LEN: usize = 128;

/// The id was empty, too long, or contained characters outside `[A-Za-z0-9_.-]`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id: {reason}")]
pub struct InvalidId {
    pub reason: &'static str,
}

/// A validated project id or blog slug.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityId(String);

impl EntityId {
    /// Validate a raw id. Surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Result<Self, InvalidId> {
        let id = raw.trim();

        if id.is_empty() {
            return Err(InvalidId { reason: "id is empty" });
        }
        if id.len() > MAX_ID_LEN {
            return Err(InvalidId {
                reason: "id is too long",
            });
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(InvalidId {
                reason: "id contains unsupported characters",
            });
        }

        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Like counters, one per entity.
#[derive(Clone)]
pub struct Likes {
    counters: CounterStore,
}

impl Likes {
    pub fn new(counters: CounterStore) -> Self {
        Self { counters }
    }

    /// Record a like. Returns the new count, or `None` if the increment was
    /// dropped (already logged).
    pub async fn like(&self, id: &EntityId) -> Option<u64> {
        self.counters.increment(LIKES, id.as_str()).await
    }

    /// Current like count (0 if never liked).
    pub fn get_likes(&self, id: &EntityId) -> Result<u64, StoreError> {
        self.counters.get(LIKES, id.as_str())
    }
}
