//! Page-view and click tracking.
//!
//! Every tracked event bumps a counter; clicks additionally append an
//! immutable [`ClickEvent`] to a time-ordered log used for the "recent
//! activity" listing. Tracking is fire-and-forget: [`Analytics::track`]
//! never returns an error, and a dropped increment is only logged.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::counter::{CLICK_COUNTS, CounterStore, PAGE_VIEWS};
use crate::error::StoreError;
use crate::kv::{Check, Commit, Key, KeyPart, KvStore, ListOptions};

/// Key prefix of the click log.
pub const CLICK_EVENTS: &str = "click_events";

/// Default number of entries in the recent-clicks listing.
pub const DEFAULT_RECENT_CLICKS: usize = 20;

/// Default retention of click log entries.
pub const DEFAULT_CLICK_RETENTION: Duration = Duration::from_secs(30 * 24 * 3600);

/// Longest accepted page, click type or target.
const MAX_FIELD_LEN: usize = 256;

/// Rejected tracking payload.
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    #[error("malformed tracking event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("field '{field}' {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

/// Wire form of a tracking call.
///
/// ```json
/// {"type": "pageview", "page": "/blog"}
/// {"type": "click", "clickType": "menu", "target": "home"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TrackEvent {
    Pageview {
        page: String,
    },
    Click {
        #[serde(rename = "clickType")]
        click_type: String,
        target: String,
    },
}

impl TrackEvent {
    /// Parse and validate a JSON payload.
    pub fn from_json(value: serde_json::Value) -> Result<Self, TrackError> {
        let event: Self = serde_json::from_value(value)?;
        event.validate()?;
        Ok(event)
    }

    /// Reject empty or oversized fields.
    pub fn validate(&self) -> Result<(), TrackError> {
        match self {
            Self::Pageview { page } => check_field("page", page),
            Self::Click { click_type, target } => {
                check_field("clickType", click_type)?;
                check_field("target", target)
            }
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pageview { .. } => "pageview",
            Self::Click { .. } => "click",
        }
    }
}

fn check_field(field: &'static str, value: &str) -> Result<(), TrackError> {
    if value.trim().is_empty() {
        return Err(TrackError::InvalidField {
            field,
            reason: "must not be empty",
        });
    }
    if value.len() > MAX_FIELD_LEN {
        return Err(TrackError::InvalidField {
            field,
            reason: "is too long",
        });
    }
    Ok(())
}

/// One recorded click.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickEvent {
    #[serde(rename = "type")]
    pub click_type: String,
    pub target: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate report served by the stats endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub page_views: BTreeMap<String, u64>,
    pub clicks: BTreeMap<String, u64>,
    pub recent_clicks: Vec<ClickEvent>,
}

/// Counter name for a click.
pub fn click_key(click_type: &str, target: &str) -> String {
    format!("{click_type}:{target}")
}

/// Page-view and click tracking over the counter store.
#[derive(Clone)]
pub struct Analytics {
    kv: Arc<dyn KvStore>,
    counters: CounterStore,
    retention: Duration,
}

impl Analytics {
    pub fn new(kv: Arc<dyn KvStore>, counters: CounterStore) -> Self {
        Self {
            kv,
            counters,
            retention: DEFAULT_CLICK_RETENTION,
        }
    }

    /// Override how long click log entries are kept.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Record a validated tracking event. Failures are logged, never returned.
    pub async fn track(&self, event: &TrackEvent) {
        match event {
            TrackEvent::Pageview { page } => {
                self.record_page_view(page).await;
            }
            TrackEvent::Click { click_type, target } => {
                self.record_click(click_type, target).await;
            }
        }
    }

    pub async fn record_page_view(&self, page: &str) -> Option<u64> {
        self.counters.increment(PAGE_VIEWS, page).await
    }

    /// Bump the click counter and append to the click log.
    pub async fn record_click(&self, click_type: &str, target: &str) -> Option<u64> {
        let count = self
            .counters
            .increment(CLICK_COUNTS, &click_key(click_type, target))
            .await;

        self.append_click_event(&ClickEvent {
            click_type: click_type.to_string(),
            target: target.to_string(),
            timestamp: Utc::now(),
        });

        count
    }

    fn append_click_event(&self, event: &ClickEvent) {
        // Random suffix keeps same-millisecond clicks from colliding
        let key = Key::new(vec![
            KeyPart::from(CLICK_EVENTS),
            KeyPart::Int(event.timestamp.timestamp_millis()),
            KeyPart::Int(i64::from(rand::random::<u32>())),
        ]);

        let value = match serde_json::to_value(event) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize click event");
                return;
            }
        };

        match self
            .kv
            .compare_and_set(&key, Check::Absent, value, Some(self.retention))
        {
            Ok(Commit::Committed(_)) => {}
            Ok(Commit::Conflict) => tracing::debug!(%key, "click event key collision, dropped"),
            Err(e) => tracing::warn!(error = %e, "failed to append click event"),
        }
    }

    /// The most recent clicks, newest first.
    pub fn recent_clicks(&self, limit: usize) -> Result<Vec<ClickEvent>, StoreError> {
        let prefix = Key::new(vec![KeyPart::from(CLICK_EVENTS)]);
        let entries = self.kv.list_prefix(&prefix, ListOptions::latest(limit))?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry.value) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!(key = %entry.key, error = %e, "skipping unreadable click event");
                    None
                }
            })
            .collect())
    }

    /// Page views, click counts and the recent click listing.
    pub fn report(&self, recent_limit: usize) -> Result<StatsReport, StoreError> {
        Ok(StatsReport {
            page_views: self.counters.list_by_category(PAGE_VIEWS)?,
            clicks: self.counters.list_by_category(CLICK_COUNTS)?,
            recent_clicks: self.recent_clicks(recent_limit)?,
        })
    }
}
