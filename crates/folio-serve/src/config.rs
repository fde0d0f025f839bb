//! Application configuration loaded from environment variables.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

/// A Lightning address (`name@domain`) resolved through its provider's LNURL-pay endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightningAddress {
    pub username: String,
    pub domain: String,
}

impl LightningAddress {
    /// LUD-16 well-known URL on the provider.
    pub fn lnurlp_url(&self) -> String {
        format!(
            "https://{}/.well-known/lnurlp/{}",
            self.domain, self.username
        )
    }
}

impl FromStr for LightningAddress {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let (username, domain) = s
            .trim()
            .split_once('@')
            .context("lightning address must look like name@domain")?;

        if username.is_empty() || domain.is_empty() || domain.contains('/') {
            anyhow::bail!("invalid lightning address: {s}");
        }

        Ok(Self {
            username: username.to_lowercase(),
            domain: domain.to_lowercase(),
        })
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080").
    pub bind_addr: String,

    /// SQLite database path. `None` keeps everything in memory.
    pub db_path: Option<PathBuf>,

    /// Tokens accepted by the admin routes (loaded from FOLIO_ADMIN_TOKENS).
    pub admin_tokens: HashSet<String>,

    /// Upstream public stats document.
    pub memoato_stats_url: String,

    /// Upstream fetch timeout.
    pub memoato_fetch_timeout: Duration,

    /// Lifetime of the cached stats snapshot.
    pub memoato_cache_ttl: Duration,

    /// Number of entries in the recent-clicks listing.
    pub recent_clicks: usize,

    /// How long individual click events are kept.
    pub click_retention: Duration,

    /// Lightning address served at `/.well-known/lnurlp/{username}`.
    pub lightning_address: Option<LightningAddress>,

    /// NIP-05 names (lowercase) to hex pubkeys.
    pub nostr_names: Arc<BTreeMap<String, String>>,

    /// Relays advertised for every NIP-05 pubkey.
    pub nostr_relays: Vec<String>,

    /// Port for the Prometheus exporter (disabled when unset).
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            db_path: None,
            admin_tokens: HashSet::new(),
            memoato_stats_url: "https://memoato.com/api/public-stats".to_string(),
            memoato_fetch_timeout: folio_core::snapshot::DEFAULT_FETCH_TIMEOUT,
            memoato_cache_ttl: folio_core::snapshot::DEFAULT_SNAPSHOT_TTL,
            recent_clicks: folio_core::analytics::DEFAULT_RECENT_CLICKS,
            click_retention: folio_core::analytics::DEFAULT_CLICK_RETENTION,
            lightning_address: None,
            nostr_names: Arc::new(BTreeMap::new()),
            nostr_relays: Vec::new(),
            metrics_port: None,
        }
    }
}

/// Read and parse an optional variable, failing on unparsable values.
fn parse_var<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{name} is invalid: {e}")),
        _ => Ok(None),
    }
}

fn comma_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_hex_pubkey(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - None (all have defaults for local development)
    ///
    /// Optional:
    /// - `FOLIO_BIND_ADDR`: Server bind address (default: "0.0.0.0:8080")
    /// - `FOLIO_DB_PATH`: SQLite database path (default: in-memory store)
    /// - `FOLIO_ADMIN_TOKENS`: Comma-separated admin bearer tokens
    /// - `MEMOATO_STATS_URL`: Upstream stats document URL
    /// - `MEMOATO_FETCH_TIMEOUT_MS`: Upstream timeout (default: 800)
    /// - `MEMOATO_CACHE_TTL_SECS`: Snapshot cache lifetime (default: 3600)
    /// - `FOLIO_RECENT_CLICKS`: Recent-clicks listing size (default: 20)
    /// - `FOLIO_CLICK_RETENTION_DAYS`: Click log retention (default: 30)
    /// - `LIGHTNING_ADDRESS`: `name@provider` to resolve via LNURL-pay
    /// - `NOSTR_NAMES`: Comma-separated `name=hexpubkey` pairs
    /// - `NOSTR_RELAYS`: Comma-separated relay URLs
    /// - `METRICS_PORT`: Prometheus exporter port
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let bind_addr = std::env::var("FOLIO_BIND_ADDR").unwrap_or(defaults.bind_addr);

        let db_path = std::env::var("FOLIO_DB_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let admin_tokens: HashSet<String> = comma_list("FOLIO_ADMIN_TOKENS").into_iter().collect();

        let memoato_stats_url =
            std::env::var("MEMOATO_STATS_URL").unwrap_or(defaults.memoato_stats_url);

        let memoato_fetch_timeout = parse_var::<u64>("MEMOATO_FETCH_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.memoato_fetch_timeout);

        let memoato_cache_ttl = parse_var::<u64>("MEMOATO_CACHE_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.memoato_cache_ttl);

        let recent_clicks = parse_var::<usize>("FOLIO_RECENT_CLICKS")?
            .unwrap_or(defaults.recent_clicks);

        let click_retention = parse_var::<u64>("FOLIO_CLICK_RETENTION_DAYS")?
            .map(|days| {
                days.checked_mul(24 * 3600)
                    .map(Duration::from_secs)
                    .with_context(|| format!("FOLIO_CLICK_RETENTION_DAYS is too large: {days}"))
            })
            .transpose()?
            .unwrap_or(defaults.click_retention);

        let lightning_address = parse_var::<LightningAddress>("LIGHTNING_ADDRESS")?;

        // Malformed pairs are skipped rather than fatal
        let nostr_names: BTreeMap<String, String> = comma_list("NOSTR_NAMES")
            .iter()
            .filter_map(|pair| {
                let (name, pubkey) = pair.split_once('=')?;
                let name = name.trim().to_lowercase();
                let pubkey = pubkey.trim().to_lowercase();
                (!name.is_empty() && is_hex_pubkey(&pubkey)).then_some((name, pubkey))
            })
            .collect();

        let nostr_relays = comma_list("NOSTR_RELAYS");

        let metrics_port = parse_var::<u16>("METRICS_PORT")?;

        tracing::info!(
            bind_addr = %bind_addr,
            db_path = ?db_path,
            admin_token_count = admin_tokens.len(),
            memoato_stats_url = %memoato_stats_url,
            memoato_fetch_timeout_ms = memoato_fetch_timeout.as_millis() as u64,
            lightning = lightning_address.is_some(),
            nostr_names = nostr_names.len(),
            metrics_port = ?metrics_port,
            "configuration loaded"
        );

        Ok(Self {
            bind_addr,
            db_path,
            admin_tokens,
            memoato_stats_url,
            memoato_fetch_timeout,
            memoato_cache_ttl,
            recent_clicks,
            click_retention,
            lightning_address,
            nostr_names: Arc::new(nostr_names),
            nostr_relays,
            metrics_port,
        })
    }
}
