//! Folio Serve - HTTP API for a personal site.
//!
//! Serves the site's dynamic bits: page-view and click tracking, per-project
//! like counters, an aggregate stats report, a cached snapshot of an external
//! app's public stats, and the `/.well-known` identity documents.
//!
//! # Authentication
//!
//! Everything is public except `/api/admin/*`, which requires a Bearer token
//! listed in `FOLIO_ADMIN_TOKENS`.
//!
//! # Architecture
//!
//! - **AppState**: Shared application state (store, counters, caches, configuration)
//! - **Auth**: Bearer token middleware for admin routes
//! - **Routes**: Endpoint handlers grouped by domain

mod auth;
pub mod cache;
pub mod config;
mod error;
mod routes;
mod state;

pub use self::auth::require_admin;
pub use self::cache::{ResponseCache, get_or_compute, new_cache};
pub use self::config::{Config, LightningAddress};
pub use self::error::ApiError;
pub use self::routes::{NostrDocument, router};
pub use self::state::{AppState, PURGE_INTERVAL};
