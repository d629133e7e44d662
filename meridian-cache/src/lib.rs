//! MERIDIAN Object Cache
//!
//! Normalized per-tenant store of objects fetched from the external source,
//! keyed by `(type, id)` and refreshed only for tenants the admission
//! controller marks hot.
//!
//! # Modules
//!
//! - [`key`]: composite keys ordered by type for range scans
//! - [`store`]: one tenant's entries, refresh guard and counters
//! - [`cache`]: the [`ObjectCache`] and its refresh algorithm
//! - [`listener`]: background task reacting to admission events
//! - [`stats`]: per-tenant statistics

pub mod cache;
pub mod key;
pub mod listener;
pub mod stats;
pub mod store;

pub use cache::{ObjectCache, RefreshOutcome, RefreshSummary, SkipReason};
pub use key::CacheKey;
pub use listener::{cache_listener_task, spawn_cache_listener};
pub use stats::CacheStats;
pub use store::{TenantCacheState, TenantStore};
