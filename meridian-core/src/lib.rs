//! Meridian Core - Tenant Sync Data Model
//!
//! Pure data structures shared by every Meridian crate: tenant and object
//! identity, sync records, cache entries, commands, events, errors and
//! configuration. The traits describing the external source and the tenant
//! registry also live here so that the cache and the routers agree on them.
//!
//! This crate contains no scheduling or caching logic.

pub mod config;
pub mod constants;
pub mod entities;
pub mod error;
pub mod event;
pub mod filter;
pub mod source;

pub use config::{PausedTenantPolicy, SyncConfig};
pub use entities::{
    CachedObject, Command, ObjectCacheEntry, ObjectType, ObjectTypeParseError, Relationships,
    RemoteObject, SyncHealth, SyncState, SyncStateParseError, TenantId, TenantInfo,
    TenantSyncRecord,
};
pub use error::{
    CacheError, CommandError, ConfigError, MeridianError, MeridianResult, SourceError,
};
pub use event::{EventBus, SyncEvent};
pub use filter::{FilterExpr, FilterMatcher, FilterOperator};
pub use source::{ExternalSource, PageQuery, RemotePage, SourceCapabilities, TenantRegistry};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Correlation identifier carried by every command.
pub type CommandId = Uuid;

/// Generate a new UUIDv7 command id (timestamp-sortable).
pub fn new_command_id() -> CommandId {
    Uuid::now_v7()
}
