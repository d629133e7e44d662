//! Tenant, sync-record, cache-entry and command types.

use crate::{new_command_id, CommandId, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// TENANT IDENTITY
// ============================================================================

/// Identifier of a tenant in the external system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TenantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Tenant as known to the tenant registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantInfo {
    pub id: TenantId,
    pub display_name: String,
}

impl TenantInfo {
    pub fn new(id: impl Into<TenantId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

// ============================================================================
// OBJECT TYPES
// ============================================================================

/// Category of domain object fetched from the external system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Sources,
    Rules,
    Parsers,
    Dashboards,
    Alerts,
    Users,
}

impl ObjectType {
    /// Every object type, in refresh order.
    pub const ALL: [ObjectType; 6] = [
        ObjectType::Sources,
        ObjectType::Rules,
        ObjectType::Parsers,
        ObjectType::Dashboards,
        ObjectType::Alerts,
        ObjectType::Users,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Sources => "sources",
            ObjectType::Rules => "rules",
            ObjectType::Parsers => "parsers",
            ObjectType::Dashboards => "dashboards",
            ObjectType::Alerts => "alerts",
            ObjectType::Users => "users",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = ObjectTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObjectType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ObjectTypeParseError(s.to_string()))
    }
}

/// Error when parsing an unknown object type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTypeParseError(pub String);

impl fmt::Display for ObjectTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid object type: {}", self.0)
    }
}

impl std::error::Error for ObjectTypeParseError {}

// ============================================================================
// SYNC STATE
// ============================================================================

/// Background synchronization state of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    /// Hot tenant: eligible for periodic background refresh.
    ActiveSync,
    /// Cold tenant: readable through stale cache or direct fetch.
    Paused,
    /// Last refresh failed; stays here until an explicit transition.
    Error,
    /// Excluded by external configuration.
    Disabled,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::ActiveSync => "activeSync",
            SyncState::Paused => "paused",
            SyncState::Error => "error",
            SyncState::Disabled => "disabled",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = SyncStateParseError;

    /// Accepts `activeSync`, `active_sync` and `ActiveSync` spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "activesync" | "active" => Ok(SyncState::ActiveSync),
            "paused" => Ok(SyncState::Paused),
            "error" => Ok(SyncState::Error),
            "disabled" => Ok(SyncState::Disabled),
            _ => Err(SyncStateParseError(s.to_string())),
        }
    }
}

/// Error when parsing an invalid sync state string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStateParseError(pub String);

impl fmt::Display for SyncStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid sync state: {}", self.0)
    }
}

impl std::error::Error for SyncStateParseError {}

/// Health of a tenant's synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncHealth {
    Ok,
    Degraded,
    Failed,
}

/// Per-tenant synchronization record owned by the admission controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSyncRecord {
    pub tenant_id: TenantId,
    pub state: SyncState,
    pub health: SyncHealth,
    pub last_sync_timestamp: Option<Timestamp>,
    pub error_message: Option<String>,
}

impl TenantSyncRecord {
    /// A freshly registered tenant: `Paused` and `OK`.
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            state: SyncState::Paused,
            health: SyncHealth::Ok,
            last_sync_timestamp: None,
            error_message: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SyncState::ActiveSync
    }
}

// ============================================================================
// CACHE ENTRIES
// ============================================================================

/// Related ids grouped by object type, in the order the source reported them.
pub type Relationships = BTreeMap<ObjectType, Vec<String>>;

/// An object as returned by the external source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub id: String,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<Relationships>,
}

impl RemoteObject {
    pub fn new(id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            data,
            relationships: None,
        }
    }

    pub fn with_relationships(mut self, relationships: Relationships) -> Self {
        self.relationships = Some(relationships);
        self
    }

    /// View this object as an entry stamped with `fetched_at`.
    pub fn into_entry(self, object_type: ObjectType, fetched_at: Timestamp) -> ObjectCacheEntry {
        ObjectCacheEntry {
            id: self.id,
            object_type,
            data: self.data,
            last_updated: fetched_at,
            relationships: self.relationships,
        }
    }
}

/// One normalized object in a tenant's cache, addressed by `(type, id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectCacheEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    pub data: serde_json::Value,
    pub last_updated: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<Relationships>,
}

impl ObjectCacheEntry {
    /// Decode the opaque payload into its per-type schema.
    pub fn decode<T: CachedObject>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }

    /// Related ids of `related_type`, empty when none were recorded.
    pub fn related_ids(&self, related_type: ObjectType) -> &[String] {
        self.relationships
            .as_ref()
            .and_then(|r| r.get(&related_type))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Per-type schema for payloads stored in the object cache.
///
/// The cache itself stores JSON; implementing this trait lets callers read
/// entries back as concrete types without losing the type tag.
pub trait CachedObject: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The object type this schema describes.
    const OBJECT_TYPE: ObjectType;
}

// ============================================================================
// COMMANDS
// ============================================================================

/// A named command routed through the command router. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub command_id: CommandId,
    #[serde(rename = "type")]
    pub command_type: String,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
}

impl Command {
    pub fn new(command_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            command_id: new_command_id(),
            command_type: command_type.into(),
            payload,
            tenant_id: None,
        }
    }

    /// Target this command at a tenant.
    pub fn for_tenant(mut self, tenant_id: impl Into<TenantId>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Whether the payload carries `"forceLoad": true`.
    pub fn is_force_load(&self) -> bool {
        self.payload
            .get("forceLoad")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}
