//! Error types for Meridian operations

use crate::{ObjectType, SyncState, TenantId};
use thiserror::Error;

/// Errors raised while talking to the external source or the tenant registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Tenant not found: {tenant_id}")]
    TenantNotFound { tenant_id: TenantId },

    #[error("Registry lookup for tenant {tenant_id} failed: {reason}")]
    RegistryFailed { tenant_id: TenantId, reason: String },

    #[error("Fetching {object_type} for tenant {tenant_id} failed: {reason}")]
    FetchFailed {
        tenant_id: TenantId,
        object_type: ObjectType,
        reason: String,
    },

    #[error("{operation} is not supported for {object_type}")]
    Unsupported {
        object_type: ObjectType,
        operation: String,
    },
}

/// Errors raised by the object cache outside of per-type fetching.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Refresh for tenant {tenant_id} aborted: {reason}")]
    RefreshAborted { tenant_id: TenantId, reason: String },
}

/// Command routing errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("No handlers registered for command {command_type}")]
    NoHandlers { command_type: String },

    #[error("Command {command_type} targets tenant {tenant_id} in state {state}")]
    TenantNotActive {
        command_type: String,
        tenant_id: TenantId,
        state: SyncState,
    },

    #[error("Handler {handler} failed for command {command_type}: {reason}")]
    HandlerFailed {
        command_type: String,
        handler: String,
        reason: String,
    },

    #[error("Invalid payload for command {command_type}: {reason}")]
    InvalidPayload { command_type: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Meridian errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MeridianError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Meridian operations.
pub type MeridianResult<T> = Result<T, MeridianError>;

// =============================================================================
// TESTS
// =============================================================================
