//! External collaborators consumed by the sync core.
//!
//! The wire-level client for the external system and the tenant registry
//! are owned elsewhere; the core only needs the narrow interfaces below.

use crate::{FilterExpr, ObjectType, RemoteObject, SourceError, TenantId, TenantInfo};
use async_trait::async_trait;

/// What the external source can do for one object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceCapabilities {
    /// `fetch_page` honours offset/limit server-side.
    pub server_paging: bool,
    /// `fetch_page` applies filters server-side.
    pub server_filtering: bool,
    /// `fetch_page` can report the total matching count.
    pub server_count: bool,
    /// `fetch_one` is available.
    pub point_lookup: bool,
}

impl SourceCapabilities {
    /// Full collection fetch only.
    pub const fn collection_only() -> Self {
        Self {
            server_paging: false,
            server_filtering: false,
            server_count: false,
            point_lookup: false,
        }
    }

    /// Paging, filtering, counting and point lookup.
    pub const fn full() -> Self {
        Self {
            server_paging: true,
            server_filtering: true,
            server_count: true,
            point_lookup: true,
        }
    }
}

/// A paged request to the external source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageQuery {
    pub offset: usize,
    pub limit: usize,
    pub filters: Vec<FilterExpr>,
    /// Ask the source to report the total matching count.
    pub include_total: bool,
}

/// A page returned by the external source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemotePage {
    pub items: Vec<RemoteObject>,
    /// Server-reported total, when requested and supported.
    pub total: Option<usize>,
}

/// Client for the external system, scoped per call to one tenant.
///
/// Only `fetch_all` is mandatory. Implementations advertise paging and
/// point lookups through [`ExternalSource::capabilities`]; the default
/// `fetch_page` and `fetch_one` report [`SourceError::Unsupported`].
#[async_trait]
pub trait ExternalSource: Send + Sync {
    /// Object types refreshed for every hot tenant.
    fn supported_types(&self) -> Vec<ObjectType> {
        ObjectType::ALL.to_vec()
    }

    /// Capabilities for one object type.
    fn capabilities(&self, object_type: ObjectType) -> SourceCapabilities;

    /// Fetch the full collection of `object_type`.
    async fn fetch_all(
        &self,
        tenant: &TenantInfo,
        object_type: ObjectType,
    ) -> Result<Vec<RemoteObject>, SourceError>;

    /// Fetch one page with server-side paging and filtering.
    async fn fetch_page(
        &self,
        _tenant: &TenantInfo,
        object_type: ObjectType,
        _query: &PageQuery,
    ) -> Result<RemotePage, SourceError> {
        Err(SourceError::Unsupported {
            object_type,
            operation: "fetch_page".to_string(),
        })
    }

    /// Fetch a single object by id; `Ok(None)` when it does not exist.
    async fn fetch_one(
        &self,
        _tenant: &TenantInfo,
        object_type: ObjectType,
        _id: &str,
    ) -> Result<Option<RemoteObject>, SourceError> {
        Err(SourceError::Unsupported {
            object_type,
            operation: "fetch_one".to_string(),
        })
    }
}

/// Lookup of tenants known to the surrounding application.
#[async_trait]
pub trait TenantRegistry: Send + Sync {
    /// `Ok(None)` when the tenant is unknown.
    async fn lookup(&self, tenant_id: &TenantId) -> Result<Option<TenantInfo>, SourceError>;

    /// Like `lookup`, but an unknown tenant is an error.
    async fn require(&self, tenant_id: &TenantId) -> Result<TenantInfo, SourceError> {
        self.lookup(tenant_id)
            .await?
            .ok_or_else(|| SourceError::TenantNotFound {
                tenant_id: tenant_id.clone(),
            })
    }
}
