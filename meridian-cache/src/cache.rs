//! The object cache and its refresh algorithm.

use crate::stats::CacheStats;
use crate::store::TenantStore;
use chrono::Utc;
use dashmap::DashMap;
use futures_util::future::join_all;
use meridian_admission::AdmissionController;
use meridian_core::{
    CacheError, CachedObject, EventBus, ExternalSource, MeridianResult, ObjectCacheEntry,
    ObjectType, Relationships, SourceError, SyncEvent, TenantId, TenantInfo, TenantRegistry,
    Timestamp,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a refresh request did no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Tenant is not registered with the admission controller.
    NotRegistered,
    /// Tenant is not `ActiveSync` and the refresh was not forced.
    NotActive,
    /// Another refresh for the tenant holds the guard.
    InProgress,
}

/// Summary of a completed refresh pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshSummary {
    pub completed_at: Timestamp,
    /// Objects upserted across all types that fetched successfully.
    pub object_count: usize,
    /// Types whose fetch failed; their previous entries are untouched.
    pub failed_types: Vec<ObjectType>,
}

impl RefreshSummary {
    pub fn is_partial(&self) -> bool {
        !self.failed_types.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Skipped(SkipReason),
    Completed(RefreshSummary),
}

impl RefreshOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RefreshOutcome::Completed(_))
    }
}

/// Normalized per-tenant store of objects fetched from the external source.
///
/// Writes go through this type only. Refresh runs for `ActiveSync` tenants
/// unless forced, and at most one unforced refresh per tenant is in flight.
pub struct ObjectCache {
    stores: DashMap<TenantId, Arc<TenantStore>>,
    admission: Arc<AdmissionController>,
    source: Arc<dyn ExternalSource>,
    registry: Arc<dyn TenantRegistry>,
    events: EventBus,
}

impl std::fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("tenants", &self.stores.len())
            .finish_non_exhaustive()
    }
}

impl ObjectCache {
    pub fn new(
        admission: Arc<AdmissionController>,
        source: Arc<dyn ExternalSource>,
        registry: Arc<dyn TenantRegistry>,
    ) -> Self {
        let events = admission.events().clone();
        Self {
            stores: DashMap::new(),
            admission,
            source,
            registry,
            events,
        }
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ========================================================================
    // STORES
    // ========================================================================

    /// Create the tenant's store if it does not exist yet.
    pub fn create_store(&self, tenant_id: &TenantId) -> Arc<TenantStore> {
        self.stores
            .entry(tenant_id.clone())
            .or_insert_with(|| {
                debug!(%tenant_id, "Tenant store created");
                Arc::new(TenantStore::new(tenant_id.clone()))
            })
            .clone()
    }

    /// Destroy the tenant's store and everything in it.
    pub fn drop_store(&self, tenant_id: &TenantId) -> bool {
        match self.stores.remove(tenant_id) {
            Some((_, store)) => {
                let dropped = store.clear();
                debug!(%tenant_id, dropped, "Tenant store dropped");
                true
            }
            None => false,
        }
    }

    pub fn store(&self, tenant_id: &TenantId) -> Option<Arc<TenantStore>> {
        self.stores.get(tenant_id).map(|s| Arc::clone(s.value()))
    }

    pub fn has_store(&self, tenant_id: &TenantId) -> bool {
        self.stores.contains_key(tenant_id)
    }

    /// Tenants with a store, ordered by id.
    pub fn tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<_> = self.stores.iter().map(|s| s.key().clone()).collect();
        tenants.sort();
        tenants
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub fn get_object(
        &self,
        tenant_id: &TenantId,
        object_type: ObjectType,
        id: &str,
    ) -> Option<ObjectCacheEntry> {
        self.store(tenant_id)?.get(object_type, id)
    }

    /// Every cached entry of `object_type`, ordered by id. Empty when the
    /// tenant has no store.
    pub fn get_objects_by_type(
        &self,
        tenant_id: &TenantId,
        object_type: ObjectType,
    ) -> Vec<ObjectCacheEntry> {
        self.store(tenant_id)
            .map(|s| s.list(object_type))
            .unwrap_or_default()
    }

    pub fn count_by_type(&self, tenant_id: &TenantId, object_type: ObjectType) -> usize {
        self.store(tenant_id).map(|s| s.count(object_type)).unwrap_or(0)
    }

    /// Decode one entry as `T`. `Ok(None)` when absent.
    pub fn get_typed<T: CachedObject>(
        &self,
        tenant_id: &TenantId,
        id: &str,
    ) -> Result<Option<T>, serde_json::Error> {
        self.get_object(tenant_id, T::OBJECT_TYPE, id)
            .map(|entry| entry.decode())
            .transpose()
    }

    /// Decode every entry of `T::OBJECT_TYPE`. Fails on the first payload
    /// that does not match the schema.
    pub fn get_all_typed<T: CachedObject>(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<T>, serde_json::Error> {
        self.get_objects_by_type(tenant_id, T::OBJECT_TYPE)
            .iter()
            .map(|entry| entry.decode())
            .collect()
    }

    /// Cached entries of `related_type` listed in the relationships of
    /// `(object_type, id)`, in relationship order. Ids not in the cache are
    /// skipped.
    pub fn get_related(
        &self,
        tenant_id: &TenantId,
        object_type: ObjectType,
        id: &str,
        related_type: ObjectType,
    ) -> Vec<ObjectCacheEntry> {
        let Some(store) = self.store(tenant_id) else {
            return Vec::new();
        };
        let Some(entry) = store.get(object_type, id) else {
            return Vec::new();
        };
        entry
            .related_ids(related_type)
            .iter()
            .filter_map(|related_id| store.get(related_type, related_id))
            .collect()
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Upsert an entry stamped now, creating the store if needed.
    pub fn set_object(
        &self,
        tenant_id: &TenantId,
        object_type: ObjectType,
        id: impl Into<String>,
        data: Value,
        relationships: Option<Relationships>,
    ) -> ObjectCacheEntry {
        let entry = ObjectCacheEntry {
            id: id.into(),
            object_type,
            data,
            last_updated: Utc::now(),
            relationships,
        };
        self.create_store(tenant_id).upsert(entry.clone());
        self.events.publish(SyncEvent::ObjectUpdated {
            tenant_id: tenant_id.clone(),
            object_type,
            id: entry.id.clone(),
        });
        entry
    }

    /// Remove an entry. `objectRemoved` is published only if it existed.
    pub fn remove_object(
        &self,
        tenant_id: &TenantId,
        object_type: ObjectType,
        id: &str,
    ) -> Option<ObjectCacheEntry> {
        let removed = self.store(tenant_id)?.remove(object_type, id)?;
        self.events.publish(SyncEvent::ObjectRemoved {
            tenant_id: tenant_id.clone(),
            object_type,
            id: removed.id.clone(),
        });
        Some(removed)
    }

    /// Empty the tenant's store and reset its last full sync.
    ///
    /// Publishes `cacheCleared` only when the tenant has a store.
    pub fn clear_tenant_cache(&self, tenant_id: &TenantId) -> bool {
        let Some(store) = self.store(tenant_id) else {
            debug!(%tenant_id, "No store to clear");
            return false;
        };
        let dropped = store.clear();
        info!(%tenant_id, dropped, "Tenant cache cleared");
        self.events.publish(SyncEvent::CacheCleared {
            tenant_id: tenant_id.clone(),
        });
        true
    }

    // ========================================================================
    // STATISTICS
    // ========================================================================

    pub fn get_cache_stats(&self, tenant_id: &TenantId) -> Option<CacheStats> {
        self.store(tenant_id).map(|s| s.stats())
    }

    pub fn record_hit(&self, tenant_id: &TenantId) {
        if let Some(store) = self.store(tenant_id) {
            store.record_hit();
        }
    }

    pub fn record_miss(&self, tenant_id: &TenantId) {
        if let Some(store) = self.store(tenant_id) {
            store.record_miss();
        }
    }

    /// Release the refresh guard without touching entries.
    pub fn release_sync_guard(&self, tenant_id: &TenantId) {
        if let Some(store) = self.store(tenant_id) {
            store.release_sync();
        }
    }

    // ========================================================================
    // REFRESH
    // ========================================================================

    /// Refresh a tenant's store from the external source.
    ///
    /// Unregistered tenants are always skipped. Cold tenants are skipped
    /// unless `force` is set, as is a tenant whose guard is already held.
    /// Per-type fetch failures are logged and reported in the summary; they
    /// do not fail the pass. Only a failure before fetching starts (tenant
    /// lookup) aborts the pass, puts the tenant into `Error` and is
    /// returned.
    pub async fn refresh_tenant_state(
        &self,
        tenant_id: &TenantId,
        force: bool,
    ) -> MeridianResult<RefreshOutcome> {
        if !self.admission.is_registered(tenant_id) {
            debug!(%tenant_id, "Refresh skipped; tenant not registered");
            return Ok(RefreshOutcome::Skipped(SkipReason::NotRegistered));
        }
        if !force && !self.admission.is_active(tenant_id) {
            debug!(%tenant_id, "Refresh skipped; tenant not active");
            return Ok(RefreshOutcome::Skipped(SkipReason::NotActive));
        }

        let store = self.create_store(tenant_id);
        if force {
            store.force_begin_sync();
        } else if !store.try_begin_sync() {
            debug!(%tenant_id, "Refresh skipped; already in progress");
            return Ok(RefreshOutcome::Skipped(SkipReason::InProgress));
        }

        store.clear_error();
        info!(%tenant_id, forced = force, "Refresh started");
        self.events.publish(SyncEvent::SyncStarted {
            tenant_id: tenant_id.clone(),
            forced: force,
        });

        let tenant = match self.registry.require(tenant_id).await {
            Ok(tenant) => tenant,
            Err(e) => {
                let reason = e.to_string();
                store.release_sync();
                store.set_error(reason.clone());
                self.admission.set_sync_error(tenant_id, reason.clone());
                return Err(CacheError::RefreshAborted {
                    tenant_id: tenant_id.clone(),
                    reason,
                }
                .into());
            }
        };

        let results = join_all(
            self.source
                .supported_types()
                .into_iter()
                .map(|object_type| self.refresh_type(&store, &tenant, object_type)),
        )
        .await;

        let mut object_count = 0;
        let mut failed_types = Vec::new();
        for (object_type, result) in results {
            match result {
                Ok(count) => object_count += count,
                Err(_) => failed_types.push(object_type),
            }
        }

        let completed_at = Utc::now();
        store.mark_synced(completed_at);
        store.release_sync();
        self.admission.update_last_sync(tenant_id, completed_at);
        if !failed_types.is_empty() {
            let names: Vec<&str> = failed_types.iter().map(ObjectType::as_str).collect();
            self.admission
                .mark_degraded(tenant_id, &format!("fetch failed for {}", names.join(", ")));
        }

        info!(
            %tenant_id,
            object_count,
            failed = failed_types.len(),
            "Refresh completed"
        );
        self.events.publish(SyncEvent::SyncCompleted {
            tenant_id: tenant_id.clone(),
            completed_at,
            object_count,
            failed_types: failed_types.clone(),
        });

        Ok(RefreshOutcome::Completed(RefreshSummary {
            completed_at,
            object_count,
            failed_types,
        }))
    }

    /// Fetch one type and upsert every returned item as it lands.
    async fn refresh_type(
        &self,
        store: &TenantStore,
        tenant: &TenantInfo,
        object_type: ObjectType,
    ) -> (ObjectType, Result<usize, SourceError>) {
        let result = self.source.fetch_all(tenant, object_type).await;
        match result {
            Ok(items) => {
                let fetched_at = Utc::now();
                let count = items.len();
                for item in items {
                    store.upsert(item.into_entry(object_type, fetched_at));
                }
                debug!(tenant_id = %tenant.id, %object_type, count, "Type refreshed");
                (object_type, Ok(count))
            }
            Err(e) => {
                warn!(
                    tenant_id = %tenant.id,
                    %object_type,
                    error = %e,
                    "Type fetch failed; keeping previous entries"
                );
                (object_type, Err(e))
            }
        }
    }
}
