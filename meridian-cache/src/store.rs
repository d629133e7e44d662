//! One tenant's object store.
//!
//! The entry map sits behind a `RwLock` so each upsert is atomic with
//! respect to readers; a refresh pass is many upserts and readers may see
//! it half applied. The `sync_in_progress` flag is the refresh guard and
//! is taken with compare-exchange, never under the map lock.

use crate::key::CacheKey;
use crate::stats::CacheStats;
use meridian_core::{ObjectCacheEntry, ObjectType, TenantId, Timestamp};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Mutable cache state of one tenant.
#[derive(Debug, Default)]
pub struct TenantCacheState {
    pub entries: BTreeMap<CacheKey, ObjectCacheEntry>,
    pub last_full_sync: Option<Timestamp>,
    pub error: Option<String>,
}

impl TenantCacheState {
    fn type_entries(&self, object_type: ObjectType) -> impl Iterator<Item = &ObjectCacheEntry> {
        self.entries
            .range(CacheKey::type_start(object_type)..)
            .take_while(move |(k, _)| k.object_type() == object_type)
            .map(|(_, entry)| entry)
    }
}

/// A tenant's store plus its refresh guard and read counters.
#[derive(Debug)]
pub struct TenantStore {
    tenant_id: TenantId,
    state: RwLock<TenantCacheState>,
    sync_in_progress: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TenantStore {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            state: RwLock::new(TenantCacheState::default()),
            sync_in_progress: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    // ========================================================================
    // ENTRIES
    // ========================================================================

    pub fn get(&self, object_type: ObjectType, id: &str) -> Option<ObjectCacheEntry> {
        self.read()
            .entries
            .get(&CacheKey::new(object_type, id))
            .cloned()
    }

    /// Entries of one type, ordered by id.
    pub fn list(&self, object_type: ObjectType) -> Vec<ObjectCacheEntry> {
        self.read().type_entries(object_type).cloned().collect()
    }

    pub fn count(&self, object_type: ObjectType) -> usize {
        self.read().type_entries(object_type).count()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Insert or overwrite the entry at `(entry.object_type, entry.id)`.
    pub fn upsert(&self, entry: ObjectCacheEntry) {
        let key = CacheKey::new(entry.object_type, entry.id.clone());
        self.write().entries.insert(key, entry);
    }

    pub fn remove(&self, object_type: ObjectType, id: &str) -> Option<ObjectCacheEntry> {
        self.write().entries.remove(&CacheKey::new(object_type, id))
    }

    /// Empty the map and forget the last full sync. Returns the number of
    /// entries dropped.
    pub fn clear(&self) -> usize {
        let mut state = self.write();
        let dropped = state.entries.len();
        state.entries.clear();
        state.last_full_sync = None;
        dropped
    }

    // ========================================================================
    // REFRESH GUARD
    // ========================================================================

    pub fn is_syncing(&self) -> bool {
        self.sync_in_progress.load(Ordering::Acquire)
    }

    /// Take the refresh guard. `false` if another refresh holds it.
    pub fn try_begin_sync(&self) -> bool {
        self.sync_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Take the guard whether or not it is held.
    pub fn force_begin_sync(&self) {
        self.sync_in_progress.store(true, Ordering::Release);
    }

    pub fn release_sync(&self) {
        self.sync_in_progress.store(false, Ordering::Release);
    }

    // ========================================================================
    // PASS BOOKKEEPING
    // ========================================================================

    pub fn clear_error(&self) {
        self.write().error = None;
    }

    pub fn set_error(&self, error: impl Into<String>) {
        self.write().error = Some(error.into());
    }

    pub fn error(&self) -> Option<String> {
        self.read().error.clone()
    }

    pub fn mark_synced(&self, at: Timestamp) {
        self.write().last_full_sync = Some(at);
    }

    pub fn last_full_sync(&self) -> Option<Timestamp> {
        self.read().last_full_sync
    }

    // ========================================================================
    // STATISTICS
    // ========================================================================

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.read();
        let mut per_type = BTreeMap::new();
        for key in state.entries.keys() {
            *per_type.entry(key.object_type()).or_insert(0) += 1;
        }
        CacheStats {
            tenant_id: self.tenant_id.clone(),
            entry_count: state.entries.len(),
            per_type,
            last_full_sync: state.last_full_sync,
            sync_in_progress: self.is_syncing(),
            error: state.error.clone(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TenantCacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TenantCacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
