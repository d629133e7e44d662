//! Per-tenant cache statistics.

use meridian_core::{ObjectType, TenantId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot of one tenant's cache for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub tenant_id: TenantId,
    /// Number of entries currently cached.
    pub entry_count: usize,
    /// Entry count per object type; types with no entries are omitted.
    pub per_type: BTreeMap<ObjectType, usize>,
    /// Completion time of the last refresh pass.
    pub last_full_sync: Option<Timestamp>,
    pub sync_in_progress: bool,
    /// Error recorded by the last aborted refresh.
    pub error: Option<String>,
    /// Reads served from the cache.
    pub hits: u64,
    /// Reads that had to go to the external source.
    pub misses: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Entries cached for `object_type`.
    pub fn count_for(&self, object_type: ObjectType) -> usize {
        self.per_type.get(&object_type).copied().unwrap_or(0)
    }
}
