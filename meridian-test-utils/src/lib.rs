//! MERIDIAN Test Utilities
//!
//! Centralized test infrastructure for the Meridian workspace:
//! - Mock external source and tenant registry
//! - Proptest generators for core types
//! - Fixtures for common object sets
//! - Event wait helpers

pub use meridian_core::{
    EventBus, ExternalSource, FilterExpr, ObjectType, PageQuery, RemoteObject, RemotePage,
    SourceCapabilities, SourceError, SyncEvent, SyncState, TenantId, TenantInfo, TenantRegistry,
};

use async_trait::async_trait;
use meridian_core::FilterMatcher;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// MOCK EXTERNAL SOURCE
// ============================================================================

/// In-memory external source.
///
/// Serves the same collections to every tenant unless a tenant-specific
/// collection was configured. Types marked failing return
/// `SourceError::FetchFailed` from every call. Call counters let tests
/// assert whether the source was reached at all.
#[derive(Debug, Default)]
pub struct MockSource {
    objects: Mutex<HashMap<ObjectType, Vec<RemoteObject>>>,
    tenant_objects: Mutex<HashMap<(TenantId, ObjectType), Vec<RemoteObject>>>,
    failing: Mutex<BTreeSet<ObjectType>>,
    capabilities: HashMap<ObjectType, SourceCapabilities>,
    fetch_delay: Option<Duration>,
    fetch_all_calls: AtomicUsize,
    fetch_page_calls: AtomicUsize,
    fetch_one_calls: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_objects(self, object_type: ObjectType, items: Vec<RemoteObject>) -> Self {
        lock(&self.objects).insert(object_type, items);
        self
    }

    pub fn with_tenant_objects(
        self,
        tenant_id: impl Into<TenantId>,
        object_type: ObjectType,
        items: Vec<RemoteObject>,
    ) -> Self {
        lock(&self.tenant_objects).insert((tenant_id.into(), object_type), items);
        self
    }

    pub fn failing_on(self, object_type: ObjectType) -> Self {
        lock(&self.failing).insert(object_type);
        self
    }

    pub fn with_capabilities(mut self, object_type: ObjectType, caps: SourceCapabilities) -> Self {
        self.capabilities.insert(object_type, caps);
        self
    }

    /// Every type gets full capabilities.
    pub fn with_full_capabilities(mut self) -> Self {
        for object_type in ObjectType::ALL {
            self.capabilities
                .insert(object_type, SourceCapabilities::full());
        }
        self
    }

    /// Sleep this long inside every `fetch_all`.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Replace a collection after construction.
    pub fn set_objects(&self, object_type: ObjectType, items: Vec<RemoteObject>) {
        lock(&self.objects).insert(object_type, items);
    }

    pub fn set_failing(&self, object_type: ObjectType, failing: bool) {
        let mut set = lock(&self.failing);
        if failing {
            set.insert(object_type);
        } else {
            set.remove(&object_type);
        }
    }

    pub fn fetch_all_calls(&self) -> usize {
        self.fetch_all_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_page_calls(&self) -> usize {
        self.fetch_page_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_one_calls(&self) -> usize {
        self.fetch_one_calls.load(Ordering::SeqCst)
    }

    /// Total calls of any kind.
    pub fn total_calls(&self) -> usize {
        self.fetch_all_calls() + self.fetch_page_calls() + self.fetch_one_calls()
    }

    fn collection(&self, tenant: &TenantInfo, object_type: ObjectType) -> Vec<RemoteObject> {
        if let Some(items) = lock(&self.tenant_objects).get(&(tenant.id.clone(), object_type)) {
            return items.clone();
        }
        lock(&self.objects)
            .get(&object_type)
            .cloned()
            .unwrap_or_default()
    }

    fn check_failing(
        &self,
        tenant: &TenantInfo,
        object_type: ObjectType,
    ) -> Result<(), SourceError> {
        if lock(&self.failing).contains(&object_type) {
            return Err(SourceError::FetchFailed {
                tenant_id: tenant.id.clone(),
                object_type,
                reason: "mock failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ExternalSource for MockSource {
    fn capabilities(&self, object_type: ObjectType) -> SourceCapabilities {
        self.capabilities
            .get(&object_type)
            .copied()
            .unwrap_or_else(SourceCapabilities::collection_only)
    }

    async fn fetch_all(
        &self,
        tenant: &TenantInfo,
        object_type: ObjectType,
    ) -> Result<Vec<RemoteObject>, SourceError> {
        self.fetch_all_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.check_failing(tenant, object_type)?;
        Ok(self.collection(tenant, object_type))
    }

    async fn fetch_page(
        &self,
        tenant: &TenantInfo,
        object_type: ObjectType,
        query: &PageQuery,
    ) -> Result<RemotePage, SourceError> {
        let caps = self.capabilities(object_type);
        if !caps.server_paging {
            return Err(SourceError::Unsupported {
                object_type,
                operation: "fetch_page".to_string(),
            });
        }
        self.fetch_page_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing(tenant, object_type)?;

        let matcher = FilterMatcher::new(&query.filters);
        let matching: Vec<RemoteObject> = self
            .collection(tenant, object_type)
            .into_iter()
            .filter(|item| !caps.server_filtering || matcher.matches(&item.data))
            .collect();
        let total = (query.include_total && caps.server_count).then_some(matching.len());
        let items = matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();
        Ok(RemotePage { items, total })
    }

    async fn fetch_one(
        &self,
        tenant: &TenantInfo,
        object_type: ObjectType,
        id: &str,
    ) -> Result<Option<RemoteObject>, SourceError> {
        if !self.capabilities(object_type).point_lookup {
            return Err(SourceError::Unsupported {
                object_type,
                operation: "fetch_one".to_string(),
            });
        }
        self.fetch_one_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing(tenant, object_type)?;
        Ok(self
            .collection(tenant, object_type)
            .into_iter()
            .find(|item| item.id == id))
    }
}

// ============================================================================
// MOCK TENANT REGISTRY
// ============================================================================

/// In-memory tenant registry. `set_unavailable(true)` makes every lookup
/// fail with `SourceError::RegistryFailed`.
#[derive(Debug, Default)]
pub struct MockRegistry {
    tenants: Mutex<HashMap<TenantId, TenantInfo>>,
    unavailable: Mutex<bool>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry knowing these tenants; display names are `"Tenant <id>"`.
    pub fn with_tenants<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TenantId>,
    {
        let registry = Self::new();
        for id in ids {
            let id = id.into();
            let name = format!("Tenant {}", id);
            registry.add(TenantInfo::new(id, name));
        }
        registry
    }

    pub fn add(&self, tenant: TenantInfo) {
        lock(&self.tenants).insert(tenant.id.clone(), tenant);
    }

    pub fn remove(&self, tenant_id: &TenantId) -> Option<TenantInfo> {
        lock(&self.tenants).remove(tenant_id)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *lock(&self.unavailable) = unavailable;
    }
}

#[async_trait]
impl TenantRegistry for MockRegistry {
    async fn lookup(&self, tenant_id: &TenantId) -> Result<Option<TenantInfo>, SourceError> {
        if *lock(&self.unavailable) {
            return Err(SourceError::RegistryFailed {
                tenant_id: tenant_id.clone(),
                reason: "registry unavailable".to_string(),
            });
        }
        Ok(lock(&self.tenants).get(tenant_id).cloned())
    }
}

// ============================================================================
// EVENT HELPERS
// ============================================================================

/// Wait up to `within` for the first event matching `predicate`, skipping
/// others. `None` on timeout or when the bus closes.
pub async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<SyncEvent>,
    within: Duration,
    mut predicate: F,
) -> Option<SyncEvent>
where
    F: FnMut(&SyncEvent) -> bool,
{
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(within, wait).await.ok().flatten()
}

/// Every event currently buffered, without waiting.
pub fn drain_events(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

/// Event type names of every buffered event, in order.
pub fn drain_event_types(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<&'static str> {
    drain_events(rx).iter().map(SyncEvent::event_type).collect()
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Meridian core types.

    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    pub fn object_type_strategy() -> impl Strategy<Value = ObjectType> {
        prop::sample::select(ObjectType::ALL.to_vec())
    }

    pub fn sync_state_strategy() -> impl Strategy<Value = SyncState> {
        prop_oneof![
            Just(SyncState::ActiveSync),
            Just(SyncState::Paused),
            Just(SyncState::Error),
            Just(SyncState::Disabled),
        ]
    }

    pub fn tenant_id_strategy() -> impl Strategy<Value = TenantId> {
        "[a-z][a-z0-9-]{2,15}".prop_map(TenantId::new)
    }

    /// A remote object with a small flat payload.
    pub fn remote_object_strategy() -> impl Strategy<Value = RemoteObject> {
        ("[a-z0-9]{1,12}", "[A-Za-z ]{0,20}", 0i64..100, any::<bool>()).prop_map(
            |(id, name, severity, enabled)| {
                RemoteObject::new(
                    id.clone(),
                    json!({ "id": id, "name": name, "severity": severity, "enabled": enabled }),
                )
            },
        )
    }

    /// Objects with distinct ids `obj-0..obj-n`.
    pub fn remote_objects_strategy(max: usize) -> impl Strategy<Value = Vec<RemoteObject>> {
        prop::collection::vec((0i64..100, any::<bool>()), 0..=max).prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (severity, enabled))| super::fixtures::object(i, severity, enabled))
                .collect()
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made object sets.

    use super::*;
    use serde_json::json;

    /// `obj-<i>` with a severity and an enabled flag.
    pub fn object(i: usize, severity: i64, enabled: bool) -> RemoteObject {
        let id = format!("obj-{}", i);
        RemoteObject::new(
            id.clone(),
            json!({
                "id": id,
                "name": format!("Object {}", i),
                "severity": severity,
                "enabled": enabled,
            }),
        )
    }

    /// `n` objects, severity `i % 10`, every other one enabled.
    pub fn objects(n: usize) -> Vec<RemoteObject> {
        (0..n).map(|i| object(i, (i % 10) as i64, i % 2 == 0)).collect()
    }

    /// A source serving `n` objects of every type.
    pub fn populated_source(n: usize) -> MockSource {
        ObjectType::ALL
            .into_iter()
            .fold(MockSource::new(), |source, object_type| {
                source.with_objects(object_type, objects(n))
            })
    }
}
