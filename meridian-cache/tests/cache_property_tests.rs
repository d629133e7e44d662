//! Property-Based Tests for Object Cache Isolation
//!
//! **Property 1: Tenant Isolation**
//!
//! For any interleaving of writes and removals across tenants, a tenant's
//! store SHALL contain exactly the entries written for that tenant and not
//! removed since.
//!
//! **Property 2: Partial Failure Tolerance**
//!
//! For any subset of failing object types, a refresh of a registered tenant
//! SHALL complete, cache every object of the succeeding types, and report
//! exactly the failing types.

use meridian_admission::AdmissionController;
use meridian_cache::{ObjectCache, RefreshOutcome};
use meridian_core::{EventBus, ObjectType, RemoteObject, TenantId};
use meridian_test_utils::generators::object_type_strategy;
use meridian_test_utils::{MockRegistry, MockSource};
use proptest::prelude::*;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn build_cache(source: MockSource, tenants: &[&str]) -> ObjectCache {
    let admission = Arc::new(AdmissionController::with_limits(
        4,
        Duration::from_secs(60),
        EventBus::new(64),
    ));
    ObjectCache::new(
        admission,
        Arc::new(source),
        Arc::new(MockRegistry::with_tenants(tenants.iter().copied())),
    )
}

// ============================================================================
// PROPERTY TEST STRATEGIES
// ============================================================================

#[derive(Debug, Clone)]
enum Write {
    Set(u8, ObjectType, u8),
    Remove(u8, ObjectType, u8),
}

fn write_strategy() -> impl Strategy<Value = Write> {
    prop_oneof![
        3 => (0u8..3, object_type_strategy(), 0u8..6)
            .prop_map(|(t, ty, id)| Write::Set(t, ty, id)),
        1 => (0u8..3, object_type_strategy(), 0u8..6)
            .prop_map(|(t, ty, id)| Write::Remove(t, ty, id)),
    ]
}

fn tenant(n: u8) -> TenantId {
    TenantId::new(format!("tenant-{}", n))
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_tenant_stores_are_isolated(
        writes in prop::collection::vec(write_strategy(), 1..60),
    ) {
        let cache = build_cache(MockSource::new(), &[]);
        let mut model: BTreeMap<TenantId, BTreeSet<(ObjectType, String)>> = BTreeMap::new();

        for write in &writes {
            match write {
                Write::Set(t, ty, id) => {
                    let id = format!("obj-{}", id);
                    cache.set_object(&tenant(*t), *ty, id.clone(), json!({ "owner": t }), None);
                    model.entry(tenant(*t)).or_default().insert((*ty, id));
                }
                Write::Remove(t, ty, id) => {
                    let id = format!("obj-{}", id);
                    cache.remove_object(&tenant(*t), *ty, &id);
                    if let Some(entries) = model.get_mut(&tenant(*t)) {
                        entries.remove(&(*ty, id));
                    }
                }
            }
        }

        for t in 0u8..3 {
            let expected = model.get(&tenant(t)).cloned().unwrap_or_default();
            let mut actual = BTreeSet::new();
            for ty in ObjectType::ALL {
                for entry in cache.get_objects_by_type(&tenant(t), ty) {
                    prop_assert_eq!(&entry.data["owner"], &json!(t));
                    actual.insert((entry.object_type, entry.id));
                }
            }
            prop_assert_eq!(actual, expected);
        }
    }

    #[test]
    fn prop_refresh_tolerates_any_failing_subset(
        failing in prop::collection::btree_set(object_type_strategy(), 0..6),
        per_type in 0usize..5,
    ) {
        let rt = test_runtime()?;
        let mut source = MockSource::new();
        for ty in ObjectType::ALL {
            let items = (0..per_type)
                .map(|i| RemoteObject::new(format!("{}-{}", ty, i), json!({ "i": i })))
                .collect();
            source = source.with_objects(ty, items);
        }
        for ty in &failing {
            source = source.failing_on(*ty);
        }
        let cache = build_cache(source, &["t1"]);
        let t = TenantId::from("t1");
        cache.admission().register_tenant(&t);

        let outcome = rt.block_on(cache.refresh_tenant_state(&t, true));
        let summary = match outcome {
            Ok(RefreshOutcome::Completed(summary)) => summary,
            other => return Err(TestCaseError::fail(format!("unexpected outcome {:?}", other))),
        };

        let reported: BTreeSet<ObjectType> = summary.failed_types.iter().copied().collect();
        prop_assert_eq!(&reported, &failing);
        prop_assert_eq!(summary.object_count, per_type * (6 - failing.len()));
        for ty in ObjectType::ALL {
            let expected = if failing.contains(&ty) { 0 } else { per_type };
            prop_assert_eq!(cache.count_by_type(&t, ty), expected);
        }
        prop_assert!(cache.get_cache_stats(&t).and_then(|s| s.last_full_sync).is_some());
    }
}
