//! End-to-end scenarios through a fully wired [`SyncContext`].
//!
//! Each test builds the context over a mock source and registry and drives
//! it the way a host application would: tenants come and go, reads are
//! routed, commands are dispatched, and the event stream is observed.

use meridian_core::constants::{CMD_SYNC_PAUSE, CMD_SYNC_RESUME};
use meridian_core::{
    Command, CommandError, MeridianError, ObjectType, PausedTenantPolicy, SyncConfig, SyncEvent,
    SyncHealth, SyncState, TenantId,
};
use meridian_router::{DataOrigin, ObjectQuery, SyncContext};
use meridian_test_utils::{drain_event_types, fixtures, wait_for_event, MockRegistry, MockSource};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const TENANTS: [&str; 5] = ["a", "b", "c", "d", "e"];

async fn context(config: SyncConfig, source: Arc<MockSource>) -> SyncContext {
    SyncContext::init(
        config,
        source,
        Arc::new(MockRegistry::with_tenants(TENANTS)),
    )
    .await
    .expect("valid config")
}

fn tid(id: &str) -> TenantId {
    TenantId::from(id)
}

async fn wait_synced(rx: &mut broadcast::Receiver<SyncEvent>, tenant: &str) -> SyncEvent {
    let tenant = tid(tenant);
    wait_for_event(rx, Duration::from_secs(5), |e| {
        matches!(e, SyncEvent::SyncCompleted { tenant_id, .. } if *tenant_id == tenant)
    })
    .await
    .expect("refresh completes")
}

#[tokio::test]
async fn test_fifth_tenant_waits_until_a_slot_frees() {
    let source = Arc::new(fixtures::populated_source(3));
    let ctx = context(SyncConfig::new(), Arc::clone(&source)).await;
    let mut rx = ctx.subscribe();

    for tenant in TENANTS {
        ctx.add_tenant(&tid(tenant));
    }
    assert_eq!(
        ctx.admission().active_tenants(),
        vec![tid("a"), tid("b"), tid("c"), tid("d")]
    );
    assert_eq!(ctx.admission().get_sync_state(&tid("e")), Some(SyncState::Paused));

    let denied = ctx
        .execute(Command::new(CMD_SYNC_RESUME, json!({ "tenantId": "e" })))
        .await
        .expect("control commands always run");
    assert_eq!(denied["accepted"], json!(false));

    ctx.execute(Command::new(CMD_SYNC_PAUSE, json!({ "tenantId": "a" })))
        .await
        .expect("pause");
    let granted = ctx
        .execute(Command::new(CMD_SYNC_RESUME, json!({ "tenantId": "e" })))
        .await
        .expect("resume");
    assert_eq!(granted["accepted"], json!(true));
    assert_eq!(ctx.admission().active_count(), 4);

    wait_synced(&mut rx, "e").await;
    assert_eq!(ctx.cache().count_by_type(&tid("e"), ObjectType::Rules), 3);
    ctx.dispose().await;
}

#[tokio::test]
async fn test_hot_tenant_reads_do_no_io() {
    let source = Arc::new(fixtures::populated_source(5));
    let ctx = context(SyncConfig::new(), Arc::clone(&source)).await;
    let mut rx = ctx.subscribe();

    ctx.add_tenant(&tid("a"));
    wait_synced(&mut rx, "a").await;
    let calls = source.total_calls();

    let page = ctx
        .data()
        .get_objects(&tid("a"), ObjectType::Sources, &ObjectQuery::new().with_limit(2))
        .await
        .expect("cached page");
    assert_eq!(page.origin, DataOrigin::Cache);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total, Some(5));

    let one = ctx
        .data()
        .get_object(&tid("a"), ObjectType::Sources, "obj-4")
        .await
        .expect("lookup");
    assert!(one.is_some());
    assert_eq!(ctx.data().get_object_count(&tid("a"), ObjectType::Alerts, &[]).await, 5);

    assert_eq!(source.total_calls(), calls);
    ctx.dispose().await;
}

#[tokio::test]
async fn test_cold_tenant_reads_go_to_the_source() {
    let source = Arc::new(fixtures::populated_source(5));
    let ctx = context(SyncConfig::new().with_auto_activate(false), Arc::clone(&source)).await;
    ctx.add_tenant(&tid("b"));

    let page = ctx
        .data()
        .get_objects(&tid("b"), ObjectType::Users, &ObjectQuery::new().with_offset(3))
        .await
        .expect("direct page");
    assert_eq!(page.origin, DataOrigin::Remote);
    assert_eq!(page.items.len(), 2);
    assert!(source.total_calls() > 0);

    // Direct reads never populate the cache.
    assert_eq!(ctx.cache().count_by_type(&tid("b"), ObjectType::Users), 0);
    ctx.dispose().await;
}

#[tokio::test]
async fn test_partial_failure_degrades_without_error() {
    let source = Arc::new(fixtures::populated_source(2).failing_on(ObjectType::Rules));
    let ctx = context(SyncConfig::new(), Arc::clone(&source)).await;
    let mut rx = ctx.subscribe();

    ctx.add_tenant(&tid("a"));
    match wait_synced(&mut rx, "a").await {
        SyncEvent::SyncCompleted { failed_types, object_count, .. } => {
            assert_eq!(failed_types, vec![ObjectType::Rules]);
            assert_eq!(object_count, 10);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let record = ctx.admission().get_record(&tid("a")).expect("registered");
    assert_eq!(record.state, SyncState::ActiveSync);
    assert_eq!(record.health, SyncHealth::Degraded);
    assert!(record.last_sync_timestamp.is_some());

    // Nothing cached for rules, so the read falls through and surfaces the failure.
    let rules = ctx
        .data()
        .get_objects(&tid("a"), ObjectType::Rules, &ObjectQuery::new())
        .await;
    assert!(matches!(rules, Err(MeridianError::Source(_))));
    ctx.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_paused_tenant_gets_no_refresh_ticks() {
    let source = Arc::new(fixtures::populated_source(1));
    let config = SyncConfig::new()
        .with_auto_activate(false)
        .with_sync_interval(Duration::from_secs(10));
    let ctx = context(config, Arc::clone(&source)).await;
    let mut rx = ctx.subscribe();

    ctx.add_tenant(&tid("a"));
    tokio::time::sleep(Duration::from_secs(45)).await;

    assert!(!drain_event_types(&mut rx).contains(&"refreshTriggered"));
    assert_eq!(source.total_calls(), 0);
    assert!(!ctx.admission().has_timer(&tid("a")));
    ctx.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_hot_tenant_refreshes_on_every_tick() {
    let source = Arc::new(fixtures::populated_source(1));
    let config = SyncConfig::new().with_sync_interval(Duration::from_secs(10));
    let ctx = context(config, Arc::clone(&source)).await;
    let mut rx = ctx.subscribe();

    ctx.add_tenant(&tid("a"));
    wait_synced(&mut rx, "a").await;

    // New remote data shows up after the next tick.
    source.set_objects(ObjectType::Dashboards, fixtures::objects(4));
    wait_for_event(&mut rx, Duration::from_secs(15), |e| {
        e.event_type() == "refreshTriggered"
    })
    .await
    .expect("tick");
    wait_synced(&mut rx, "a").await;
    assert_eq!(ctx.cache().count_by_type(&tid("a"), ObjectType::Dashboards), 4);
    ctx.dispose().await;
}

#[tokio::test]
async fn test_unknown_tenant_marks_error() {
    let source = Arc::new(fixtures::populated_source(1));
    let ctx = context(SyncConfig::new(), Arc::clone(&source)).await;
    let mut rx = ctx.subscribe();

    ctx.add_tenant(&tid("ghost"));
    let event = wait_for_event(&mut rx, Duration::from_secs(5), |e| {
        e.event_type() == "syncError"
    })
    .await
    .expect("error event");
    assert_eq!(event.tenant_id(), Some(&tid("ghost")));

    let record = ctx.admission().get_record(&tid("ghost")).expect("registered");
    assert_eq!(record.state, SyncState::Error);
    assert_eq!(record.health, SyncHealth::Failed);
    assert!(!ctx.admission().has_timer(&tid("ghost")));
    ctx.dispose().await;
}

#[tokio::test]
async fn test_unregistered_command_type_fails_with_event() {
    let ctx = context(SyncConfig::new(), Arc::new(MockSource::new())).await;
    let mut rx = ctx.subscribe();

    let result = ctx
        .execute(Command::new("rules.deploy", json!({})).for_tenant("a"))
        .await;
    assert!(matches!(
        result,
        Err(MeridianError::Command(CommandError::NoHandlers { .. }))
    ));
    assert_eq!(drain_event_types(&mut rx), vec!["commandError"]);
    ctx.dispose().await;
}

#[tokio::test]
async fn test_reject_policy_blocks_paused_tenant_commands() {
    let config = SyncConfig::new()
        .with_auto_activate(false)
        .with_paused_tenant_policy(PausedTenantPolicy::Reject);
    let ctx = context(config, Arc::new(MockSource::new())).await;
    ctx.add_tenant(&tid("c"));

    let command = Command::new("rules.deploy", json!({})).for_tenant("c");
    assert!(matches!(
        ctx.commands().validate(&command),
        Err(CommandError::TenantNotActive { state: SyncState::Paused, .. })
    ));

    let forced = Command::new("rules.deploy", json!({ "forceLoad": true })).for_tenant("c");
    assert!(ctx.commands().validate(&forced).is_ok());
    ctx.dispose().await;
}

#[tokio::test]
async fn test_remove_tenant_frees_slot_and_cache() {
    let source = Arc::new(fixtures::populated_source(2));
    let ctx = context(SyncConfig::new().with_max_active_tenants(1), Arc::clone(&source)).await;
    let mut rx = ctx.subscribe();

    ctx.add_tenant(&tid("a"));
    wait_synced(&mut rx, "a").await;
    assert!(!ctx.add_tenant(&tid("b")).active);

    assert!(ctx.remove_tenant(&tid("a")));
    assert!(!ctx.cache().has_store(&tid("a")));
    assert!(ctx.admission().resume_sync(&tid("b")));
    wait_synced(&mut rx, "b").await;
    assert_eq!(ctx.cache().count_by_type(&tid("b"), ObjectType::Parsers), 2);
    ctx.dispose().await;
}
