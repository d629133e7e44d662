//! Cache event listener.
//!
//! A background task that keeps the object cache in step with the
//! admission controller:
//!
//! - `SyncStateChanged` into `ActiveSync`: refresh immediately
//! - `SyncStateChanged` out of `ActiveSync`: release the refresh guard,
//!   keep the cached entries for stale reads
//! - `RefreshTriggered`: refresh (a no-op for tenants no longer active)
//! - `TenantRegistered` / `TenantUnregistered`: create / destroy the store
//!
//! Refreshes run as child tasks so a slow external source never stalls
//! event handling. On shutdown the listener stops reading events and waits
//! for in-flight refreshes to finish; a refresh is never cancelled midway.
//!
//! ```rust,ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let handle = spawn_cache_listener(cache.clone(), events.subscribe(), shutdown_rx);
//!
//! // Later
//! let _ = shutdown_tx.send(true);
//! handle.await?;
//! ```

use crate::cache::ObjectCache;
use meridian_core::{SyncEvent, SyncState, TenantId};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Spawn the listener on the current runtime.
pub fn spawn_cache_listener(
    cache: Arc<ObjectCache>,
    events: broadcast::Receiver<SyncEvent>,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(cache_listener_task(cache, events, shutdown_rx))
}

/// Run the listener until shutdown is signalled or the bus closes.
pub async fn cache_listener_task(
    cache: Arc<ObjectCache>,
    mut events: broadcast::Receiver<SyncEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut refreshes: JoinSet<()> = JoinSet::new();
    info!("Cache listener started");

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            Some(joined) = refreshes.join_next(), if !refreshes.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!(error = %e, "Refresh task panicked");
                    }
                }
            }

            received = events.recv() => match received {
                Ok(event) => handle_event(&cache, &mut refreshes, event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Cache listener lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed");
                    break;
                }
            },
        }
    }

    let pending = refreshes.len();
    if pending > 0 {
        debug!(pending, "Waiting for in-flight refreshes");
    }
    while refreshes.join_next().await.is_some() {}
    info!("Cache listener stopped");
}

fn handle_event(cache: &Arc<ObjectCache>, refreshes: &mut JoinSet<()>, event: SyncEvent) {
    match event {
        SyncEvent::TenantRegistered { tenant_id } => {
            cache.create_store(&tenant_id);
        }
        SyncEvent::TenantUnregistered { tenant_id } => {
            cache.drop_store(&tenant_id);
        }
        SyncEvent::SyncStateChanged {
            tenant_id,
            previous,
            state,
            ..
        } => {
            if state == SyncState::ActiveSync {
                spawn_refresh(cache, refreshes, tenant_id);
            } else if previous == SyncState::ActiveSync {
                debug!(%tenant_id, %state, "Tenant left active sync; cache retained");
                cache.release_sync_guard(&tenant_id);
            }
        }
        SyncEvent::RefreshTriggered { tenant_id } => {
            spawn_refresh(cache, refreshes, tenant_id);
        }
        _ => {}
    }
}

fn spawn_refresh(cache: &Arc<ObjectCache>, refreshes: &mut JoinSet<()>, tenant_id: TenantId) {
    let cache = Arc::clone(cache);
    refreshes.spawn(async move {
        // Aborted passes are already recorded on the tenant.
        if let Err(e) = cache.refresh_tenant_state(&tenant_id, false).await {
            debug!(%tenant_id, error = %e, "Refresh aborted");
        }
    });
}
