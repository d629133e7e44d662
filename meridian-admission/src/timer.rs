//! Per-tenant refresh timer.
//!
//! A timer is a spawned task ticking at the sync interval. Each tick
//! publishes `RefreshTriggered`; the first tick comes one full period after
//! start because activation itself already triggers a refresh.

use meridian_core::{EventBus, SyncEvent, TenantId};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Handle to a running refresh timer. Stopping is explicit; see [`RefreshTimer::stop`].
#[derive(Debug)]
pub struct RefreshTimer {
    period: Duration,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RefreshTimer {
    /// Spawn a timer on the current tokio runtime.
    ///
    /// Returns `None` outside a runtime; the tenant then simply gets no
    /// periodic refresh until the timer is started from within one.
    pub fn start(tenant_id: TenantId, period: Duration, events: EventBus) -> Option<Self> {
        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(%tenant_id, "No tokio runtime; refresh timer not started");
                return None;
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runtime.spawn(run_refresh_timer(tenant_id, period, events, shutdown_rx));

        Some(Self {
            period,
            shutdown_tx,
            handle,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the timer. No trigger is published after this returns.
    pub fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
    }
}

async fn run_refresh_timer(
    tenant_id: TenantId,
    period: Duration,
    events: EventBus,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!(%tenant_id, period_ms = period.as_millis() as u64, "Refresh timer started");

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                if *shutdown_rx.borrow() {
                    break;
                }
                debug!(%tenant_id, "Refresh timer fired");
                events.publish(SyncEvent::RefreshTriggered {
                    tenant_id: tenant_id.clone(),
                });
            }
        }
    }

    debug!(%tenant_id, "Refresh timer stopped");
}
