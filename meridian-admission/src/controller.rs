//! Admission controller: per-tenant sync state and the hot-tenant ceiling.
//!
//! # State Transition Diagram
//!
//! ```text
//!            register
//!               │
//!               ▼
//!           Paused ⇄ ActiveSync      (→ ActiveSync gated by the ceiling)
//!               ╲      │
//!                ╲     ▼
//!                 → Error            (set_sync_error, from any state)
//!
//!   Paused / ActiveSync / Error → Disabled   (external configuration only)
//! ```
//!
//! Records and timers each sit behind one coarse mutex. Every public
//! operation takes the record lock first and the timer lock second, so a
//! transition and its timer start/stop are observed atomically.

use crate::timer::RefreshTimer;
use meridian_core::config::clamp_sync_interval;
use meridian_core::{
    EventBus, SyncConfig, SyncEvent, SyncHealth, SyncState, TenantId, TenantSyncRecord, Timestamp,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

type Records = HashMap<TenantId, TenantSyncRecord>;
type Timers = HashMap<TenantId, RefreshTimer>;

/// Decides which tenants may run background refresh.
#[derive(Debug)]
pub struct AdmissionController {
    records: Mutex<Records>,
    timers: Mutex<Timers>,
    max_active: usize,
    interval: Mutex<Duration>,
    events: EventBus,
}

impl AdmissionController {
    /// Create a controller from the sync configuration.
    pub fn new(config: &SyncConfig, events: EventBus) -> Self {
        Self::with_limits(config.max_active_tenants, config.sync_interval, events)
    }

    /// Create a controller with an explicit ceiling and interval.
    pub fn with_limits(max_active: usize, interval: Duration, events: EventBus) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
            max_active,
            interval: Mutex::new(clamp_sync_interval(interval)),
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn max_active_tenants(&self) -> usize {
        self.max_active
    }

    // ========================================================================
    // REGISTRATION
    // ========================================================================

    /// Register a tenant as `Paused`/`OK`.
    ///
    /// Idempotent: returns `false` and publishes nothing when the tenant is
    /// already registered.
    pub fn register_tenant(&self, tenant_id: &TenantId) -> bool {
        let mut records = self.lock_records();
        if records.contains_key(tenant_id) {
            debug!(%tenant_id, "Tenant already registered");
            return false;
        }
        records.insert(tenant_id.clone(), TenantSyncRecord::new(tenant_id.clone()));
        info!(%tenant_id, "Tenant registered");
        self.events.publish(SyncEvent::TenantRegistered {
            tenant_id: tenant_id.clone(),
        });
        true
    }

    /// Stop the tenant's timer and delete its record.
    pub fn unregister_tenant(&self, tenant_id: &TenantId) -> bool {
        let mut records = self.lock_records();
        let mut timers = self.lock_timers();
        if let Some(timer) = timers.remove(tenant_id) {
            timer.stop();
        }
        if records.remove(tenant_id).is_none() {
            return false;
        }
        info!(%tenant_id, "Tenant unregistered");
        self.events.publish(SyncEvent::TenantUnregistered {
            tenant_id: tenant_id.clone(),
        });
        true
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn is_registered(&self, tenant_id: &TenantId) -> bool {
        self.lock_records().contains_key(tenant_id)
    }

    pub fn get_sync_state(&self, tenant_id: &TenantId) -> Option<SyncState> {
        self.lock_records().get(tenant_id).map(|r| r.state)
    }

    pub fn get_record(&self, tenant_id: &TenantId) -> Option<TenantSyncRecord> {
        self.lock_records().get(tenant_id).cloned()
    }

    /// All records, ordered by tenant id.
    pub fn list_records(&self) -> Vec<TenantSyncRecord> {
        let mut records: Vec<_> = self.lock_records().values().cloned().collect();
        records.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        records
    }

    pub fn is_active(&self, tenant_id: &TenantId) -> bool {
        self.get_sync_state(tenant_id) == Some(SyncState::ActiveSync)
    }

    /// Number of tenants currently `ActiveSync`.
    pub fn active_count(&self) -> usize {
        count_active(&self.lock_records())
    }

    /// Hot tenants, ordered by tenant id.
    pub fn active_tenants(&self) -> Vec<TenantId> {
        let mut active: Vec<_> = self
            .lock_records()
            .values()
            .filter(|r| r.is_active())
            .map(|r| r.tenant_id.clone())
            .collect();
        active.sort();
        active
    }

    /// Whether `resume_sync` would currently succeed for this tenant.
    pub fn can_activate_sync(&self, tenant_id: &TenantId) -> bool {
        can_activate(&self.lock_records(), tenant_id, self.max_active)
    }

    /// Whether a refresh timer is running for this tenant.
    pub fn has_timer(&self, tenant_id: &TenantId) -> bool {
        self.lock_timers().contains_key(tenant_id)
    }

    // ========================================================================
    // TRANSITIONS
    // ========================================================================

    /// Move a tenant to `state`.
    ///
    /// Returns `false` for an unknown tenant, or when entering `ActiveSync`
    /// would exceed the ceiling. Setting the current state again is a
    /// successful no-op.
    pub fn set_sync_state(&self, tenant_id: &TenantId, state: SyncState) -> bool {
        let mut records = self.lock_records();
        let mut timers = self.lock_timers();
        self.transition(&mut records, &mut timers, tenant_id, state)
    }

    /// Move a tenant to `Paused`. Fails for unknown or `Disabled` tenants.
    pub fn pause_sync(&self, tenant_id: &TenantId) -> bool {
        let mut records = self.lock_records();
        let mut timers = self.lock_timers();
        match records.get(tenant_id).map(|r| r.state) {
            None => false,
            Some(SyncState::Disabled) => {
                debug!(%tenant_id, "Pause ignored for disabled tenant");
                false
            }
            Some(_) => self.transition(&mut records, &mut timers, tenant_id, SyncState::Paused),
        }
    }

    /// Move a tenant to `ActiveSync` if a slot is free and it is not `Disabled`.
    pub fn resume_sync(&self, tenant_id: &TenantId) -> bool {
        let mut records = self.lock_records();
        let mut timers = self.lock_timers();
        if !can_activate(&records, tenant_id, self.max_active) {
            debug!(
                %tenant_id,
                active = count_active(&records),
                max_active = self.max_active,
                "Resume refused"
            );
            return false;
        }
        self.transition(&mut records, &mut timers, tenant_id, SyncState::ActiveSync)
    }

    /// Force `Error`/`Failed` and record `message`. Always succeeds for a
    /// registered tenant.
    pub fn set_sync_error(&self, tenant_id: &TenantId, message: impl Into<String>) {
        let message = message.into();
        let mut records = self.lock_records();
        let mut timers = self.lock_timers();

        let Some(record) = records.get_mut(tenant_id) else {
            warn!(%tenant_id, error = %message, "Sync error for unregistered tenant");
            return;
        };

        let previous = record.state;
        record.state = SyncState::Error;
        record.health = SyncHealth::Failed;
        record.error_message = Some(message.clone());

        if let Some(timer) = timers.remove(tenant_id) {
            timer.stop();
        }

        warn!(%tenant_id, error = %message, previous = %previous, "Tenant sync failed");

        if previous != SyncState::Error {
            self.events.publish(SyncEvent::SyncStateChanged {
                tenant_id: tenant_id.clone(),
                previous,
                state: SyncState::Error,
                health: SyncHealth::Failed,
            });
        }
        self.events.publish(SyncEvent::SyncError {
            tenant_id: tenant_id.clone(),
            message,
        });
    }

    /// Record a successful pass at `timestamp`.
    ///
    /// An `Error` tenant keeps its state, health and message; only the
    /// timestamp moves. Otherwise a `Degraded` tenant returns to `OK`.
    pub fn update_last_sync(&self, tenant_id: &TenantId, timestamp: Timestamp) {
        let mut records = self.lock_records();
        let Some(record) = records.get_mut(tenant_id) else {
            debug!(%tenant_id, "Last-sync update for unregistered tenant");
            return;
        };
        record.last_sync_timestamp = Some(timestamp);
        if record.state != SyncState::Error && record.health == SyncHealth::Degraded {
            record.health = SyncHealth::Ok;
        }
    }

    /// Mark a tenant `Degraded` after a pass with per-type failures.
    /// `Error` tenants are left alone.
    pub fn mark_degraded(&self, tenant_id: &TenantId, reason: &str) {
        let mut records = self.lock_records();
        if let Some(record) = records.get_mut(tenant_id) {
            if record.state != SyncState::Error {
                record.health = SyncHealth::Degraded;
                warn!(%tenant_id, reason, "Tenant sync degraded");
            }
        }
    }

    // ========================================================================
    // INTERVAL
    // ========================================================================

    pub fn sync_interval(&self) -> Duration {
        *self.interval.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_sync_interval_ms(&self) -> u64 {
        self.sync_interval().as_millis() as u64
    }

    /// Change the refresh interval, clamped to 10s..=1h, and restart every
    /// running timer with the new period. Returns the effective interval.
    pub fn set_sync_interval_ms(&self, ms: u64) -> u64 {
        let interval = clamp_sync_interval(Duration::from_millis(ms));
        {
            let mut current = self.interval.lock().unwrap_or_else(PoisonError::into_inner);
            *current = interval;
        }

        let mut timers = self.lock_timers();
        let tenants: Vec<TenantId> = timers.keys().cloned().collect();
        for tenant_id in tenants {
            if let Some(timer) = timers.remove(&tenant_id) {
                timer.stop();
            }
            let restarted = RefreshTimer::start(tenant_id.clone(), interval, self.events.clone());
            if let Some(timer) = restarted {
                timers.insert(tenant_id, timer);
            }
        }

        info!(
            interval_ms = interval.as_millis() as u64,
            restarted = timers.len(),
            "Sync interval changed"
        );
        interval.as_millis() as u64
    }

    /// Stop every timer. Records are kept.
    pub fn stop_all_timers(&self) {
        let mut timers = self.lock_timers();
        for (_, timer) in timers.drain() {
            timer.stop();
        }
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn transition(
        &self,
        records: &mut Records,
        timers: &mut Timers,
        tenant_id: &TenantId,
        state: SyncState,
    ) -> bool {
        let active = count_active(records);
        let Some(record) = records.get_mut(tenant_id) else {
            warn!(%tenant_id, %state, "State change for unregistered tenant");
            return false;
        };

        let previous = record.state;
        if previous == state {
            return true;
        }

        if state == SyncState::ActiveSync && active >= self.max_active {
            info!(
                %tenant_id,
                active,
                max_active = self.max_active,
                "Active sync ceiling reached"
            );
            return false;
        }

        record.state = state;
        match state {
            SyncState::ActiveSync => record.health = SyncHealth::Ok,
            SyncState::Error => record.health = SyncHealth::Failed,
            SyncState::Paused | SyncState::Disabled => {}
        }
        if state != SyncState::Error {
            record.error_message = None;
        }
        let health = record.health;

        if state == SyncState::ActiveSync {
            if !timers.contains_key(tenant_id) {
                let interval = self.sync_interval();
                if let Some(timer) =
                    RefreshTimer::start(tenant_id.clone(), interval, self.events.clone())
                {
                    timers.insert(tenant_id.clone(), timer);
                }
            }
        } else if let Some(timer) = timers.remove(tenant_id) {
            timer.stop();
        }

        info!(%tenant_id, %previous, %state, "Sync state changed");
        self.events.publish(SyncEvent::SyncStateChanged {
            tenant_id: tenant_id.clone(),
            previous,
            state,
            health,
        });
        true
    }

    fn lock_records(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_timers(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AdmissionController {
    fn drop(&mut self) {
        self.stop_all_timers();
    }
}

fn count_active(records: &Records) -> usize {
    records.values().filter(|r| r.is_active()).count()
}

fn can_activate(records: &Records, tenant_id: &TenantId, max_active: usize) -> bool {
    match records.get(tenant_id) {
        None => false,
        Some(r) if r.state == SyncState::Disabled => false,
        Some(r) if r.is_active() => true,
        Some(_) => count_active(records) < max_active,
    }
}
