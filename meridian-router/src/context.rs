//! The owning sync context.
//!
//! [`SyncContext`] builds the admission controller, object cache, data
//! access router and command router around one event bus, starts the cache
//! listener, and registers the sync-control handlers. It owns their
//! lifetime: [`SyncContext::dispose`] stops every timer and the listener.

use crate::command::CommandRouter;
use crate::control::register_sync_control_handlers;
use crate::data::DataAccessRouter;
use meridian_admission::AdmissionController;
use meridian_cache::{spawn_cache_listener, ObjectCache};
use meridian_core::{
    Command, EventBus, ExternalSource, MeridianResult, SyncConfig, SyncEvent, TenantId,
    TenantRegistry,
};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Outcome of [`SyncContext::add_tenant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantAdded {
    /// The tenant was not registered before.
    pub registered: bool,
    /// The tenant is `ActiveSync` after the call.
    pub active: bool,
}

pub struct SyncContext {
    config: SyncConfig,
    events: EventBus,
    admission: Arc<AdmissionController>,
    cache: Arc<ObjectCache>,
    data: Arc<DataAccessRouter>,
    commands: Arc<CommandRouter>,
    shutdown_tx: watch::Sender<bool>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("config", &self.config)
            .field("admission", &self.admission)
            .finish_non_exhaustive()
    }
}

impl SyncContext {
    /// Build and wire every component. Must run inside a tokio runtime.
    pub async fn init(
        config: SyncConfig,
        source: Arc<dyn ExternalSource>,
        registry: Arc<dyn TenantRegistry>,
    ) -> MeridianResult<Self> {
        config.validate()?;

        let events = EventBus::new(config.event_capacity);
        let admission = Arc::new(AdmissionController::new(&config, events.clone()));
        let cache = Arc::new(ObjectCache::new(
            Arc::clone(&admission),
            Arc::clone(&source),
            Arc::clone(&registry),
        ));
        let data = Arc::new(DataAccessRouter::new(
            Arc::clone(&cache),
            source,
            registry,
            config.page_size,
        ));
        let commands = Arc::new(CommandRouter::new(
            Arc::clone(&admission),
            config.paused_tenant_policy,
        ));
        register_sync_control_handlers(&commands, &admission);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let listener = spawn_cache_listener(Arc::clone(&cache), events.subscribe(), shutdown_rx);

        info!(
            max_active = config.max_active_tenants,
            sync_interval_ms = admission.get_sync_interval_ms(),
            page_size = config.page_size,
            policy = ?config.paused_tenant_policy,
            "Sync context initialized"
        );

        Ok(Self {
            config,
            events,
            admission,
            cache,
            data,
            commands,
            shutdown_tx,
            listener: Mutex::new(Some(listener)),
        })
    }

    // ========================================================================
    // TENANTS
    // ========================================================================

    /// Register a tenant and, with auto-activation on, try to make it hot.
    pub fn add_tenant(&self, tenant_id: &TenantId) -> TenantAdded {
        let registered = self.admission.register_tenant(tenant_id);
        self.cache.create_store(tenant_id);
        if registered
            && self.config.auto_activate_on_register
            && !self.admission.resume_sync(tenant_id)
        {
            debug!(%tenant_id, "Active sync ceiling reached; tenant stays paused");
        }
        TenantAdded {
            registered,
            active: self.admission.is_active(tenant_id),
        }
    }

    /// Unregister a tenant and drop its cached objects.
    pub fn remove_tenant(&self, tenant_id: &TenantId) -> bool {
        let removed = self.admission.unregister_tenant(tenant_id);
        self.cache.drop_store(tenant_id);
        removed
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn cache(&self) -> &Arc<ObjectCache> {
        &self.cache
    }

    pub fn data(&self) -> &Arc<DataAccessRouter> {
        &self.data
    }

    pub fn commands(&self) -> &Arc<CommandRouter> {
        &self.commands
    }

    /// Shorthand for [`CommandRouter::execute`].
    pub async fn execute(&self, command: Command) -> MeridianResult<Value> {
        self.commands.execute(command).await
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    pub fn is_disposed(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Stop every refresh timer and the cache listener, waiting for
    /// in-flight refreshes to finish. Idempotent.
    pub async fn dispose(&self) {
        self.admission.stop_all_timers();
        let _ = self.shutdown_tx.send(true);

        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Cache listener ended abnormally");
            }
            info!("Sync context disposed");
        }
    }
}

impl Drop for SyncContext {
    fn drop(&mut self) {
        self.admission.stop_all_timers();
        let _ = self.shutdown_tx.send(true);
    }
}
