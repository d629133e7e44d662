//! Command Router
//!
//! Dispatches named commands to registered handlers, enforcing the tenant
//! sync-state rule before any handler runs.
//!
//! ```text
//! Command (type: "rules.update", tenantId: "acme")
//!     │
//!     ▼
//! ┌──────────────────────────────────────────────┐
//! │  1. handlers["rules.update"] empty? → error  │
//! │  2. sync-control type?          → no checks  │
//! │  3. tenant not ActiveSync, no forceLoad?     │
//! │        Warn → log, continue                  │
//! │        Reject → error                        │
//! │  4. commandStarted                           │
//! │  5. run every handler concurrently           │
//! │  6. commandCompleted | commandError          │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! A failed command publishes `commandError` before the error reaches the
//! caller.

use async_trait::async_trait;
use futures_util::future::join_all;
use meridian_admission::AdmissionController;
use meridian_core::constants::SYNC_CONTROL_COMMANDS;
use meridian_core::{
    Command, CommandError, EventBus, MeridianError, MeridianResult, PausedTenantPolicy,
    SyncEvent, SyncState,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// A handler for one or more command types.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn handle(&self, command: &Command) -> MeridianResult<Value>;
}

type Handlers = HashMap<String, Vec<Arc<dyn CommandHandler>>>;

/// Routes commands to handlers.
///
/// Handler lists are snapshotted before dispatch, so registering or
/// unregistering during an execution affects only later executions.
pub struct CommandRouter {
    handlers: RwLock<Handlers>,
    admission: Arc<AdmissionController>,
    events: EventBus,
    policy: PausedTenantPolicy,
}

impl std::fmt::Debug for CommandRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRouter")
            .field("command_types", &self.command_types())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl CommandRouter {
    pub fn new(admission: Arc<AdmissionController>, policy: PausedTenantPolicy) -> Self {
        let events = admission.events().clone();
        Self {
            handlers: RwLock::new(HashMap::new()),
            admission,
            events,
            policy,
        }
    }

    pub fn policy(&self) -> PausedTenantPolicy {
        self.policy
    }

    // ========================================================================
    // REGISTRATION
    // ========================================================================

    /// Add a handler for `command_type`. Handlers run in registration order
    /// for [`CommandRouter::execute_first`].
    pub fn register_handler(
        &self,
        command_type: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) {
        let command_type = command_type.into();
        debug!(
            command_type = %command_type,
            handler = %handler.name(),
            "Registering command handler"
        );
        self.write()
            .entry(command_type)
            .or_default()
            .push(handler);
    }

    /// Remove one registration of `handler` (matched by identity).
    pub fn unregister_handler(
        &self,
        command_type: &str,
        handler: &Arc<dyn CommandHandler>,
    ) -> bool {
        let mut handlers = self.write();
        let Some(list) = handlers.get_mut(command_type) else {
            return false;
        };
        let Some(pos) = list.iter().position(|h| same_handler(h, handler)) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            handlers.remove(command_type);
        }
        debug!(command_type, handler = %handler.name(), "Unregistered command handler");
        true
    }

    pub fn has_handlers(&self, command_type: &str) -> bool {
        self.handler_count(command_type) > 0
    }

    pub fn handler_count(&self, command_type: &str) -> usize {
        self.read().get(command_type).map_or(0, Vec::len)
    }

    /// Registered command types, sorted.
    pub fn command_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.read().keys().cloned().collect();
        types.sort();
        types
    }

    // ========================================================================
    // EXECUTION
    // ========================================================================

    /// Run every handler for `command.command_type` concurrently.
    ///
    /// One result is returned as is; several are returned as a JSON array
    /// in registration order. The first handler error fails the command.
    pub async fn execute(&self, command: Command) -> MeridianResult<Value> {
        let handlers = self.prepare(&command)?;

        info!(
            command_id = %command.command_id,
            command_type = %command.command_type,
            handler_count = handlers.len(),
            "Executing command"
        );

        let results = join_all(handlers.iter().map(|h| h.handle(&command))).await;

        let mut values = Vec::with_capacity(results.len());
        for (handler, result) in handlers.iter().zip(results) {
            match result {
                Ok(value) => values.push(value),
                Err(e) => return Err(self.fail(&command, handler.name(), e)),
            }
        }

        let result = if values.len() == 1 {
            values.pop().unwrap_or(Value::Null)
        } else {
            Value::Array(values)
        };
        self.complete(&command, &result);
        Ok(result)
    }

    /// Run only the first registered handler. Same validation and events
    /// as [`CommandRouter::execute`].
    pub async fn execute_first(&self, command: Command) -> MeridianResult<Value> {
        let handlers = self.prepare(&command)?;
        let Some(handler) = handlers.first() else {
            return Err(self.no_handlers(&command));
        };

        debug!(
            command_id = %command.command_id,
            command_type = %command.command_type,
            handler = %handler.name(),
            "Executing command with first handler"
        );

        match handler.handle(&command).await {
            Ok(result) => {
                self.complete(&command, &result);
                Ok(result)
            }
            Err(e) => Err(self.fail(&command, handler.name(), e)),
        }
    }

    /// Check the tenant rule for `command` without dispatching it.
    pub fn validate(&self, command: &Command) -> Result<(), CommandError> {
        if SYNC_CONTROL_COMMANDS.contains(&command.command_type.as_str()) {
            return Ok(());
        }
        let Some(tenant_id) = &command.tenant_id else {
            return Ok(());
        };

        let state = self
            .admission
            .get_sync_state(tenant_id)
            .unwrap_or(SyncState::Disabled);
        if state == SyncState::ActiveSync || command.is_force_load() {
            return Ok(());
        }

        match self.policy {
            PausedTenantPolicy::Warn => {
                warn!(
                    command_type = %command.command_type,
                    %tenant_id,
                    %state,
                    "Command targets a tenant without active sync; proceeding"
                );
                Ok(())
            }
            PausedTenantPolicy::Reject => Err(CommandError::TenantNotActive {
                command_type: command.command_type.clone(),
                tenant_id: tenant_id.clone(),
                state,
            }),
        }
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    /// Handler snapshot plus validation, publishing `commandStarted` on
    /// success and `commandError` on failure.
    fn prepare(&self, command: &Command) -> MeridianResult<Vec<Arc<dyn CommandHandler>>> {
        let handlers = self.read().get(&command.command_type).cloned().unwrap_or_default();
        if handlers.is_empty() {
            return Err(self.no_handlers(command));
        }

        if let Err(e) = self.validate(command) {
            self.publish_error(command, &e.to_string());
            return Err(e.into());
        }

        self.events.publish(SyncEvent::CommandStarted {
            command_id: command.command_id,
            command_type: command.command_type.clone(),
            tenant_id: command.tenant_id.clone(),
        });
        Ok(handlers)
    }

    fn no_handlers(&self, command: &Command) -> MeridianError {
        let error = CommandError::NoHandlers {
            command_type: command.command_type.clone(),
        };
        warn!(command_type = %command.command_type, "No handlers registered for command");
        self.publish_error(command, &error.to_string());
        error.into()
    }

    fn fail(&self, command: &Command, handler: &str, error: MeridianError) -> MeridianError {
        warn!(
            command_id = %command.command_id,
            command_type = %command.command_type,
            handler,
            error = %error,
            "Command handler failed"
        );
        self.publish_error(command, &error.to_string());
        error
    }

    fn complete(&self, command: &Command, result: &Value) {
        debug!(
            command_id = %command.command_id,
            command_type = %command.command_type,
            "Command completed"
        );
        self.events.publish(SyncEvent::CommandCompleted {
            command_id: command.command_id,
            command_type: command.command_type.clone(),
            result: result.clone(),
        });
    }

    fn publish_error(&self, command: &Command, error: &str) {
        self.events.publish(SyncEvent::CommandError {
            command_id: command.command_id,
            command_type: command.command_type.clone(),
            error: error.to_string(),
        });
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Handlers> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Handlers> {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn same_handler(a: &Arc<dyn CommandHandler>, b: &Arc<dyn CommandHandler>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::constants::CMD_SYNC_PAUSE;
    use meridian_core::TenantId;
    use meridian_test_utils::drain_event_types;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Echo {
        name: String,
        calls: AtomicUsize,
    }

    impl Echo {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CommandHandler for Echo {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, _command: &Command) -> MeridianResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!(self.name))
        }
    }

    struct Failing;

    #[async_trait]
    impl CommandHandler for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn handle(&self, command: &Command) -> MeridianResult<Value> {
            Err(CommandError::HandlerFailed {
                command_type: command.command_type.clone(),
                handler: "failing".to_string(),
                reason: "boom".to_string(),
            }
            .into())
        }
    }

    fn router(policy: PausedTenantPolicy) -> CommandRouter {
        let admission = Arc::new(AdmissionController::with_limits(
            4,
            Duration::from_secs(60),
            meridian_core::EventBus::new(64),
        ));
        CommandRouter::new(admission, policy)
    }

    #[tokio::test]
    async fn test_no_handlers_publishes_error_first() {
        let r = router(PausedTenantPolicy::Warn);
        let mut rx = r.events.subscribe();

        let result = r.execute(Command::new("nothing.here", json!({}))).await;
        assert_eq!(
            result,
            Err(MeridianError::Command(CommandError::NoHandlers {
                command_type: "nothing.here".to_string()
            }))
        );
        assert_eq!(drain_event_types(&mut rx), vec!["commandError"]);
    }

    #[tokio::test]
    async fn test_single_result_unwrapped_multiple_listed() {
        let r = router(PausedTenantPolicy::Warn);
        r.register_handler("x", Echo::new("a"));
        assert_eq!(r.execute(Command::new("x", json!({}))).await, Ok(json!("a")));

        r.register_handler("x", Echo::new("b"));
        assert_eq!(
            r.execute(Command::new("x", json!({}))).await,
            Ok(json!(["a", "b"]))
        );
    }

    #[tokio::test]
    async fn test_events_for_successful_command() {
        let r = router(PausedTenantPolicy::Warn);
        r.register_handler("x", Echo::new("a"));
        let mut rx = r.events.subscribe();

        r.execute(Command::new("x", json!({}))).await.expect("ok");
        assert_eq!(
            drain_event_types(&mut rx),
            vec!["commandStarted", "commandCompleted"]
        );
    }

    #[tokio::test]
    async fn test_handler_error_is_rethrown_after_event() {
        let r = router(PausedTenantPolicy::Warn);
        r.register_handler("x", Echo::new("a"));
        r.register_handler("x", Arc::new(Failing));
        let mut rx = r.events.subscribe();

        let result = r.execute(Command::new("x", json!({}))).await;
        assert!(matches!(
            result,
            Err(MeridianError::Command(CommandError::HandlerFailed { .. }))
        ));
        assert_eq!(
            drain_event_types(&mut rx),
            vec!["commandStarted", "commandError"]
        );
    }

    #[tokio::test]
    async fn test_execute_first_runs_one_handler() {
        let r = router(PausedTenantPolicy::Warn);
        let a = Echo::new("a");
        let b = Echo::new("b");
        r.register_handler("x", a.clone());
        r.register_handler("x", b.clone());

        assert_eq!(r.execute_first(Command::new("x", json!({}))).await, Ok(json!("a")));
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unregister_by_identity() {
        let r = router(PausedTenantPolicy::Warn);
        let a: Arc<dyn CommandHandler> = Echo::new("a");
        let other: Arc<dyn CommandHandler> = Echo::new("a");
        r.register_handler("x", a.clone());

        assert!(!r.unregister_handler("x", &other));
        assert!(r.unregister_handler("x", &a));
        assert!(!r.has_handlers("x"));
        assert!(r.command_types().is_empty());
    }

    #[tokio::test]
    async fn test_warn_policy_dispatches_for_paused_tenant() {
        let r = router(PausedTenantPolicy::Warn);
        r.admission.register_tenant(&TenantId::from("t1"));
        let echo = Echo::new("a");
        r.register_handler("rules.update", echo.clone());

        let cmd = Command::new("rules.update", json!({})).for_tenant("t1");
        assert!(r.execute(cmd).await.is_ok());
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reject_policy_blocks_unless_forced() {
        let r = router(PausedTenantPolicy::Reject);
        r.admission.register_tenant(&TenantId::from("t1"));
        let echo = Echo::new("a");
        r.register_handler("rules.update", echo.clone());
        let mut rx = r.events.subscribe();

        let cmd = Command::new("rules.update", json!({})).for_tenant("t1");
        assert!(matches!(
            r.execute(cmd).await,
            Err(MeridianError::Command(CommandError::TenantNotActive {
                state: SyncState::Paused,
                ..
            }))
        ));
        assert_eq!(drain_event_types(&mut rx), vec!["commandError"]);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);

        let forced = Command::new("rules.update", json!({ "forceLoad": true })).for_tenant("t1");
        assert!(r.execute(forced).await.is_ok());
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sync_control_bypasses_tenant_check() {
        let r = router(PausedTenantPolicy::Reject);
        r.register_handler(CMD_SYNC_PAUSE, Echo::new("pause"));
        let cmd = Command::new(CMD_SYNC_PAUSE, json!({ "tenantId": "ghost" })).for_tenant("ghost");
        assert!(r.validate(&cmd).is_ok());
        assert!(r.execute(cmd).await.is_ok());
    }
}
