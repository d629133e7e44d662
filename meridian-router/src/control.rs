//! Built-in sync-control command handlers.
//!
//! `sync.getState`, `sync.setState`, `sync.pause` and `sync.resume` act on
//! the admission controller directly. The payload names the tenant:
//!
//! ```json
//! { "tenantId": "acme", "state": "paused" }
//! ```
//!
//! `state` is only read by `sync.setState`. When the payload has no
//! `tenantId` the command's own tenant is used.

use crate::command::{CommandHandler, CommandRouter};
use async_trait::async_trait;
use meridian_admission::AdmissionController;
use meridian_core::constants::{
    CMD_SYNC_GET_STATE, CMD_SYNC_PAUSE, CMD_SYNC_RESUME, CMD_SYNC_SET_STATE,
};
use meridian_core::{Command, CommandError, MeridianResult, SyncState, TenantId};
use serde_json::{json, Value};
use std::sync::Arc;

/// Which admission operation a handler performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncControl {
    GetState,
    SetState,
    Pause,
    Resume,
}

impl SyncControl {
    pub const ALL: [SyncControl; 4] = [
        SyncControl::GetState,
        SyncControl::SetState,
        SyncControl::Pause,
        SyncControl::Resume,
    ];

    pub fn command_type(&self) -> &'static str {
        match self {
            SyncControl::GetState => CMD_SYNC_GET_STATE,
            SyncControl::SetState => CMD_SYNC_SET_STATE,
            SyncControl::Pause => CMD_SYNC_PAUSE,
            SyncControl::Resume => CMD_SYNC_RESUME,
        }
    }
}

/// Handler for one sync-control command type.
pub struct SyncControlHandler {
    control: SyncControl,
    admission: Arc<AdmissionController>,
}

impl SyncControlHandler {
    pub fn new(control: SyncControl, admission: Arc<AdmissionController>) -> Self {
        Self { control, admission }
    }

    fn respond(&self, tenant_id: &TenantId, accepted: bool) -> Value {
        json!({
            "tenantId": tenant_id,
            "accepted": accepted,
            "state": self.admission.get_sync_state(tenant_id),
        })
    }
}

#[async_trait]
impl CommandHandler for SyncControlHandler {
    fn name(&self) -> &str {
        self.control.command_type()
    }

    async fn handle(&self, command: &Command) -> MeridianResult<Value> {
        let tenant_id = target_tenant(command)?;
        let value = match self.control {
            SyncControl::GetState => match self.admission.get_record(&tenant_id) {
                Some(record) => serde_json::to_value(record).map_err(|e| invalid(command, e))?,
                None => Value::Null,
            },
            SyncControl::SetState => {
                let state = requested_state(command)?;
                let accepted = self.admission.set_sync_state(&tenant_id, state);
                self.respond(&tenant_id, accepted)
            }
            SyncControl::Pause => {
                let accepted = self.admission.pause_sync(&tenant_id);
                self.respond(&tenant_id, accepted)
            }
            SyncControl::Resume => {
                let accepted = self.admission.resume_sync(&tenant_id);
                self.respond(&tenant_id, accepted)
            }
        };
        Ok(value)
    }
}

/// Register one handler per sync-control command type.
pub fn register_sync_control_handlers(
    router: &CommandRouter,
    admission: &Arc<AdmissionController>,
) {
    for control in SyncControl::ALL {
        router.register_handler(
            control.command_type(),
            Arc::new(SyncControlHandler::new(control, Arc::clone(admission))),
        );
    }
}

fn target_tenant(command: &Command) -> Result<TenantId, CommandError> {
    match command.payload.get("tenantId") {
        Some(Value::String(id)) if !id.is_empty() => Ok(TenantId::new(id.clone())),
        Some(other) => Err(CommandError::InvalidPayload {
            command_type: command.command_type.clone(),
            reason: format!("tenantId must be a non-empty string, got {}", other),
        }),
        None => command
            .tenant_id
            .clone()
            .ok_or_else(|| CommandError::InvalidPayload {
                command_type: command.command_type.clone(),
                reason: "missing tenantId".to_string(),
            }),
    }
}

fn requested_state(command: &Command) -> Result<SyncState, CommandError> {
    let raw = command
        .payload
        .get("state")
        .and_then(Value::as_str)
        .ok_or_else(|| CommandError::InvalidPayload {
            command_type: command.command_type.clone(),
            reason: "missing state".to_string(),
        })?;
    raw.parse().map_err(|e| invalid(command, e))
}

fn invalid(command: &Command, error: impl std::fmt::Display) -> CommandError {
    CommandError::InvalidPayload {
        command_type: command.command_type.clone(),
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::{EventBus, MeridianError, PausedTenantPolicy};
    use std::time::Duration;

    fn setup() -> (CommandRouter, Arc<AdmissionController>) {
        let admission = Arc::new(AdmissionController::with_limits(
            1,
            Duration::from_secs(60),
            EventBus::new(64),
        ));
        let router = CommandRouter::new(Arc::clone(&admission), PausedTenantPolicy::Reject);
        register_sync_control_handlers(&router, &admission);
        (router, admission)
    }

    #[test]
    fn test_all_control_types_registered() {
        let (router, _) = setup();
        for control in SyncControl::ALL {
            assert_eq!(router.handler_count(control.command_type()), 1);
        }
    }

    #[tokio::test]
    async fn test_get_state() {
        let (router, admission) = setup();
        admission.register_tenant(&TenantId::from("t1"));

        let value = router
            .execute(Command::new(CMD_SYNC_GET_STATE, json!({ "tenantId": "t1" })))
            .await
            .expect("ok");
        assert_eq!(value["state"], json!("paused"));
        assert_eq!(value["health"], json!("ok"));

        let unknown = router
            .execute(Command::new(CMD_SYNC_GET_STATE, json!({ "tenantId": "nope" })))
            .await
            .expect("ok");
        assert_eq!(unknown, Value::Null);
    }

    #[tokio::test]
    async fn test_resume_respects_ceiling() {
        let (router, admission) = setup();
        admission.register_tenant(&TenantId::from("t1"));
        admission.register_tenant(&TenantId::from("t2"));

        let first = router
            .execute(Command::new(CMD_SYNC_RESUME, json!({ "tenantId": "t1" })))
            .await
            .expect("ok");
        assert_eq!(first["accepted"], json!(true));
        assert_eq!(first["state"], json!("activeSync"));

        let second = router
            .execute(Command::new(CMD_SYNC_RESUME, json!({ "tenantId": "t2" })))
            .await
            .expect("ok");
        assert_eq!(second["accepted"], json!(false));
        assert_eq!(second["state"], json!("paused"));
    }

    #[tokio::test]
    async fn test_set_state_and_pause() {
        let (router, admission) = setup();
        admission.register_tenant(&TenantId::from("t1"));

        let set = router
            .execute(Command::new(
                CMD_SYNC_SET_STATE,
                json!({ "tenantId": "t1", "state": "disabled" }),
            ))
            .await
            .expect("ok");
        assert_eq!(set["accepted"], json!(true));

        let pause = router
            .execute(Command::new(CMD_SYNC_PAUSE, json!({ "tenantId": "t1" })))
            .await
            .expect("ok");
        assert_eq!(pause["accepted"], json!(false));
        assert_eq!(pause["state"], json!("disabled"));
    }

    #[tokio::test]
    async fn test_invalid_payloads() {
        let (router, admission) = setup();
        admission.register_tenant(&TenantId::from("t1"));

        let missing = router
            .execute(Command::new(CMD_SYNC_PAUSE, json!({})))
            .await;
        assert!(matches!(
            missing,
            Err(MeridianError::Command(CommandError::InvalidPayload { .. }))
        ));

        let bad_state = router
            .execute(Command::new(
                CMD_SYNC_SET_STATE,
                json!({ "tenantId": "t1", "state": "sleeping" }),
            ))
            .await;
        assert!(matches!(
            bad_state,
            Err(MeridianError::Command(CommandError::InvalidPayload { .. }))
        ));
    }

    #[tokio::test]
    async fn test_command_tenant_used_when_payload_has_none() {
        let (router, admission) = setup();
        admission.register_tenant(&TenantId::from("t1"));

        let value = router
            .execute(Command::new(CMD_SYNC_RESUME, json!({})).for_tenant("t1"))
            .await
            .expect("ok");
        assert_eq!(value["tenantId"], json!("t1"));
        assert_eq!(value["accepted"], json!(true));
    }
}
