//! Sync Event Types and Bus
//!
//! Every observable change in the sync core is published as a [`SyncEvent`]
//! on a shared [`EventBus`]. The admission controller, the object cache and
//! the command router publish; the cache listener and presentation-layer
//! collaborators subscribe.
//!
//! ## Delivery
//!
//! - Uses a tokio broadcast channel, so every subscriber sees every event
//! - Publishing never blocks and never fails; with no subscribers the event
//!   is dropped
//! - A subscriber that falls more than `capacity` events behind is lagged
//!   and skips ahead

use crate::{CommandId, ObjectType, SyncHealth, SyncState, TenantId, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Event published by the sync core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    // ========================================================================
    // ADMISSION EVENTS
    // ========================================================================
    /// A tenant was registered with the admission controller.
    #[serde(rename_all = "camelCase")]
    TenantRegistered { tenant_id: TenantId },

    /// A tenant and its timer were removed.
    #[serde(rename_all = "camelCase")]
    TenantUnregistered { tenant_id: TenantId },

    /// A tenant's sync state changed.
    #[serde(rename_all = "camelCase")]
    SyncStateChanged {
        tenant_id: TenantId,
        previous: SyncState,
        state: SyncState,
        health: SyncHealth,
    },

    /// A tenant was forced into the error state.
    #[serde(rename_all = "camelCase")]
    SyncError { tenant_id: TenantId, message: String },

    /// A hot tenant's timer fired.
    #[serde(rename_all = "camelCase")]
    RefreshTriggered { tenant_id: TenantId },

    // ========================================================================
    // CACHE EVENTS
    // ========================================================================
    /// A refresh pass started.
    #[serde(rename_all = "camelCase")]
    SyncStarted { tenant_id: TenantId, forced: bool },

    /// A refresh pass finished; `failed_types` lists types whose fetch failed.
    #[serde(rename_all = "camelCase")]
    SyncCompleted {
        tenant_id: TenantId,
        completed_at: Timestamp,
        object_count: usize,
        failed_types: Vec<ObjectType>,
    },

    /// An object was written through `set_object`.
    #[serde(rename_all = "camelCase")]
    ObjectUpdated {
        tenant_id: TenantId,
        object_type: ObjectType,
        id: String,
    },

    /// An object was removed.
    #[serde(rename_all = "camelCase")]
    ObjectRemoved {
        tenant_id: TenantId,
        object_type: ObjectType,
        id: String,
    },

    /// A tenant's cache was emptied.
    #[serde(rename_all = "camelCase")]
    CacheCleared { tenant_id: TenantId },

    // ========================================================================
    // COMMAND EVENTS
    // ========================================================================
    /// Command validation passed and handlers are about to run.
    #[serde(rename_all = "camelCase")]
    CommandStarted {
        command_id: CommandId,
        command_type: String,
        tenant_id: Option<TenantId>,
    },

    /// All handlers returned; `result` is the aggregated output.
    #[serde(rename_all = "camelCase")]
    CommandCompleted {
        command_id: CommandId,
        command_type: String,
        result: serde_json::Value,
    },

    /// Validation or a handler failed.
    #[serde(rename_all = "camelCase")]
    CommandError {
        command_id: CommandId,
        command_type: String,
        error: String,
    },
}

impl SyncEvent {
    /// Stable name of this event, matching the serialized `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::TenantRegistered { .. } => "tenantRegistered",
            SyncEvent::TenantUnregistered { .. } => "tenantUnregistered",
            SyncEvent::SyncStateChanged { .. } => "syncStateChanged",
            SyncEvent::SyncError { .. } => "syncError",
            SyncEvent::RefreshTriggered { .. } => "refreshTriggered",
            SyncEvent::SyncStarted { .. } => "syncStarted",
            SyncEvent::SyncCompleted { .. } => "syncCompleted",
            SyncEvent::ObjectUpdated { .. } => "objectUpdated",
            SyncEvent::ObjectRemoved { .. } => "objectRemoved",
            SyncEvent::CacheCleared { .. } => "cacheCleared",
            SyncEvent::CommandStarted { .. } => "commandStarted",
            SyncEvent::CommandCompleted { .. } => "commandCompleted",
            SyncEvent::CommandError { .. } => "commandError",
        }
    }

    /// Tenant this event concerns, if any.
    pub fn tenant_id(&self) -> Option<&TenantId> {
        match self {
            SyncEvent::TenantRegistered { tenant_id }
            | SyncEvent::TenantUnregistered { tenant_id }
            | SyncEvent::SyncStateChanged { tenant_id, .. }
            | SyncEvent::SyncError { tenant_id, .. }
            | SyncEvent::RefreshTriggered { tenant_id }
            | SyncEvent::SyncStarted { tenant_id, .. }
            | SyncEvent::SyncCompleted { tenant_id, .. }
            | SyncEvent::ObjectUpdated { tenant_id, .. }
            | SyncEvent::ObjectRemoved { tenant_id, .. }
            | SyncEvent::CacheCleared { tenant_id } => Some(tenant_id),
            SyncEvent::CommandStarted { tenant_id, .. } => tenant_id.as_ref(),
            SyncEvent::CommandCompleted { .. } | SyncEvent::CommandError { .. } => None,
        }
    }
}

/// Broadcast bus shared by all sync components.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to every current subscriber.
    pub fn publish(&self, event: SyncEvent) {
        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(event_type, receivers, "Published sync event");
            }
            Err(_) => {
                debug!(event_type, "No subscribers for sync event");
            }
        }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_EVENT_CAPACITY)
    }
}
