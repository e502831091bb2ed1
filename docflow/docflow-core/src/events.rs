use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::role::Role;
use crate::workflow::WorkflowStatus;

/// Notifications emitted toward the external dispatcher. Delivery is not our concern.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    DocumentCreated { id: Uuid },
    DocumentUpdated { id: Uuid, version: u64 },
    DocumentDeleted { id: Uuid },
    DocumentShared { id: Uuid, recipient: String },
    PermissionsReplaced { id: Uuid },
    RequestCreated { request_id: Uuid, client_id: String },
    StepCompleted { request_id: Uuid, step_id: Uuid, role: Role },
    StatusChanged {
        request_id: Uuid,
        from: WorkflowStatus,
        to: WorkflowStatus,
    },
}

impl Event {
    pub fn document_id(&self) -> Option<Uuid> {
        match self {
            Event::DocumentCreated { id }
            | Event::DocumentUpdated { id, .. }
            | Event::DocumentDeleted { id }
            | Event::DocumentShared { id, .. }
            | Event::PermissionsReplaced { id } => Some(*id),
            _ => None,
        }
    }

    pub fn request_id(&self) -> Option<Uuid> {
        match self {
            Event::RequestCreated { request_id, .. }
            | Event::StepCompleted { request_id, .. }
            | Event::StatusChanged { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn send(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
