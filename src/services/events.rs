//! Event system for lab operations
//!
//! Services emit an event after each committed write. Useful for:
//! - Audit logging
//! - Alert notifications
//! - Cache invalidation in a surrounding application

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::db::models::{ChangeType, ExperimentStatus, ProtocolStatus, RelationshipType};

/// Events emitted by services
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LabEvent {
    // Sample events
    SampleCreated {
        id: String,
        sample_id: String,
        parent_id: Option<String>,
        relationship_type: Option<RelationshipType>,
        created_by: String,
    },
    SampleUpdated {
        id: String,
    },
    SampleDeleted {
        id: String,
        sample_id: String,
    },
    QuantityChanged {
        id: String,
        sample_id: String,
        change_type: ChangeType,
        quantity_change: Decimal,
        quantity_after: Decimal,
        changed_by: String,
    },

    // Protocol events
    ProtocolCreated {
        id: String,
        code: String,
        version: i64,
    },
    ProtocolUpdated {
        id: String,
    },
    ProtocolStatusChanged {
        id: String,
        code: String,
        from: ProtocolStatus,
        to: ProtocolStatus,
        actor: Option<String>,
    },
    ProtocolVersionCreated {
        id: String,
        code: String,
        version: i64,
        root_id: String,
    },

    // Experiment events
    ExperimentCreated {
        id: String,
        protocol_id: Option<String>,
    },
    ExperimentStatusChanged {
        id: String,
        status: ExperimentStatus,
    },
    SampleLinked {
        experiment_id: String,
        sample_id: String,
    },
    AttachmentAdded {
        experiment_id: String,
        attachment_id: String,
        storage_key: String,
    },

    // Location events
    LocationCreated {
        id: i64,
        name: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &LabEvent);
}

/// Event bus for broadcasting lab events
pub struct EventBus {
    sender: broadcast::Sender<LabEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: LabEvent) {
        trace!(event = ?event, "Emitting lab event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LabEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &LabEvent) {
        match event {
            LabEvent::SampleCreated {
                sample_id,
                parent_id,
                created_by,
                ..
            } => {
                info!(sample = %sample_id, parent = ?parent_id, actor = %created_by, "Sample created");
            }
            LabEvent::QuantityChanged {
                sample_id,
                change_type,
                quantity_change,
                quantity_after,
                changed_by,
                ..
            } => {
                info!(
                    sample = %sample_id,
                    change_type = %change_type,
                    change = %quantity_change,
                    after = %quantity_after,
                    actor = %changed_by,
                    "Quantity changed"
                );
            }
            LabEvent::ProtocolStatusChanged { code, from, to, actor, .. } => {
                info!(code = %code, from = %from, to = %to, actor = ?actor, "Protocol status changed");
            }
            LabEvent::ProtocolVersionCreated { code, version, .. } => {
                info!(code = %code, version, "Protocol version created");
            }
            _ => {
                debug!(event = ?event, "Lab event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
