//! Service layer for lab-inventory
//!
//! Services encapsulate business logic between callers (CLI, an HTTP layer,
//! scripts) and the repositories. Each service wraps database operations
//! with:
//! - Input validation
//! - Transaction boundaries (one immediate write transaction per operation)
//! - Identifier assignment
//! - Event emission for audit/notifications
//!
//! ## Architecture
//!
//! ```text
//! Callers (thin)
//!     ↓
//! Service Layer (business logic, explicit actor + clock)
//!     ↓
//! Domain rules (ledger, lineage, protocol, alerts, identifiers)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod events;
pub mod sample_service;
pub mod protocol_service;
pub mod experiment_service;
pub mod location_service;

// Re-exports
pub use events::{EventBus, EventListener, LabEvent, LoggingEventListener};
pub use experiment_service::ExperimentService;
pub use location_service::LocationService;
pub use protocol_service::ProtocolService;
pub use sample_service::SampleService;

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::LabDb;

/// Shared handles every service needs
#[derive(Clone)]
pub struct ServiceContext {
    pub db: Arc<LabDb>,
    pub events: Arc<EventBus>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<Config>,
}

/// Service container for dependency injection
pub struct Services {
    pub samples: Arc<SampleService>,
    pub protocols: Arc<ProtocolService>,
    pub experiments: Arc<ExperimentService>,
    pub locations: Arc<LocationService>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Create all services on the wall clock
    pub fn new(db: Arc<LabDb>, config: Config) -> Self {
        Self::with_clock(db, config, Arc::new(SystemClock))
    }

    /// Create all services with an explicit time source
    pub fn with_clock(db: Arc<LabDb>, config: Config, clock: Arc<dyn Clock>) -> Self {
        let events = Arc::new(EventBus::new());
        let ctx = ServiceContext {
            db,
            events: events.clone(),
            clock,
            config: Arc::new(config),
        };

        Self {
            samples: Arc::new(SampleService::new(ctx.clone())),
            protocols: Arc::new(ProtocolService::new(ctx.clone())),
            experiments: Arc::new(ExperimentService::new(ctx.clone())),
            locations: Arc::new(LocationService::new(ctx)),
            events,
        }
    }
}

/// Reject blank required text fields
pub(crate) fn require_text(value: &str, field: &str) -> Result<(), crate::error::LabError> {
    if value.trim().is_empty() {
        return Err(crate::error::LabError::InvalidInput(format!("{} is required", field)));
    }
    Ok(())
}
