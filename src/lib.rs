//! Lab Inventory - sample lineage, quantity ledger and protocol versioning
//!
//! Tracks laboratory samples, how they were derived from one another, every
//! change to their quantity, the experiments that use them and the versioned
//! protocols (SOPs) those experiments follow.
//!
//! ## Architecture
//!
//! - **Store** (`db`): SQLite via rusqlite. Writes run in `BEGIN IMMEDIATE`
//!   transactions, so a read-check-write on a sample row is serialized
//!   against every other writer on the same file.
//! - **Domain rules**: `ledger` (the only path that changes a quantity),
//!   `lineage` (cycle-guarded ancestry/descendant walks), `alerts` (pure
//!   alert derivation), `protocol` (status machine and version chain),
//!   `identifiers` (`SAMP-2025-001` / `SOP-001` codes with bounded retry).
//! - **Services** (`services`): transaction boundaries, orchestration and
//!   event emission. Every operation takes an explicit actor; time comes from
//!   an injected `Clock`.
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/lab-inventory/
//! ├── lab.db          # SQLite database (WAL mode)
//! └── config.toml     # Configuration
//! ```

pub mod alerts;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod identifiers;
pub mod ledger;
pub mod lineage;
pub mod protocol;
pub mod services;

// Re-exports
pub use alerts::{alert_status, Alert, AlertKind, SampleAlerts, Severity};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use db::LabDb;
pub use error::{LabError, Result};
pub use services::{
    EventBus, ExperimentService, LabEvent, LocationService, ProtocolService, SampleService,
    Services,
};
