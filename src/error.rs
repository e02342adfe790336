//! Error types for lab-inventory

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabError {
    /// A quantity change would drive the sample below zero
    #[error("Quantity of {sample_id} cannot go below zero: current {current}, change {change}, result {attempted}")]
    InvalidQuantity {
        sample_id: String,
        current: Decimal,
        change: Decimal,
        attempted: Decimal,
    },

    /// An aliquot or derivative asks for more than the parent holds
    #[error("Insufficient quantity in {sample_id}: available {available}, requested {requested}")]
    InsufficientQuantity {
        sample_id: String,
        available: Decimal,
        requested: Decimal,
    },

    #[error("Could not generate a unique identifier with prefix {prefix} after {attempts} attempts")]
    IdentifierExhausted { prefix: String, attempts: u32 },

    #[error("Lineage of {sample_id} is cyclic or exceeds depth {depth}")]
    LineageCycle { sample_id: String, depth: usize },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} {id} is already {state}")]
    AlreadyInState {
        entity: &'static str,
        id: String,
        state: String,
    },

    #[error("Protocol {id} cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The store refused a write because of a constraint (FK, append-only ledger)
    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LabError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Recoverable errors describe a no-op rather than a failed write
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::AlreadyInState { .. })
    }

    /// Status code a transport layer should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::AlreadyInState { .. } | Self::InvalidTransition { .. } => 409,
            Self::Integrity(_) => 409,
            Self::InvalidQuantity { .. }
            | Self::InsufficientQuantity { .. }
            | Self::InvalidInput(_) => 422,
            Self::IdentifierExhausted { .. }
            | Self::LineageCycle { .. }
            | Self::Database(_)
            | Self::Io(_)
            | Self::Config(_)
            | Self::Internal(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, LabError>;

/// True when SQLite refused an insert because a UNIQUE or PRIMARY KEY constraint lost a race
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// Translate constraint refusals into `Integrity`, keeping other failures as database errors
pub(crate) fn classify(err: rusqlite::Error) -> LabError {
    match &err {
        rusqlite::Error::SqliteFailure(e, msg)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            LabError::Integrity(msg.clone().unwrap_or_else(|| err.to_string()))
        }
        _ => LabError::Database(err),
    }
}
