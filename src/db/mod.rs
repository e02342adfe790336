//! SQLite store for samples, the quantity ledger, protocols and experiments
//!
//! ## Architecture
//!
//! - `LabDb` owns one connection behind a mutex
//! - Reads run directly on the connection (`with_conn`)
//! - Writes run inside `BEGIN IMMEDIATE` (`write`), which takes SQLite's
//!   write lock up front so a read-check-write on a sample row can never
//!   interleave with another writer, including writers on other connections
//!   to the same file
//!
//! ## Tables
//!
//! - `samples` - Samples with nullable `parent_sample_id` (lineage tree)
//! - `quantity_logs` - Append-only quantity ledger
//! - `storage_locations` - Freezers, shelves, ...
//! - `protocols` / `protocol_categories` - Versioned SOPs
//! - `experiments` / `experiment_samples` / `file_attachments`

pub mod schema;
pub mod models;
pub mod samples;
pub mod quantity_logs;
pub mod locations;
pub mod protocols;
pub mod experiments;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::error::LabError;

/// SQLite database for the lab inventory
pub struct LabDb {
    conn: Mutex<Connection>,
}

impl LabDb {
    /// Open or create the database file
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, LabError> {
        info!("Opening SQLite database at {:?}", path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| LabError::Internal(format!("Failed to open SQLite: {}", e)))?;

        conn.busy_timeout(busy_timeout)
            .map_err(|e| LabError::Internal(format!("Failed to set busy timeout: {}", e)))?;

        // WAL lets readers proceed while a writer holds the lock
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| LabError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        Self::init(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, LabError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| LabError::Internal(format!("Failed to open in-memory SQLite: {}", e)))?;

        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, LabError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| LabError::Internal(format!("Failed to enable foreign keys: {}", e)))?;

        schema::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, LabError> {
        self.conn
            .lock()
            .map_err(|e| LabError::Internal(format!("Lock poisoned: {}", e)))
    }

    /// Run a read-only operation
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, LabError>
    where
        F: FnOnce(&Connection) -> Result<T, LabError>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run a write operation as one all-or-nothing unit.
    ///
    /// Commits when `f` returns Ok; any error drops the transaction, which
    /// rolls back every statement it ran.
    pub fn write<F, T>(&self, f: F) -> Result<T, LabError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, LabError>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| LabError::Internal(format!("Failed to start transaction: {}", e)))?;

        let value = f(&tx)?;

        tx.commit()
            .map_err(|e| LabError::Internal(format!("Failed to commit transaction: {}", e)))?;
        Ok(value)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, LabError> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<u64, LabError> {
                let n: i64 = conn
                    .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                    .map_err(|e| LabError::Internal(format!("Query failed: {}", e)))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                sample_count: count("samples")?,
                ledger_entry_count: count("quantity_logs")?,
                protocol_count: count("protocols")?,
                experiment_count: count("experiments")?,
                storage_location_count: count("storage_locations")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub sample_count: u64,
    pub ledger_entry_count: u64,
    pub protocol_count: u64,
    pub experiment_count: u64,
    pub storage_location_count: u64,
}

// Re-exports
pub use models::{
    ChangeType, Experiment, ExperimentStatus, FileAttachment, FileType, Protocol,
    ProtocolCategory, ProtocolContent, ProtocolStatus, QuantityLogEntry, RelationshipType,
    Sample, StorageLocation,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_rolls_back_on_error() {
        let db = LabDb::open_in_memory().unwrap();

        let result: Result<(), LabError> = db.write(|tx| {
            tx.execute(
                "INSERT INTO storage_locations (name, location_type, created_at) VALUES ('F1', 'freezer', '2025-01-01 00:00:00+00:00')",
                [],
            )?;
            Err(LabError::InvalidInput("abort".into()))
        });
        assert!(result.is_err());

        assert_eq!(db.stats().unwrap().storage_location_count, 0);
    }

    #[test]
    fn test_file_database_reopens_with_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("lab.db");

        {
            let db = LabDb::open(&path, Duration::from_millis(100)).unwrap();
            db.write(|tx| {
                tx.execute(
                    "INSERT INTO storage_locations (name, location_type, created_at) VALUES ('F1', 'freezer', '2025-01-01 00:00:00+00:00')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
        }

        let db = LabDb::open(&path, Duration::from_millis(100)).unwrap();
        assert_eq!(db.stats().unwrap().storage_location_count, 1);
    }
}
