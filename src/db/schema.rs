//! Database schema definitions

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::LabError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), LabError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(LabError::Config(format!(
            "Database schema v{} is newer than this build (v{})",
            current_version, SCHEMA_VERSION
        )));
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, LabError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| LabError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()
        .map_err(|e| LabError::Internal(format!("Failed to read schema_version: {}", e)))?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), LabError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| LabError::Internal(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| LabError::Internal(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), LabError> {
    conn.execute_batch(SAMPLES_SCHEMA)
        .map_err(|e| LabError::Internal(format!("Failed to create sample tables: {}", e)))?;

    conn.execute_batch(PROTOCOLS_SCHEMA)
        .map_err(|e| LabError::Internal(format!("Failed to create protocol tables: {}", e)))?;

    conn.execute_batch(EXPERIMENTS_SCHEMA)
        .map_err(|e| LabError::Internal(format!("Failed to create experiment tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| LabError::Internal(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), LabError> {
    info!(from_version, "No migration steps registered");
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Storage locations, samples and the quantity ledger.
///
/// Quantities are canonical decimal strings. The ledger rejects UPDATE and
/// DELETE, so a sample with history cannot be deleted either.
const SAMPLES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS storage_locations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    location_type TEXT NOT NULL,
    temperature TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS samples (
    id TEXT PRIMARY KEY NOT NULL,
    sample_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    sample_type TEXT NOT NULL,
    quantity TEXT NOT NULL,
    initial_quantity TEXT NOT NULL,
    unit TEXT NOT NULL,
    min_quantity TEXT,
    expiration_date TEXT,
    storage_location_id INTEGER REFERENCES storage_locations(id) ON DELETE SET NULL,
    parent_sample_id TEXT REFERENCES samples(id) ON DELETE RESTRICT,
    relationship_type TEXT,
    notes TEXT NOT NULL DEFAULT '',
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (parent_sample_id IS NOT NULL OR relationship_type IS NULL),
    CHECK (parent_sample_id IS NULL OR parent_sample_id <> id)
);

CREATE TABLE IF NOT EXISTS quantity_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sample_id TEXT NOT NULL REFERENCES samples(id),
    change_type TEXT NOT NULL,
    quantity_change TEXT NOT NULL,
    quantity_after TEXT NOT NULL,
    reason TEXT NOT NULL DEFAULT '',
    changed_by TEXT NOT NULL,
    changed_at TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS trg_quantity_logs_no_update
BEFORE UPDATE ON quantity_logs
BEGIN
    SELECT RAISE(ABORT, 'quantity_logs is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_quantity_logs_no_delete
BEFORE DELETE ON quantity_logs
BEGIN
    SELECT RAISE(ABORT, 'quantity_logs is append-only');
END;
"#;

/// Protocols share a code across versions; (code, version) is unique and at
/// most one row per code may be active.
const PROTOCOLS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS protocol_categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    color TEXT NOT NULL DEFAULT '#667eea',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS protocols (
    id TEXT PRIMARY KEY NOT NULL,
    code TEXT NOT NULL,
    title TEXT NOT NULL,
    category_id INTEGER REFERENCES protocol_categories(id) ON DELETE SET NULL,
    description TEXT NOT NULL DEFAULT '',
    objective TEXT NOT NULL DEFAULT '',
    materials TEXT NOT NULL DEFAULT '',
    procedure TEXT NOT NULL DEFAULT '',
    safety_notes TEXT NOT NULL DEFAULT '',
    troubleshooting TEXT NOT NULL DEFAULT '',
    references_text TEXT NOT NULL DEFAULT '',
    notes TEXT NOT NULL DEFAULT '',
    version INTEGER NOT NULL DEFAULT 1,
    is_active INTEGER NOT NULL DEFAULT 1,
    parent_protocol_id TEXT REFERENCES protocols(id) ON DELETE SET NULL,
    status TEXT NOT NULL DEFAULT 'DRAFT',
    approved_by TEXT,
    approved_at TEXT,
    times_used INTEGER NOT NULL DEFAULT 0,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (code, version)
);
"#;

const EXPERIMENTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS experiments (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    protocol_id TEXT REFERENCES protocols(id) ON DELETE SET NULL,
    objective TEXT NOT NULL DEFAULT '',
    materials TEXT NOT NULL DEFAULT '',
    procedure TEXT NOT NULL DEFAULT '',
    results TEXT NOT NULL DEFAULT '',
    conclusion TEXT NOT NULL DEFAULT '',
    notes TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'PLANNING',
    start_date TEXT,
    end_date TEXT,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS experiment_samples (
    experiment_id TEXT NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
    sample_id TEXT NOT NULL REFERENCES samples(id) ON DELETE CASCADE,
    PRIMARY KEY (experiment_id, sample_id)
);

CREATE TABLE IF NOT EXISTS file_attachments (
    id TEXT PRIMARY KEY NOT NULL,
    experiment_id TEXT NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
    file_name TEXT NOT NULL,
    storage_key TEXT NOT NULL UNIQUE,
    file_type TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    uploaded_by TEXT NOT NULL,
    uploaded_at TEXT NOT NULL
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_samples_parent ON samples(parent_sample_id);
CREATE INDEX IF NOT EXISTS idx_samples_location ON samples(storage_location_id);
CREATE INDEX IF NOT EXISTS idx_samples_type ON samples(sample_type);
CREATE INDEX IF NOT EXISTS idx_quantity_logs_sample ON quantity_logs(sample_id, changed_at);
CREATE INDEX IF NOT EXISTS idx_protocols_code ON protocols(code);
CREATE UNIQUE INDEX IF NOT EXISTS idx_protocols_one_active ON protocols(code) WHERE is_active = 1;
CREATE INDEX IF NOT EXISTS idx_protocols_parent ON protocols(parent_protocol_id);
CREATE INDEX IF NOT EXISTS idx_experiments_protocol ON experiments(protocol_id);
CREATE INDEX IF NOT EXISTS idx_experiment_samples_sample ON experiment_samples(sample_id);
CREATE INDEX IF NOT EXISTS idx_attachments_experiment ON file_attachments(experiment_id);
"#;
