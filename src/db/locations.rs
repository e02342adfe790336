//! Storage location CRUD operations

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;

use super::models::StorageLocation;
use crate::error::LabError;

/// Input for creating a storage location
#[derive(Debug, Clone, Deserialize)]
pub struct CreateLocationInput {
    pub name: String,
    pub location_type: String,
    #[serde(default)]
    pub temperature: String,
    #[serde(default)]
    pub description: String,
}

pub fn insert_location(
    conn: &Connection,
    input: &CreateLocationInput,
    now: DateTime<Utc>,
) -> Result<StorageLocation, LabError> {
    conn.execute(
        "INSERT INTO storage_locations (name, location_type, temperature, description, created_at)
         VALUES (?, ?, ?, ?, ?)",
        params![input.name, input.location_type, input.temperature, input.description, now],
    )?;

    let id = conn.last_insert_rowid();
    get_location(conn, id)?.ok_or_else(|| LabError::not_found("StorageLocation", id.to_string()))
}

pub fn get_location(conn: &Connection, id: i64) -> Result<Option<StorageLocation>, LabError> {
    conn.query_row(
        "SELECT * FROM storage_locations WHERE id = ?",
        params![id],
        |row| StorageLocation::from_row(row),
    )
    .optional()
    .map_err(|e| LabError::Internal(format!("Query failed: {}", e)))
}

pub fn list_locations(conn: &Connection) -> Result<Vec<StorageLocation>, LabError> {
    let mut stmt = conn
        .prepare("SELECT * FROM storage_locations ORDER BY name ASC")
        .map_err(|e| LabError::Internal(format!("Prepare failed: {}", e)))?;

    let locations = stmt
        .query_map([], |row| StorageLocation::from_row(row))
        .map_err(|e| LabError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LabError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(locations)
}
