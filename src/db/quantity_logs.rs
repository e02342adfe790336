//! Quantity ledger storage
//!
//! Rows are only ever inserted; triggers in the schema refuse UPDATE and
//! DELETE.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;

use super::models::{decimal_column, decimal_to_sql, ChangeType, QuantityLogEntry};
use crate::error::LabError;

/// Ledger entry for INSERT
#[derive(Debug, Clone)]
pub struct NewLogEntry<'a> {
    pub sample_id: &'a str,
    pub change_type: ChangeType,
    pub quantity_change: Decimal,
    pub quantity_after: Decimal,
    pub reason: &'a str,
    pub changed_by: &'a str,
    pub changed_at: DateTime<Utc>,
}

/// Append one entry and return it as stored
pub fn append_entry(conn: &Connection, entry: &NewLogEntry<'_>) -> Result<QuantityLogEntry, LabError> {
    conn.execute(
        "INSERT INTO quantity_logs (sample_id, change_type, quantity_change, quantity_after, reason, changed_by, changed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            entry.sample_id,
            entry.change_type,
            decimal_to_sql(entry.quantity_change),
            decimal_to_sql(entry.quantity_after),
            entry.reason,
            entry.changed_by,
            entry.changed_at,
        ],
    )?;

    let id = conn.last_insert_rowid();
    let stored = conn.query_row(
        "SELECT * FROM quantity_logs WHERE id = ?",
        params![id],
        |row| QuantityLogEntry::from_row(row),
    )?;
    Ok(stored)
}

/// Entries for a sample, most recent first
pub fn list_for_sample(
    conn: &Connection,
    sample_id: &str,
    limit: Option<u32>,
) -> Result<Vec<QuantityLogEntry>, LabError> {
    let limit = limit.map(i64::from).unwrap_or(-1);
    let mut stmt = conn
        .prepare(
            "SELECT * FROM quantity_logs WHERE sample_id = ?
             ORDER BY changed_at DESC, id DESC
             LIMIT ?",
        )
        .map_err(|e| LabError::Internal(format!("Prepare failed: {}", e)))?;

    let entries = stmt
        .query_map(params![sample_id, limit], |row| QuantityLogEntry::from_row(row))
        .map_err(|e| LabError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LabError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(entries)
}

/// Most recent entry for a sample
pub fn latest_for_sample(conn: &Connection, sample_id: &str) -> Result<Option<QuantityLogEntry>, LabError> {
    Ok(list_for_sample(conn, sample_id, Some(1))?.into_iter().next())
}

pub fn count_for_sample(conn: &Connection, sample_id: &str) -> Result<i64, LabError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM quantity_logs WHERE sample_id = ?",
        params![sample_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Exact sum of every change recorded for a sample.
///
/// Summed in Rust: SQLite's SUM would go through floating point.
pub fn sum_changes(conn: &Connection, sample_id: &str) -> Result<Decimal, LabError> {
    let mut stmt = conn.prepare("SELECT quantity_change FROM quantity_logs WHERE sample_id = ?")?;
    let changes = stmt
        .query_map(params![sample_id], |row| decimal_column(row, "quantity_change"))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(changes.into_iter().sum())
}
