//! Protocol and protocol category CRUD operations
//!
//! A protocol chain is every row sharing one `code`; versions are numbered
//! within the code and at most one row per code is active.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use tracing::debug;

use super::models::{Protocol, ProtocolCategory, ProtocolContent, ProtocolStatus};
use crate::error::{classify, LabError};

/// Fully prepared protocol row for INSERT
#[derive(Debug, Clone)]
pub struct NewProtocol<'a> {
    pub id: &'a str,
    pub code: &'a str,
    pub title: &'a str,
    pub category_id: Option<i64>,
    pub content: &'a ProtocolContent,
    pub version: i64,
    pub is_active: bool,
    pub parent_protocol_id: Option<&'a str>,
    pub status: ProtocolStatus,
    pub created_by: &'a str,
    pub created_at: DateTime<Utc>,
}

/// Query parameters for listing protocols
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProtocolQuery {
    #[serde(default)]
    pub status: Option<ProtocolStatus>,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub active_only: bool,
    #[serde(default)]
    pub created_by: Option<String>,
    /// Matches title, code or description
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    100
}

/// Insert a protocol row.
///
/// Returns the raw SQLite error so a lost race on `(code, version)` or on the
/// single-active index can be told apart.
pub fn insert_protocol(conn: &Connection, protocol: &NewProtocol<'_>) -> Result<(), rusqlite::Error> {
    let c = protocol.content;
    conn.execute(
        "INSERT INTO protocols (
            id, code, title, category_id, description, objective, materials, procedure,
            safety_notes, troubleshooting, references_text, notes, version, is_active,
            parent_protocol_id, status, created_by, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?18)",
        params![
            protocol.id,
            protocol.code,
            protocol.title,
            protocol.category_id,
            c.description,
            c.objective,
            c.materials,
            c.procedure,
            c.safety_notes,
            c.troubleshooting,
            c.references,
            c.notes,
            protocol.version,
            protocol.is_active,
            protocol.parent_protocol_id,
            protocol.status,
            protocol.created_by,
            protocol.created_at,
        ],
    )?;
    Ok(())
}

pub fn get_protocol(conn: &Connection, id: &str) -> Result<Option<Protocol>, LabError> {
    conn.query_row("SELECT * FROM protocols WHERE id = ?", params![id], |row| {
        Protocol::from_row(row)
    })
    .optional()
    .map_err(|e| LabError::Internal(format!("Query failed: {}", e)))
}

pub fn require_protocol(conn: &Connection, id: &str) -> Result<Protocol, LabError> {
    get_protocol(conn, id)?.ok_or_else(|| LabError::not_found("Protocol", id))
}

pub fn get_by_code_version(
    conn: &Connection,
    code: &str,
    version: i64,
) -> Result<Option<Protocol>, LabError> {
    conn.query_row(
        "SELECT * FROM protocols WHERE code = ? AND version = ?",
        params![code, version],
        |row| Protocol::from_row(row),
    )
    .optional()
    .map_err(|e| LabError::Internal(format!("Query failed: {}", e)))
}

/// Every version sharing a code, ascending
pub fn versions_for_code(conn: &Connection, code: &str) -> Result<Vec<Protocol>, LabError> {
    let mut stmt = conn
        .prepare("SELECT * FROM protocols WHERE code = ? ORDER BY version ASC")
        .map_err(|e| LabError::Internal(format!("Prepare failed: {}", e)))?;

    let versions = stmt
        .query_map(params![code], |row| Protocol::from_row(row))
        .map_err(|e| LabError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LabError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(versions)
}

pub fn active_for_code(conn: &Connection, code: &str) -> Result<Option<Protocol>, LabError> {
    conn.query_row(
        "SELECT * FROM protocols WHERE code = ? AND is_active = 1",
        params![code],
        |row| Protocol::from_row(row),
    )
    .optional()
    .map_err(|e| LabError::Internal(format!("Query failed: {}", e)))
}

/// Highest version number in a chain (0 when the code is unused)
pub fn max_version(conn: &Connection, code: &str) -> Result<i64, LabError> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(version) FROM protocols WHERE code = ?",
        params![code],
        |row| row.get(0),
    )?;
    Ok(max.unwrap_or(0))
}

/// Deactivate every version of a chain; returns rows touched
pub fn deactivate_all(conn: &Connection, code: &str, now: DateTime<Utc>) -> Result<usize, LabError> {
    let updated = conn.execute(
        "UPDATE protocols SET is_active = 0, updated_at = ? WHERE code = ? AND is_active = 1",
        params![now, code],
    )?;
    Ok(updated)
}

pub fn set_approved(
    conn: &Connection,
    id: &str,
    approved_by: &str,
    now: DateTime<Utc>,
) -> Result<(), LabError> {
    let updated = conn.execute(
        "UPDATE protocols SET status = ?, approved_by = ?, approved_at = ?, updated_at = ? WHERE id = ?",
        params![ProtocolStatus::Approved, approved_by, now, now, id],
    )?;
    if updated == 0 {
        return Err(LabError::not_found("Protocol", id));
    }
    Ok(())
}

pub fn set_archived(conn: &Connection, id: &str, now: DateTime<Utc>) -> Result<(), LabError> {
    let updated = conn.execute(
        "UPDATE protocols SET status = ?, is_active = 0, updated_at = ? WHERE id = ?",
        params![ProtocolStatus::Archived, now, id],
    )?;
    if updated == 0 {
        return Err(LabError::not_found("Protocol", id));
    }
    Ok(())
}

pub fn set_status(
    conn: &Connection,
    id: &str,
    status: ProtocolStatus,
    now: DateTime<Utc>,
) -> Result<(), LabError> {
    let updated = conn.execute(
        "UPDATE protocols SET status = ?, updated_at = ? WHERE id = ?",
        params![status, now, id],
    )?;
    if updated == 0 {
        return Err(LabError::not_found("Protocol", id));
    }
    Ok(())
}

pub fn update_content(
    conn: &Connection,
    id: &str,
    title: &str,
    category_id: Option<i64>,
    content: &ProtocolContent,
    now: DateTime<Utc>,
) -> Result<(), LabError> {
    let updated = conn
        .execute(
            "UPDATE protocols SET title = ?, category_id = ?, description = ?, objective = ?,
                materials = ?, procedure = ?, safety_notes = ?, troubleshooting = ?,
                references_text = ?, notes = ?, updated_at = ?
             WHERE id = ?",
            params![
                title,
                category_id,
                content.description,
                content.objective,
                content.materials,
                content.procedure,
                content.safety_notes,
                content.troubleshooting,
                content.references,
                content.notes,
                now,
                id,
            ],
        )
        .map_err(classify)?;
    if updated == 0 {
        return Err(LabError::not_found("Protocol", id));
    }
    Ok(())
}

/// Bump the usage counter in place so concurrent experiments never lose a count
pub fn increment_usage(conn: &Connection, id: &str) -> Result<i64, LabError> {
    let updated = conn.execute(
        "UPDATE protocols SET times_used = times_used + 1 WHERE id = ?",
        params![id],
    )?;
    if updated == 0 {
        return Err(LabError::not_found("Protocol", id));
    }
    let times_used = conn.query_row(
        "SELECT times_used FROM protocols WHERE id = ?",
        params![id],
        |row| row.get(0),
    )?;
    Ok(times_used)
}

/// List protocols with optional filters, newest first
pub fn list_protocols(conn: &Connection, query: &ProtocolQuery) -> Result<Vec<Protocol>, LabError> {
    let mut sql = String::from("SELECT * FROM protocols");
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];
    let mut conditions = vec![];

    if let Some(status) = query.status {
        conditions.push("status = ?".to_string());
        params.push(Box::new(status));
    }

    if let Some(category_id) = query.category_id {
        conditions.push("category_id = ?".to_string());
        params.push(Box::new(category_id));
    }

    if query.active_only {
        conditions.push("is_active = 1".to_string());
    }

    if let Some(ref created_by) = query.created_by {
        conditions.push("created_by = ?".to_string());
        params.push(Box::new(created_by.clone()));
    }

    if let Some(ref search) = query.search {
        conditions.push("(title LIKE ? OR code LIKE ? OR description LIKE ?)".to_string());
        let pattern = format!("%{}%", search);
        params.push(Box::new(pattern.clone()));
        params.push(Box::new(pattern.clone()));
        params.push(Box::new(pattern));
    }

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    sql.push_str(" ORDER BY created_at DESC, code DESC, version DESC LIMIT ? OFFSET ?");
    params.push(Box::new(query.limit as i64));
    params.push(Box::new(query.offset as i64));

    debug!("Executing query: {}", sql);

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| LabError::Internal(format!("Prepare failed: {}", e)))?;

    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let protocols = stmt
        .query_map(param_refs.as_slice(), |row| Protocol::from_row(row))
        .map_err(|e| LabError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LabError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(protocols)
}

/// Highest protocol code with the given prefix, ordered numerically
pub fn highest_code_with_prefix(conn: &Connection, prefix: &str) -> Result<Option<String>, LabError> {
    let code = conn
        .query_row(
            "SELECT code FROM protocols
             WHERE substr(code, 1, length(?1)) = ?1
             ORDER BY length(code) DESC, code DESC
             LIMIT 1",
            params![prefix],
            |row| row.get(0),
        )
        .optional()?;
    Ok(code)
}

pub fn code_exists(conn: &Connection, code: &str) -> Result<bool, LabError> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM protocols WHERE code = ?)",
        params![code],
        |row| row.get(0),
    )?;
    Ok(exists)
}

// ============================================================================
// Categories
// ============================================================================

/// Input for creating a protocol category
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCategoryInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_color")]
    pub color: String,
}

fn default_color() -> String {
    "#667eea".to_string()
}

pub fn insert_category(
    conn: &Connection,
    input: &CreateCategoryInput,
    now: DateTime<Utc>,
) -> Result<ProtocolCategory, LabError> {
    conn.execute(
        "INSERT INTO protocol_categories (name, description, color, created_at) VALUES (?, ?, ?, ?)",
        params![input.name, input.description, input.color, now],
    )
    .map_err(classify)?;

    let id = conn.last_insert_rowid();
    get_category(conn, id)?.ok_or_else(|| LabError::not_found("ProtocolCategory", id.to_string()))
}

pub fn get_category(conn: &Connection, id: i64) -> Result<Option<ProtocolCategory>, LabError> {
    conn.query_row(
        "SELECT * FROM protocol_categories WHERE id = ?",
        params![id],
        |row| ProtocolCategory::from_row(row),
    )
    .optional()
    .map_err(|e| LabError::Internal(format!("Query failed: {}", e)))
}

pub fn list_categories(conn: &Connection) -> Result<Vec<ProtocolCategory>, LabError> {
    let mut stmt = conn.prepare("SELECT * FROM protocol_categories ORDER BY name ASC")?;
    let categories = stmt
        .query_map([], |row| ProtocolCategory::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(categories)
}
