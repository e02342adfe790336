//! Experiment, sample link and attachment metadata operations

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;

use super::models::{Experiment, ExperimentStatus, FileAttachment, FileType, Sample};
use crate::error::{classify, LabError};

/// Fully prepared experiment row for INSERT
#[derive(Debug, Clone)]
pub struct NewExperiment<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub protocol_id: Option<&'a str>,
    pub objective: &'a str,
    pub materials: &'a str,
    pub procedure: &'a str,
    pub notes: &'a str,
    pub status: ExperimentStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub created_by: &'a str,
    pub created_at: DateTime<Utc>,
}

/// Query parameters for listing experiments
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExperimentQuery {
    #[serde(default)]
    pub status: Option<ExperimentStatus>,
    #[serde(default)]
    pub protocol_id: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    100
}

pub fn insert_experiment(conn: &Connection, exp: &NewExperiment<'_>) -> Result<(), LabError> {
    conn.execute(
        "INSERT INTO experiments (
            id, title, description, protocol_id, objective, materials, procedure, notes,
            status, start_date, end_date, created_by, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
        params![
            exp.id,
            exp.title,
            exp.description,
            exp.protocol_id,
            exp.objective,
            exp.materials,
            exp.procedure,
            exp.notes,
            exp.status,
            exp.start_date,
            exp.end_date,
            exp.created_by,
            exp.created_at,
        ],
    )
    .map_err(classify)?;
    Ok(())
}

pub fn get_experiment(conn: &Connection, id: &str) -> Result<Option<Experiment>, LabError> {
    conn.query_row("SELECT * FROM experiments WHERE id = ?", params![id], |row| {
        Experiment::from_row(row)
    })
    .optional()
    .map_err(|e| LabError::Internal(format!("Query failed: {}", e)))
}

pub fn require_experiment(conn: &Connection, id: &str) -> Result<Experiment, LabError> {
    get_experiment(conn, id)?.ok_or_else(|| LabError::not_found("Experiment", id))
}

pub fn list_experiments(conn: &Connection, query: &ExperimentQuery) -> Result<Vec<Experiment>, LabError> {
    let mut sql = String::from("SELECT * FROM experiments");
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];
    let mut conditions = vec![];

    if let Some(status) = query.status {
        conditions.push("status = ?".to_string());
        params.push(Box::new(status));
    }
    if let Some(ref protocol_id) = query.protocol_id {
        conditions.push("protocol_id = ?".to_string());
        params.push(Box::new(protocol_id.clone()));
    }
    if let Some(ref created_by) = query.created_by {
        conditions.push("created_by = ?".to_string());
        params.push(Box::new(created_by.clone()));
    }

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");
    params.push(Box::new(query.limit as i64));
    params.push(Box::new(query.offset as i64));

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| LabError::Internal(format!("Prepare failed: {}", e)))?;

    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let experiments = stmt
        .query_map(param_refs.as_slice(), |row| Experiment::from_row(row))
        .map_err(|e| LabError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LabError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(experiments)
}

/// Update status and, when given, the recorded results
pub fn set_status(
    conn: &Connection,
    id: &str,
    status: ExperimentStatus,
    results: Option<&str>,
    conclusion: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), LabError> {
    let updated = conn.execute(
        "UPDATE experiments SET status = ?,
            results = COALESCE(?, results),
            conclusion = COALESCE(?, conclusion),
            updated_at = ?
         WHERE id = ?",
        params![status, results, conclusion, now, id],
    )?;
    if updated == 0 {
        return Err(LabError::not_found("Experiment", id));
    }
    Ok(())
}

/// Link a sample; linking twice is a no-op. Returns true when a new link was made.
pub fn link_sample(conn: &Connection, experiment_id: &str, sample_id: &str) -> Result<bool, LabError> {
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO experiment_samples (experiment_id, sample_id) VALUES (?, ?)",
            params![experiment_id, sample_id],
        )
        .map_err(classify)?;
    Ok(inserted > 0)
}

pub fn samples_for_experiment(conn: &Connection, experiment_id: &str) -> Result<Vec<Sample>, LabError> {
    let mut stmt = conn.prepare(
        "SELECT s.* FROM samples s
         JOIN experiment_samples es ON es.sample_id = s.id
         WHERE es.experiment_id = ?
         ORDER BY s.sample_id ASC",
    )?;
    let samples = stmt
        .query_map(params![experiment_id], |row| Sample::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(samples)
}

// ============================================================================
// Attachments
// ============================================================================

/// Attachment metadata row for INSERT
#[derive(Debug, Clone)]
pub struct NewAttachment<'a> {
    pub id: &'a str,
    pub experiment_id: &'a str,
    pub file_name: &'a str,
    pub storage_key: &'a str,
    pub file_type: FileType,
    pub file_size: i64,
    pub description: &'a str,
    pub uploaded_by: &'a str,
    pub uploaded_at: DateTime<Utc>,
}

pub fn insert_attachment(
    conn: &Connection,
    attachment: &NewAttachment<'_>,
) -> Result<FileAttachment, LabError> {
    conn.execute(
        "INSERT INTO file_attachments (
            id, experiment_id, file_name, storage_key, file_type, file_size,
            description, uploaded_by, uploaded_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            attachment.id,
            attachment.experiment_id,
            attachment.file_name,
            attachment.storage_key,
            attachment.file_type,
            attachment.file_size,
            attachment.description,
            attachment.uploaded_by,
            attachment.uploaded_at,
        ],
    )
    .map_err(classify)?;

    let stored = conn.query_row(
        "SELECT * FROM file_attachments WHERE id = ?",
        params![attachment.id],
        |row| FileAttachment::from_row(row),
    )?;
    Ok(stored)
}

pub fn list_attachments(conn: &Connection, experiment_id: &str) -> Result<Vec<FileAttachment>, LabError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM file_attachments WHERE experiment_id = ? ORDER BY uploaded_at DESC, id DESC",
    )?;
    let attachments = stmt
        .query_map(params![experiment_id], |row| FileAttachment::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(attachments)
}
