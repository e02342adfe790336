//! Sample CRUD operations

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use super::models::{decimal_to_sql, RelationshipType, Sample};
use crate::error::{classify, LabError};

/// Fully prepared sample row for INSERT (code already assigned)
#[derive(Debug, Clone)]
pub struct NewSample<'a> {
    pub id: &'a str,
    pub sample_id: &'a str,
    pub name: &'a str,
    pub sample_type: &'a str,
    pub quantity: Decimal,
    pub unit: &'a str,
    pub min_quantity: Option<Decimal>,
    pub expiration_date: Option<NaiveDate>,
    pub storage_location_id: Option<i64>,
    pub parent_sample_id: Option<&'a str>,
    pub relationship_type: Option<RelationshipType>,
    pub notes: &'a str,
    pub created_by: &'a str,
    pub created_at: DateTime<Utc>,
}

/// Fields a caller may change without going through the ledger
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SampleUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sample_type: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// `Some(None)` clears the location
    #[serde(default)]
    pub storage_location_id: Option<Option<i64>>,
    #[serde(default)]
    pub min_quantity: Option<Option<Decimal>>,
    #[serde(default)]
    pub expiration_date: Option<Option<NaiveDate>>,
}

/// Query parameters for listing samples
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SampleQuery {
    #[serde(default)]
    pub sample_type: Option<String>,
    #[serde(default)]
    pub storage_location_id: Option<i64>,
    #[serde(default)]
    pub created_by: Option<String>,
    /// Matches name or sample code
    #[serde(default)]
    pub search: Option<String>,
    /// Only samples without a parent
    #[serde(default)]
    pub roots_only: bool,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    100
}

/// Insert a sample row.
///
/// Returns the raw SQLite error so callers can tell a lost race on the
/// unique `sample_id` apart from other failures.
pub fn insert_sample(conn: &Connection, sample: &NewSample<'_>) -> Result<(), rusqlite::Error> {
    let quantity = decimal_to_sql(sample.quantity);
    conn.execute(
        "INSERT INTO samples (
            id, sample_id, name, sample_type, quantity, initial_quantity, unit,
            min_quantity, expiration_date, storage_location_id, parent_sample_id,
            relationship_type, notes, created_by, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
        params![
            sample.id,
            sample.sample_id,
            sample.name,
            sample.sample_type,
            quantity,
            sample.unit,
            sample.min_quantity.map(decimal_to_sql),
            sample.expiration_date,
            sample.storage_location_id,
            sample.parent_sample_id,
            sample.relationship_type,
            sample.notes,
            sample.created_by,
            sample.created_at,
        ],
    )?;
    Ok(())
}

/// Get sample by primary key
pub fn get_sample(conn: &Connection, id: &str) -> Result<Option<Sample>, LabError> {
    conn.query_row("SELECT * FROM samples WHERE id = ?", params![id], |row| {
        Sample::from_row(row)
    })
    .optional()
    .map_err(|e| LabError::Internal(format!("Query failed: {}", e)))
}

/// Get sample by its human-readable code
pub fn get_sample_by_code(conn: &Connection, sample_id: &str) -> Result<Option<Sample>, LabError> {
    conn.query_row(
        "SELECT * FROM samples WHERE sample_id = ?",
        params![sample_id],
        |row| Sample::from_row(row),
    )
    .optional()
    .map_err(|e| LabError::Internal(format!("Query failed: {}", e)))
}

/// Get sample or fail with NotFound
pub fn require_sample(conn: &Connection, id: &str) -> Result<Sample, LabError> {
    get_sample(conn, id)?.ok_or_else(|| LabError::not_found("Sample", id))
}

/// Direct children of a sample, oldest first
pub fn get_children(conn: &Connection, parent_id: &str) -> Result<Vec<Sample>, LabError> {
    let mut stmt = conn
        .prepare(
            "SELECT * FROM samples WHERE parent_sample_id = ? ORDER BY created_at ASC, sample_id ASC",
        )
        .map_err(|e| LabError::Internal(format!("Prepare failed: {}", e)))?;

    let children = stmt
        .query_map(params![parent_id], |row| Sample::from_row(row))
        .map_err(|e| LabError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LabError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(children)
}

pub fn count_children(conn: &Connection, parent_id: &str) -> Result<i64, LabError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM samples WHERE parent_sample_id = ?",
        params![parent_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// List samples with optional filters, newest first
pub fn list_samples(conn: &Connection, query: &SampleQuery) -> Result<Vec<Sample>, LabError> {
    let mut sql = String::from("SELECT * FROM samples");
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];
    let mut conditions = vec![];

    if let Some(ref sample_type) = query.sample_type {
        conditions.push("sample_type = ?".to_string());
        params.push(Box::new(sample_type.clone()));
    }

    if let Some(location_id) = query.storage_location_id {
        conditions.push("storage_location_id = ?".to_string());
        params.push(Box::new(location_id));
    }

    if let Some(ref created_by) = query.created_by {
        conditions.push("created_by = ?".to_string());
        params.push(Box::new(created_by.clone()));
    }

    if let Some(ref search) = query.search {
        conditions.push("(name LIKE ? OR sample_id LIKE ?)".to_string());
        let pattern = format!("%{}%", search);
        params.push(Box::new(pattern.clone()));
        params.push(Box::new(pattern));
    }

    if query.roots_only {
        conditions.push("parent_sample_id IS NULL".to_string());
    }

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    sql.push_str(" ORDER BY created_at DESC, sample_id DESC LIMIT ? OFFSET ?");
    params.push(Box::new(query.limit as i64));
    params.push(Box::new(query.offset as i64));

    debug!("Executing query: {}", sql);

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| LabError::Internal(format!("Prepare failed: {}", e)))?;

    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let samples = stmt
        .query_map(param_refs.as_slice(), |row| Sample::from_row(row))
        .map_err(|e| LabError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LabError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(samples)
}

/// Every sample (used for alert sweeps)
pub fn all_samples(conn: &Connection) -> Result<Vec<Sample>, LabError> {
    let mut stmt = conn.prepare("SELECT * FROM samples ORDER BY sample_id ASC")?;
    let samples = stmt
        .query_map([], |row| Sample::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(samples)
}

/// Overwrite the stored quantity. Only the ledger calls this.
pub(crate) fn write_quantity(
    conn: &Connection,
    id: &str,
    quantity: Decimal,
    now: DateTime<Utc>,
) -> Result<(), LabError> {
    let updated = conn.execute(
        "UPDATE samples SET quantity = ?, updated_at = ? WHERE id = ?",
        params![decimal_to_sql(quantity), now, id],
    )?;
    if updated == 0 {
        return Err(LabError::not_found("Sample", id));
    }
    Ok(())
}

/// Apply a details update; quantity is not reachable from here
pub fn update_sample(
    conn: &Connection,
    id: &str,
    update: &SampleUpdate,
    now: DateTime<Utc>,
) -> Result<(), LabError> {
    let mut sets = vec!["updated_at = ?".to_string()];
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now)];

    if let Some(ref name) = update.name {
        sets.push("name = ?".to_string());
        params.push(Box::new(name.clone()));
    }
    if let Some(ref sample_type) = update.sample_type {
        sets.push("sample_type = ?".to_string());
        params.push(Box::new(sample_type.clone()));
    }
    if let Some(ref notes) = update.notes {
        sets.push("notes = ?".to_string());
        params.push(Box::new(notes.clone()));
    }
    if let Some(location) = update.storage_location_id {
        sets.push("storage_location_id = ?".to_string());
        params.push(Box::new(location));
    }
    if let Some(min_quantity) = update.min_quantity {
        sets.push("min_quantity = ?".to_string());
        params.push(Box::new(min_quantity.map(decimal_to_sql)));
    }
    if let Some(expiration) = update.expiration_date {
        sets.push("expiration_date = ?".to_string());
        params.push(Box::new(expiration));
    }

    let sql = format!("UPDATE samples SET {} WHERE id = ?", sets.join(", "));
    params.push(Box::new(id.to_string()));

    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let updated = conn.execute(&sql, param_refs.as_slice()).map_err(classify)?;
    if updated == 0 {
        return Err(LabError::not_found("Sample", id));
    }
    Ok(())
}

/// Delete a sample. Children (RESTRICT) and ledger history (append-only)
/// make the store refuse; that surfaces as `Integrity`.
pub fn delete_sample(conn: &Connection, id: &str) -> Result<bool, LabError> {
    let deleted = conn
        .execute("DELETE FROM samples WHERE id = ?", params![id])
        .map_err(classify)?;
    Ok(deleted > 0)
}

/// Highest code with the given prefix, ordered numerically
/// (`SAMP-2025-1000` sorts after `SAMP-2025-999`)
pub fn highest_code_with_prefix(conn: &Connection, prefix: &str) -> Result<Option<String>, LabError> {
    let code = conn
        .query_row(
            "SELECT sample_id FROM samples
             WHERE substr(sample_id, 1, length(?1)) = ?1
             ORDER BY length(sample_id) DESC, sample_id DESC
             LIMIT 1",
            params![prefix],
            |row| row.get(0),
        )
        .optional()?;
    Ok(code)
}

pub fn code_exists(conn: &Connection, sample_id: &str) -> Result<bool, LabError> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM samples WHERE sample_id = ?)",
        params![sample_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LabDb;

    fn insert(db: &LabDb, id: &str, code: &str, parent: Option<&str>) {
        db.write(|tx| {
            insert_sample(
                tx,
                &NewSample {
                    id,
                    sample_id: code,
                    name: "Plasma",
                    sample_type: "blood",
                    quantity: Decimal::new(100, 0),
                    unit: "mL",
                    min_quantity: None,
                    expiration_date: None,
                    storage_location_id: None,
                    parent_sample_id: parent,
                    relationship_type: parent.map(|_| RelationshipType::Aliquot),
                    notes: "",
                    created_by: "alice",
                    created_at: Utc::now(),
                },
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_highest_code_is_numeric() {
        let db = LabDb::open_in_memory().unwrap();
        insert(&db, "a", "SAMP-2025-999", None);
        insert(&db, "b", "SAMP-2025-1000", None);
        insert(&db, "c", "SAMP-2024-5000", None);

        let highest = db
            .with_conn(|conn| highest_code_with_prefix(conn, "SAMP-2025-"))
            .unwrap();
        assert_eq!(highest.as_deref(), Some("SAMP-2025-1000"));
    }

    #[test]
    fn test_children_and_restricted_delete() {
        let db = LabDb::open_in_memory().unwrap();
        insert(&db, "p", "SAMP-2025-001", None);
        insert(&db, "c1", "SAMP-2025-002", Some("p"));

        let children = db.with_conn(|conn| get_children(conn, "p")).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].relationship_type, Some(RelationshipType::Aliquot));

        let err = db.write(|tx| delete_sample(tx, "p")).unwrap_err();
        assert!(matches!(err, LabError::Integrity(_)));

        assert!(db.write(|tx| delete_sample(tx, "c1")).unwrap());
    }

    #[test]
    fn test_update_leaves_quantity_alone() {
        let db = LabDb::open_in_memory().unwrap();
        insert(&db, "s", "SAMP-2025-001", None);

        let update = SampleUpdate {
            name: Some("Renamed".into()),
            min_quantity: Some(Some(Decimal::new(5, 0))),
            ..Default::default()
        };
        db.write(|tx| update_sample(tx, "s", &update, Utc::now())).unwrap();

        let sample = db.with_conn(|conn| require_sample(conn, "s")).unwrap();
        assert_eq!(sample.name, "Renamed");
        assert_eq!(sample.min_quantity, Some(Decimal::new(5, 0)));
        assert_eq!(sample.quantity, Decimal::new(100, 0));
    }
}
