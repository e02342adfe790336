//! Row models for the lab database
//!
//! Each entity carries a `from_row` constructor used by the repository
//! modules. Quantities live in TEXT columns as canonical decimal strings and
//! are parsed back into `Decimal` here; enums are stored by their
//! SCREAMING_SNAKE_CASE name.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::Row;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::LabError;

// ============================================================================
// Column helpers
// ============================================================================

/// Canonical storage form of a quantity ("30.000" and "30" store alike)
pub(crate) fn decimal_to_sql(value: Decimal) -> String {
    value.normalize().to_string()
}

pub(crate) fn decimal_column(row: &Row, column: &str) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(column)?;
    parse_decimal(row, column, &raw)
}

pub(crate) fn optional_decimal_column(row: &Row, column: &str) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|raw| parse_decimal(row, column, &raw)).transpose()
}

fn parse_decimal(row: &Row, column: &str, raw: &str) -> rusqlite::Result<Decimal> {
    Decimal::from_str(raw).map_err(|e| {
        let idx = row.as_ref().column_index(column).unwrap_or(0);
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
    })
}

/// Enums persisted as TEXT by name
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = LabError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_uppercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(LabError::InvalidInput(format!(
                        "unknown {}: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: LabError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

text_enum! {
    /// Kind of quantity mutation recorded in the ledger
    ChangeType {
        Use => "USE",
        Add => "ADD",
        Adjust => "ADJUST",
        Split => "SPLIT",
        Dispose => "DISPOSE",
    }
}

text_enum! {
    /// How a child sample was derived from its parent
    RelationshipType {
        Aliquot => "ALIQUOT",
        Derivative => "DERIVATIVE",
        Split => "SPLIT",
        Other => "OTHER",
    }
}

text_enum! {
    ProtocolStatus {
        Draft => "DRAFT",
        Review => "REVIEW",
        Approved => "APPROVED",
        Archived => "ARCHIVED",
    }
}

text_enum! {
    ExperimentStatus {
        Planning => "PLANNING",
        InProgress => "IN_PROGRESS",
        Completed => "COMPLETED",
        OnHold => "ON_HOLD",
        Cancelled => "CANCELLED",
    }
}

text_enum! {
    /// Attachment classification derived from the file extension
    FileType {
        Image => "IMAGE",
        Pdf => "PDF",
        Excel => "EXCEL",
        Word => "WORD",
        Data => "DATA",
        Other => "OTHER",
    }
}

impl FileType {
    /// Classify by extension (case-insensitive). `.csv` counts as a spreadsheet.
    pub fn from_file_name(file_name: &str) -> Self {
        let ext = std::path::Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "svg" => FileType::Image,
            "pdf" => FileType::Pdf,
            "xls" | "xlsx" | "csv" => FileType::Excel,
            "doc" | "docx" => FileType::Word,
            "txt" | "json" | "xml" => FileType::Data,
            _ => FileType::Other,
        }
    }
}

// ============================================================================
// Sample Models
// ============================================================================

/// Storage location (freezer, shelf, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub id: i64,
    pub name: String,
    pub location_type: String,
    pub temperature: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl StorageLocation {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            location_type: row.get("location_type")?,
            temperature: row.get("temperature")?,
            description: row.get("description")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Sample row. `quantity` only changes through the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Stable primary key (UUID)
    pub id: String,
    /// Human-readable code, e.g. SAMP-2025-001
    pub sample_id: String,
    pub name: String,
    pub sample_type: String,
    pub quantity: Decimal,
    /// Quantity at creation; ledger replay starts here
    pub initial_quantity: Decimal,
    pub unit: String,
    pub min_quantity: Option<Decimal>,
    pub expiration_date: Option<NaiveDate>,
    pub storage_location_id: Option<i64>,
    pub parent_sample_id: Option<String>,
    pub relationship_type: Option<RelationshipType>,
    pub notes: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sample {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            sample_id: row.get("sample_id")?,
            name: row.get("name")?,
            sample_type: row.get("sample_type")?,
            quantity: decimal_column(row, "quantity")?,
            initial_quantity: decimal_column(row, "initial_quantity")?,
            unit: row.get("unit")?,
            min_quantity: optional_decimal_column(row, "min_quantity")?,
            expiration_date: row.get("expiration_date")?,
            storage_location_id: row.get("storage_location_id")?,
            parent_sample_id: row.get("parent_sample_id")?,
            relationship_type: row.get("relationship_type")?,
            notes: row.get("notes")?,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    pub fn is_root(&self) -> bool {
        self.parent_sample_id.is_none()
    }
}

/// One immutable ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityLogEntry {
    pub id: i64,
    /// Primary key of the owning sample
    pub sample_id: String,
    pub change_type: ChangeType,
    pub quantity_change: Decimal,
    pub quantity_after: Decimal,
    pub reason: String,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
}

impl QuantityLogEntry {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            sample_id: row.get("sample_id")?,
            change_type: row.get("change_type")?,
            quantity_change: decimal_column(row, "quantity_change")?,
            quantity_after: decimal_column(row, "quantity_after")?,
            reason: row.get("reason")?,
            changed_by: row.get("changed_by")?,
            changed_at: row.get("changed_at")?,
        })
    }
}

// ============================================================================
// Protocol Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolCategory {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

impl ProtocolCategory {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            color: row.get("color")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Rich-text sections of a protocol; opaque to the version chain and copied
/// verbatim between versions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolContent {
    pub description: String,
    pub objective: String,
    pub materials: String,
    pub procedure: String,
    pub safety_notes: String,
    pub troubleshooting: String,
    pub references: String,
    pub notes: String,
}

impl ProtocolContent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            description: row.get("description")?,
            objective: row.get("objective")?,
            materials: row.get("materials")?,
            procedure: row.get("procedure")?,
            safety_notes: row.get("safety_notes")?,
            troubleshooting: row.get("troubleshooting")?,
            references: row.get("references_text")?,
            notes: row.get("notes")?,
        })
    }
}

/// One version of a protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    pub id: String,
    /// Shared by every version in the chain, e.g. SOP-001
    pub code: String,
    pub title: String,
    pub category_id: Option<i64>,
    #[serde(flatten)]
    pub content: ProtocolContent,
    pub version: i64,
    pub is_active: bool,
    /// Root of the version chain; None on the root itself
    pub parent_protocol_id: Option<String>,
    pub status: ProtocolStatus,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub times_used: i64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Protocol {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            code: row.get("code")?,
            title: row.get("title")?,
            category_id: row.get("category_id")?,
            content: ProtocolContent::from_row(row)?,
            version: row.get("version")?,
            is_active: row.get("is_active")?,
            parent_protocol_id: row.get("parent_protocol_id")?,
            status: row.get("status")?,
            approved_by: row.get("approved_by")?,
            approved_at: row.get("approved_at")?,
            times_used: row.get("times_used")?,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    /// Id of the chain root (self when this is version 1)
    pub fn root_id(&self) -> &str {
        self.parent_protocol_id.as_deref().unwrap_or(&self.id)
    }
}

// ============================================================================
// Experiment Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub title: String,
    pub description: String,
    pub protocol_id: Option<String>,
    pub objective: String,
    pub materials: String,
    pub procedure: String,
    pub results: String,
    pub conclusion: String,
    pub notes: String,
    pub status: ExperimentStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Experiment {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            protocol_id: row.get("protocol_id")?,
            objective: row.get("objective")?,
            materials: row.get("materials")?,
            procedure: row.get("procedure")?,
            results: row.get("results")?,
            conclusion: row.get("conclusion")?,
            notes: row.get("notes")?,
            status: row.get("status")?,
            start_date: row.get("start_date")?,
            end_date: row.get("end_date")?,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Metadata for a file held by the external file store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub id: String,
    pub experiment_id: String,
    pub file_name: String,
    /// Key under which the file store keeps the bytes
    pub storage_key: String,
    pub file_type: FileType,
    pub file_size: i64,
    pub description: String,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
}

impl FileAttachment {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            experiment_id: row.get("experiment_id")?,
            file_name: row.get("file_name")?,
            storage_key: row.get("storage_key")?,
            file_type: row.get("file_type")?,
            file_size: row.get("file_size")?,
            description: row.get("description")?,
            uploaded_by: row.get("uploaded_by")?,
            uploaded_at: row.get("uploaded_at")?,
        })
    }
}
