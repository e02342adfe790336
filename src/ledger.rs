//! Quantity ledger
//!
//! The only code path that changes `samples.quantity`. Every change writes
//! the new quantity and appends exactly one `quantity_logs` row whose
//! `quantity_after` equals the written value, inside the caller's write
//! transaction. Replaying the ledger from `initial_quantity` reproduces the
//! current quantity.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::debug;

use crate::db::models::{ChangeType, QuantityLogEntry, Sample};
use crate::db::{quantity_logs, samples};
use crate::error::LabError;

/// Fractional digits a quantity may carry
pub const MAX_SCALE: u32 = 3;

/// Largest magnitude a quantity may have (ten digits, three after the point)
pub fn max_quantity() -> Decimal {
    Decimal::new(9_999_999_999, MAX_SCALE)
}

/// Reject quantities the store cannot hold exactly. Never rounds.
pub fn check_precision(value: Decimal, field: &str) -> Result<(), LabError> {
    if value.normalize().scale() > MAX_SCALE {
        return Err(LabError::InvalidInput(format!(
            "{} {} has more than {} decimal places",
            field, value, MAX_SCALE
        )));
    }
    if value.abs() > max_quantity() {
        return Err(LabError::InvalidInput(format!(
            "{} {} exceeds {}",
            field,
            value,
            max_quantity()
        )));
    }
    Ok(())
}

/// Require a strictly positive amount (use, add, aliquot sizes)
pub fn check_positive(value: Decimal, field: &str) -> Result<(), LabError> {
    check_precision(value, field)?;
    if value <= Decimal::ZERO {
        return Err(LabError::InvalidInput(format!("{} must be positive, got {}", field, value)));
    }
    Ok(())
}

/// `current + delta`, refusing a negative result
pub fn apply_delta(sample_code: &str, current: Decimal, delta: Decimal) -> Result<Decimal, LabError> {
    let attempted = current + delta;
    if attempted < Decimal::ZERO {
        return Err(LabError::InvalidQuantity {
            sample_id: sample_code.to_string(),
            current,
            change: delta,
            attempted,
        });
    }
    check_precision(attempted, "resulting quantity")?;
    Ok(attempted)
}

/// Sufficiency check for taking `requested` out of a sample.
///
/// Same rule as [`apply_delta`], reported as `InsufficientQuantity`.
pub fn ensure_sufficient(sample: &Sample, requested: Decimal) -> Result<Decimal, LabError> {
    apply_delta(&sample.sample_id, sample.quantity, -requested).map_err(|e| match e {
        LabError::InvalidQuantity { .. } => LabError::InsufficientQuantity {
            sample_id: sample.sample_id.clone(),
            available: sample.quantity,
            requested,
        },
        other => other,
    })
}

/// One requested quantity mutation
#[derive(Debug, Clone)]
pub struct QuantityChange<'a> {
    pub change_type: ChangeType,
    /// Signed change (negative consumes)
    pub delta: Decimal,
    pub reason: &'a str,
    pub changed_by: &'a str,
}

/// Apply a change to a sample and log it.
///
/// Must run inside a write transaction: the sample row is re-read here so
/// the check sees the latest committed quantity.
pub fn record_change(
    conn: &Connection,
    sample_id: &str,
    change: &QuantityChange<'_>,
    now: DateTime<Utc>,
) -> Result<QuantityLogEntry, LabError> {
    check_precision(change.delta, "quantity change")?;

    let sample = samples::require_sample(conn, sample_id)?;
    let new_quantity = apply_delta(&sample.sample_id, sample.quantity, change.delta)?;

    samples::write_quantity(conn, &sample.id, new_quantity, now)?;
    let entry = quantity_logs::append_entry(
        conn,
        &quantity_logs::NewLogEntry {
            sample_id: &sample.id,
            change_type: change.change_type,
            quantity_change: change.delta,
            quantity_after: new_quantity,
            reason: change.reason,
            changed_by: change.changed_by,
            changed_at: now,
        },
    )?;

    debug!(
        sample = %sample.sample_id,
        change_type = %change.change_type,
        delta = %change.delta,
        quantity_after = %new_quantity,
        "Recorded quantity change"
    );

    Ok(entry)
}

/// `initial_quantity + sum(quantity_change)` for a sample
pub fn replay(conn: &Connection, sample_id: &str) -> Result<Decimal, LabError> {
    let sample = samples::require_sample(conn, sample_id)?;
    Ok(sample.initial_quantity + quantity_logs::sum_changes(conn, &sample.id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::samples::{insert_sample, NewSample};
    use crate::db::LabDb;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn seed(db: &LabDb, quantity: &str) {
        db.write(|tx| {
            insert_sample(
                tx,
                &NewSample {
                    id: "s1",
                    sample_id: "SAMP-2025-001",
                    name: "Buffer",
                    sample_type: "reagent",
                    quantity: dec(quantity),
                    unit: "mL",
                    min_quantity: None,
                    expiration_date: None,
                    storage_location_id: None,
                    parent_sample_id: None,
                    relationship_type: None,
                    notes: "",
                    created_by: "alice",
                    created_at: Utc::now(),
                },
            )?;
            Ok(())
        })
        .unwrap();
    }

    fn change(change_type: ChangeType, delta: &str) -> QuantityChange<'static> {
        QuantityChange {
            change_type,
            delta: dec(delta),
            reason: "",
            changed_by: "alice",
        }
    }

    #[test]
    fn test_apply_delta_rejects_negative() {
        let err = apply_delta("SAMP-2025-001", dec("5"), dec("-5.001")).unwrap_err();
        match err {
            LabError::InvalidQuantity {
                current,
                change,
                attempted,
                ..
            } => {
                assert_eq!(current, dec("5"));
                assert_eq!(change, dec("-5.001"));
                assert_eq!(attempted, dec("-0.001"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(apply_delta("x", dec("5"), dec("-5")).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_precision_is_checked_not_rounded() {
        assert!(check_precision(dec("1.250"), "q").is_ok());
        assert!(check_precision(dec("1.2345"), "q").is_err());
        assert!(check_precision(dec("10000000"), "q").is_err());
        assert!(check_positive(Decimal::ZERO, "amount").is_err());
    }

    #[test]
    fn test_record_change_writes_quantity_and_entry() {
        let db = LabDb::open_in_memory().unwrap();
        seed(&db, "10");

        let entry = db
            .write(|tx| record_change(tx, "s1", &change(ChangeType::Use, "-2.5"), Utc::now()))
            .unwrap();
        assert_eq!(entry.quantity_after, dec("7.5"));
        assert_eq!(entry.change_type, ChangeType::Use);

        let sample = db.with_conn(|conn| samples::require_sample(conn, "s1")).unwrap();
        assert_eq!(sample.quantity, dec("7.5"));
        assert_eq!(db.with_conn(|conn| replay(conn, "s1")).unwrap(), dec("7.5"));
    }

    #[test]
    fn test_rejected_change_writes_nothing() {
        let db = LabDb::open_in_memory().unwrap();
        seed(&db, "1");

        let err = db
            .write(|tx| record_change(tx, "s1", &change(ChangeType::Use, "-2"), Utc::now()))
            .unwrap_err();
        assert!(matches!(err, LabError::InvalidQuantity { .. }));

        let count = db.with_conn(|conn| quantity_logs::count_for_sample(conn, "s1")).unwrap();
        assert_eq!(count, 0);
        let sample = db.with_conn(|conn| samples::require_sample(conn, "s1")).unwrap();
        assert_eq!(sample.quantity, dec("1"));
    }

    #[test]
    fn test_ensure_sufficient_reports_available() {
        let db = LabDb::open_in_memory().unwrap();
        seed(&db, "10");
        let sample = db.with_conn(|conn| samples::require_sample(conn, "s1")).unwrap();

        match ensure_sufficient(&sample, dec("10.5")).unwrap_err() {
            LabError::InsufficientQuantity {
                available,
                requested,
                ..
            } => {
                assert_eq!(available, dec("10"));
                assert_eq!(requested, dec("10.5"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(ensure_sufficient(&sample, dec("10")).unwrap(), Decimal::ZERO);
    }
}
