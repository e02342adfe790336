//! Sample alerts derived from current state
//!
//! [`alert_status`] is a pure function of a sample snapshot and a point in
//! time. Alerts are never stored.

use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::models::Sample;

/// Default window for `ExpiringSoon`
pub const DEFAULT_EXPIRING_SOON_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

/// What is wrong with a sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    Expired {
        expired_on: NaiveDate,
    },
    ExpiringSoon {
        expires_on: NaiveDate,
        days_remaining: i64,
    },
    LowQuantity {
        quantity: Decimal,
        min_quantity: Decimal,
        unit: String,
    },
    OutOfStock {
        unit: String,
    },
}

impl AlertKind {
    pub fn severity(&self) -> Severity {
        match self {
            AlertKind::Expired { .. } | AlertKind::OutOfStock { .. } => Severity::Critical,
            AlertKind::ExpiringSoon { .. } | AlertKind::LowQuantity { .. } => Severity::Warning,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AlertKind::Expired { .. } => "EXPIRED",
            AlertKind::ExpiringSoon { .. } => "EXPIRING_SOON",
            AlertKind::LowQuantity { .. } => "LOW_QUANTITY",
            AlertKind::OutOfStock { .. } => "OUT_OF_STOCK",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: Severity,
    #[serde(flatten)]
    pub kind: AlertKind,
}

impl From<AlertKind> for Alert {
    fn from(kind: AlertKind) -> Self {
        Self {
            severity: kind.severity(),
            kind,
        }
    }
}

/// A sample together with its active alerts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleAlerts {
    pub sample: Sample,
    pub alerts: Vec<Alert>,
}

/// Active alerts for a sample, in rule order:
///
/// 1. `Expired` when the expiration date is before today
/// 2. otherwise `ExpiringSoon` when it falls within `expiring_within_days`
/// 3. `LowQuantity` when a minimum is set and quantity is at or below it
/// 4. `OutOfStock` when quantity is zero
pub fn alert_status(sample: &Sample, now: DateTime<Utc>, expiring_within_days: i64) -> Vec<Alert> {
    let today = now.date_naive();
    let mut alerts = Vec::new();

    if let Some(expiration) = sample.expiration_date {
        if expiration < today {
            alerts.push(
                AlertKind::Expired {
                    expired_on: expiration,
                }
                .into(),
            );
        } else if within_window(today, expiration, expiring_within_days) {
            alerts.push(
                AlertKind::ExpiringSoon {
                    expires_on: expiration,
                    days_remaining: (expiration - today).num_days(),
                }
                .into(),
            );
        }
    }

    if let Some(min_quantity) = sample.min_quantity {
        if sample.quantity <= min_quantity {
            alerts.push(
                AlertKind::LowQuantity {
                    quantity: sample.quantity,
                    min_quantity,
                    unit: sample.unit.clone(),
                }
                .into(),
            );
        }
    }

    if sample.quantity.is_zero() {
        alerts.push(
            AlertKind::OutOfStock {
                unit: sample.unit.clone(),
            }
            .into(),
        );
    }

    alerts
}

/// `expiration` is on or before `today + days`. A window reaching past the
/// last representable date has no upper bound; negative windows are empty.
fn within_window(today: NaiveDate, expiration: NaiveDate, days: i64) -> bool {
    let Ok(days) = u64::try_from(days) else {
        return false;
    };
    match today.checked_add_days(Days::new(days)) {
        Some(cutoff) => expiration <= cutoff,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 9, 30, 0).unwrap()
    }

    fn sample(quantity: i64, min: Option<i64>, expires: Option<NaiveDate>) -> Sample {
        Sample {
            id: "s1".into(),
            sample_id: "SAMP-2025-001".into(),
            name: "Serum".into(),
            sample_type: "blood".into(),
            quantity: Decimal::new(quantity, 0),
            initial_quantity: Decimal::new(100, 0),
            unit: "mL".into(),
            min_quantity: min.map(|m| Decimal::new(m, 0)),
            expiration_date: expires,
            storage_location_id: None,
            parent_sample_id: None,
            relationship_type: None,
            notes: String::new(),
            created_by: "alice".into(),
            created_at: now(),
            updated_at: now(),
        }
    }

    fn codes(alerts: &[Alert]) -> Vec<&'static str> {
        alerts.iter().map(|a| a.kind.code()).collect()
    }

    #[test]
    fn test_expired_empty_low_sample_raises_three_alerts() {
        let yesterday = NaiveDate::from_ymd_opt(2025, 6, 14).unwrap();
        let alerts = alert_status(&sample(0, Some(5), Some(yesterday)), now(), 30);

        assert_eq!(codes(&alerts), vec!["EXPIRED", "LOW_QUANTITY", "OUT_OF_STOCK"]);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[1].severity, Severity::Warning);
        assert_eq!(alerts[2].severity, Severity::Critical);
    }

    #[test]
    fn test_expiring_today_is_not_expired() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let alerts = alert_status(&sample(10, None, Some(today)), now(), 30);

        assert_eq!(
            alerts,
            vec![Alert::from(AlertKind::ExpiringSoon {
                expires_on: today,
                days_remaining: 0,
            })]
        );
    }

    #[test]
    fn test_expiring_window_is_inclusive() {
        let edge = NaiveDate::from_ymd_opt(2025, 7, 15).unwrap();
        assert_eq!(codes(&alert_status(&sample(10, None, Some(edge)), now(), 30)), vec!["EXPIRING_SOON"]);
        assert!(alert_status(&sample(10, None, Some(edge)), now(), 29).is_empty());
    }

    #[test]
    fn test_huge_window_counts_every_future_date() {
        let far = NaiveDate::from_ymd_opt(2400, 1, 1).unwrap();
        for days in [1_000_000_000, i64::MAX] {
            assert_eq!(codes(&alert_status(&sample(10, None, Some(far)), now(), days)), vec!["EXPIRING_SOON"]);
        }

        let yesterday = NaiveDate::from_ymd_opt(2025, 6, 14).unwrap();
        assert_eq!(codes(&alert_status(&sample(10, None, Some(yesterday)), now(), i64::MAX)), vec!["EXPIRED"]);
    }

    #[test]
    fn test_negative_window_only_flags_expired() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        assert!(alert_status(&sample(10, None, Some(today)), now(), -1).is_empty());
    }

    #[test]
    fn test_low_quantity_includes_threshold() {
        assert_eq!(codes(&alert_status(&sample(5, Some(5), None), now(), 30)), vec!["LOW_QUANTITY"]);
        assert!(alert_status(&sample(6, Some(5), None), now(), 30).is_empty());
    }

    #[test]
    fn test_alert_serializes_with_type_tag() {
        let alert = Alert::from(AlertKind::OutOfStock { unit: "mL".into() });
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["type"], "OUT_OF_STOCK");
        assert_eq!(json["severity"], "critical");
    }
}
