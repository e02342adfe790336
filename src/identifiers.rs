//! Human-readable identifier generation
//!
//! Codes are `{prefix}{n}` with `n` zero-padded to a minimum width:
//! `SAMP-2025-001` for samples, `SOP-001` for protocols. The next number is
//! one past the highest code already stored under the prefix. Wider numbers
//! are never truncated, so `SAMP-2025-999` is followed by `SAMP-2025-1000`.
//!
//! Two writers can still compute the same candidate, so [`claim_unique`]
//! lets the caller attempt the insert and regenerates when the store reports
//! the code as taken, up to a bounded number of attempts.

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::db::{protocols, samples};
use crate::error::LabError;

/// Default zero-padding width
pub const DEFAULT_WIDTH: usize = 3;

/// Prefix and padding for one family of codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierScheme {
    prefix: String,
    width: usize,
}

impl IdentifierScheme {
    pub fn new(prefix: impl Into<String>, width: usize) -> Self {
        Self {
            prefix: prefix.into(),
            width,
        }
    }

    /// `SAMP-{year}-NNN`
    pub fn sample(year: i32) -> Self {
        Self::new(format!("SAMP-{}-", year), DEFAULT_WIDTH)
    }

    /// `SOP-NNN`
    pub fn protocol() -> Self {
        Self::new("SOP-", DEFAULT_WIDTH)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn format(&self, n: u64) -> String {
        format!("{}{:0width$}", self.prefix, n, width = self.width)
    }

    /// Numeric segment of a code under this prefix
    pub fn parse(&self, code: &str) -> Option<u64> {
        let digits = code.strip_prefix(&self.prefix)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

/// Where codes live
pub trait IdentifierStore {
    /// Highest stored code with the prefix, compared numerically
    fn highest_with_prefix(&self, prefix: &str) -> Result<Option<String>, LabError>;

    fn exists(&self, code: &str) -> Result<bool, LabError>;
}

/// Sample codes (`samples.sample_id`)
pub struct SampleCodes<'a>(pub &'a Connection);

impl IdentifierStore for SampleCodes<'_> {
    fn highest_with_prefix(&self, prefix: &str) -> Result<Option<String>, LabError> {
        samples::highest_code_with_prefix(self.0, prefix)
    }

    fn exists(&self, code: &str) -> Result<bool, LabError> {
        samples::code_exists(self.0, code)
    }
}

/// Protocol codes (`protocols.code`)
pub struct ProtocolCodes<'a>(pub &'a Connection);

impl IdentifierStore for ProtocolCodes<'_> {
    fn highest_with_prefix(&self, prefix: &str) -> Result<Option<String>, LabError> {
        protocols::highest_code_with_prefix(self.0, prefix)
    }

    fn exists(&self, code: &str) -> Result<bool, LabError> {
        protocols::code_exists(self.0, code)
    }
}

/// Next number after the highest stored code (1 when none exist)
pub fn next_number<S: IdentifierStore + ?Sized>(
    store: &S,
    scheme: &IdentifierScheme,
) -> Result<u64, LabError> {
    match store.highest_with_prefix(scheme.prefix())? {
        None => Ok(1),
        Some(code) => {
            let n = scheme.parse(&code).ok_or_else(|| {
                LabError::Internal(format!(
                    "Stored code {} does not match prefix {}",
                    code,
                    scheme.prefix()
                ))
            })?;
            n.checked_add(1).ok_or_else(|| LabError::IdentifierExhausted {
                prefix: scheme.prefix().to_string(),
                attempts: 0,
            })
        }
    }
}

/// Next candidate code
pub fn next_candidate<S: IdentifierStore + ?Sized>(
    store: &S,
    scheme: &IdentifierScheme,
) -> Result<String, LabError> {
    Ok(scheme.format(next_number(store, scheme)?))
}

/// Next unclaimed sample code for `year`
pub fn next_sample_id(conn: &Connection, year: i32) -> Result<String, LabError> {
    next_candidate(&SampleCodes(conn), &IdentifierScheme::sample(year))
}

/// Next unclaimed protocol code
pub fn next_protocol_code(conn: &Connection) -> Result<String, LabError> {
    next_candidate(&ProtocolCodes(conn), &IdentifierScheme::protocol())
}

/// Outcome of trying to persist a record under a candidate code
#[derive(Debug)]
pub enum Claim<T> {
    Claimed(T),
    /// Another writer holds the code
    Taken,
}

/// Generate a code and hand it to `claim` until one sticks.
///
/// Each attempt recomputes the candidate from the store; a candidate that
/// exists already, or that `claim` reports as taken, costs one attempt.
/// Candidates never go backwards within one call.
pub fn claim_unique<S, T, F>(
    store: &S,
    scheme: &IdentifierScheme,
    max_attempts: u32,
    mut claim: F,
) -> Result<T, LabError>
where
    S: IdentifierStore + ?Sized,
    F: FnMut(&str) -> Result<Claim<T>, LabError>,
{
    let mut floor = 0u64;

    for attempt in 1..=max_attempts {
        let n = next_number(store, scheme)?.max(floor);
        let candidate = scheme.format(n);
        floor = n.saturating_add(1);

        if store.exists(&candidate)? {
            debug!(code = %candidate, attempt, "Candidate code already exists");
            continue;
        }

        match claim(&candidate)? {
            Claim::Claimed(value) => {
                debug!(code = %candidate, attempt, "Claimed identifier");
                return Ok(value);
            }
            Claim::Taken => {
                warn!(code = %candidate, attempt, "Identifier collision, regenerating");
            }
        }
    }

    Err(LabError::IdentifierExhausted {
        prefix: scheme.prefix().to_string(),
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeSet;

    /// In-memory code set; `highest_with_prefix` mirrors the store's
    /// length-then-text ordering
    #[derive(Default)]
    struct FakeStore {
        codes: RefCell<BTreeSet<String>>,
    }

    impl FakeStore {
        fn with(codes: &[&str]) -> Self {
            Self {
                codes: RefCell::new(codes.iter().map(|c| c.to_string()).collect()),
            }
        }
    }

    impl IdentifierStore for FakeStore {
        fn highest_with_prefix(&self, prefix: &str) -> Result<Option<String>, LabError> {
            Ok(self
                .codes
                .borrow()
                .iter()
                .filter(|c| c.starts_with(prefix))
                .max_by(|a, b| a.len().cmp(&b.len()).then(a.cmp(b)))
                .cloned())
        }

        fn exists(&self, code: &str) -> Result<bool, LabError> {
            Ok(self.codes.borrow().contains(code))
        }
    }

    #[test]
    fn test_format_pads_without_truncating() {
        let scheme = IdentifierScheme::sample(2025);
        assert_eq!(scheme.format(1), "SAMP-2025-001");
        assert_eq!(scheme.format(1000), "SAMP-2025-1000");
        assert_eq!(IdentifierScheme::protocol().format(42), "SOP-042");
    }

    #[test]
    fn test_parse_rejects_foreign_codes() {
        let scheme = IdentifierScheme::protocol();
        assert_eq!(scheme.parse("SOP-007"), Some(7));
        assert_eq!(scheme.parse("SOP-"), None);
        assert_eq!(scheme.parse("SOP-12a"), None);
        assert_eq!(scheme.parse("SAMP-2025-001"), None);
    }

    #[test]
    fn test_first_and_second_codes() {
        let store = FakeStore::default();
        let scheme = IdentifierScheme::sample(2025);

        assert_eq!(next_candidate(&store, &scheme).unwrap(), "SAMP-2025-001");
        store.codes.borrow_mut().insert("SAMP-2025-001".into());
        assert_eq!(next_candidate(&store, &scheme).unwrap(), "SAMP-2025-002");
    }

    #[test]
    fn test_numbering_continues_past_width() {
        let store = FakeStore::with(&["SAMP-2025-998", "SAMP-2025-999"]);
        let scheme = IdentifierScheme::sample(2025);

        assert_eq!(next_candidate(&store, &scheme).unwrap(), "SAMP-2025-1000");
        store.codes.borrow_mut().insert("SAMP-2025-1000".into());
        assert_eq!(next_candidate(&store, &scheme).unwrap(), "SAMP-2025-1001");
    }

    #[test]
    fn test_years_number_independently() {
        let store = FakeStore::with(&["SAMP-2024-050"]);
        assert_eq!(
            next_candidate(&store, &IdentifierScheme::sample(2025)).unwrap(),
            "SAMP-2025-001"
        );
    }

    #[test]
    fn test_claim_retries_after_collision() {
        let store = FakeStore::default();
        let scheme = IdentifierScheme::protocol();
        let mut seen = vec![];

        let code = claim_unique(&store, &scheme, 5, |candidate| {
            seen.push(candidate.to_string());
            if seen.len() == 1 {
                // a concurrent writer took it between check and insert
                Ok(Claim::Taken)
            } else {
                Ok(Claim::Claimed(candidate.to_string()))
            }
        })
        .unwrap();

        assert_eq!(seen, vec!["SOP-001", "SOP-002"]);
        assert_eq!(code, "SOP-002");
    }

    #[test]
    fn test_exhaustion_reports_prefix_and_attempts() {
        let store = FakeStore::default();
        let scheme = IdentifierScheme::sample(2025);
        let mut calls = 0;

        let err = claim_unique(&store, &scheme, 4, |_| -> Result<Claim<()>, LabError> {
            calls += 1;
            Ok(Claim::Taken)
        })
        .unwrap_err();

        assert_eq!(calls, 4);
        match err {
            LabError::IdentifierExhausted { prefix, attempts } => {
                assert_eq!(prefix, "SAMP-2025-");
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_highest_code_is_internal_error() {
        let store = FakeStore::with(&["SOP-abc"]);
        let err = next_candidate(&store, &IdentifierScheme::protocol()).unwrap_err();
        assert!(matches!(err, LabError::Internal(_)));
    }

    #[test]
    fn test_next_codes_from_database() {
        use crate::clock::FixedClock;
        use crate::config::Config;
        use crate::db::LabDb;
        use crate::services::protocol_service::CreateProtocolInput;
        use crate::services::sample_service::CreateSampleInput;
        use crate::services::Services;
        use chrono::{TimeZone, Utc};
        use rust_decimal::Decimal;
        use std::sync::Arc;

        let db = Arc::new(LabDb::open_in_memory().unwrap());
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()));
        let svc = Services::with_clock(db.clone(), Config::default(), clock);

        db.with_conn(|conn| {
            assert_eq!(next_sample_id(conn, 2025)?, "SAMP-2025-001");
            assert_eq!(next_protocol_code(conn)?, "SOP-001");
            Ok(())
        })
        .unwrap();

        svc.samples
            .create_sample(
                CreateSampleInput {
                    name: "Buffer".into(),
                    sample_type: "reagent".into(),
                    quantity: Decimal::ONE,
                    unit: "L".into(),
                    min_quantity: None,
                    expiration_date: None,
                    storage_location_id: None,
                    notes: String::new(),
                },
                "alice",
            )
            .unwrap();
        svc.protocols
            .create(
                CreateProtocolInput {
                    title: "PCR".into(),
                    category_id: None,
                    content: Default::default(),
                },
                "alice",
            )
            .unwrap();

        db.with_conn(|conn| {
            assert_eq!(next_sample_id(conn, 2025)?, "SAMP-2025-002");
            assert_eq!(next_sample_id(conn, 2026)?, "SAMP-2026-001");
            assert_eq!(next_protocol_code(conn)?, "SOP-002");
            Ok(())
        })
        .unwrap();
    }
}
