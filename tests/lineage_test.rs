//! Sample lineage integration tests

use std::str::FromStr;
use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;

use lab_inventory::db::models::{RelationshipType, Sample};
use lab_inventory::services::sample_service::{AliquotInput, CreateSampleInput, DerivativeInput};
use lab_inventory::{Config, FixedClock, LabDb, LabError, Services};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn services() -> Services {
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap()));
    Services::with_clock(Arc::new(LabDb::open_in_memory().unwrap()), Config::default(), clock)
}

fn aliquot(svc: &Services, parent: &Sample, name: &str, quantity: &str) -> Sample {
    svc.samples
        .create_aliquot(
            &parent.id,
            AliquotInput {
                name: name.into(),
                quantity: dec(quantity),
                relationship_type: None,
                notes: String::new(),
                storage_location_id: None,
            },
            "alice",
        )
        .unwrap()
}

fn codes(samples: &[Sample]) -> Vec<&str> {
    samples.iter().map(|s| s.sample_id.as_str()).collect()
}

#[test]
fn test_three_generation_tree() {
    let svc = services();
    let root = svc
        .samples
        .create_sample(
            CreateSampleInput {
                name: "Tissue".into(),
                sample_type: "tissue".into(),
                quantity: dec("100"),
                unit: "mg".into(),
                min_quantity: None,
                expiration_date: Some(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()),
                storage_location_id: None,
                notes: String::new(),
            },
            "alice",
        )
        .unwrap();

    let a = aliquot(&svc, &root, "Tissue A", "40");
    let b = aliquot(&svc, &root, "Tissue B", "40");
    let a1 = aliquot(&svc, &a, "Tissue A1", "10");
    let dna = svc
        .samples
        .create_derivative(
            &b.id,
            DerivativeInput {
                name: "DNA extract".into(),
                sample_type: "dna".into(),
                quantity: dec("0.5"),
                unit: "ug".into(),
                notes: String::new(),
                storage_location_id: None,
                parent_quantity_used: Some(dec("15")),
            },
            "bob",
        )
        .unwrap();

    assert_eq!(root.sample_id, "SAMP-2025-001");
    assert_eq!(codes(&[a.clone(), b.clone(), a1.clone(), dna.clone()]), vec![
        "SAMP-2025-002",
        "SAMP-2025-003",
        "SAMP-2025-004",
        "SAMP-2025-005",
    ]);

    // Aliquots keep the parent's type and unit but not its expiration
    assert_eq!(a.sample_type, "tissue");
    assert_eq!(a.unit, "mg");
    assert_eq!(a.expiration_date, None);
    assert_eq!(dna.relationship_type, Some(RelationshipType::Derivative));
    assert_eq!(dna.unit, "ug");

    let lineage = svc.samples.lineage(&a1.id).unwrap();
    assert_eq!(codes(&lineage), vec!["SAMP-2025-001", "SAMP-2025-002", "SAMP-2025-004"]);

    let descendants = svc.samples.descendants(&root.id).unwrap();
    assert_eq!(
        codes(&descendants),
        vec!["SAMP-2025-002", "SAMP-2025-003", "SAMP-2025-004", "SAMP-2025-005"]
    );

    assert_eq!(svc.samples.lineage(&root.id).unwrap().len(), 1);
    assert!(svc.samples.descendants(&a1.id).unwrap().is_empty());
    assert!(svc.samples.is_leaf(&dna.id).unwrap());
    assert!(!svc.samples.is_leaf(&b.id).unwrap());

    assert_eq!(svc.samples.get(&root.id).unwrap().unwrap().quantity, dec("20"));
    assert_eq!(svc.samples.get(&a.id).unwrap().unwrap().quantity, dec("30"));
    assert_eq!(svc.samples.get(&b.id).unwrap().unwrap().quantity, dec("25"));
}

#[test]
fn test_unknown_sample_is_not_found() {
    let svc = services();
    assert!(matches!(svc.samples.lineage("missing"), Err(LabError::NotFound { .. })));
    assert!(matches!(svc.samples.descendants("missing"), Err(LabError::NotFound { .. })));
    assert!(matches!(svc.samples.children("missing"), Err(LabError::NotFound { .. })));
}

#[test]
fn test_parent_with_children_cannot_be_deleted() {
    let svc = services();
    let root = svc
        .samples
        .create_sample(
            CreateSampleInput {
                name: "Plasma".into(),
                sample_type: "blood".into(),
                quantity: dec("10"),
                unit: "mL".into(),
                min_quantity: None,
                expiration_date: None,
                storage_location_id: None,
                notes: String::new(),
            },
            "alice",
        )
        .unwrap();
    let child = aliquot(&svc, &root, "Plasma A", "2");

    assert!(matches!(svc.samples.delete(&root.id), Err(LabError::Integrity(_))));
    assert_eq!(svc.samples.lineage(&child.id).unwrap().len(), 2);
}
