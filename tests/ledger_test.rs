//! Quantity ledger integration tests

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;

use lab_inventory::db::models::ChangeType;
use lab_inventory::services::experiment_service::CreateExperimentInput;
use lab_inventory::services::sample_service::{AliquotInput, CreateSampleInput};
use lab_inventory::{Config, FixedClock, LabDb, LabError, Services};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn services_at(path: &std::path::Path) -> Services {
    let db = Arc::new(LabDb::open(path, Duration::from_secs(5)).unwrap());
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 2, 3, 10, 0, 0).unwrap()));
    Services::with_clock(db, Config::default(), clock)
}

fn serum(quantity: &str) -> CreateSampleInput {
    CreateSampleInput {
        name: "Serum pool".into(),
        sample_type: "blood".into(),
        quantity: dec(quantity),
        unit: "mL".into(),
        min_quantity: Some(dec("5")),
        expiration_date: None,
        storage_location_id: None,
        notes: String::new(),
    }
}

#[test]
fn test_replay_matches_stored_quantity_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lab.db");

    let id = {
        let svc = services_at(&path);
        let sample = svc.samples.create_sample(serum("50"), "alice").unwrap();
        svc.samples.use_quantity(&sample.id, dec("12.5"), "alice", "ELISA").unwrap();
        svc.samples.add_quantity(&sample.id, dec("2.25"), "bob", "top up").unwrap();
        svc.samples.adjust_quantity(&sample.id, dec("-0.125"), "bob", "recount").unwrap();
        sample.id
    };

    let svc = services_at(&path);
    let sample = svc.samples.get(&id).unwrap().unwrap();
    assert_eq!(sample.quantity, dec("39.625"));
    assert_eq!(svc.samples.replay(&id).unwrap(), sample.quantity);

    let history = svc.samples.history(&id, None).unwrap();
    let types: Vec<_> = history.iter().map(|e| e.change_type).collect();
    assert_eq!(types, vec![ChangeType::Adjust, ChangeType::Add, ChangeType::Use]);
    assert_eq!(history[0].quantity_after, sample.quantity);
}

#[test]
fn test_aliquot_conserves_total_quantity() {
    let dir = tempfile::tempdir().unwrap();
    let svc = services_at(&dir.path().join("lab.db"));

    let parent = svc.samples.create_sample(serum("100"), "alice").unwrap();
    let child = svc
        .samples
        .create_aliquot(
            &parent.id,
            AliquotInput {
                name: "Serum A".into(),
                quantity: dec("30"),
                relationship_type: None,
                notes: String::new(),
                storage_location_id: None,
            },
            "alice",
        )
        .unwrap();

    let parent = svc.samples.get(&parent.id).unwrap().unwrap();
    assert_eq!(parent.quantity, dec("70"));
    assert_eq!(child.quantity, dec("30"));
    assert_eq!(parent.quantity + child.quantity, dec("100"));

    let history = svc.samples.history(&parent.id, None).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].change_type, ChangeType::Use);
    assert_eq!(history[0].quantity_change, dec("-30"));
    assert_eq!(history[0].reason, format!("Aliquot {} created", child.sample_id));
}

#[test]
fn test_rejected_changes_leave_no_trace() {
    let dir = tempfile::tempdir().unwrap();
    let svc = services_at(&dir.path().join("lab.db"));
    let sample = svc.samples.create_sample(serum("10"), "alice").unwrap();

    assert!(matches!(
        svc.samples.use_quantity(&sample.id, dec("10.001"), "alice", "too much"),
        Err(LabError::InvalidQuantity { .. })
    ));
    assert!(matches!(
        svc.samples.create_aliquot(
            &sample.id,
            AliquotInput {
                name: "Too big".into(),
                quantity: dec("11"),
                relationship_type: None,
                notes: String::new(),
                storage_location_id: None,
            },
            "alice",
        ),
        Err(LabError::InsufficientQuantity { .. })
    ));

    assert_eq!(svc.samples.get(&sample.id).unwrap().unwrap().quantity, dec("10"));
    assert!(svc.samples.history(&sample.id, None).unwrap().is_empty());
    assert!(svc.samples.children(&sample.id).unwrap().is_empty());
}

#[test]
fn test_experiment_consumption_is_logged_and_linked() {
    let dir = tempfile::tempdir().unwrap();
    let svc = services_at(&dir.path().join("lab.db"));
    let sample = svc.samples.create_sample(serum("20"), "alice").unwrap();
    let experiment = svc
        .experiments
        .create(
            CreateExperimentInput {
                title: "Cytokine panel".into(),
                ..Default::default()
            },
            "alice",
        )
        .unwrap();

    let after = svc
        .experiments
        .consume_sample(&experiment.id, &sample.id, dec("4"), "alice")
        .unwrap();
    assert_eq!(after, dec("16"));

    let history = svc.samples.history(&sample.id, Some(1)).unwrap();
    assert_eq!(history[0].reason, "Used in experiment: Cytokine panel");

    let linked = svc.experiments.samples(&experiment.id).unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].id, sample.id);
}
