//! Protocol version chain integration tests

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use lab_inventory::db::models::{ProtocolContent, ProtocolStatus};
use lab_inventory::services::experiment_service::CreateExperimentInput;
use lab_inventory::services::protocol_service::CreateProtocolInput;
use lab_inventory::{Config, FixedClock, LabDb, LabError, Services};

fn services() -> Services {
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 4, 14, 9, 30, 0).unwrap()));
    Services::with_clock(Arc::new(LabDb::open_in_memory().unwrap()), Config::default(), clock)
}

fn extraction() -> CreateProtocolInput {
    CreateProtocolInput {
        title: "DNA extraction".into(),
        category_id: None,
        content: ProtocolContent {
            objective: "Isolate genomic DNA".into(),
            materials: "Lysis buffer, proteinase K".into(),
            procedure: "1. Lyse\n2. Bind\n3. Elute".into(),
            ..Default::default()
        },
    }
}

#[test]
fn test_new_version_becomes_the_only_active_one() {
    let svc = services();
    let v1 = svc.protocols.create(extraction(), "alice").unwrap();
    assert_eq!(v1.code, "SOP-001");
    assert_eq!(v1.version, 1);
    assert!(v1.is_active);
    assert_eq!(v1.status, ProtocolStatus::Draft);

    let v1 = svc.protocols.approve(&v1.id, "carol").unwrap();
    assert_eq!(v1.approved_by.as_deref(), Some("carol"));

    let v2 = svc.protocols.create_new_version(&v1.id, "bob").unwrap();
    assert_eq!(v2.code, "SOP-001");
    assert_eq!(v2.version, 2);
    assert_eq!(v2.status, ProtocolStatus::Draft);
    assert_eq!(v2.parent_protocol_id.as_deref(), Some(v1.id.as_str()));
    assert_eq!(v2.content, v1.content);

    // Branching from v2 still hangs off the chain root
    let v3 = svc.protocols.create_new_version(&v2.id, "bob").unwrap();
    assert_eq!(v3.version, 3);
    assert_eq!(v3.parent_protocol_id.as_deref(), Some(v1.id.as_str()));

    let versions = svc.protocols.all_versions(&v1.id).unwrap();
    let active: Vec<_> = versions.iter().filter(|p| p.is_active).map(|p| p.version).collect();
    assert_eq!(active, vec![3]);
    assert_eq!(svc.protocols.active_version(&v1.id).unwrap().unwrap().id, v3.id);
    assert_eq!(svc.protocols.resolve("SOP-001").unwrap().id, v3.id);

    // The approved v1 keeps its status after being superseded
    let v1 = svc.protocols.get(&v1.id).unwrap().unwrap();
    assert_eq!(v1.status, ProtocolStatus::Approved);
    assert!(!v1.is_active);
}

#[test]
fn test_status_workflow() {
    let svc = services();
    let p = svc.protocols.create(extraction(), "alice").unwrap();

    let p = svc.protocols.submit_for_review(&p.id, "alice").unwrap();
    assert_eq!(p.status, ProtocolStatus::Review);
    assert!(matches!(
        svc.protocols.submit_for_review(&p.id, "alice"),
        Err(LabError::InvalidTransition { .. })
    ));

    let p = svc.protocols.approve(&p.id, "carol").unwrap();
    let err = svc.protocols.approve(&p.id, "carol").unwrap_err();
    assert!(matches!(err, LabError::AlreadyInState { .. }));
    assert!(err.is_recoverable());

    let p = svc.protocols.archive(&p.id, "carol").unwrap();
    assert_eq!(p.status, ProtocolStatus::Archived);
    assert!(!p.is_active);
    assert!(matches!(
        svc.protocols.update_content(&p.id, Default::default()),
        Err(LabError::InvalidInput(_))
    ));
}

#[test]
fn test_clone_gets_a_fresh_code() {
    let svc = services();
    let source = svc.protocols.create(extraction(), "alice").unwrap();
    let copy = svc
        .protocols
        .clone_for_new_protocol(&source.id, "RNA extraction", "bob")
        .unwrap();

    assert_eq!(copy.code, "SOP-002");
    assert_eq!(copy.version, 1);
    assert_eq!(copy.parent_protocol_id, None);
    assert_eq!(copy.content.procedure, source.content.procedure);
    assert!(copy.content.notes.starts_with("Cloned from SOP-001 v1"));
    assert_eq!(svc.protocols.all_versions(&source.id).unwrap().len(), 1);
}

#[test]
fn test_experiment_from_template_counts_usage() {
    let svc = services();
    let protocol = svc.protocols.create(extraction(), "alice").unwrap();

    let experiment = svc
        .experiments
        .create(
            CreateExperimentInput {
                title: "Extraction run 1".into(),
                protocol_id: Some(protocol.id.clone()),
                procedure: "Follow SOP-001 with double elution".into(),
                ..Default::default()
            },
            "bob",
        )
        .unwrap();

    assert_eq!(experiment.objective, "Isolate genomic DNA");
    assert_eq!(experiment.materials, "Lysis buffer, proteinase K");
    assert_eq!(experiment.procedure, "Follow SOP-001 with double elution");
    assert_eq!(svc.protocols.get(&protocol.id).unwrap().unwrap().times_used, 1);
}
