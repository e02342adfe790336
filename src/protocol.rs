//! Protocol status machine and version chain rules
//!
//! ```text
//! DRAFT ──submit──▶ REVIEW
//!   │                 │
//!   └──approve──▶ APPROVED ◀──┘
//!  (any) ──archive──▶ ARCHIVED
//! ```
//!
//! Approval and archival are accepted from any other state, matching how
//! reviewers work in practice. Asking for the state a protocol already has
//! is reported as `AlreadyInState`, which callers treat as a no-op.

use crate::db::models::{Protocol, ProtocolContent, ProtocolStatus};
use crate::error::LabError;

/// States reachable from `from` in one step
pub fn allowed_transitions(from: ProtocolStatus) -> Vec<ProtocolStatus> {
    use ProtocolStatus::*;
    match from {
        Draft => vec![Review, Approved, Archived],
        Review => vec![Approved, Archived],
        Approved => vec![Archived],
        Archived => vec![Approved],
    }
}

/// Check a status change on `protocol`
pub fn validate_transition(protocol: &Protocol, to: ProtocolStatus) -> Result<(), LabError> {
    let from = protocol.status;

    if from == to && matches!(to, ProtocolStatus::Approved | ProtocolStatus::Archived) {
        return Err(LabError::AlreadyInState {
            entity: "Protocol",
            id: protocol.id.clone(),
            state: to.to_string(),
        });
    }

    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(LabError::InvalidTransition {
            id: protocol.id.clone(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Id every version of the chain points at
pub fn chain_root_id(protocol: &Protocol) -> &str {
    protocol.root_id()
}

/// Version number following the highest one in the chain
pub fn next_version(max_version: i64) -> i64 {
    max_version + 1
}

/// Content for an independent copy; notes record where it came from
pub fn cloned_content(source: &Protocol) -> ProtocolContent {
    let mut content = source.content.clone();
    content.notes = format!(
        "Cloned from {} v{}\n\n{}",
        source.code, source.version, source.content.notes
    );
    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn protocol(status: ProtocolStatus) -> Protocol {
        Protocol {
            id: "p1".into(),
            code: "SOP-001".into(),
            title: "DNA extraction".into(),
            category_id: None,
            content: ProtocolContent {
                notes: "Use fresh buffer".into(),
                ..Default::default()
            },
            version: 2,
            is_active: true,
            parent_protocol_id: Some("root".into()),
            status,
            approved_by: None,
            approved_at: None,
            times_used: 0,
            created_by: "alice".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_submit_only_from_draft() {
        assert!(validate_transition(&protocol(ProtocolStatus::Draft), ProtocolStatus::Review).is_ok());

        for from in [ProtocolStatus::Review, ProtocolStatus::Approved, ProtocolStatus::Archived] {
            assert!(matches!(
                validate_transition(&protocol(from), ProtocolStatus::Review),
                Err(LabError::InvalidTransition { .. })
            ));
        }
    }

    #[test]
    fn test_repeat_approve_and_archive_are_recoverable() {
        let err = validate_transition(&protocol(ProtocolStatus::Approved), ProtocolStatus::Approved)
            .unwrap_err();
        assert!(err.is_recoverable());

        let err = validate_transition(&protocol(ProtocolStatus::Archived), ProtocolStatus::Archived)
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_nothing_returns_to_draft() {
        for from in ProtocolStatus::ALL {
            assert!(!allowed_transitions(*from).contains(&ProtocolStatus::Draft));
        }
    }

    #[test]
    fn test_clone_notes_reference_source() {
        let content = cloned_content(&protocol(ProtocolStatus::Approved));
        assert_eq!(content.notes, "Cloned from SOP-001 v2\n\nUse fresh buffer");
    }

    #[test]
    fn test_root_of_later_version_is_parent() {
        assert_eq!(chain_root_id(&protocol(ProtocolStatus::Draft)), "root");
        assert_eq!(next_version(3), 4);
    }
}
