//! Protocol service - versioned SOPs
//!
//! Wraps the protocol repository with the status machine, version chain
//! management and code generation.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::models::{Protocol, ProtocolCategory, ProtocolContent, ProtocolStatus};
use crate::db::protocols::{self, CreateCategoryInput, NewProtocol, ProtocolQuery};
use crate::error::{classify, is_unique_violation, LabError};
use crate::identifiers::{self, Claim, IdentifierScheme, ProtocolCodes};
use crate::protocol;

use super::events::LabEvent;
use super::{require_text, ServiceContext};

/// Input for a brand-new protocol
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProtocolInput {
    pub title: String,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(flatten)]
    pub content: ProtocolContent,
}

/// Editable fields; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProtocolInput {
    #[serde(default)]
    pub title: Option<String>,
    /// `Some(None)` clears the category
    #[serde(default)]
    pub category_id: Option<Option<i64>>,
    #[serde(default)]
    pub content: Option<ProtocolContent>,
}

/// Protocol service
pub struct ProtocolService {
    ctx: ServiceContext,
}

impl ProtocolService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn now(&self) -> DateTime<Utc> {
        self.ctx.clock.now()
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get(&self, id: &str) -> Result<Option<Protocol>, LabError> {
        self.ctx.db.with_conn(|conn| protocols::get_protocol(conn, id))
    }

    /// Find a protocol by id, or by code (resolving to the active version,
    /// else the latest one)
    pub fn resolve(&self, key: &str) -> Result<Protocol, LabError> {
        self.ctx.db.with_conn(|conn| {
            if let Some(protocol) = protocols::get_protocol(conn, key)? {
                return Ok(protocol);
            }
            if let Some(active) = protocols::active_for_code(conn, key)? {
                return Ok(active);
            }
            protocols::versions_for_code(conn, key)?
                .pop()
                .ok_or_else(|| LabError::not_found("Protocol", key))
        })
    }

    pub fn list(&self, query: &ProtocolQuery) -> Result<Vec<Protocol>, LabError> {
        self.ctx.db.with_conn(|conn| protocols::list_protocols(conn, query))
    }

    /// Every version sharing this protocol's code, ascending
    pub fn all_versions(&self, id: &str) -> Result<Vec<Protocol>, LabError> {
        self.ctx.db.with_conn(|conn| {
            let protocol = protocols::require_protocol(conn, id)?;
            protocols::versions_for_code(conn, &protocol.code)
        })
    }

    /// The active version of this protocol's chain, if any
    pub fn active_version(&self, id: &str) -> Result<Option<Protocol>, LabError> {
        self.ctx.db.with_conn(|conn| {
            let protocol = protocols::require_protocol(conn, id)?;
            protocols::active_for_code(conn, &protocol.code)
        })
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Create version 1 of a new protocol under a fresh `SOP-` code
    pub fn create(&self, input: CreateProtocolInput, actor: &str) -> Result<Protocol, LabError> {
        require_text(&input.title, "title")?;
        require_text(actor, "actor")?;

        let now = self.now();
        let protocol = self.ctx.db.write(|tx| {
            require_category(tx, input.category_id)?;
            self.insert_with_new_code(tx, &input.title, input.category_id, &input.content, actor, now)
        })?;

        info!(code = %protocol.code, id = %protocol.id, actor, "Created protocol");
        self.ctx.events.emit(LabEvent::ProtocolCreated {
            id: protocol.id.clone(),
            code: protocol.code.clone(),
            version: protocol.version,
        });
        Ok(protocol)
    }

    /// Edit title, category or content of a DRAFT or REVIEW version.
    ///
    /// Approved and archived versions change through a new version.
    pub fn update_content(&self, id: &str, input: UpdateProtocolInput) -> Result<Protocol, LabError> {
        if let Some(ref title) = input.title {
            require_text(title, "title")?;
        }

        let now = self.now();
        let protocol = self.ctx.db.write(|tx| {
            let current = protocols::require_protocol(tx, id)?;
            if !matches!(current.status, ProtocolStatus::Draft | ProtocolStatus::Review) {
                return Err(LabError::InvalidInput(format!(
                    "protocol {} v{} is {}; create a new version to edit it",
                    current.code, current.version, current.status
                )));
            }

            let category_id = input.category_id.unwrap_or(current.category_id);
            require_category(tx, category_id)?;
            let title = input.title.as_deref().unwrap_or(&current.title);
            let content = input.content.as_ref().unwrap_or(&current.content);

            protocols::update_content(tx, id, title, category_id, content, now)?;
            protocols::require_protocol(tx, id)
        })?;

        debug!(id, "Updated protocol content");
        self.ctx.events.emit(LabEvent::ProtocolUpdated { id: id.to_string() });
        Ok(protocol)
    }

    /// DRAFT → REVIEW
    pub fn submit_for_review(&self, id: &str, actor: &str) -> Result<Protocol, LabError> {
        self.transition(id, ProtocolStatus::Review, actor)
    }

    /// Any state → APPROVED, recording the approver
    pub fn approve(&self, id: &str, actor: &str) -> Result<Protocol, LabError> {
        self.transition(id, ProtocolStatus::Approved, actor)
    }

    /// Any state → ARCHIVED; archived versions are never active
    pub fn archive(&self, id: &str, actor: &str) -> Result<Protocol, LabError> {
        self.transition(id, ProtocolStatus::Archived, actor)
    }

    /// Append a DRAFT version to the chain of `id` and make it the active one.
    ///
    /// Content is copied from `id`, which need not be the latest version.
    pub fn create_new_version(&self, id: &str, actor: &str) -> Result<Protocol, LabError> {
        require_text(actor, "actor")?;
        let now = self.now();
        let new_id = Uuid::new_v4().to_string();

        let created = self.ctx.db.write(|tx| {
            let source = protocols::require_protocol(tx, id)?;
            let root_id = protocol::chain_root_id(&source).to_string();
            let version = protocol::next_version(protocols::max_version(tx, &source.code)?);

            let deactivated = protocols::deactivate_all(tx, &source.code, now)?;
            debug!(code = %source.code, deactivated, "Deactivated previous versions");

            protocols::insert_protocol(
                tx,
                &NewProtocol {
                    id: &new_id,
                    code: &source.code,
                    title: &source.title,
                    category_id: source.category_id,
                    content: &source.content,
                    version,
                    is_active: true,
                    parent_protocol_id: Some(&root_id),
                    status: ProtocolStatus::Draft,
                    created_by: actor,
                    created_at: now,
                },
            )
            .map_err(classify)?;

            protocols::require_protocol(tx, &new_id)
        })?;

        info!(code = %created.code, version = created.version, actor, "Created protocol version");
        self.ctx.events.emit(LabEvent::ProtocolVersionCreated {
            id: created.id.clone(),
            code: created.code.clone(),
            version: created.version,
            root_id: created.root_id().to_string(),
        });
        Ok(created)
    }

    /// Copy `id` into an independent protocol with a new code
    pub fn clone_for_new_protocol(&self, id: &str, new_title: &str, actor: &str) -> Result<Protocol, LabError> {
        require_text(new_title, "title")?;
        require_text(actor, "actor")?;
        let now = self.now();

        let (source_code, cloned) = self.ctx.db.write(|tx| {
            let source = protocols::require_protocol(tx, id)?;
            let content = protocol::cloned_content(&source);
            let cloned =
                self.insert_with_new_code(tx, new_title, source.category_id, &content, actor, now)?;
            Ok((source.code, cloned))
        })?;

        info!(source = %source_code, code = %cloned.code, actor, "Cloned protocol");
        self.ctx.events.emit(LabEvent::ProtocolCreated {
            id: cloned.id.clone(),
            code: cloned.code.clone(),
            version: cloned.version,
        });
        Ok(cloned)
    }

    /// Count one more use of this version; returns the new count
    pub fn increment_usage(&self, id: &str) -> Result<i64, LabError> {
        let times_used = self.ctx.db.write(|tx| protocols::increment_usage(tx, id))?;
        debug!(id, times_used, "Protocol used");
        Ok(times_used)
    }

    // =========================================================================
    // Categories
    // =========================================================================

    pub fn create_category(&self, input: CreateCategoryInput) -> Result<ProtocolCategory, LabError> {
        require_text(&input.name, "name")?;
        let now = self.now();
        let category = self.ctx.db.write(|tx| protocols::insert_category(tx, &input, now))?;
        info!(name = %category.name, id = category.id, "Created protocol category");
        Ok(category)
    }

    pub fn list_categories(&self) -> Result<Vec<ProtocolCategory>, LabError> {
        self.ctx.db.with_conn(protocols::list_categories)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn transition(&self, id: &str, to: ProtocolStatus, actor: &str) -> Result<Protocol, LabError> {
        require_text(actor, "actor")?;
        let now = self.now();

        let (from, updated) = self.ctx.db.write(|tx| {
            let current = protocols::require_protocol(tx, id)?;
            protocol::validate_transition(&current, to)?;

            match to {
                ProtocolStatus::Approved => protocols::set_approved(tx, id, actor, now)?,
                ProtocolStatus::Archived => protocols::set_archived(tx, id, now)?,
                other => protocols::set_status(tx, id, other, now)?,
            }
            Ok((current.status, protocols::require_protocol(tx, id)?))
        })?;

        info!(code = %updated.code, version = updated.version, from = %from, to = %to, actor, "Protocol status changed");
        self.ctx.events.emit(LabEvent::ProtocolStatusChanged {
            id: updated.id.clone(),
            code: updated.code.clone(),
            from,
            to,
            actor: Some(actor.to_string()),
        });
        Ok(updated)
    }

    fn insert_with_new_code(
        &self,
        conn: &Connection,
        title: &str,
        category_id: Option<i64>,
        content: &ProtocolContent,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Protocol, LabError> {
        let id = Uuid::new_v4().to_string();
        let attempts = self.ctx.config.identifier_max_attempts;

        identifiers::claim_unique(
            &ProtocolCodes(conn),
            &IdentifierScheme::protocol(),
            attempts,
            |candidate| {
                let row = NewProtocol {
                    id: &id,
                    code: candidate,
                    title,
                    category_id,
                    content,
                    version: 1,
                    is_active: true,
                    parent_protocol_id: None,
                    status: ProtocolStatus::Draft,
                    created_by: actor,
                    created_at: now,
                };
                match protocols::insert_protocol(conn, &row) {
                    Ok(()) => Ok(Claim::Claimed(())),
                    Err(e) if is_unique_violation(&e) => Ok(Claim::Taken),
                    Err(e) => Err(classify(e)),
                }
            },
        )?;

        protocols::require_protocol(conn, &id)
    }
}

fn require_category(conn: &Connection, category_id: Option<i64>) -> Result<(), LabError> {
    if let Some(category_id) = category_id {
        if protocols::get_category(conn, category_id)?.is_none() {
            return Err(LabError::not_found("ProtocolCategory", category_id.to_string()));
        }
    }
    Ok(())
}
