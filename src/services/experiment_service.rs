//! Experiment service - experiments, their samples and attachment metadata
//!
//! File bytes live in an external file store; this service only assigns the
//! storage key and records metadata.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::experiments::{self, ExperimentQuery, NewAttachment, NewExperiment};
use crate::db::models::{ChangeType, Experiment, ExperimentStatus, FileAttachment, FileType, Sample};
use crate::db::{protocols, samples};
use crate::error::LabError;
use crate::ledger::{self, QuantityChange};

use super::events::LabEvent;
use super::{require_text, ServiceContext};

/// Input for a new experiment. Blank objective, materials and procedure
/// are filled from the protocol template when one is given.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateExperimentInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub protocol_id: Option<String>,
    #[serde(default)]
    pub objective: String,
    #[serde(default)]
    pub materials: String,
    #[serde(default)]
    pub procedure: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

/// Metadata for a file already handed to the file store
#[derive(Debug, Clone, Deserialize)]
pub struct AttachFileInput {
    pub file_name: String,
    pub file_size: i64,
    #[serde(default)]
    pub description: String,
}

/// Experiment service
pub struct ExperimentService {
    ctx: ServiceContext,
}

impl ExperimentService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn now(&self) -> DateTime<Utc> {
        self.ctx.clock.now()
    }

    pub fn get(&self, id: &str) -> Result<Option<Experiment>, LabError> {
        self.ctx.db.with_conn(|conn| experiments::get_experiment(conn, id))
    }

    pub fn list(&self, query: &ExperimentQuery) -> Result<Vec<Experiment>, LabError> {
        self.ctx.db.with_conn(|conn| experiments::list_experiments(conn, query))
    }

    /// Create an experiment; using a protocol template counts as one use of it
    pub fn create(&self, input: CreateExperimentInput, actor: &str) -> Result<Experiment, LabError> {
        require_text(&input.title, "title")?;
        require_text(actor, "actor")?;
        if let (Some(start), Some(end)) = (input.start_date, input.end_date) {
            if end < start {
                return Err(LabError::InvalidInput("end_date is before start_date".into()));
            }
        }

        let now = self.now();
        let id = Uuid::new_v4().to_string();

        let experiment = self.ctx.db.write(|tx| {
            let template = match input.protocol_id.as_deref() {
                Some(protocol_id) => {
                    let protocol = protocols::require_protocol(tx, protocol_id)?;
                    protocols::increment_usage(tx, protocol_id)?;
                    Some(protocol)
                }
                None => None,
            };

            let content = template.as_ref().map(|p| &p.content);
            let objective = or_template(&input.objective, content.map(|c| c.objective.as_str()));
            let materials = or_template(&input.materials, content.map(|c| c.materials.as_str()));
            let procedure = or_template(&input.procedure, content.map(|c| c.procedure.as_str()));

            experiments::insert_experiment(
                tx,
                &NewExperiment {
                    id: &id,
                    title: &input.title,
                    description: &input.description,
                    protocol_id: input.protocol_id.as_deref(),
                    objective: &objective,
                    materials: &materials,
                    procedure: &procedure,
                    notes: &input.notes,
                    status: ExperimentStatus::Planning,
                    start_date: input.start_date,
                    end_date: input.end_date,
                    created_by: actor,
                    created_at: now,
                },
            )?;
            experiments::require_experiment(tx, &id)
        })?;

        info!(id = %experiment.id, protocol = ?experiment.protocol_id, actor, "Created experiment");
        self.ctx.events.emit(LabEvent::ExperimentCreated {
            id: experiment.id.clone(),
            protocol_id: experiment.protocol_id.clone(),
        });
        Ok(experiment)
    }

    /// Move to `status`, optionally recording results and conclusion
    pub fn set_status(
        &self,
        id: &str,
        status: ExperimentStatus,
        results: Option<&str>,
        conclusion: Option<&str>,
    ) -> Result<Experiment, LabError> {
        let now = self.now();
        let experiment = self.ctx.db.write(|tx| {
            let current = experiments::require_experiment(tx, id)?;
            if current.status == status && results.is_none() && conclusion.is_none() {
                return Err(LabError::AlreadyInState {
                    entity: "Experiment",
                    id: id.to_string(),
                    state: status.to_string(),
                });
            }
            experiments::set_status(tx, id, status, results, conclusion, now)?;
            experiments::require_experiment(tx, id)
        })?;

        info!(id, status = %status, "Experiment status changed");
        self.ctx.events.emit(LabEvent::ExperimentStatusChanged {
            id: id.to_string(),
            status,
        });
        Ok(experiment)
    }

    /// Link samples to an experiment; returns how many links are new
    pub fn link_samples(&self, experiment_id: &str, sample_ids: &[String]) -> Result<usize, LabError> {
        let linked = self.ctx.db.write(|tx| {
            experiments::require_experiment(tx, experiment_id)?;
            let mut linked = vec![];
            for sample_id in sample_ids {
                samples::require_sample(tx, sample_id)?;
                if experiments::link_sample(tx, experiment_id, sample_id)? {
                    linked.push(sample_id.clone());
                }
            }
            Ok(linked)
        })?;

        debug!(experiment = experiment_id, count = linked.len(), "Linked samples");
        for sample_id in &linked {
            self.ctx.events.emit(LabEvent::SampleLinked {
                experiment_id: experiment_id.to_string(),
                sample_id: sample_id.clone(),
            });
        }
        Ok(linked.len())
    }

    /// Use `amount` of a sample in this experiment: one USE ledger entry and
    /// a sample link, committed together. Returns the sample's new quantity.
    pub fn consume_sample(
        &self,
        experiment_id: &str,
        sample_id: &str,
        amount: Decimal,
        actor: &str,
    ) -> Result<Decimal, LabError> {
        require_text(actor, "actor")?;
        ledger::check_positive(amount, "amount")?;
        let now = self.now();

        let (sample, entry, newly_linked) = self.ctx.db.write(|tx| {
            let experiment = experiments::require_experiment(tx, experiment_id)?;
            let reason = format!("Used in experiment: {}", experiment.title);
            let entry = ledger::record_change(
                tx,
                sample_id,
                &QuantityChange {
                    change_type: ChangeType::Use,
                    delta: -amount,
                    reason: &reason,
                    changed_by: actor,
                },
                now,
            )?;
            let newly_linked = experiments::link_sample(tx, experiment_id, sample_id)?;
            Ok((samples::require_sample(tx, sample_id)?, entry, newly_linked))
        })?;

        info!(
            experiment = experiment_id,
            sample = %sample.sample_id,
            amount = %amount,
            actor,
            "Consumed sample in experiment"
        );
        self.ctx.events.emit(LabEvent::QuantityChanged {
            id: sample.id.clone(),
            sample_id: sample.sample_id.clone(),
            change_type: entry.change_type,
            quantity_change: entry.quantity_change,
            quantity_after: entry.quantity_after,
            changed_by: entry.changed_by.clone(),
        });
        if newly_linked {
            self.ctx.events.emit(LabEvent::SampleLinked {
                experiment_id: experiment_id.to_string(),
                sample_id: sample.id,
            });
        }
        Ok(entry.quantity_after)
    }

    pub fn samples(&self, experiment_id: &str) -> Result<Vec<Sample>, LabError> {
        self.ctx.db.with_conn(|conn| {
            experiments::require_experiment(conn, experiment_id)?;
            experiments::samples_for_experiment(conn, experiment_id)
        })
    }

    /// Record attachment metadata and assign its storage key
    pub fn attach_file(
        &self,
        experiment_id: &str,
        input: AttachFileInput,
        actor: &str,
    ) -> Result<FileAttachment, LabError> {
        require_text(&input.file_name, "file_name")?;
        require_text(actor, "actor")?;
        if input.file_size < 0 {
            return Err(LabError::InvalidInput("file_size cannot be negative".into()));
        }

        let now = self.now();
        let id = Uuid::new_v4().to_string();
        let storage_key = storage_key(experiment_id, &id, &input.file_name);
        let file_type = FileType::from_file_name(&input.file_name);

        let attachment = self.ctx.db.write(|tx| {
            experiments::require_experiment(tx, experiment_id)?;
            experiments::insert_attachment(
                tx,
                &NewAttachment {
                    id: &id,
                    experiment_id,
                    file_name: &input.file_name,
                    storage_key: &storage_key,
                    file_type,
                    file_size: input.file_size,
                    description: &input.description,
                    uploaded_by: actor,
                    uploaded_at: now,
                },
            )
        })?;

        info!(experiment = experiment_id, key = %attachment.storage_key, file_type = %file_type, "Attached file");
        self.ctx.events.emit(LabEvent::AttachmentAdded {
            experiment_id: experiment_id.to_string(),
            attachment_id: attachment.id.clone(),
            storage_key: attachment.storage_key.clone(),
        });
        Ok(attachment)
    }

    /// Attachments, newest first
    pub fn attachments(&self, experiment_id: &str) -> Result<Vec<FileAttachment>, LabError> {
        self.ctx.db.with_conn(|conn| {
            experiments::require_experiment(conn, experiment_id)?;
            experiments::list_attachments(conn, experiment_id)
        })
    }
}

fn or_template(own: &str, template: Option<&str>) -> String {
    match template {
        Some(text) if own.trim().is_empty() => text.to_string(),
        _ => own.to_string(),
    }
}

/// `experiments/{experiment_id}/{attachment_id}.{ext}`
fn storage_key(experiment_id: &str, attachment_id: &str, file_name: &str) -> String {
    let ext = std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext {
        Some(ext) if !ext.is_empty() => format!("experiments/{}/{}.{}", experiment_id, attachment_id, ext),
        _ => format!("experiments/{}/{}", experiment_id, attachment_id),
    }
}
