//! Sample service - samples, the quantity ledger, lineage and alerts
//!
//! Every mutation runs in one immediate write transaction: validation reads,
//! identifier assignment, the sample row and its ledger entries commit
//! together or not at all.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::alerts::{self, Alert, SampleAlerts};
use crate::db::models::{ChangeType, QuantityLogEntry, RelationshipType, Sample};
use crate::db::samples::{self, NewSample, SampleQuery, SampleUpdate};
use crate::db::{locations, quantity_logs};
use crate::error::{classify, is_unique_violation, LabError};
use crate::identifiers::{self, Claim, IdentifierScheme, SampleCodes};
use crate::ledger::{self, QuantityChange};
use crate::lineage::{self, SampleLineage};

use super::events::LabEvent;
use super::{require_text, ServiceContext};

/// Input for registering a new root sample
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSampleInput {
    pub name: String,
    pub sample_type: String,
    pub quantity: Decimal,
    pub unit: String,
    #[serde(default)]
    pub min_quantity: Option<Decimal>,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
    #[serde(default)]
    pub storage_location_id: Option<i64>,
    #[serde(default)]
    pub notes: String,
}

/// Input for splitting part of a sample into a child of the same material
#[derive(Debug, Clone, Deserialize)]
pub struct AliquotInput {
    pub name: String,
    pub quantity: Decimal,
    /// Defaults to ALIQUOT
    #[serde(default)]
    pub relationship_type: Option<RelationshipType>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub storage_location_id: Option<i64>,
}

/// Input for deriving a new material from a sample
#[derive(Debug, Clone, Deserialize)]
pub struct DerivativeInput {
    pub name: String,
    pub sample_type: String,
    pub quantity: Decimal,
    pub unit: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub storage_location_id: Option<i64>,
    /// Parent quantity consumed by the derivation, if any
    #[serde(default)]
    pub parent_quantity_used: Option<Decimal>,
}

/// Sample service
pub struct SampleService {
    ctx: ServiceContext,
}

impl SampleService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn now(&self) -> DateTime<Utc> {
        self.ctx.clock.now()
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Get sample by primary key
    pub fn get(&self, id: &str) -> Result<Option<Sample>, LabError> {
        self.ctx.db.with_conn(|conn| samples::get_sample(conn, id))
    }

    /// Get sample by its code (`SAMP-2025-001`)
    pub fn get_by_code(&self, code: &str) -> Result<Option<Sample>, LabError> {
        self.ctx.db.with_conn(|conn| samples::get_sample_by_code(conn, code))
    }

    /// Find a sample by code or primary key
    pub fn resolve(&self, key: &str) -> Result<Sample, LabError> {
        self.ctx.db.with_conn(|conn| {
            match samples::get_sample_by_code(conn, key)? {
                Some(sample) => Ok(sample),
                None => samples::require_sample(conn, key),
            }
        })
    }

    pub fn list(&self, query: &SampleQuery) -> Result<Vec<Sample>, LabError> {
        self.ctx.db.with_conn(|conn| samples::list_samples(conn, query))
    }

    /// Ledger entries, most recent first
    pub fn history(&self, id: &str, limit: Option<u32>) -> Result<Vec<QuantityLogEntry>, LabError> {
        self.ctx.db.with_conn(|conn| {
            samples::require_sample(conn, id)?;
            quantity_logs::list_for_sample(conn, id, limit)
        })
    }

    /// Quantity reconstructed from `initial_quantity` and the ledger
    pub fn replay(&self, id: &str) -> Result<Decimal, LabError> {
        self.ctx.db.with_conn(|conn| ledger::replay(conn, id))
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Register a root sample under a fresh code
    pub fn create_sample(&self, input: CreateSampleInput, actor: &str) -> Result<Sample, LabError> {
        require_text(&input.name, "name")?;
        require_text(&input.sample_type, "sample_type")?;
        require_text(&input.unit, "unit")?;
        require_text(actor, "actor")?;
        check_non_negative(input.quantity, "quantity")?;
        if let Some(min) = input.min_quantity {
            check_non_negative(min, "min_quantity")?;
        }

        let now = self.now();
        let id = Uuid::new_v4().to_string();

        let sample = self.ctx.db.write(|tx| {
            require_location(tx, input.storage_location_id)?;

            let row = NewSample {
                id: &id,
                sample_id: "",
                name: &input.name,
                sample_type: &input.sample_type,
                quantity: input.quantity,
                unit: &input.unit,
                min_quantity: input.min_quantity,
                expiration_date: input.expiration_date,
                storage_location_id: input.storage_location_id,
                parent_sample_id: None,
                relationship_type: None,
                notes: &input.notes,
                created_by: actor,
                created_at: now,
            };
            self.insert_with_code(tx, &row)
        })?;

        info!(sample = %sample.sample_id, id = %sample.id, actor, "Created sample");
        self.emit_created(&sample);
        Ok(sample)
    }

    /// Change descriptive fields. Quantity is only reachable through the ledger.
    pub fn update_details(&self, id: &str, update: SampleUpdate) -> Result<Sample, LabError> {
        if let Some(ref name) = update.name {
            require_text(name, "name")?;
        }
        if let Some(Some(min)) = update.min_quantity {
            check_non_negative(min, "min_quantity")?;
        }

        let now = self.now();
        let sample = self.ctx.db.write(|tx| {
            samples::require_sample(tx, id)?;
            if let Some(location) = update.storage_location_id {
                require_location(tx, location)?;
            }
            samples::update_sample(tx, id, &update, now)?;
            samples::require_sample(tx, id)
        })?;

        debug!(id, "Updated sample details");
        self.ctx.events.emit(LabEvent::SampleUpdated { id: id.to_string() });
        Ok(sample)
    }

    /// Delete a sample without children or ledger history
    pub fn delete(&self, id: &str) -> Result<bool, LabError> {
        let deleted = self.ctx.db.write(|tx| {
            let sample = match samples::get_sample(tx, id)? {
                Some(sample) => sample,
                None => return Ok(None),
            };
            if !samples::delete_sample(tx, id)? {
                return Ok(None);
            }
            Ok(Some(sample))
        })?;

        match deleted {
            Some(sample) => {
                info!(sample = %sample.sample_id, "Deleted sample");
                self.ctx.events.emit(LabEvent::SampleDeleted {
                    id: sample.id,
                    sample_id: sample.sample_id,
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Apply a signed quantity change and log it; returns the new quantity
    pub fn record_change(
        &self,
        id: &str,
        change_type: ChangeType,
        delta: Decimal,
        actor: &str,
        reason: &str,
    ) -> Result<Decimal, LabError> {
        require_text(actor, "actor")?;
        ledger::check_precision(delta, "quantity change")?;

        let now = self.now();
        let change = QuantityChange {
            change_type,
            delta,
            reason,
            changed_by: actor,
        };

        let (entry, sample) = self.ctx.db.write(|tx| {
            let entry = ledger::record_change(tx, id, &change, now)?;
            let sample = samples::require_sample(tx, id)?;
            Ok((entry, sample))
        })?;

        self.emit_quantity_changed(&sample, &entry);
        Ok(entry.quantity_after)
    }

    /// Consume `amount` (USE)
    pub fn use_quantity(&self, id: &str, amount: Decimal, actor: &str, reason: &str) -> Result<Decimal, LabError> {
        ledger::check_positive(amount, "amount")?;
        self.record_change(id, ChangeType::Use, -amount, actor, reason)
    }

    /// Restock `amount` (ADD)
    pub fn add_quantity(&self, id: &str, amount: Decimal, actor: &str, reason: &str) -> Result<Decimal, LabError> {
        ledger::check_positive(amount, "amount")?;
        self.record_change(id, ChangeType::Add, amount, actor, reason)
    }

    /// Correct the quantity by a signed `delta` (ADJUST)
    pub fn adjust_quantity(&self, id: &str, delta: Decimal, actor: &str, reason: &str) -> Result<Decimal, LabError> {
        if delta.is_zero() {
            return Err(LabError::InvalidInput("adjustment must be non-zero".into()));
        }
        self.record_change(id, ChangeType::Adjust, delta, actor, reason)
    }

    /// Discard everything left in a sample (DISPOSE)
    pub fn dispose(&self, id: &str, actor: &str, reason: &str) -> Result<Decimal, LabError> {
        require_text(actor, "actor")?;
        let now = self.now();

        let (entry, sample) = self.ctx.db.write(|tx| {
            let current = samples::require_sample(tx, id)?;
            if current.quantity.is_zero() {
                return Err(LabError::AlreadyInState {
                    entity: "Sample",
                    id: current.sample_id,
                    state: "EMPTY".into(),
                });
            }
            let change = QuantityChange {
                change_type: ChangeType::Dispose,
                delta: -current.quantity,
                reason,
                changed_by: actor,
            };
            let entry = ledger::record_change(tx, id, &change, now)?;
            let sample = samples::require_sample(tx, id)?;
            Ok((entry, sample))
        })?;

        self.emit_quantity_changed(&sample, &entry);
        Ok(entry.quantity_after)
    }

    /// Split `input.quantity` off `parent_id` into a new child sample.
    ///
    /// The parent is debited with one USE entry whose reason names the
    /// child's code.
    pub fn create_aliquot(&self, parent_id: &str, input: AliquotInput, actor: &str) -> Result<Sample, LabError> {
        require_text(&input.name, "name")?;
        require_text(actor, "actor")?;
        ledger::check_positive(input.quantity, "quantity")?;

        let now = self.now();
        let id = Uuid::new_v4().to_string();
        let relationship = input.relationship_type.unwrap_or(RelationshipType::Aliquot);

        let (child, parent, entry) = self.ctx.db.write(|tx| {
            let parent = samples::require_sample(tx, parent_id)?;
            ledger::ensure_sufficient(&parent, input.quantity)?;
            require_location(tx, input.storage_location_id)?;

            let row = NewSample {
                id: &id,
                sample_id: "",
                name: &input.name,
                sample_type: &parent.sample_type,
                quantity: input.quantity,
                unit: &parent.unit,
                min_quantity: None,
                expiration_date: None,
                storage_location_id: input.storage_location_id,
                parent_sample_id: Some(&parent.id),
                relationship_type: Some(relationship),
                notes: &input.notes,
                created_by: actor,
                created_at: now,
            };
            let child = self.insert_with_code(tx, &row)?;

            let reason = format!("Aliquot {} created", child.sample_id);
            let entry = ledger::record_change(
                tx,
                &parent.id,
                &QuantityChange {
                    change_type: ChangeType::Use,
                    delta: -input.quantity,
                    reason: &reason,
                    changed_by: actor,
                },
                now,
            )?;
            let parent = samples::require_sample(tx, &parent.id)?;
            Ok((child, parent, entry))
        })?;

        info!(
            parent = %parent.sample_id,
            child = %child.sample_id,
            quantity = %input.quantity,
            actor,
            "Created aliquot"
        );
        self.emit_created(&child);
        self.emit_quantity_changed(&parent, &entry);
        Ok(child)
    }

    /// Create a derived sample, optionally consuming parent quantity
    pub fn create_derivative(
        &self,
        parent_id: &str,
        input: DerivativeInput,
        actor: &str,
    ) -> Result<Sample, LabError> {
        require_text(&input.name, "name")?;
        require_text(&input.sample_type, "sample_type")?;
        require_text(&input.unit, "unit")?;
        require_text(actor, "actor")?;
        check_non_negative(input.quantity, "quantity")?;
        if let Some(used) = input.parent_quantity_used {
            ledger::check_positive(used, "parent_quantity_used")?;
        }

        let now = self.now();
        let id = Uuid::new_v4().to_string();

        let (child, parent, entry) = self.ctx.db.write(|tx| {
            let parent = samples::require_sample(tx, parent_id)?;
            if let Some(used) = input.parent_quantity_used {
                ledger::ensure_sufficient(&parent, used)?;
            }
            require_location(tx, input.storage_location_id)?;

            let row = NewSample {
                id: &id,
                sample_id: "",
                name: &input.name,
                sample_type: &input.sample_type,
                quantity: input.quantity,
                unit: &input.unit,
                min_quantity: None,
                expiration_date: None,
                storage_location_id: input.storage_location_id,
                parent_sample_id: Some(&parent.id),
                relationship_type: Some(RelationshipType::Derivative),
                notes: &input.notes,
                created_by: actor,
                created_at: now,
            };
            let child = self.insert_with_code(tx, &row)?;

            let entry = match input.parent_quantity_used {
                Some(used) => {
                    let reason = format!("Derivative {} created", child.sample_id);
                    Some(ledger::record_change(
                        tx,
                        &parent.id,
                        &QuantityChange {
                            change_type: ChangeType::Use,
                            delta: -used,
                            reason: &reason,
                            changed_by: actor,
                        },
                        now,
                    )?)
                }
                None => None,
            };
            let parent = samples::require_sample(tx, &parent.id)?;
            Ok((child, parent, entry))
        })?;

        info!(parent = %parent.sample_id, child = %child.sample_id, actor, "Created derivative");
        self.emit_created(&child);
        if let Some(entry) = entry {
            self.emit_quantity_changed(&parent, &entry);
        }
        Ok(child)
    }

    // =========================================================================
    // Lineage
    // =========================================================================

    /// Root ancestor first, the sample itself last
    pub fn lineage(&self, id: &str) -> Result<Vec<Sample>, LabError> {
        let max_depth = self.ctx.config.max_lineage_depth;
        self.ctx
            .db
            .with_conn(|conn| lineage::ancestry(&SampleLineage(conn), id, max_depth))
    }

    /// Every transitive child, breadth-first by level
    pub fn descendants(&self, id: &str) -> Result<Vec<Sample>, LabError> {
        let max_depth = self.ctx.config.max_lineage_depth;
        self.ctx.db.with_conn(|conn| {
            samples::require_sample(conn, id)?;
            lineage::descendants(&SampleLineage(conn), id, max_depth)
        })
    }

    /// Direct children, oldest first
    pub fn children(&self, id: &str) -> Result<Vec<Sample>, LabError> {
        self.ctx.db.with_conn(|conn| {
            samples::require_sample(conn, id)?;
            samples::get_children(conn, id)
        })
    }

    pub fn is_leaf(&self, id: &str) -> Result<bool, LabError> {
        self.ctx.db.with_conn(|conn| {
            samples::require_sample(conn, id)?;
            Ok(samples::count_children(conn, id)? == 0)
        })
    }

    // =========================================================================
    // Alerts
    // =========================================================================

    /// Active alerts for one sample using the configured window
    pub fn alerts(&self, id: &str) -> Result<Vec<Alert>, LabError> {
        self.alerts_within(id, self.ctx.config.expiring_soon_days)
    }

    /// Active alerts with an explicit expiring-soon window
    pub fn alerts_within(&self, id: &str, days: i64) -> Result<Vec<Alert>, LabError> {
        if days < 0 {
            return Err(LabError::InvalidInput("days cannot be negative".into()));
        }
        let sample = self.ctx.db.with_conn(|conn| samples::require_sample(conn, id))?;
        Ok(alerts::alert_status(&sample, self.now(), days))
    }

    /// Every sample that currently has at least one alert
    pub fn samples_with_alerts(&self) -> Result<Vec<SampleAlerts>, LabError> {
        self.samples_with_alerts_at(self.now())
    }

    /// Every sample with at least one alert as of `now`
    pub fn samples_with_alerts_at(&self, now: DateTime<Utc>) -> Result<Vec<SampleAlerts>, LabError> {
        let days = self.ctx.config.expiring_soon_days;
        let all = self.ctx.db.with_conn(samples::all_samples)?;

        Ok(all
            .into_iter()
            .filter_map(|sample| {
                let alerts = alerts::alert_status(&sample, now, days);
                (!alerts.is_empty()).then_some(SampleAlerts { sample, alerts })
            })
            .collect())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Insert `row` under the next free code for the current year
    fn insert_with_code(&self, conn: &Connection, row: &NewSample<'_>) -> Result<Sample, LabError> {
        let scheme = IdentifierScheme::sample(row.created_at.year());
        let attempts = self.ctx.config.identifier_max_attempts;

        identifiers::claim_unique(&SampleCodes(conn), &scheme, attempts, |candidate| {
            let coded = NewSample {
                sample_id: candidate,
                ..row.clone()
            };
            match samples::insert_sample(conn, &coded) {
                Ok(()) => Ok(Claim::Claimed(())),
                Err(e) if is_unique_violation(&e) => Ok(Claim::Taken),
                Err(e) => Err(classify(e)),
            }
        })?;

        samples::require_sample(conn, row.id)
    }

    fn emit_created(&self, sample: &Sample) {
        self.ctx.events.emit(LabEvent::SampleCreated {
            id: sample.id.clone(),
            sample_id: sample.sample_id.clone(),
            parent_id: sample.parent_sample_id.clone(),
            relationship_type: sample.relationship_type,
            created_by: sample.created_by.clone(),
        });
    }

    fn emit_quantity_changed(&self, sample: &Sample, entry: &QuantityLogEntry) {
        self.ctx.events.emit(LabEvent::QuantityChanged {
            id: sample.id.clone(),
            sample_id: sample.sample_id.clone(),
            change_type: entry.change_type,
            quantity_change: entry.quantity_change,
            quantity_after: entry.quantity_after,
            changed_by: entry.changed_by.clone(),
        });
    }
}

fn check_non_negative(value: Decimal, field: &str) -> Result<(), LabError> {
    ledger::check_precision(value, field)?;
    if value < Decimal::ZERO {
        return Err(LabError::InvalidInput(format!("{} cannot be negative", field)));
    }
    Ok(())
}

fn require_location(conn: &Connection, location_id: Option<i64>) -> Result<(), LabError> {
    if let Some(location_id) = location_id {
        if locations::get_location(conn, location_id)?.is_none() {
            return Err(LabError::not_found("StorageLocation", location_id.to_string()));
        }
    }
    Ok(())
}
