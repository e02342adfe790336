//! CLI commands and their execution against the services

use anyhow::Context;
use chrono::NaiveDate;
use clap::Subcommand;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use lab_inventory::db::experiments::ExperimentQuery;
use lab_inventory::db::locations::CreateLocationInput;
use lab_inventory::db::models::{ExperimentStatus, ProtocolContent, ProtocolStatus, RelationshipType};
use lab_inventory::db::protocols::{CreateCategoryInput, ProtocolQuery};
use lab_inventory::db::samples::{SampleQuery, SampleUpdate};
use lab_inventory::services::experiment_service::{AttachFileInput, CreateExperimentInput};
use lab_inventory::services::protocol_service::CreateProtocolInput;
use lab_inventory::services::sample_service::{AliquotInput, CreateSampleInput, DerivativeInput};
use lab_inventory::{LabDb, Services};

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the storage directory, default config and database
    Init,

    /// Row counts per table
    Stats,

    /// Samples, quantities and lineage
    #[command(subcommand)]
    Sample(SampleCommands),

    /// Samples that currently have alerts
    Alerts,

    /// Versioned protocols
    #[command(subcommand)]
    Protocol(ProtocolCommands),

    /// Experiments
    #[command(subcommand)]
    Experiment(ExperimentCommands),

    /// Storage locations
    #[command(subcommand)]
    Location(LocationCommands),
}

/// Sample commands. `KEY` is a sample code (SAMP-2025-001) or id.
#[derive(Debug, Subcommand)]
pub enum SampleCommands {
    /// Register a new root sample
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        sample_type: String,
        #[arg(long)]
        quantity: Decimal,
        #[arg(long)]
        unit: String,
        /// Low-stock threshold
        #[arg(long)]
        min_quantity: Option<Decimal>,
        /// YYYY-MM-DD
        #[arg(long)]
        expires: Option<NaiveDate>,
        #[arg(long)]
        location: Option<i64>,
        #[arg(long, default_value = "")]
        notes: String,
    },

    /// Show one sample with its alerts
    Show { key: String },

    /// List samples
    List {
        #[arg(long)]
        sample_type: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        location: Option<i64>,
        /// Only samples without a parent
        #[arg(long)]
        roots: bool,
        #[arg(short, long, default_value = "100")]
        limit: u32,
    },

    /// Change descriptive fields
    Update {
        key: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        location: Option<i64>,
        #[arg(long)]
        min_quantity: Option<Decimal>,
        #[arg(long)]
        expires: Option<NaiveDate>,
    },

    /// Consume quantity
    Use {
        key: String,
        amount: Decimal,
        #[arg(long, default_value = "")]
        reason: String,
    },

    /// Restock quantity
    Add {
        key: String,
        amount: Decimal,
        #[arg(long, default_value = "")]
        reason: String,
    },

    /// Correct quantity by a signed delta
    Adjust {
        key: String,
        #[arg(allow_hyphen_values = true)]
        delta: Decimal,
        #[arg(long, default_value = "")]
        reason: String,
    },

    /// Discard the remaining quantity
    Dispose {
        key: String,
        #[arg(long, default_value = "")]
        reason: String,
    },

    /// Ledger entries, most recent first
    History {
        key: String,
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Recompute quantity from the ledger
    Replay { key: String },

    /// Split part of a sample into a child
    Aliquot {
        parent: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        quantity: Decimal,
        #[arg(long)]
        relationship: Option<RelationshipType>,
        #[arg(long)]
        location: Option<i64>,
        #[arg(long, default_value = "")]
        notes: String,
    },

    /// Create a derived sample
    Derive {
        parent: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        sample_type: String,
        #[arg(long)]
        quantity: Decimal,
        #[arg(long)]
        unit: String,
        /// Parent quantity consumed
        #[arg(long)]
        parent_used: Option<Decimal>,
        #[arg(long)]
        location: Option<i64>,
        #[arg(long, default_value = "")]
        notes: String,
    },

    /// Ancestry from the root down to this sample
    Lineage { key: String },

    /// Every descendant, breadth-first
    Descendants { key: String },

    /// Delete a sample without children or history
    Delete { key: String },
}

/// Protocol commands. `KEY` is a protocol id or code (resolves to the active version).
#[derive(Debug, Subcommand)]
pub enum ProtocolCommands {
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        category: Option<i64>,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        procedure: String,
    },
    Show { key: String },
    List {
        #[arg(long)]
        status: Option<ProtocolStatus>,
        #[arg(long)]
        active: bool,
        #[arg(long)]
        search: Option<String>,
    },
    Submit { key: String },
    Approve { key: String },
    Archive { key: String },
    NewVersion { key: String },
    /// Copy into a new independent protocol
    #[command(name = "clone")]
    Duplicate {
        key: String,
        #[arg(long)]
        title: String,
    },
    Versions { key: String },
    /// Record one use of the protocol
    Use { key: String },
    Categories,
    AddCategory {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "#667eea")]
        color: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum ExperimentCommands {
    Create {
        #[arg(long)]
        title: String,
        /// Protocol template id or code
        #[arg(long)]
        protocol: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        start: Option<NaiveDate>,
    },
    Show { id: String },
    List {
        #[arg(long)]
        status: Option<ExperimentStatus>,
    },
    Status {
        id: String,
        status: ExperimentStatus,
        #[arg(long)]
        results: Option<String>,
        #[arg(long)]
        conclusion: Option<String>,
    },
    Link {
        id: String,
        /// Sample codes or ids
        samples: Vec<String>,
    },
    /// Use part of a sample in the experiment
    Consume {
        id: String,
        sample: String,
        amount: Decimal,
    },
    /// Record metadata of a file already in the file store
    Attach {
        id: String,
        file_name: String,
        #[arg(long)]
        size: i64,
        #[arg(long, default_value = "")]
        description: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum LocationCommands {
    Create {
        #[arg(long)]
        name: String,
        #[arg(long = "type")]
        location_type: String,
        #[arg(long, default_value = "")]
        temperature: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    List,
}

/// Run a command and return its JSON output
pub fn execute(services: &Services, db: &LabDb, actor: &str, command: Command) -> anyhow::Result<Value> {
    match command {
        Command::Init | Command::Stats => Ok(serde_json::to_value(db.stats()?)?),
        Command::Sample(cmd) => execute_sample(services, actor, cmd),
        Command::Alerts => Ok(serde_json::to_value(services.samples.samples_with_alerts()?)?),
        Command::Protocol(cmd) => execute_protocol(services, actor, cmd),
        Command::Experiment(cmd) => execute_experiment(services, actor, cmd),
        Command::Location(cmd) => execute_location(services, cmd),
    }
}

fn sample_id(services: &Services, key: &str) -> anyhow::Result<String> {
    Ok(services
        .samples
        .resolve(key)
        .with_context(|| format!("resolving sample {}", key))?
        .id)
}

fn protocol_id(services: &Services, key: &str) -> anyhow::Result<String> {
    Ok(services
        .protocols
        .resolve(key)
        .with_context(|| format!("resolving protocol {}", key))?
        .id)
}

fn quantity_result(key: &str, quantity: Decimal) -> Value {
    json!({ "sample": key, "quantity": quantity })
}

fn execute_sample(services: &Services, actor: &str, cmd: SampleCommands) -> anyhow::Result<Value> {
    let samples = &services.samples;

    let value = match cmd {
        SampleCommands::Create {
            name,
            sample_type,
            quantity,
            unit,
            min_quantity,
            expires,
            location,
            notes,
        } => serde_json::to_value(samples.create_sample(
            CreateSampleInput {
                name,
                sample_type,
                quantity,
                unit,
                min_quantity,
                expiration_date: expires,
                storage_location_id: location,
                notes,
            },
            actor,
        )?)?,
        SampleCommands::Show { key } => {
            let sample = samples.resolve(&key)?;
            let alerts = samples.alerts(&sample.id)?;
            json!({ "sample": sample, "alerts": alerts })
        }
        SampleCommands::List {
            sample_type,
            search,
            location,
            roots,
            limit,
        } => serde_json::to_value(samples.list(&SampleQuery {
            sample_type,
            storage_location_id: location,
            search,
            roots_only: roots,
            limit,
            ..Default::default()
        })?)?,
        SampleCommands::Update {
            key,
            name,
            notes,
            location,
            min_quantity,
            expires,
        } => {
            let id = sample_id(services, &key)?;
            serde_json::to_value(samples.update_details(
                &id,
                SampleUpdate {
                    name,
                    notes,
                    storage_location_id: location.map(Some),
                    min_quantity: min_quantity.map(Some),
                    expiration_date: expires.map(Some),
                    ..Default::default()
                },
            )?)?
        }
        SampleCommands::Use { key, amount, reason } => {
            let id = sample_id(services, &key)?;
            quantity_result(&key, samples.use_quantity(&id, amount, actor, &reason)?)
        }
        SampleCommands::Add { key, amount, reason } => {
            let id = sample_id(services, &key)?;
            quantity_result(&key, samples.add_quantity(&id, amount, actor, &reason)?)
        }
        SampleCommands::Adjust { key, delta, reason } => {
            let id = sample_id(services, &key)?;
            quantity_result(&key, samples.adjust_quantity(&id, delta, actor, &reason)?)
        }
        SampleCommands::Dispose { key, reason } => {
            let id = sample_id(services, &key)?;
            quantity_result(&key, samples.dispose(&id, actor, &reason)?)
        }
        SampleCommands::History { key, limit } => {
            let id = sample_id(services, &key)?;
            serde_json::to_value(samples.history(&id, limit)?)?
        }
        SampleCommands::Replay { key } => {
            let sample = samples.resolve(&key)?;
            let replayed = samples.replay(&sample.id)?;
            json!({
                "sample": key,
                "quantity": sample.quantity,
                "replayed": replayed,
                "consistent": replayed == sample.quantity,
            })
        }
        SampleCommands::Aliquot {
            parent,
            name,
            quantity,
            relationship,
            location,
            notes,
        } => {
            let parent_id = sample_id(services, &parent)?;
            serde_json::to_value(samples.create_aliquot(
                &parent_id,
                AliquotInput {
                    name,
                    quantity,
                    relationship_type: relationship,
                    notes,
                    storage_location_id: location,
                },
                actor,
            )?)?
        }
        SampleCommands::Derive {
            parent,
            name,
            sample_type,
            quantity,
            unit,
            parent_used,
            location,
            notes,
        } => {
            let parent_id = sample_id(services, &parent)?;
            serde_json::to_value(samples.create_derivative(
                &parent_id,
                DerivativeInput {
                    name,
                    sample_type,
                    quantity,
                    unit,
                    notes,
                    storage_location_id: location,
                    parent_quantity_used: parent_used,
                },
                actor,
            )?)?
        }
        SampleCommands::Lineage { key } => {
            let id = sample_id(services, &key)?;
            serde_json::to_value(samples.lineage(&id)?)?
        }
        SampleCommands::Descendants { key } => {
            let id = sample_id(services, &key)?;
            serde_json::to_value(samples.descendants(&id)?)?
        }
        SampleCommands::Delete { key } => {
            let id = sample_id(services, &key)?;
            json!({ "sample": key, "deleted": samples.delete(&id)? })
        }
    };

    Ok(value)
}

fn execute_protocol(services: &Services, actor: &str, cmd: ProtocolCommands) -> anyhow::Result<Value> {
    let protocols = &services.protocols;

    let value = match cmd {
        ProtocolCommands::Create {
            title,
            category,
            description,
            procedure,
        } => serde_json::to_value(protocols.create(
            CreateProtocolInput {
                title,
                category_id: category,
                content: ProtocolContent {
                    description,
                    procedure,
                    ..Default::default()
                },
            },
            actor,
        )?)?,
        ProtocolCommands::Show { key } => serde_json::to_value(protocols.resolve(&key)?)?,
        ProtocolCommands::List { status, active, search } => serde_json::to_value(protocols.list(&ProtocolQuery {
            status,
            active_only: active,
            search,
            limit: 100,
            ..Default::default()
        })?)?,
        ProtocolCommands::Submit { key } => {
            serde_json::to_value(protocols.submit_for_review(&protocol_id(services, &key)?, actor)?)?
        }
        ProtocolCommands::Approve { key } => {
            serde_json::to_value(protocols.approve(&protocol_id(services, &key)?, actor)?)?
        }
        ProtocolCommands::Archive { key } => {
            serde_json::to_value(protocols.archive(&protocol_id(services, &key)?, actor)?)?
        }
        ProtocolCommands::NewVersion { key } => {
            serde_json::to_value(protocols.create_new_version(&protocol_id(services, &key)?, actor)?)?
        }
        ProtocolCommands::Duplicate { key, title } => serde_json::to_value(
            protocols.clone_for_new_protocol(&protocol_id(services, &key)?, &title, actor)?,
        )?,
        ProtocolCommands::Versions { key } => {
            serde_json::to_value(protocols.all_versions(&protocol_id(services, &key)?)?)?
        }
        ProtocolCommands::Use { key } => {
            let id = protocol_id(services, &key)?;
            json!({ "protocol": key, "times_used": protocols.increment_usage(&id)? })
        }
        ProtocolCommands::Categories => serde_json::to_value(protocols.list_categories()?)?,
        ProtocolCommands::AddCategory {
            name,
            description,
            color,
        } => serde_json::to_value(protocols.create_category(CreateCategoryInput {
            name,
            description,
            color,
        })?)?,
    };

    Ok(value)
}

fn execute_experiment(services: &Services, actor: &str, cmd: ExperimentCommands) -> anyhow::Result<Value> {
    let experiments = &services.experiments;

    let value = match cmd {
        ExperimentCommands::Create {
            title,
            protocol,
            description,
            start,
        } => {
            let protocol_id = protocol.map(|key| protocol_id(services, &key)).transpose()?;
            serde_json::to_value(experiments.create(
                CreateExperimentInput {
                    title,
                    description,
                    protocol_id,
                    start_date: start,
                    ..Default::default()
                },
                actor,
            )?)?
        }
        ExperimentCommands::Show { id } => {
            let experiment = experiments
                .get(&id)?
                .with_context(|| format!("experiment {} not found", id))?;
            json!({
                "experiment": experiment,
                "samples": experiments.samples(&id)?,
                "attachments": experiments.attachments(&id)?,
            })
        }
        ExperimentCommands::List { status } => serde_json::to_value(experiments.list(&ExperimentQuery {
            status,
            limit: 100,
            ..Default::default()
        })?)?,
        ExperimentCommands::Status {
            id,
            status,
            results,
            conclusion,
        } => serde_json::to_value(experiments.set_status(
            &id,
            status,
            results.as_deref(),
            conclusion.as_deref(),
        )?)?,
        ExperimentCommands::Link { id, samples } => {
            let ids = samples
                .iter()
                .map(|key| sample_id(services, key))
                .collect::<anyhow::Result<Vec<_>>>()?;
            json!({ "experiment": id, "linked": experiments.link_samples(&id, &ids)? })
        }
        ExperimentCommands::Consume { id, sample, amount } => {
            let sid = sample_id(services, &sample)?;
            quantity_result(&sample, experiments.consume_sample(&id, &sid, amount, actor)?)
        }
        ExperimentCommands::Attach {
            id,
            file_name,
            size,
            description,
        } => serde_json::to_value(experiments.attach_file(
            &id,
            AttachFileInput {
                file_name,
                file_size: size,
                description,
            },
            actor,
        )?)?,
    };

    Ok(value)
}

fn execute_location(services: &Services, cmd: LocationCommands) -> anyhow::Result<Value> {
    let value = match cmd {
        LocationCommands::Create {
            name,
            location_type,
            temperature,
            description,
        } => serde_json::to_value(services.locations.create(CreateLocationInput {
            name,
            location_type,
            temperature,
            description,
        })?)?,
        LocationCommands::List => serde_json::to_value(services.locations.list()?)?,
    };
    Ok(value)
}
