//! lab-inventory: operator CLI over the lab inventory services
//!
//! ## Usage
//!
//! ```bash
//! # Register a sample and split it
//! lab-inventory sample create --name Serum --sample-type blood --quantity 100 --unit mL
//! lab-inventory sample aliquot SAMP-2025-001 --name "Serum A" --quantity 30
//!
//! # Inspect
//! lab-inventory sample history SAMP-2025-001
//! lab-inventory sample lineage SAMP-2025-002
//! lab-inventory alerts
//!
//! # Protocols
//! lab-inventory protocol create --title "DNA extraction"
//! lab-inventory protocol approve SOP-001
//! lab-inventory protocol new-version SOP-001
//! ```
//!
//! Output is JSON on stdout; logs go to stderr (`RUST_LOG` to adjust).

mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lab_inventory::services::events::spawn_logging_listener;
use lab_inventory::{Config, LabDb, Services};

#[derive(Parser, Debug)]
#[command(name = "lab-inventory")]
#[command(about = "Laboratory sample, lineage and protocol tracking")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "LAB_INVENTORY_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory (overrides config file)
    #[arg(long, env = "LAB_INVENTORY_DIR")]
    storage_dir: Option<PathBuf>,

    /// Database file name inside the storage directory
    #[arg(long)]
    database_file: Option<String>,

    /// Who is performing the operation
    #[arg(long, env = "LAB_ACTOR", default_value = "operator")]
    actor: String,

    #[command(subcommand)]
    command: cli::Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("lab_inventory=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Load config
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => {
            let default_path = Config::default().config_path();
            if default_path.exists() {
                Config::load(&default_path)?
            } else {
                Config::default()
            }
        }
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(file) = args.database_file {
        config.database_file = file;
    }
    config.validate()?;

    if let cli::Command::Init = args.command {
        std::fs::create_dir_all(&config.storage_dir)?;
        let config_path = config.config_path();
        if !config_path.exists() {
            config.save(&config_path)?;
            info!(path = %config_path.display(), "Created default config");
        }
    }

    info!(database = %config.database_path().display(), "Opening lab inventory");
    let db = Arc::new(LabDb::open(&config.database_path(), config.busy_timeout())?);
    let services = Services::new(db.clone(), config);
    let listener = spawn_logging_listener(services.events.clone());

    let result = cli::execute(&services, &db, &args.actor, args.command);

    // Closing the bus lets the listener drain and stop
    drop(services);
    listener.await?;

    let output = result?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
