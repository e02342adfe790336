//! Configuration for lab-inventory

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::LabError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lab-inventory")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Database file name inside `storage_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// How long a writer waits for another connection's write lock
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Attempts before identifier generation gives up
    #[serde(default = "default_identifier_max_attempts")]
    pub identifier_max_attempts: u32,

    /// Upper bound on lineage walks
    #[serde(default = "default_max_lineage_depth")]
    pub max_lineage_depth: usize,

    /// Window for EXPIRING_SOON alerts
    #[serde(default = "default_expiring_soon_days")]
    pub expiring_soon_days: i64,
}

fn default_database_file() -> String {
    "lab.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_identifier_max_attempts() -> u32 {
    100
}

fn default_max_lineage_depth() -> usize {
    10_000
}

fn default_expiring_soon_days() -> i64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_file: default_database_file(),
            busy_timeout_ms: default_busy_timeout_ms(),
            identifier_max_attempts: default_identifier_max_attempts(),
            max_lineage_depth: default_max_lineage_depth(),
            expiring_soon_days: default_expiring_soon_days(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LabError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| LabError::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), LabError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| LabError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the services cannot work with
    pub fn validate(&self) -> Result<(), LabError> {
        if self.identifier_max_attempts == 0 {
            return Err(LabError::Config("identifier_max_attempts must be at least 1".into()));
        }
        if self.max_lineage_depth == 0 {
            return Err(LabError::Config("max_lineage_depth must be at least 1".into()));
        }
        if self.expiring_soon_days < 0 {
            return Err(LabError::Config("expiring_soon_days cannot be negative".into()));
        }
        Ok(())
    }

    /// Get database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(&self.database_file)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
