//! Schema-change configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Schema-change configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaChangeConfig {
    /// Database environment name; names the operator abort marker
    pub environment: String,

    /// Directory holding operator marker files
    pub marker_dir: PathBuf,

    /// Prefix of shadow table names
    pub temp_table_prefix: String,

    /// Metadata-store scope holding in-progress markers
    pub marker_scope: String,

    /// Retry policy for writing in-progress markers
    pub marker_retry: RetryPolicy,

    /// Retry policy for reclaiming shadow tables
    pub temp_table_cleanup_retry: RetryPolicy,
}

impl Default for SchemaChangeConfig {
    fn default() -> Self {
        Self {
            environment: "default".to_string(),
            marker_dir: PathBuf::from("./var/marker"),
            temp_table_prefix: "new.".to_string(),
            marker_scope: "sc_in_progress".to_string(),
            marker_retry: RetryPolicy::marker_write(),
            temp_table_cleanup_retry: RetryPolicy::temp_table_cleanup(),
        }
    }
}

impl SchemaChangeConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.environment.is_empty() {
            return Err(Error::Configuration(
                "Environment name must not be empty".to_string(),
            ));
        }

        if self.temp_table_prefix.is_empty() {
            return Err(Error::Configuration(
                "Temp table prefix must not be empty".to_string(),
            ));
        }

        if self.marker_scope.is_empty() {
            return Err(Error::Configuration(
                "Marker scope must not be empty".to_string(),
            ));
        }

        if self.marker_retry.max_attempts == 0 || self.temp_table_cleanup_retry.max_attempts == 0 {
            return Err(Error::Configuration(
                "Retry policies need at least one attempt".to_string(),
            ));
        }

        Ok(())
    }

    /// Path of the operator abort marker for this environment
    #[must_use]
    pub fn abort_marker_path(&self) -> PathBuf {
        self.marker_dir.join(format!("{}.scabort", self.environment))
    }
}
