//! Configuration file loading.

use serde::Deserialize;
use shelfsync_core::{FinancialSplit, SyncConfig};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config {path:?}: {source}")]
    Io {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration JSON.
    #[error("invalid config {path:?}: {source}")]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Effective CLI configuration.
///
/// ```json
/// {
///   "sync": { "retry": { "max_attempts": 5, "initial_delay_ms": 50 }, "request_timeout_ms": 5000 },
///   "split": { "cogs_ratio": 0.6, "expense_ratio": 0.2 }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Coordinator configuration.
    pub sync: SyncConfig,
    /// Revenue split for the financial summary.
    pub split: FinancialSplit,
}

impl CliConfig {
    /// Loads a configuration file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Prints the configuration as text.
    pub fn print(&self) {
        let retry = &self.sync.retry;
        println!("Retry");
        println!("  max attempts:    {}", retry.max_attempts);
        println!("  initial delay:   {} ms", retry.initial_delay.as_millis());
        println!("  cap delay:       {} ms", retry.cap_delay.as_millis());
        println!("Requests");
        println!("  timeout:         {} ms", self.sync.request_timeout.as_millis());
        println!("  event capacity:  {}", self.sync.event_capacity);
        println!("Financial split");
        println!("  cost of goods:   {:.2}", self.split.cogs_ratio);
        println!("  expenses:        {:.2}", self.split.expense_ratio);
    }
}
