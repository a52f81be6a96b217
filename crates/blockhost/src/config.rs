// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for blockhost.

use std::time::Duration;

use serde_json::Value;

/// Default SQLite database location.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:.data/blockhost.db?mode=rwc";

/// Default reconciliation interval in seconds.
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 30;

/// Default entry file resolved inside each version's root directory.
pub const DEFAULT_ENTRY_FILE: &str = "index.js";

/// Default interpreter used by the process sandbox.
pub const DEFAULT_SANDBOX_INTERPRETER: &str = "node";

/// Blockhost configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL
    pub database_url: String,
    /// How often the reconciliation loop runs after the initial pass
    pub reconcile_interval: Duration,
    /// Capability set injected into every started instance
    pub capabilities: Value,
    /// Entry file name relative to a version's root directory
    pub entry_file: String,
    /// Interpreter the process sandbox launches scripts with
    pub sandbox_interpreter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            reconcile_interval: Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS),
            capabilities: Value::Object(Default::default()),
            entry_file: DEFAULT_ENTRY_FILE.to_string(),
            sandbox_interpreter: DEFAULT_SANDBOX_INTERPRETER.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Missing variables fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("BLOCKHOST_DATABASE_URL")
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let reconcile_interval = match lookup("BLOCKHOST_RECONCILE_INTERVAL_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidInterval(raw.clone()))?;
                if secs == 0 {
                    return Err(ConfigError::InvalidInterval(raw));
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS),
        };

        let capabilities = match lookup("BLOCKHOST_CAPABILITIES") {
            Some(raw) => {
                let value: Value = serde_json::from_str(&raw)
                    .map_err(|e| ConfigError::InvalidCapabilities(e.to_string()))?;
                if !value.is_object() {
                    return Err(ConfigError::InvalidCapabilities(
                        "capabilities must be a JSON object".to_string(),
                    ));
                }
                value
            }
            None => Value::Object(Default::default()),
        };

        let entry_file = lookup("BLOCKHOST_ENTRY_FILE")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENTRY_FILE.to_string());

        let sandbox_interpreter = lookup("BLOCKHOST_SANDBOX_INTERPRETER")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SANDBOX_INTERPRETER.to_string());

        Ok(Self {
            database_url,
            reconcile_interval,
            capabilities,
            entry_file,
            sandbox_interpreter,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The reconciliation interval is not a positive number of seconds.
    #[error("Invalid reconciliation interval: {0}")]
    InvalidInterval(String),
    /// The capability template is not a JSON object.
    #[error("Invalid capabilities: {0}")]
    InvalidCapabilities(String),
}
