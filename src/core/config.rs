//! Gate configuration, loaded from `.carapace/config.toml`.
//!
//! The file is optional; a project without one runs with the built-in rule
//! set, message de-duplication on, and state files in their default places.

use crate::core::error::CarapaceError;
use crate::core::store::Store;
use crate::plugins::rules::Rule;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GateConfig {
    /// Project memory document holding the approval ledger.
    pub memory_file: Option<PathBuf>,
    /// JSONL diagnostics journal; `.carapace/gate.events.jsonl` when unset.
    pub journal_file: Option<PathBuf>,
    /// `false` sends diagnostics to tracing only.
    pub journal: bool,
    /// Collapse identical messages within `reasons` and within `warnings`.
    pub dedupe_messages: bool,
    /// Extra rules registered after the built-ins.
    pub rules: Vec<Rule>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            memory_file: None,
            journal_file: None,
            journal: true,
            dedupe_messages: true,
            rules: Vec::new(),
        }
    }
}

impl GateConfig {
    pub fn memory_path(&self, store: &Store) -> PathBuf {
        match &self.memory_file {
            Some(p) => store.resolve(p),
            None => store.default_memory_path(),
        }
    }

    pub fn journal_path(&self, store: &Store) -> Option<PathBuf> {
        if !self.journal {
            return None;
        }
        Some(match &self.journal_file {
            Some(p) => store.resolve(p),
            None => store.default_journal_path(),
        })
    }
}

pub fn parse_config(content: &str) -> Result<GateConfig, CarapaceError> {
    toml::from_str(content).map_err(|e| CarapaceError::ConfigError(e.to_string()))
}

/// Load `.carapace/config.toml`. No config = defaults (not an error).
pub fn load_config(store: &Store) -> Result<GateConfig, CarapaceError> {
    let config_path = store.config_path();
    if !config_path.exists() {
        return Ok(GateConfig::default());
    }
    let content = fs::read_to_string(&config_path)?;
    parse_config(&content)
}
