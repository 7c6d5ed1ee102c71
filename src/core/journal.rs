//! Diagnostic sink for non-fatal conditions.
//!
//! Nothing in the gate is fatal: malformed metadata sub-fields, rule
//! conditions that fail to evaluate, unreadable sources and corrupted
//! ledgers all degrade to a fail-open answer. Each of those degradations is
//! reported here so operators can see what the decision was computed from.

use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub ts: String,
    pub event_id: String,
    pub severity: Severity,
    /// Dotted machine-readable code, e.g. `ledger.corrupt`.
    pub code: String,
    /// File path or rule id the diagnostic is about.
    pub subject: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, code: &str, subject: Option<&str>, message: String) -> Self {
        Self {
            ts: time::epoch_seconds_z(),
            event_id: time::event_id(),
            severity,
            code: code.to_string(),
            subject: subject.map(|s| s.to_string()),
            message,
        }
    }

    pub fn info(code: &str, subject: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, code, subject, message.into())
    }

    pub fn warn(code: &str, subject: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warn, code, subject, message.into())
    }

    pub fn error(code: &str, subject: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, subject, message.into())
    }
}

pub trait DiagnosticSink: Send + Sync {
    fn record(&self, diagnostic: Diagnostic);
}

/// Forwards diagnostics to the `tracing` subscriber installed by the binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, d: Diagnostic) {
        let subject = d.subject.as_deref().unwrap_or("-");
        match d.severity {
            Severity::Info => tracing::info!(code = %d.code, subject, "{}", d.message),
            Severity::Warn => tracing::warn!(code = %d.code, subject, "{}", d.message),
            Severity::Error => tracing::error!(code = %d.code, subject, "{}", d.message),
        }
    }
}

/// Append-only JSONL journal, one diagnostic per line.
pub struct JournalSink {
    path: PathBuf,
    mirror: TracingSink,
}

impl JournalSink {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            mirror: TracingSink,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, d: &Diagnostic) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(d).map_err(std::io::Error::other)?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(f, "{}", line)
    }
}

impl DiagnosticSink for JournalSink {
    fn record(&self, d: Diagnostic) {
        if let Err(e) = self.append(&d) {
            tracing::error!(path = %self.path.display(), "journal append failed: {}", e);
        }
        self.mirror.record(d);
    }
}

/// Collects diagnostics in memory for callers that inspect them afterwards.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Diagnostic> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn codes(&self) -> Vec<String> {
        self.entries().into_iter().map(|d| d.code).collect()
    }

    pub fn drain(&self) -> Vec<Diagnostic> {
        match self.entries.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, d: Diagnostic) {
        match self.entries.lock() {
            Ok(mut guard) => guard.push(d),
            Err(poisoned) => poisoned.into_inner().push(d),
        }
    }
}
