//! Project memory document: the on-disk home of the approval ledger.
//!
//! The document is a JSON object with two mandatory sections,
//! `projectContext` and `currentSession`, an `approvalStates` map keyed by
//! root-relative file path, and any number of sections owned by other
//! tools, which are carried through rewrites untouched.
//!
//! Writes are crash-safe: temp file, fsync, read-back validation, rename.
//! Reads never fail: an unparsable document is moved aside and replaced by a
//! fresh one; a parsable one missing a mandatory section (or holding a
//! non-object `approvalStates`) is copied aside and rewritten with whatever
//! could be salvaged. Ledger entries that do not deserialize are kept
//! verbatim and written back on every save.

use crate::core::error::CarapaceError;
use crate::core::journal::{Diagnostic, DiagnosticSink};
use crate::core::time;
use crate::plugins::approval::ApprovalStatus;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const PROJECT_CONTEXT: &str = "projectContext";
pub const CURRENT_SESSION: &str = "currentSession";
pub const APPROVAL_STATES: &str = "approvalStates";

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryDocument {
    pub project_context: JsonValue,
    pub current_session: JsonValue,
    pub approval_states: BTreeMap<String, ApprovalStatus>,
    /// Raw `approvalStates` entries that failed to deserialize.
    pub unreadable_states: Map<String, JsonValue>,
    /// Top-level sections this crate does not own.
    pub extra: Map<String, JsonValue>,
}

impl MemoryDocument {
    pub fn fresh(project_root: &Path) -> Self {
        Self {
            project_context: fresh_project_context(project_root),
            current_session: fresh_session(),
            approval_states: BTreeMap::new(),
            unreadable_states: Map::new(),
            extra: Map::new(),
        }
    }

    pub fn to_json(&self) -> Result<JsonValue, CarapaceError> {
        let mut obj = self.extra.clone();
        obj.insert(PROJECT_CONTEXT.to_string(), self.project_context.clone());
        obj.insert(CURRENT_SESSION.to_string(), self.current_session.clone());
        let mut states = self.unreadable_states.clone();
        for (key, status) in &self.approval_states {
            states.insert(key.clone(), serde_json::to_value(status)?);
        }
        obj.insert(APPROVAL_STATES.to_string(), JsonValue::Object(states));
        Ok(JsonValue::Object(obj))
    }
}

fn fresh_project_context(project_root: &Path) -> JsonValue {
    serde_json::json!({
        "root": project_root.to_string_lossy(),
        "createdAt": time::epoch_seconds_z(),
    })
}

fn fresh_session() -> JsonValue {
    serde_json::json!({
        "sessionId": time::event_id(),
        "startedAt": time::epoch_seconds_z(),
    })
}

/// Why a stored document could not be used as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentFault {
    /// Not JSON, or not a JSON object.
    Corrupt(String),
    /// Valid JSON object without one of the mandatory sections.
    Incomplete(Vec<&'static str>),
}

/// Returns the sections of `obj` that are missing or the wrong shape.
/// `approvalStates` may be absent or null, but not any other non-object.
pub fn missing_sections(obj: &Map<String, JsonValue>) -> Vec<&'static str> {
    let mut missing: Vec<&'static str> = [PROJECT_CONTEXT, CURRENT_SESSION]
        .into_iter()
        .filter(|k| !obj.get(*k).is_some_and(|v| v.is_object()))
        .collect();
    if obj
        .get(APPROVAL_STATES)
        .is_some_and(|v| !v.is_object() && !v.is_null())
    {
        missing.push(APPROVAL_STATES);
    }
    missing
}

/// Structural check applied to stored documents and to freshly written temp files.
pub fn classify(content: &str) -> Result<Map<String, JsonValue>, DocumentFault> {
    let value: JsonValue =
        serde_json::from_str(content).map_err(|e| DocumentFault::Corrupt(e.to_string()))?;
    let JsonValue::Object(obj) = value else {
        return Err(DocumentFault::Corrupt(
            "top-level value is not an object".to_string(),
        ));
    };
    let missing = missing_sections(&obj);
    if missing.is_empty() {
        Ok(obj)
    } else {
        Err(DocumentFault::Incomplete(missing))
    }
}

pub struct MemoryFile {
    path: PathBuf,
    project_root: PathBuf,
    diag: Arc<dyn DiagnosticSink>,
}

impl MemoryFile {
    pub fn new(path: &Path, project_root: &Path, diag: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            path: path.to_path_buf(),
            project_root: project_root.to_path_buf(),
            diag,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn subject(&self) -> String {
        self.path.display().to_string()
    }

    /// Load the document, recovering from every failure mode.
    pub fn load(&self) -> MemoryDocument {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return MemoryDocument::fresh(&self.project_root);
            }
            Err(e) => {
                self.recover_corrupt(&format!("unreadable: {}", e));
                return MemoryDocument::fresh(&self.project_root);
            }
        };

        match classify(&content) {
            Ok(obj) => self.from_object(obj),
            Err(DocumentFault::Corrupt(reason)) => {
                self.recover_corrupt(&reason);
                MemoryDocument::fresh(&self.project_root)
            }
            Err(DocumentFault::Incomplete(missing)) => self.recover_incomplete(&content, &missing),
        }
    }

    fn from_object(&self, mut obj: Map<String, JsonValue>) -> MemoryDocument {
        let project_context = obj
            .remove(PROJECT_CONTEXT)
            .filter(|v| v.is_object())
            .unwrap_or_else(|| fresh_project_context(&self.project_root));
        let current_session = obj
            .remove(CURRENT_SESSION)
            .filter(|v| v.is_object())
            .unwrap_or_else(fresh_session);
        let (approval_states, unreadable_states) =
            self.salvage_states(obj.remove(APPROVAL_STATES));
        MemoryDocument {
            project_context,
            current_session,
            approval_states,
            unreadable_states,
            extra: obj,
        }
    }

    /// Split stored entries into usable statuses and raw values kept for rewrite.
    fn salvage_states(
        &self,
        raw: Option<JsonValue>,
    ) -> (BTreeMap<String, ApprovalStatus>, Map<String, JsonValue>) {
        let mut usable = BTreeMap::new();
        let mut unreadable = Map::new();
        let entries = match raw {
            Some(JsonValue::Object(entries)) => entries,
            // Other shapes only reach here from incomplete-document repair,
            // which has already backed the original up.
            _ => return (usable, unreadable),
        };
        for (key, value) in entries {
            match serde_json::from_value::<ApprovalStatus>(value.clone()) {
                Ok(status) => {
                    usable.insert(key, status);
                }
                Err(e) => {
                    self.diag.record(Diagnostic::warn(
                        "ledger.entry.unreadable",
                        Some(&key),
                        format!("approval state ignored and kept as stored: {}", e),
                    ));
                    unreadable.insert(key, value);
                }
            }
        }
        (usable, unreadable)
    }

    fn backup_path(&self, kind: &str) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "project-memory.json".to_string());
        self.path
            .with_file_name(format!("{}.{}.{}", name, kind, time::backup_stamp()))
    }

    fn recover_corrupt(&self, reason: &str) {
        let backup = self.backup_path("corrupt");
        match fs::rename(&self.path, &backup) {
            Ok(()) => self.diag.record(Diagnostic::error(
                "ledger.corrupt",
                Some(&self.subject()),
                format!(
                    "ledger unreadable ({}); backed up to {} and reinitialized",
                    reason,
                    backup.display()
                ),
            )),
            Err(e) => self.diag.record(Diagnostic::error(
                "ledger.backup_failed",
                Some(&self.subject()),
                format!("ledger unreadable ({}) and backup failed: {}", reason, e),
            )),
        }
    }

    fn recover_incomplete(&self, content: &str, missing: &[&'static str]) -> MemoryDocument {
        let backup = self.backup_path("incomplete");
        if let Err(e) = fs::write(&backup, content) {
            self.diag.record(Diagnostic::error(
                "ledger.backup_failed",
                Some(&self.subject()),
                format!("could not back up incomplete ledger: {}", e),
            ));
        }
        self.diag.record(Diagnostic::warn(
            "ledger.incomplete",
            Some(&self.subject()),
            format!(
                "ledger missing or malformed {}; backed up to {} and repaired",
                missing.join(", "),
                backup.display()
            ),
        ));

        let obj = match serde_json::from_str::<JsonValue>(content) {
            Ok(JsonValue::Object(obj)) => obj,
            _ => Map::new(),
        };
        let doc = self.from_object(obj);
        if let Err(e) = self.save(&doc) {
            self.diag.record(Diagnostic::error(
                "ledger.write_failed",
                Some(&self.subject()),
                format!("could not rewrite repaired ledger: {}", e),
            ));
        }
        doc
    }

    /// Atomically replace the document on disk.
    pub fn save(&self, doc: &MemoryDocument) -> Result<(), CarapaceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(&doc.to_json()?)?;

        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp = self.path.with_file_name(format!(".{}.tmp", name));
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(body.as_bytes())?;
            f.sync_all()?;
        }

        let written = fs::read_to_string(&tmp)?;
        if let Err(fault) = classify(&written) {
            let _ = fs::remove_file(&tmp);
            return Err(CarapaceError::ValidationError(format!(
                "temp ledger failed verification: {:?}",
                fault
            )));
        }

        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Load, apply `f`, and rewrite the whole document.
    pub fn update<F, R>(&self, f: F) -> Result<R, CarapaceError>
    where
        F: FnOnce(&mut MemoryDocument) -> R,
    {
        let mut doc = self.load();
        let out = f(&mut doc);
        self.save(&doc)?;
        Ok(out)
    }
}
