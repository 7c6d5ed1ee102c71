use crate::core::error::CarapaceError;
use crate::core::journal::{Diagnostic, DiagnosticSink};
use crate::core::memory::MemoryFile;
use crate::core::store::Store;
use crate::core::time;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// One of the three independent approval dimensions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "camelCase")]
pub enum ApprovalSlot {
    Dev,
    #[value(name = "code-review")]
    CodeReview,
    Qa,
}

impl ApprovalSlot {
    pub const ALL: [ApprovalSlot; 3] = [ApprovalSlot::Dev, ApprovalSlot::CodeReview, ApprovalSlot::Qa];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalSlot::Dev => "dev",
            ApprovalSlot::CodeReview => "codeReview",
            ApprovalSlot::Qa => "qa",
        }
    }

    /// Key prefix used inside embedded metadata blocks (`dev-approved`, ...).
    pub fn block_prefix(&self) -> &'static str {
        match self {
            ApprovalSlot::Dev => "dev",
            ApprovalSlot::CodeReview => "code-review",
            ApprovalSlot::Qa => "qa",
        }
    }
}

impl FromStr for ApprovalSlot {
    type Err = CarapaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(ApprovalSlot::Dev),
            "codeReview" | "code-review" | "code_review" => Ok(ApprovalSlot::CodeReview),
            "qa" => Ok(ApprovalSlot::Qa),
            other => Err(CarapaceError::ValidationError(format!(
                "unknown approval slot '{}' (expected dev, codeReview or qa)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalEntry {
    #[serde(default)]
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invalidation {
    pub reason: String,
    pub at: String,
}

/// Approval state for one file. An unset slot is an unapproved slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalStatus {
    #[serde(default)]
    pub dev: ApprovalEntry,
    #[serde(default)]
    pub code_review: ApprovalEntry,
    #[serde(default)]
    pub qa: ApprovalEntry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_invalidation: Option<Invalidation>,
}

impl ApprovalStatus {
    pub fn slot(&self, slot: ApprovalSlot) -> &ApprovalEntry {
        match slot {
            ApprovalSlot::Dev => &self.dev,
            ApprovalSlot::CodeReview => &self.code_review,
            ApprovalSlot::Qa => &self.qa,
        }
    }

    pub fn slot_mut(&mut self, slot: ApprovalSlot) -> &mut ApprovalEntry {
        match slot {
            ApprovalSlot::Dev => &mut self.dev,
            ApprovalSlot::CodeReview => &mut self.code_review,
            ApprovalSlot::Qa => &mut self.qa,
        }
    }

    pub fn is_approved(&self, slot: ApprovalSlot) -> bool {
        self.slot(slot).approved
    }

    /// Resets all three slots. Approvals are file-scoped for invalidation.
    pub fn invalidate(&mut self, reason: &str) {
        for slot in ApprovalSlot::ALL {
            *self.slot_mut(slot) = ApprovalEntry::default();
        }
        self.last_invalidation = Some(Invalidation {
            reason: reason.to_string(),
            at: time::epoch_seconds_z(),
        });
    }
}

/// `approval.is_approved(slot)` with absent treated as all-false.
pub fn has_approval(approval: Option<&ApprovalStatus>, slot: ApprovalSlot) -> bool {
    approval.is_some_and(|a| a.is_approved(slot))
}

/// Per-project approval ledger backed by the project memory document.
pub struct ApprovalStore {
    store: Store,
    memory: MemoryFile,
    diag: Arc<dyn DiagnosticSink>,
}

impl ApprovalStore {
    pub fn new(store: &Store, memory_path: &Path, diag: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            store: store.clone(),
            memory: MemoryFile::new(memory_path, &store.root, diag.clone()),
            diag,
        }
    }

    pub fn memory(&self) -> &MemoryFile {
        &self.memory
    }

    pub fn key(&self, path: &str) -> String {
        self.store.ledger_key(path)
    }

    /// `None` means no approval activity was ever recorded for `path`.
    pub fn get(&self, path: &str) -> Option<ApprovalStatus> {
        let key = self.key(path);
        self.memory.load().approval_states.remove(&key)
    }

    pub fn list(&self) -> BTreeMap<String, ApprovalStatus> {
        self.memory.load().approval_states
    }

    pub fn set(
        &self,
        path: &str,
        slot: ApprovalSlot,
        approver: &str,
    ) -> Result<ApprovalStatus, CarapaceError> {
        let approver = approver.trim();
        if approver.is_empty() {
            return Err(CarapaceError::ValidationError(
                "approver identity must not be empty".to_string(),
            ));
        }
        let key = self.key(path);
        let status = self.memory.update(|doc| {
            let status = doc.approval_states.entry(key.clone()).or_default();
            *status.slot_mut(slot) = ApprovalEntry {
                approved: true,
                approved_by: Some(approver.to_string()),
                approved_date: Some(time::epoch_seconds_z()),
            };
            status.clone()
        })?;
        self.diag.record(Diagnostic::info(
            "approval.set",
            Some(&key),
            format!("{} approval granted by {}", slot.as_str(), approver),
        ));
        Ok(status)
    }

    /// Reset every slot for `path`. A path without an entry is left absent.
    pub fn invalidate_all(&self, path: &str, reason: &str) -> Result<(), CarapaceError> {
        let key = self.key(path);
        let mut doc = self.memory.load();
        let Some(status) = doc.approval_states.get_mut(&key) else {
            return Ok(());
        };
        status.invalidate(reason);
        self.memory.save(&doc)?;
        self.diag.record(Diagnostic::info(
            "approval.invalidated",
            Some(&key),
            format!("approvals invalidated: {}", reason),
        ));
        Ok(())
    }
}
