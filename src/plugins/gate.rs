//! Modification gate: the surface agents call before and after editing a file.
//!
//! The gate composes the extractor, the approval ledger and the rule
//! evaluator. It keeps no state of its own besides the rule list it owns.
//! Reads that fail degrade to "no metadata", so an unreadable file is
//! allowed with a warning rather than blocked.

use crate::core::config::{self, GateConfig};
use crate::core::error::CarapaceError;
use crate::core::journal::{Diagnostic, DiagnosticSink, JournalSink, TracingSink};
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::approval::{ApprovalSlot, ApprovalStatus, ApprovalStore};
use crate::plugins::metadata::{self, AiMetadata, MetadataExtractor, MetadataPatch};
use crate::plugins::rules::{Decision, ModificationAction, Rule, RuleEvaluator};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// File access used by the gate.
pub trait SourceFiles: Send + Sync {
    fn read_text(&self, path: &Path) -> io::Result<String>;
    fn write_text(&self, path: &Path, text: &str) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsSourceFiles;

impl SourceFiles for FsSourceFiles {
    fn read_text(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn write_text(&self, path: &Path, text: &str) -> io::Result<()> {
        fs::write(path, text)
    }
}

pub struct ModificationGate {
    store: Store,
    source: Box<dyn SourceFiles>,
    extractor: MetadataExtractor,
    approvals: ApprovalStore,
    evaluator: RuleEvaluator,
    diag: Arc<dyn DiagnosticSink>,
}

impl ModificationGate {
    pub fn new(
        store: &Store,
        config: &GateConfig,
        diag: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, CarapaceError> {
        let mut evaluator = RuleEvaluator::new(diag.clone());
        evaluator.set_dedupe_messages(config.dedupe_messages);
        for rule in &config.rules {
            evaluator.add_rule(rule.clone())?;
        }
        Ok(Self {
            store: store.clone(),
            source: Box::new(FsSourceFiles),
            extractor: MetadataExtractor::new(diag.clone()),
            approvals: ApprovalStore::new(store, &config.memory_path(store), diag.clone()),
            evaluator,
            diag,
        })
    }

    /// Gate for the project at `root`, configured from `.carapace/config.toml`.
    pub fn open(root: &Path) -> Result<Self, CarapaceError> {
        let store = Store::new(root);
        let config = config::load_config(&store)?;
        let diag: Arc<dyn DiagnosticSink> = match config.journal_path(&store) {
            Some(path) => Arc::new(JournalSink::new(&path)),
            None => Arc::new(TracingSink),
        };
        Self::new(&store, &config, diag)
    }

    pub fn with_source(mut self, source: Box<dyn SourceFiles>) -> Self {
        self.source = source;
        self
    }

    pub fn approvals(&self) -> &ApprovalStore {
        &self.approvals
    }

    fn read_source(&self, path: &str) -> Option<String> {
        let full = self.store.file_path(path);
        match self.source.read_text(&full) {
            Ok(text) => Some(text),
            Err(e) => {
                self.diag.record(Diagnostic::warn(
                    "source.unreadable",
                    Some(path),
                    format!("could not read {}: {}", full.display(), e),
                ));
                None
            }
        }
    }

    pub fn extract_metadata(&self, path: &str) -> Option<AiMetadata> {
        let text = self.read_source(path)?;
        self.extractor.extract_for(&text, Some(path))
    }

    pub fn check_before_modification(&self, path: &str) -> Decision {
        let metadata = self.extract_metadata(path);
        let approval = self.approvals.get(path);
        let key = self.approvals.key(path);
        self.evaluator
            .evaluate(metadata.as_ref(), approval.as_ref(), &key)
    }

    /// File-level check plus the method's own permission.
    pub fn check_method_modification(&self, path: &str, method: &str) -> Decision {
        let metadata = self.extract_metadata(path);
        let approval = self.approvals.get(path);
        let key = self.approvals.key(path);
        let mut decision = self
            .evaluator
            .evaluate(metadata.as_ref(), approval.as_ref(), &key);
        decision.merge(self.evaluator.evaluate_method(metadata.as_ref(), method));
        decision
    }

    pub fn get_modification_actions(&self, path: &str) -> Vec<ModificationAction> {
        let metadata = self.extract_metadata(path);
        self.evaluator.actions_after(metadata.as_ref())
    }

    /// Run the follow-up actions the gate owns and return the rest, which
    /// belong to external collaborators (changelog, tests, review requests).
    pub fn record_modification(
        &self,
        path: &str,
        reason: &str,
    ) -> Result<Vec<ModificationAction>, CarapaceError> {
        let mut remaining = Vec::new();
        for action in self.get_modification_actions(path) {
            match action {
                ModificationAction::InvalidateApprovals => {
                    self.invalidate_approvals(path, reason)?
                }
                ModificationAction::UpdateLastModified => self.touch_last_modified(path)?,
                other => remaining.push(other),
            }
        }
        Ok(remaining)
    }

    fn touch_last_modified(&self, path: &str) -> Result<(), CarapaceError> {
        let Some(text) = self.read_source(path) else {
            return Ok(());
        };
        if let Some(updated) = metadata::touch_last_modified(&text, &time::epoch_seconds_z()) {
            self.source
                .write_text(&self.store.file_path(path), &updated)?;
        }
        Ok(())
    }

    pub fn update_metadata(&self, path: &str, patch: &MetadataPatch) -> Result<(), CarapaceError> {
        let full = self.store.file_path(path);
        let text = self.source.read_text(&full)?;
        let updated = metadata::apply_updates(&text, patch);
        if updated != text {
            self.source.write_text(&full, &updated)?;
        }
        Ok(())
    }

    pub fn set_approval(
        &self,
        path: &str,
        slot: ApprovalSlot,
        approver: &str,
    ) -> Result<ApprovalStatus, CarapaceError> {
        self.approvals.set(path, slot, approver)
    }

    pub fn get_approval_status(&self, path: &str) -> Option<ApprovalStatus> {
        self.approvals.get(path)
    }

    pub fn invalidate_approvals(&self, path: &str, reason: &str) -> Result<(), CarapaceError> {
        self.approvals.invalidate_all(path, reason)
    }

    pub fn add_rule(&mut self, rule: Rule) -> Result<(), CarapaceError> {
        self.evaluator.add_rule(rule)
    }

    pub fn remove_rule(&mut self, id: &str) -> Option<Rule> {
        self.evaluator.remove_rule(id)
    }

    pub fn enable_rule(&mut self, id: &str) -> bool {
        self.evaluator.enable_rule(id)
    }

    pub fn disable_rule(&mut self, id: &str) -> bool {
        self.evaluator.disable_rule(id)
    }

    pub fn list_rules(&self) -> Vec<Rule> {
        self.evaluator.rules()
    }
}
