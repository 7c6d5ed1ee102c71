//! Rule evaluation: metadata + approval state in, [`Decision`] out.
//!
//! Evaluation runs in two phases. Fixed precedence checks come first
//! (read-only, high risk without dev approval, review without code-review
//! approval, deprecation). Then every enabled rule runs, highest priority
//! first; a rule whose condition is false is triggered, and lands in
//! `reasons` when its priority is above [`BLOCKING_PRIORITY_THRESHOLD`],
//! otherwise in `warnings`.
//!
//! Built-in rules overlap the fixed checks on purpose, so the same message
//! can come from both phases. Identical messages are collapsed per list
//! unless de-duplication is switched off.
//!
//! Every failure mode is fail-open: missing metadata allows the change, and
//! a rule whose condition cannot be parsed or evaluated counts as passed.

use crate::core::error::CarapaceError;
use crate::core::journal::{Diagnostic, DiagnosticSink};
use crate::plugins::approval::{ApprovalSlot, ApprovalStatus, has_approval};
use crate::plugins::condition::{self, ConditionError, EvalContext, Expr};
use crate::plugins::metadata::{AiMetadata, EditPermission, MethodPermission};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Rules with a priority strictly above this block modification.
pub const BLOCKING_PRIORITY_THRESHOLD: i32 = 8;

pub const NO_METADATA: &str = "No metadata found";
pub const MSG_READ_ONLY: &str = "File is marked as read-only";
pub const MSG_HIGH_RISK: &str = "High-risk file requires dev approval before modification";
pub const MSG_REVIEW_REQUIRED: &str = "File requires code review approval before modification";
pub const MSG_STABLE_NEEDS_DEV: &str = "Stable code should have dev approval before modification";
pub const MSG_DEPRECATED: &str = "This file is deprecated — consider if modification is necessary";

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    pub id: String,
    pub name: String,
    /// Boolean expression; the rule passes when it evaluates to `true`.
    pub condition: String,
    /// Message reported when the rule is triggered.
    pub action: String,
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Rule {
    pub fn new(id: &str, name: &str, condition: &str, action: &str, priority: i32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            condition: condition.to_string(),
            action: action.to_string(),
            priority,
            enabled: true,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.priority > BLOCKING_PRIORITY_THRESHOLD
    }
}

pub fn builtin_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "read-only-protection",
            "Read-only protection",
            "!isReadOnly()",
            MSG_READ_ONLY,
            10,
        ),
        Rule::new(
            "high-risk-needs-dev-approval",
            "High-risk files need dev approval",
            "!isHighRisk() || hasApproval(\"dev\")",
            MSG_HIGH_RISK,
            9,
        ),
        Rule::new(
            "review-required",
            "Review required",
            "!metadata.reviewRequired || hasApproval(\"codeReview\")",
            MSG_REVIEW_REQUIRED,
            8,
        ),
        Rule::new(
            "stable-code-needs-dev-approval",
            "Stable code needs dev approval",
            "metadata.stability != \"stable\" || hasApproval(\"dev\")",
            MSG_STABLE_NEEDS_DEV,
            6,
        ),
        Rule::new(
            "deprecated-warning",
            "Deprecated file warning",
            "!isDeprecated()",
            MSG_DEPRECATED,
            5,
        ),
    ]
}

/// Outcome of a pre-modification check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            ..Self::default()
        }
    }

    pub fn no_metadata() -> Self {
        Self {
            allowed: true,
            reasons: Vec::new(),
            warnings: vec![NO_METADATA.to_string()],
        }
    }

    /// Merge another decision's findings into this one.
    pub fn merge(&mut self, other: Decision) {
        self.reasons.extend(other.reasons);
        self.warnings.extend(other.warnings);
        self.allowed = self.reasons.is_empty();
    }

    fn finish(mut self, dedupe: bool) -> Self {
        if dedupe {
            dedupe_in_place(&mut self.reasons);
            dedupe_in_place(&mut self.warnings);
        }
        self.allowed = self.reasons.is_empty();
        self
    }
}

fn dedupe_in_place(messages: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    messages.retain(|m| seen.insert(m.clone()));
}

/// Follow-up work required after a file was modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationAction {
    InvalidateApprovals,
    UpdateLastModified,
    AddToChangelog,
    RequireImmediateReview,
    RunTests,
}

impl ModificationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModificationAction::InvalidateApprovals => "invalidate_approvals",
            ModificationAction::UpdateLastModified => "update_last_modified",
            ModificationAction::AddToChangelog => "add_to_changelog",
            ModificationAction::RequireImmediateReview => "require_immediate_review",
            ModificationAction::RunTests => "run_tests",
        }
    }
}

struct CompiledRule {
    rule: Rule,
    expr: Result<Expr, ConditionError>,
}

impl CompiledRule {
    fn new(rule: Rule) -> Self {
        let expr = condition::parse(&rule.condition);
        Self { rule, expr }
    }
}

pub struct RuleEvaluator {
    rules: Vec<CompiledRule>,
    dedupe_messages: bool,
    diag: Arc<dyn DiagnosticSink>,
}

impl RuleEvaluator {
    /// Evaluator pre-loaded with [`builtin_rules`].
    pub fn new(diag: Arc<dyn DiagnosticSink>) -> Self {
        Self::with_rules(builtin_rules(), diag)
    }

    pub fn with_rules(rules: Vec<Rule>, diag: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            rules: rules.into_iter().map(CompiledRule::new).collect(),
            dedupe_messages: true,
            diag,
        }
    }

    pub fn set_dedupe_messages(&mut self, on: bool) {
        self.dedupe_messages = on;
    }

    /// Every rule, enabled or not, in the order `evaluate` visits them.
    pub fn rules(&self) -> Vec<Rule> {
        self.by_priority().into_iter().map(|c| c.rule.clone()).collect()
    }

    /// Priority descending; the sort is stable so ties keep insertion order.
    fn by_priority(&self) -> Vec<&CompiledRule> {
        let mut ordered: Vec<&CompiledRule> = self.rules.iter().collect();
        ordered.sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority));
        ordered
    }

    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().map(|c| &c.rule).find(|r| r.id == id)
    }

    pub fn add_rule(&mut self, rule: Rule) -> Result<(), CarapaceError> {
        if rule.id.trim().is_empty() {
            return Err(CarapaceError::ValidationError(
                "rule id must not be empty".to_string(),
            ));
        }
        if self.rule(&rule.id).is_some() {
            return Err(CarapaceError::ValidationError(format!(
                "rule '{}' already exists",
                rule.id
            )));
        }
        self.rules.push(CompiledRule::new(rule));
        Ok(())
    }

    pub fn remove_rule(&mut self, id: &str) -> Option<Rule> {
        let idx = self.rules.iter().position(|c| c.rule.id == id)?;
        Some(self.rules.remove(idx).rule)
    }

    pub fn enable_rule(&mut self, id: &str) -> bool {
        self.set_enabled(id, true)
    }

    pub fn disable_rule(&mut self, id: &str) -> bool {
        self.set_enabled(id, false)
    }

    fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.rules.iter_mut().find(|c| c.rule.id == id) {
            Some(c) => {
                c.rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn evaluate(
        &self,
        metadata: Option<&AiMetadata>,
        approval: Option<&ApprovalStatus>,
        file_path: &str,
    ) -> Decision {
        let Some(meta) = metadata else {
            return Decision::no_metadata();
        };

        let mut decision = Decision::allow();

        if meta.is_read_only() {
            decision.reasons.push(MSG_READ_ONLY.to_string());
        }
        if meta.is_high_risk() && !has_approval(approval, ApprovalSlot::Dev) {
            decision.reasons.push(MSG_HIGH_RISK.to_string());
        }
        if meta.review_required && !has_approval(approval, ApprovalSlot::CodeReview) {
            decision.reasons.push(MSG_REVIEW_REQUIRED.to_string());
        }
        if meta.is_deprecated() {
            decision.warnings.push(MSG_DEPRECATED.to_string());
        }

        let ctx = EvalContext {
            metadata: meta,
            approval,
            file_path,
        };
        for compiled in self.by_priority().into_iter().filter(|c| c.rule.enabled) {
            let rule = &compiled.rule;
            let passed = match &compiled.expr {
                Ok(expr) => expr.eval_bool(&ctx),
                Err(e) => Err(e.clone()),
            };
            match passed {
                Ok(true) => {}
                Ok(false) if rule.is_blocking() => decision.reasons.push(rule.action.clone()),
                Ok(false) => decision.warnings.push(rule.action.clone()),
                Err(e) => self.diag.record(Diagnostic::warn(
                    "rule.condition.invalid",
                    Some(&rule.id),
                    format!(
                        "condition {:?} could not be evaluated for {}; treating as passed: {}",
                        rule.condition, file_path, e
                    ),
                )),
            }
        }

        decision.finish(self.dedupe_messages)
    }

    /// Method-level findings for files with per-method permissions.
    pub fn evaluate_method(&self, metadata: Option<&AiMetadata>, method: &str) -> Decision {
        let mut decision = Decision::allow();
        let Some(meta) = metadata else {
            return decision;
        };
        match meta.edit_permissions {
            Some(EditPermission::AddOnly) => decision
                .warnings
                .push("File is add-only — existing code should not be changed".to_string()),
            Some(EditPermission::MethodSpecific) => {
                let perm = meta
                    .method_permissions
                    .as_ref()
                    .and_then(|p| p.get(method));
                match perm {
                    Some(MethodPermission::ReadOnly) => decision
                        .reasons
                        .push(format!("Method '{}' is marked as read-only", method)),
                    Some(MethodPermission::Restricted) => decision.warnings.push(format!(
                        "Method '{}' is restricted — changes need extra care",
                        method
                    )),
                    Some(MethodPermission::Allow) | None => {}
                }
            }
            _ => {}
        }
        decision.finish(self.dedupe_messages)
    }

    /// Actions the caller must run after modifying a file.
    pub fn actions_after(&self, metadata: Option<&AiMetadata>) -> Vec<ModificationAction> {
        let mut actions = vec![
            ModificationAction::InvalidateApprovals,
            ModificationAction::UpdateLastModified,
            ModificationAction::AddToChangelog,
        ];
        if let Some(meta) = metadata {
            if meta.is_high_risk() {
                actions.push(ModificationAction::RequireImmediateReview);
            }
            if meta.has_tests() {
                actions.push(ModificationAction::RunTests);
            }
        }
        actions
    }
}
