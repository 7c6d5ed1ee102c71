use carapace::core::journal::MemorySink;
use carapace::plugins::approval::{ApprovalSlot, ApprovalStatus};
use carapace::plugins::metadata::{AiMetadata, EditPermission, RiskLevel, Stability};
use carapace::plugins::rules::{
    Decision, MSG_HIGH_RISK, MSG_STABLE_NEEDS_DEV, ModificationAction, Rule, RuleEvaluator,
};
use std::sync::Arc;

fn evaluator() -> (Arc<MemorySink>, RuleEvaluator) {
    let sink = Arc::new(MemorySink::new());
    (sink.clone(), RuleEvaluator::with_rules(vec![], sink))
}

fn plain() -> AiMetadata {
    AiMetadata {
        stability: Some(Stability::Experimental),
        edit_permissions: Some(EditPermission::Full),
        ..AiMetadata::default()
    }
}

#[test]
fn test_priority_nine_blocks_priority_eight_warns() {
    let (_, mut ev) = evaluator();
    ev.add_rule(Rule::new("p9", "always fails", "false", "nine", 9))
        .unwrap();
    ev.add_rule(Rule::new("p8", "always fails", "false", "eight", 8))
        .unwrap();

    let d = ev.evaluate(Some(&plain()), None, "x.rs");
    assert!(!d.allowed);
    assert_eq!(d.reasons, vec!["nine".to_string()]);
    assert_eq!(d.warnings, vec!["eight".to_string()]);

    ev.disable_rule("p9");
    let d = ev.evaluate(Some(&plain()), None, "x.rs");
    assert!(d.allowed);
    assert_eq!(d.warnings, vec!["eight".to_string()]);
}

#[test]
fn test_rules_run_in_priority_order() {
    let (_, mut ev) = evaluator();
    ev.add_rule(Rule::new("low", "low", "false", "low", 1)).unwrap();
    ev.add_rule(Rule::new("mid-a", "mid", "false", "mid-a", 4))
        .unwrap();
    ev.add_rule(Rule::new("high", "high", "false", "high", 7))
        .unwrap();
    ev.add_rule(Rule::new("mid-b", "mid", "false", "mid-b", 4))
        .unwrap();

    let d = ev.evaluate(Some(&plain()), None, "x.rs");
    assert_eq!(d.warnings, vec!["high", "mid-a", "mid-b", "low"]);
}

#[test]
fn test_conditions_see_path_and_approvals() {
    let (_, mut ev) = evaluator();
    ev.add_rule(Rule::new(
        "migrations-need-qa",
        "Migrations need QA",
        "filePath != \"db/migrate.sql\" || approval.qa.approved == true",
        "Migrations need QA approval",
        9,
    ))
    .unwrap();

    let d = ev.evaluate(Some(&plain()), None, "db/migrate.sql");
    assert!(!d.allowed);

    let mut status = ApprovalStatus::default();
    status.slot_mut(ApprovalSlot::Qa).approved = true;
    assert!(ev.evaluate(Some(&plain()), Some(&status), "db/migrate.sql").allowed);
    assert!(ev.evaluate(Some(&plain()), None, "src/lib.rs").allowed);
}

#[test]
fn test_broken_condition_fails_open() {
    let (sink, mut ev) = evaluator();
    ev.add_rule(Rule::new("broken", "broken", "hasApproval(", "never shown", 10))
        .unwrap();
    ev.add_rule(Rule::new("typo", "typo", "metadata.colour == \"red\"", "never", 10))
        .unwrap();

    let d = ev.evaluate(Some(&plain()), None, "x.rs");
    assert_eq!(d, Decision::allow());
    assert_eq!(
        sink.codes(),
        vec!["rule.condition.invalid", "rule.condition.invalid"]
    );
}

#[test]
fn test_rule_administration() {
    let (_, mut ev) = evaluator();
    ev.add_rule(Rule::new("a", "a", "true", "a", 1)).unwrap();
    assert!(ev.add_rule(Rule::new("a", "dup", "true", "a", 1)).is_err());
    assert!(ev.add_rule(Rule::new("", "empty", "true", "a", 1)).is_err());

    assert!(ev.disable_rule("a"));
    assert!(!ev.rule("a").unwrap().enabled);
    assert!(ev.enable_rule("a"));
    assert!(!ev.enable_rule("missing"));

    assert_eq!(ev.remove_rule("a").unwrap().id, "a");
    assert!(ev.remove_rule("a").is_none());
    assert!(ev.rules().is_empty());
}

#[test]
fn test_builtin_high_risk_and_stable() {
    let sink = Arc::new(MemorySink::new());
    let ev = RuleEvaluator::new(sink);
    let meta = AiMetadata {
        stability: Some(Stability::Stable),
        breaking_changes_risk: Some(RiskLevel::High),
        ..AiMetadata::default()
    };
    let d = ev.evaluate(Some(&meta), None, "core.rs");
    assert!(!d.allowed);
    assert_eq!(d.reasons, vec![MSG_HIGH_RISK.to_string()]);
    assert_eq!(d.warnings, vec![MSG_STABLE_NEEDS_DEV.to_string()]);

    let mut status = ApprovalStatus::default();
    status.slot_mut(ApprovalSlot::Dev).approved = true;
    let d = ev.evaluate(Some(&meta), Some(&status), "core.rs");
    assert_eq!(d, Decision::allow());
}

#[test]
fn test_actions_after_modification() {
    let (_, ev) = evaluator();
    assert_eq!(
        ev.actions_after(None),
        vec![
            ModificationAction::InvalidateApprovals,
            ModificationAction::UpdateLastModified,
            ModificationAction::AddToChangelog,
        ]
    );
    let meta = AiMetadata {
        tests: Some(vec!["t.rs".to_string()]),
        ..AiMetadata::default()
    };
    assert_eq!(
        ev.actions_after(Some(&meta)).last(),
        Some(&ModificationAction::RunTests)
    );
}

#[test]
fn test_deeply_nested_condition_fails_open() {
    let (sink, mut ev) = evaluator();
    let deep = format!("{}true", "!".repeat(10_000));
    let grouped = format!("{}false{}", "(".repeat(10_000), ")".repeat(10_000));
    ev.add_rule(Rule::new("deep", "deep", &deep, "never shown", 10))
        .unwrap();
    ev.add_rule(Rule::new("grouped", "grouped", &grouped, "never shown", 10))
        .unwrap();

    let d = ev.evaluate(Some(&plain()), None, "x.rs");
    assert_eq!(d, Decision::allow());
    assert_eq!(
        sink.codes(),
        vec!["rule.condition.invalid", "rule.condition.invalid"]
    );
}
