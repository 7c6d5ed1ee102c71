use carapace::core::rpc::{self, RpcRequest, RpcResponse};
use carapace::plugins::approval::ApprovalSlot;
use carapace::plugins::gate::ModificationGate;
use carapace::plugins::metadata::{MetadataPatch, Stability};
use carapace::plugins::rules::{MSG_HIGH_RISK, MSG_READ_ONLY, ModificationAction, Rule};
use serde_json::json;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tempfile::tempdir;

const LEDGER_TS: &str = r#"/**
 * @ai-metadata
 * @stability: experimental
 * @edit-permissions: method-specific
 * @method-permissions: { "post": "read-only", "reverse": "restricted" }
 * @breaking-changes-risk: high
 * @tests: ["tests/ledger.test.ts"]
 */
export function post() {}
export function reverse() {}
"#;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn test_high_risk_file_end_to_end() {
    let tmp = tempdir().unwrap();
    write(tmp.path(), "src/payments/ledger.ts", LEDGER_TS);
    let gate = ModificationGate::open(tmp.path()).unwrap();
    let path = "src/payments/ledger.ts";

    let decision = gate.check_before_modification(path);
    assert!(!decision.allowed);
    assert_eq!(decision.reasons, vec![MSG_HIGH_RISK.to_string()]);

    gate.set_approval(path, ApprovalSlot::Dev, "bob@example.com")
        .unwrap();
    let decision = gate.check_before_modification(path);
    assert!(decision.allowed, "{:?}", decision);

    let status = gate.get_approval_status(path).unwrap();
    assert!(status.dev.approved);
    assert_eq!(status.dev.approved_by.as_deref(), Some("bob@example.com"));

    let remaining = gate.record_modification(path, "posted refunds").unwrap();
    assert_eq!(
        remaining,
        vec![
            ModificationAction::AddToChangelog,
            ModificationAction::RequireImmediateReview,
            ModificationAction::RunTests,
        ]
    );
    assert!(!gate.get_approval_status(path).unwrap().dev.approved);
    assert!(!gate.check_before_modification(path).allowed);

    let meta = gate.extract_metadata(path).unwrap();
    assert!(meta.last_modified.is_some());
    let on_disk = fs::read_to_string(tmp.path().join(path)).unwrap();
    assert!(on_disk.contains("@last-modified:"));
    assert!(on_disk.ends_with("export function reverse() {}\n"));
}

#[test]
fn test_method_permissions() {
    let tmp = tempdir().unwrap();
    write(tmp.path(), "ledger.ts", LEDGER_TS);
    let gate = ModificationGate::open(tmp.path()).unwrap();
    gate.set_approval("ledger.ts", ApprovalSlot::Dev, "bob").unwrap();

    let post = gate.check_method_modification("ledger.ts", "post");
    assert!(!post.allowed);
    assert_eq!(post.reasons, vec!["Method 'post' is marked as read-only"]);

    let reverse = gate.check_method_modification("ledger.ts", "reverse");
    assert!(reverse.allowed);
    assert_eq!(reverse.warnings.len(), 1);

    assert!(gate.check_method_modification("ledger.ts", "other").allowed);
}

#[test]
fn test_config_file_adds_rules_and_journal() {
    let tmp = tempdir().unwrap();
    write(
        tmp.path(),
        ".carapace/config.toml",
        r#"
journal_file = ".carapace/gate.events.jsonl"

[[rules]]
id = "generated-code"
name = "Generated code is not edited by hand"
condition = 'filePath != "gen/api.rs"'
action = "Regenerate instead of editing"
priority = 9
"#,
    );
    write(tmp.path(), "gen/api.rs", "// @ai-metadata\n// @stability: experimental\n");
    write(tmp.path(), "src/main.rs", "// @ai-metadata\n// @edit-permissions: read-only\n");

    let gate = ModificationGate::open(tmp.path()).unwrap();
    let d = gate.check_before_modification("gen/api.rs");
    assert_eq!(d.reasons, vec!["Regenerate instead of editing".to_string()]);

    let d = gate.check_before_modification("src/main.rs");
    assert_eq!(d.reasons, vec![MSG_READ_ONLY.to_string()]);

    gate.set_approval("src/main.rs", ApprovalSlot::Qa, "qa").unwrap();
    gate.check_before_modification("missing.rs");
    let journal = fs::read_to_string(tmp.path().join(".carapace/gate.events.jsonl")).unwrap();
    let codes: Vec<String> = journal
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap())
        .map(|v| v["code"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(codes, vec!["approval.set", "source.unreadable"]);
}

#[test]
fn test_update_metadata_through_gate() {
    let tmp = tempdir().unwrap();
    write(tmp.path(), "a.ts", LEDGER_TS);
    let gate = ModificationGate::open(tmp.path()).unwrap();
    let patch = MetadataPatch {
        stability: Some(Stability::Stable),
        ..MetadataPatch::default()
    };
    gate.update_metadata("a.ts", &patch).unwrap();
    assert_eq!(
        gate.extract_metadata("a.ts").unwrap().stability,
        Some(Stability::Stable)
    );
    assert!(gate.update_metadata("missing.ts", &patch).is_err());
}

fn serve(gate: &mut ModificationGate, requests: &[serde_json::Value]) -> Vec<RpcResponse> {
    let input: String = requests.iter().map(|r| format!("{}\n", r)).collect();
    let mut out = Vec::new();
    rpc::serve(gate, Cursor::new(input), &mut out).unwrap();
    String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn test_rpc_session() {
    let tmp = tempdir().unwrap();
    write(tmp.path(), "src/payments/ledger.ts", LEDGER_TS);
    let mut gate = ModificationGate::open(tmp.path()).unwrap();
    let path = "src/payments/ledger.ts";

    let responses = serve(
        &mut gate,
        &[
            json!({"id": "1", "op": "check_before_modification", "params": {"path": path}}),
            json!({"id": "2", "op": "set_approval", "params": {"path": path, "slot": "dev", "approver": "bob@example.com"}}),
            json!({"id": "3", "op": "check_before_modification", "params": {"path": path}}),
            json!({"id": "4", "op": "get_approval_status", "params": {"path": path}}),
            json!({"id": "5", "op": "disable_rule", "params": {"id": "deprecated-warning"}}),
            json!({"id": "6", "op": "teleport", "params": {}}),
            json!({"id": "7", "op": "set_approval", "params": {"path": path}}),
        ],
    );
    assert_eq!(responses.len(), 7);

    assert!(responses[0].success);
    assert_eq!(responses[0].result.as_ref().unwrap()["allowed"], false);
    assert_eq!(responses[0].receipt.op, "check_before_modification");
    assert_eq!(responses[0].receipt.inputs_hash.len(), 64);

    assert!(responses[1].success);
    assert_eq!(responses[1].receipt.touched_paths.len(), 1);
    assert_eq!(responses[2].result.as_ref().unwrap()["allowed"], true);
    assert_eq!(
        responses[3].result.as_ref().unwrap()["dev"]["approvedBy"],
        "bob@example.com"
    );
    assert_eq!(responses[4].result.as_ref().unwrap()["found"], true);
    assert!(
        !gate
            .list_rules()
            .iter()
            .find(|r| r.id == "deprecated-warning")
            .unwrap()
            .enabled
    );

    assert!(!responses[5].success);
    assert_eq!(responses[5].error.as_ref().unwrap().code, "unknown_op");
    assert_eq!(responses[6].error.as_ref().unwrap().code, "invalid_params");
    assert_eq!(responses[6].id, "7");
}

#[test]
fn test_rpc_rule_admin_and_bad_lines() {
    let tmp = tempdir().unwrap();
    let mut gate = ModificationGate::open(tmp.path()).unwrap();
    let rule = Rule::new("custom", "Custom", "true", "never", 3);

    let mut out = Vec::new();
    let input = format!(
        "{}\nnot json\n\n{}\n",
        serde_json::to_string(&RpcRequest {
            op: "add_rule".to_string(),
            params: serde_json::to_value(&rule).unwrap(),
            id: "a".to_string(),
        })
        .unwrap(),
        json!({"id": "b", "op": "add_rule", "params": rule}),
    );
    rpc::serve(&mut gate, Cursor::new(input), &mut out).unwrap();
    let responses: Vec<RpcResponse> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    assert_eq!(responses.len(), 3);
    assert!(responses[0].success);
    assert_eq!(responses[1].error.as_ref().unwrap().code, "invalid_request");
    assert_eq!(responses[2].error.as_ref().unwrap().code, "validation_error");
    assert!(gate.list_rules().iter().any(|r| r.id == "custom"));
}

#[test]
fn test_parent_segments_resolve_to_the_file_read() {
    let tmp = tempdir().unwrap();
    write(tmp.path(), "a.ts", LEDGER_TS);
    write(tmp.path(), "src/a.ts", LEDGER_TS);
    let gate = ModificationGate::open(tmp.path()).unwrap();

    gate.set_approval("src/a.ts", ApprovalSlot::Dev, "alice").unwrap();
    let d = gate.check_before_modification("src/../a.ts");
    assert!(!d.allowed);
    assert_eq!(d.reasons, vec![MSG_HIGH_RISK.to_string()]);
    assert!(gate.check_before_modification("src/a.ts").allowed);
}

#[test]
fn test_journal_is_written_without_config() {
    let tmp = tempdir().unwrap();
    write(tmp.path(), "src/a.ts", LEDGER_TS);
    let gate = ModificationGate::open(tmp.path()).unwrap();
    gate.set_approval("src/a.ts", ApprovalSlot::Dev, "alice").unwrap();

    let journal = fs::read_to_string(tmp.path().join(".carapace/gate.events.jsonl")).unwrap();
    let first: serde_json::Value = serde_json::from_str(journal.lines().next().unwrap()).unwrap();
    assert_eq!(first["code"], "approval.set");
    assert_eq!(first["subject"], "src/a.ts");
}

#[test]
fn test_journal_can_be_switched_off() {
    let tmp = tempdir().unwrap();
    write(tmp.path(), ".carapace/config.toml", "journal = false\n");
    let gate = ModificationGate::open(tmp.path()).unwrap();
    gate.set_approval("src/a.ts", ApprovalSlot::Dev, "alice").unwrap();
    gate.check_before_modification("missing.rs");
    assert!(!tmp.path().join(".carapace/gate.events.jsonl").exists());
}
