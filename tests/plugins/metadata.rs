use carapace::core::journal::MemorySink;
use carapace::plugins::metadata::{
    EditPermission, MetadataExtractor, MetadataPatch, MethodPermission, RiskLevel, Stability,
    apply_updates, apply_updates_at,
};
use std::collections::BTreeMap;
use std::sync::Arc;

const SERVICE: &str = r#"/**
 * @ai-metadata
 * @stability: experimental
 * @edit-permissions: full
 * @breaking-changes-risk: high
 * @ai-context: "Talks to the payment provider"
 * @tests: ["tests/payments.test.ts"]
 */
export class PaymentService {}
"#;

fn extractor() -> (Arc<MemorySink>, MetadataExtractor) {
    let sink = Arc::new(MemorySink::new());
    (sink.clone(), MetadataExtractor::new(sink))
}

#[test]
fn test_update_round_trips_and_keeps_other_fields() {
    let (_, ex) = extractor();
    let before = ex.extract(SERVICE).unwrap();

    let patch = MetadataPatch {
        stability: Some(Stability::Stable),
        ..MetadataPatch::default()
    };
    let updated = apply_updates(SERVICE, &patch);
    let after = ex.extract(&updated).unwrap();

    assert_eq!(after.stability, Some(Stability::Stable));
    assert_eq!(after.edit_permissions, before.edit_permissions);
    assert_eq!(after.breaking_changes_risk, Some(RiskLevel::High));
    assert_eq!(after.ai_context, before.ai_context);
    assert_eq!(after.tests, before.tests);
    assert!(after.last_modified.is_some());
    assert!(updated.ends_with("export class PaymentService {}\n"));
}

#[test]
fn test_update_is_stable_when_reapplied() {
    let patch = MetadataPatch {
        breaking_changes_risk: Some(RiskLevel::Low),
        review_required: Some(true),
        ..MetadataPatch::default()
    };
    let once = apply_updates_at(SERVICE, &patch, "1771220592Z");
    let twice = apply_updates_at(&once, &patch, "1771220592Z");
    assert_eq!(once, twice);
    assert_eq!(once.matches("@review-required").count(), 1);
}

#[test]
fn test_file_without_block_gains_one() {
    let (_, ex) = extractor();
    let src = "fn main() {}\n";
    assert!(ex.extract(src).is_none());

    let mut perms = BTreeMap::new();
    perms.insert("main".to_string(), MethodPermission::Restricted);
    let patch = MetadataPatch {
        edit_permissions: Some(EditPermission::MethodSpecific),
        method_permissions: Some(perms),
        dependencies: Some(vec!["std".to_string()]),
        ..MetadataPatch::default()
    };
    let updated = apply_updates(src, &patch);
    let meta = ex.extract(&updated).unwrap();
    assert_eq!(meta.edit_permissions, Some(EditPermission::MethodSpecific));
    assert_eq!(
        meta.method_permissions.unwrap()["main"],
        MethodPermission::Restricted
    );
    assert_eq!(meta.dependencies, Some(vec!["std".to_string()]));
    assert!(updated.ends_with(src));
}

#[test]
fn test_malformed_method_permissions_keep_other_fields() {
    let (sink, ex) = extractor();
    let src = "/**\n * @ai-metadata\n * @stability: stable\n * @method-permissions: { generate: read-only\n * @breaking-changes-risk: medium\n */\n";
    let meta = ex.extract_for(src, Some("src/report.ts")).unwrap();
    assert!(meta.method_permissions.is_none());
    assert_eq!(meta.stability, Some(Stability::Stable));
    assert_eq!(meta.breaking_changes_risk, Some(RiskLevel::Medium));

    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].code, "metadata.method_permissions.malformed");
    assert_eq!(entries[0].subject.as_deref(), Some("src/report.ts"));
}

#[test]
fn test_hash_comment_block() {
    let (_, ex) = extractor();
    let src = "# @ai-metadata\n# @stability: deprecated\n# @edit-permissions: read-only\n\nimport os\n# @stability: stable\n";
    let meta = ex.extract(src).unwrap();
    assert_eq!(meta.stability, Some(Stability::Deprecated));
    assert!(meta.is_read_only());
    assert!(meta.is_deprecated());
}

#[test]
fn test_rust_doc_comment_block_updates_in_place() {
    let (_, ex) = extractor();
    let src = "//! @ai-metadata\n//! @edit-permissions: read-only\n//! @stability: experimental\n\n/// Keeps the books.\npub struct Ledger;\n";
    assert!(ex.extract(src).unwrap().is_read_only());

    let patch = MetadataPatch {
        stability: Some(Stability::Stable),
        ..MetadataPatch::default()
    };
    let mut text = src.to_string();
    for _ in 0..3 {
        text = apply_updates_at(&text, &patch, "1700000000Z");
    }
    assert_eq!(
        text,
        "//! @ai-metadata\n//! @edit-permissions: read-only\n//! @stability: stable\n//! @last-modified: 1700000000Z\n\n/// Keeps the books.\npub struct Ledger;\n"
    );
}
