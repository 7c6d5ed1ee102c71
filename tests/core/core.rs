use carapace::core::config::{self, GateConfig};
use carapace::core::journal::{Diagnostic, DiagnosticSink, JournalSink, MemorySink, Severity};
use carapace::core::memory::{self, DocumentFault, MemoryFile};
use carapace::core::store::{self, Store};
use carapace::core::time;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::tempdir;

#[test]
fn test_find_project_root_walks_up() {
    let tmp = tempdir().unwrap();
    fs::create_dir_all(tmp.path().join(".carapace")).unwrap();
    let nested = tmp.path().join("src").join("deep");
    fs::create_dir_all(&nested).unwrap();
    assert_eq!(store::find_project_root(&nested).unwrap(), tmp.path());

    let bare = tempdir().unwrap();
    assert!(store::find_project_root(bare.path()).is_err());
}

#[test]
fn test_config_defaults_and_overrides() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    assert_eq!(config::load_config(&store).unwrap(), GateConfig::default());

    fs::create_dir_all(store.state_dir()).unwrap();
    fs::write(
        store.config_path(),
        "memory_file = \"state/ledger.json\"\ndedupe_messages = false\n",
    )
    .unwrap();
    let cfg = config::load_config(&store).unwrap();
    assert!(!cfg.dedupe_messages);
    assert_eq!(
        cfg.memory_path(&store),
        tmp.path().join("state").join("ledger.json")
    );
    assert_eq!(
        cfg.journal_path(&store),
        Some(store.state_dir().join("gate.events.jsonl"))
    );

    fs::write(store.config_path(), "colour = \"red\"\n").unwrap();
    assert!(config::load_config(&store).is_err());
}

#[test]
fn test_journal_appends_jsonl() {
    let tmp = tempdir().unwrap();
    let path: PathBuf = tmp.path().join("nested").join("gate.events.jsonl");
    let sink = JournalSink::new(&path);
    sink.record(Diagnostic::warn("ledger.corrupt", Some("m.json"), "bad"));
    sink.record(Diagnostic::info("approval.set", None, "ok"));

    let content = fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["code"], "ledger.corrupt");
    assert_eq!(lines[0]["subject"], "m.json");
    assert_ne!(lines[0]["event_id"], lines[1]["event_id"]);
}

#[test]
fn test_memory_sink_drains() {
    let sink = MemorySink::new();
    sink.record(Diagnostic::error("ledger.write_failed", None, "disk full"));
    let drained = sink.drain();
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].severity, Severity::Error);
    assert!(sink.entries().is_empty());
}

#[test]
fn test_classify_documents() {
    assert!(matches!(
        memory::classify("[1, 2]"),
        Err(DocumentFault::Corrupt(_))
    ));
    assert!(matches!(
        memory::classify("{\"projectContext\": {}}"),
        Err(DocumentFault::Incomplete(missing)) if missing == vec!["currentSession"]
    ));
    assert!(memory::classify("{\"projectContext\": {}, \"currentSession\": {}}").is_ok());
}

#[test]
fn test_incomplete_ledger_is_repaired_with_salvaged_entries() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join(".carapace").join("project-memory.json");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(
        &path,
        r#"{
  "approvalStates": {
    "src/a.ts": {"dev": {"approved": true, "approvedBy": "erin"}},
    "src/b.ts": "garbage"
  },
  "notes": ["kept"]
}"#,
    )
    .unwrap();

    let sink = Arc::new(MemorySink::new());
    let file = MemoryFile::new(&path, tmp.path(), sink.clone());
    let doc = file.load();

    assert!(doc.approval_states["src/a.ts"].dev.approved);
    assert!(!doc.approval_states.contains_key("src/b.ts"));
    assert_eq!(doc.unreadable_states["src/b.ts"], "garbage");
    assert_eq!(doc.extra["notes"][0], "kept");

    let codes = sink.codes();
    assert!(codes.contains(&"ledger.incomplete".to_string()));
    assert!(codes.contains(&"ledger.entry.unreadable".to_string()));

    // Rewritten document is complete; the original survives as a backup.
    let rewritten = fs::read_to_string(&path).unwrap();
    assert!(memory::classify(&rewritten).is_ok());
    let backups = fs::read_dir(path.parent().unwrap())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with("project-memory.json.incomplete.")
        })
        .count();
    assert_eq!(backups, 1);
}

#[test]
fn test_timestamps_and_ids() {
    let ts = time::epoch_seconds_z();
    assert!(ts.ends_with('Z'));
    assert!(ts.trim_end_matches('Z').parse::<u64>().is_ok());
    assert_ne!(time::event_id(), time::event_id());
}
