//! Carapace: a modification gate for AI agents
//!
//! **Carapace decides whether an agent may edit a file, before it edits it.**
//!
//! Source files carry an embedded `@ai-metadata` block declaring stability, edit permissions,
//! breaking-change risk and review requirements. Approvals live in a local JSON ledger. A
//! prioritized rule set combines the two into an allow/deny decision with reasons and warnings.
//!
//! # Core Principles
//!
//! - **Local-first**: All state lives under `<project>/.carapace/`
//! - **Fail-open**: Unreadable files and broken rules degrade to warnings, never to a crash
//! - **Self-healing ledger**: Corrupt or incomplete ledgers are backed up and repaired
//! - **Agent-first**: Every operation is reachable over line-delimited JSON RPC
//!
//! # Architecture
//!
//! - `MetadataExtractor`: parses and rewrites the embedded block
//! - `ApprovalStore`: per-file dev / code-review / QA approvals in `project-memory.json`
//! - `RuleEvaluator`: hard-coded checks plus conditional rules; priority > 8 blocks
//! - `ModificationGate`: the surface agents call (`check`, `actions`, `approve`, ...)
//!
//! Diagnostics flow through a `DiagnosticSink` into `tracing` and, unless
//! `journal = false`, `.carapace/gate.events.jsonl`.
//!
//! # Examples
//!
//! ```bash
//! # May I edit this file?
//! carapace check src/payments/ledger.ts
//!
//! # Record a dev approval
//! carapace approve src/payments/ledger.ts --slot dev --by bob@example.com
//!
//! # After editing: invalidate approvals, stamp last-modified
//! carapace actions src/payments/ledger.ts --apply
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: Store layout, config, ledger persistence, diagnostics, RPC
//! - [`plugins`]: Metadata, approvals, rules, condition language and the gate

pub mod core;
pub mod plugins;

mod cli;

use cli::{
    Cli, Command, GateCommand, LedgerCli, LedgerCommand, MetadataCli, MetadataCommand,
    OutputFormat, RulesCli, RulesCommand,
};
use crate::core::{error, output, rpc, store};
use crate::plugins::gate::ModificationGate;
use crate::plugins::metadata::MetadataPatch;

use clap::Parser;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Exit code when `check` denies the modification.
pub const EXIT_BLOCKED: u8 = 2;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // A second initialization (tests, embedding) is not an error.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn resolve_root(explicit: Option<PathBuf>) -> Result<PathBuf, error::CarapaceError> {
    if let Some(root) = explicit {
        return Ok(root);
    }
    let current_dir = std::env::current_dir()?;
    Ok(store::find_project_root(&current_dir).unwrap_or(current_dir))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), error::CarapaceError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn run() -> Result<ExitCode, error::CarapaceError> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Command::Version => {
            println!("v{}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
        Command::Gate(command) => {
            let root = resolve_root(cli.root)?;
            let mut gate = ModificationGate::open(&root)?;
            tracing::debug!(root = %root.display(), "gate opened");
            run_command(&mut gate, command)
        }
    }
}

fn run_command(gate: &mut ModificationGate, command: GateCommand) -> Result<ExitCode, error::CarapaceError> {
    match command {
        GateCommand::Check {
            path,
            method,
            format,
        } => {
            let decision = match method.as_deref() {
                Some(m) => gate.check_method_modification(&path, m),
                None => gate.check_before_modification(&path),
            };
            match format {
                OutputFormat::Json => print_json(&decision)?,
                OutputFormat::Text => println!("{}", output::render_decision(&path, &decision)),
            }
            if !decision.allowed {
                return Ok(ExitCode::from(EXIT_BLOCKED));
            }
        }
        GateCommand::Actions {
            path,
            apply,
            reason,
        } => {
            if apply {
                let remaining = gate.record_modification(&path, &reason)?;
                println!("Recorded modification of {}", path);
                println!("{}", output::render_actions(&remaining));
            } else {
                println!("{}", output::render_actions(&gate.get_modification_actions(&path)));
            }
        }
        GateCommand::Approve {
            path,
            slot,
            approver,
        } => {
            let status = gate.set_approval(&path, slot, &approver)?;
            println!("{}", output::render_status(&gate.approvals().key(&path), Some(&status)));
        }
        GateCommand::Status { path } => {
            let status = gate.get_approval_status(&path);
            println!("{}", output::render_status(&gate.approvals().key(&path), status.as_ref()));
        }
        GateCommand::Invalidate { path, reason } => {
            gate.invalidate_approvals(&path, &reason)?;
            println!("Approvals invalidated for {}", gate.approvals().key(&path));
        }
        GateCommand::Metadata(MetadataCli { command }) => run_metadata(gate, command)?,
        GateCommand::Rules(RulesCli {
            command: RulesCommand::List { format },
        }) => {
            let rules = gate.list_rules();
            match format {
                OutputFormat::Json => print_json(&rules)?,
                OutputFormat::Text => {
                    for rule in &rules {
                        println!("{}", output::render_rule(rule));
                    }
                }
            }
        }
        GateCommand::Ledger(LedgerCli {
            command: LedgerCommand::List { format },
        }) => {
            let entries = gate.approvals().list();
            match format {
                OutputFormat::Json => print_json(&entries)?,
                OutputFormat::Text if entries.is_empty() => println!("Ledger is empty."),
                OutputFormat::Text => {
                    for (path, status) in &entries {
                        println!("{}", output::render_status(path, Some(status)));
                    }
                }
            }
        }
        GateCommand::Rpc => {
            let stdin = io::stdin();
            let stdout = io::stdout();
            rpc::serve(gate, stdin.lock(), stdout.lock())?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_metadata(gate: &ModificationGate, command: MetadataCommand) -> Result<(), error::CarapaceError> {
    match command {
        MetadataCommand::Show { path } => print_json(&gate.extract_metadata(&path))?,
        MetadataCommand::Set {
            path,
            stability,
            edit_permissions,
            breaking_changes_risk,
            review_required,
            ai_context,
        } => {
            let patch = MetadataPatch {
                stability,
                edit_permissions,
                breaking_changes_risk,
                review_required,
                ai_context,
                ..MetadataPatch::default()
            };
            if patch.is_empty() {
                return Err(error::CarapaceError::ValidationError(
                    "no fields to update; pass at least one of --stability, --edit-permissions, --risk, --review-required, --context".to_string(),
                ));
            }
            gate.update_metadata(&path, &patch)?;
            println!(
                "Updated {} in {}",
                patch
                    .entries()
                    .iter()
                    .map(|(k, _)| *k)
                    .collect::<Vec<_>>()
                    .join(", "),
                Path::new(&path).display()
            );
        }
    }
    Ok(())
}
