//! CLI struct definitions for the Carapace command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use crate::plugins::approval::ApprovalSlot;
use crate::plugins::metadata::{EditPermission, RiskLevel, Stability};

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "carapace",
    version = env!("CARGO_PKG_VERSION"),
    about = "Carapace gates agent file edits on embedded metadata and a persisted approval ledger. 🦀",
    disable_version_flag = true
)]
pub(crate) struct Cli {
    /// Project root (defaults to the nearest ancestor containing `.carapace/`).
    #[clap(long, global = true)]
    pub root: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    #[clap(flatten)]
    Gate(GateCommand),
    /// Print version
    Version,
}

/// Commands that operate on an opened project.
#[derive(Subcommand, Debug)]
pub(crate) enum GateCommand {
    /// Decide whether a file may be modified
    Check {
        /// File path, relative to the project root
        path: String,
        /// Also check the permission of a single method
        #[clap(long)]
        method: Option<String>,
        #[clap(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// List follow-up actions after a modification
    Actions {
        path: String,
        /// Run the actions Carapace owns (invalidate approvals, stamp last-modified)
        #[clap(long)]
        apply: bool,
        #[clap(long, default_value = "file modified")]
        reason: String,
    },
    /// Record an approval for a file
    Approve {
        path: String,
        #[clap(long, value_enum)]
        slot: ApprovalSlot,
        /// Approver identity
        #[clap(long = "by")]
        approver: String,
    },
    /// Show the approval state of a file
    Status { path: String },
    /// Reset all approvals of a file
    Invalidate {
        path: String,
        #[clap(long, default_value = "file modified")]
        reason: String,
    },
    /// Read or edit the embedded metadata block
    Metadata(MetadataCli),
    /// Inspect the rule set
    Rules(RulesCli),
    /// Inspect the approval ledger
    Ledger(LedgerCli),
    /// Serve line-delimited JSON requests on stdin/stdout
    Rpc,
}

#[derive(clap::Args, Debug)]
pub(crate) struct MetadataCli {
    #[clap(subcommand)]
    pub command: MetadataCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum MetadataCommand {
    /// Print the parsed metadata block as JSON
    Show { path: String },
    /// Update fields in place; unspecified fields are left untouched
    Set {
        path: String,
        #[clap(long, value_enum)]
        stability: Option<Stability>,
        #[clap(long, value_enum)]
        edit_permissions: Option<EditPermission>,
        #[clap(long = "risk", value_enum)]
        breaking_changes_risk: Option<RiskLevel>,
        #[clap(long)]
        review_required: Option<bool>,
        #[clap(long = "context")]
        ai_context: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct RulesCli {
    #[clap(subcommand)]
    pub command: RulesCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum RulesCommand {
    /// List rules in evaluation order (priority, highest first)
    List {
        #[clap(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct LedgerCli {
    #[clap(subcommand)]
    pub command: LedgerCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum LedgerCommand {
    /// List every file with recorded approval state
    List {
        #[clap(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}
