//! Terminal rendering for CLI surfaces.
//!
//! Keeps gate output bounded and readable while preserving signal.

use crate::plugins::approval::{ApprovalSlot, ApprovalStatus};
use crate::plugins::rules::{Decision, ModificationAction, Rule};
use colored::Colorize;

/// Messages and conditions come from metadata blocks and config files and may
/// span lines; a listing row shows them on one line, cut after `width` chars
/// with a trailing `…`.
pub fn one_line(text: &str, width: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    for word in text.split_whitespace() {
        let sep = usize::from(used > 0);
        let len = word.chars().count();
        if used + sep + len > width {
            let room = width.saturating_sub(used + sep);
            if sep == 1 && room > 0 {
                out.push(' ');
            }
            out.extend(word.chars().take(room));
            out.push('…');
            return out;
        }
        if sep == 1 {
            out.push(' ');
        }
        out.push_str(word);
        used += sep + len;
    }
    out
}

pub fn render_decision(path: &str, decision: &Decision) -> String {
    let verdict = if decision.allowed {
        "ALLOWED".green().bold()
    } else {
        "BLOCKED".red().bold()
    };
    let mut lines = vec![format!("{} {}", verdict, path)];
    for reason in &decision.reasons {
        lines.push(format!("  {} {}", "✗".red(), one_line(reason, 120)));
    }
    for warning in &decision.warnings {
        lines.push(format!("  {} {}", "!".yellow(), one_line(warning, 120)));
    }
    lines.join("\n")
}

pub fn render_actions(actions: &[ModificationAction]) -> String {
    if actions.is_empty() {
        return "No follow-up actions.".to_string();
    }
    actions
        .iter()
        .map(|a| format!("- {}", a.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_status(path: &str, status: Option<&ApprovalStatus>) -> String {
    let Some(status) = status else {
        return format!("{}: no approvals recorded", path);
    };
    let mut lines = vec![path.to_string()];
    for slot in ApprovalSlot::ALL {
        let entry = status.slot(slot);
        let mark = if entry.approved {
            "approved".green()
        } else {
            "pending".dimmed()
        };
        let by = match (&entry.approved_by, &entry.approved_date) {
            (Some(by), Some(at)) => format!(" by {} at {}", by, at),
            (Some(by), None) => format!(" by {}", by),
            _ => String::new(),
        };
        lines.push(format!("  {:<11} {}{}", slot.block_prefix(), mark, by));
    }
    if let Some(inv) = &status.last_invalidation {
        lines.push(format!(
            "  last invalidated at {}: {}",
            inv.at,
            one_line(&inv.reason, 80)
        ));
    }
    lines.join("\n")
}

pub fn render_rule(rule: &Rule) -> String {
    let state = if rule.enabled {
        "on ".green()
    } else {
        "off".dimmed()
    };
    let kind = if rule.is_blocking() { "block" } else { "warn " };
    format!(
        "{} p{:<3} {} {:<28} {}",
        state,
        rule.priority,
        kind,
        rule.id,
        one_line(&rule.condition, 60)
    )
}
