//! Embedded metadata blocks.
//!
//! A file opts into governance by carrying one `@ai-metadata` block,
//! usually inside a doc comment:
//!
//! ```text
//! /**
//!  * @ai-metadata
//!  * @stability: stable
//!  * @edit-permissions: method-specific
//!  * @method-permissions: { 'generateReport': 'read-only' }
//!  * @breaking-changes-risk: high
//!  * @review-required: true
//!  * @tests: ["tests/billing.test.ts"]
//!  * @approvals:
//!  *   - dev-approved: true
//!  *   - dev-approved-by: "alice"
//!  */
//! ```
//!
//! Extraction is forgiving: a malformed field is dropped (and reported to
//! the diagnostic sink) while every other field still parses. Only a file
//! without a block yields no metadata at all.

use crate::core::journal::{Diagnostic, DiagnosticSink};
use crate::core::time;
use crate::plugins::approval::{ApprovalEntry, ApprovalSlot, ApprovalStatus};
use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

pub const MARKER: &str = "@ai-metadata";
const CLOSE: &str = "*/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Stability {
    Stable,
    Experimental,
    Deprecated,
}

impl Stability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stability::Stable => "stable",
            Stability::Experimental => "experimental",
            Stability::Deprecated => "deprecated",
        }
    }
}

impl FromStr for Stability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Ok(Stability::Stable),
            "experimental" => Ok(Stability::Experimental),
            "deprecated" => Ok(Stability::Deprecated),
            other => Err(format!("unknown stability '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EditPermission {
    Full,
    AddOnly,
    ReadOnly,
    MethodSpecific,
}

impl EditPermission {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditPermission::Full => "full",
            EditPermission::AddOnly => "add-only",
            EditPermission::ReadOnly => "read-only",
            EditPermission::MethodSpecific => "method-specific",
        }
    }
}

impl FromStr for EditPermission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(EditPermission::Full),
            "add-only" => Ok(EditPermission::AddOnly),
            "read-only" => Ok(EditPermission::ReadOnly),
            "method-specific" => Ok(EditPermission::MethodSpecific),
            other => Err(format!("unknown edit permission '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MethodPermission {
    ReadOnly,
    Allow,
    Restricted,
}

impl MethodPermission {
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodPermission::ReadOnly => "read-only",
            MethodPermission::Allow => "allow",
            MethodPermission::Restricted => "restricted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::High => "high",
            RiskLevel::Medium => "medium",
            RiskLevel::Low => "low",
        }
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(RiskLevel::High),
            "medium" => Ok(RiskLevel::Medium),
            "low" => Ok(RiskLevel::Low),
            other => Err(format!("unknown risk level '{}'", other)),
        }
    }
}

/// Structured view of a file's metadata block. Recomputed on every read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiMetadata {
    pub stability: Option<Stability>,
    pub edit_permissions: Option<EditPermission>,
    pub method_permissions: Option<BTreeMap<String, MethodPermission>>,
    pub breaking_changes_risk: Option<RiskLevel>,
    pub review_required: bool,
    pub ai_context: Option<String>,
    pub last_modified: Option<String>,
    pub dependencies: Option<Vec<String>>,
    pub tests: Option<Vec<String>>,
    pub approvals: Option<ApprovalStatus>,
}

impl AiMetadata {
    pub fn is_read_only(&self) -> bool {
        self.edit_permissions == Some(EditPermission::ReadOnly)
    }

    pub fn is_high_risk(&self) -> bool {
        self.breaking_changes_risk == Some(RiskLevel::High)
    }

    pub fn is_deprecated(&self) -> bool {
        self.stability == Some(Stability::Deprecated)
    }

    pub fn has_tests(&self) -> bool {
        self.tests.as_ref().is_some_and(|t| !t.is_empty())
    }
}

pub mod keys {
    pub const STABILITY: &str = "stability";
    pub const EDIT_PERMISSIONS: &str = "edit-permissions";
    pub const METHOD_PERMISSIONS: &str = "method-permissions";
    pub const BREAKING_CHANGES_RISK: &str = "breaking-changes-risk";
    pub const REVIEW_REQUIRED: &str = "review-required";
    pub const AI_CONTEXT: &str = "ai-context";
    pub const LAST_MODIFIED: &str = "last-modified";
    pub const DEPENDENCIES: &str = "dependencies";
    pub const TESTS: &str = "tests";
}

fn approval_keys(slot: ApprovalSlot) -> [String; 3] {
    let p = slot.block_prefix();
    [
        format!("{}-approved", p),
        format!("{}-approved-by", p),
        format!("{}-approved-date", p),
    ]
}

/// Leader accepted on field lines of `/* ... */` blocks.
const STAR_LEADER: &str = r"(?:(?:\*|//|#|--)[^\S\n]*)?";

fn build_field_regex(leader: &str, key: &str) -> Regex {
    // Comment leader, optional list dash, optional `@`, then `key:`.
    let pattern = format!(
        r"(?m)^[^\S\n]*{}[^\S\n]*(?:-[^\S\n]*)?@?{}[^\S\n]*:[^\S\n]*(?P<value>[^\n]*)$",
        leader,
        regex::escape(key)
    );
    Regex::new(&pattern).unwrap()
}

static FIELD_PATTERNS: LazyLock<HashMap<String, Regex>> = LazyLock::new(|| {
    let mut keys: Vec<String> = [
        keys::STABILITY,
        keys::EDIT_PERMISSIONS,
        keys::METHOD_PERMISSIONS,
        keys::BREAKING_CHANGES_RISK,
        keys::REVIEW_REQUIRED,
        keys::AI_CONTEXT,
        keys::LAST_MODIFIED,
        keys::DEPENDENCIES,
        keys::TESTS,
    ]
    .iter()
    .map(|k| k.to_string())
    .collect();
    for slot in ApprovalSlot::ALL {
        keys.extend(approval_keys(slot));
    }
    keys.into_iter()
        .map(|k| {
            let re = build_field_regex(STAR_LEADER, &k);
            (k, re)
        })
        .collect()
});

static LIST_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\[([^\]\n]*)\]").unwrap());

fn field_pattern(block: &Block, key: &str) -> Regex {
    if let Some(leader) = &block.line_leader {
        return build_field_regex(&regex::escape(leader), key);
    }
    match FIELD_PATTERNS.get(key) {
        Some(re) => re.clone(),
        None => build_field_regex(STAR_LEADER, key),
    }
}

/// Location of the metadata block inside a file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Block {
    /// Byte offset of the start of the marker line.
    start: usize,
    /// Exclusive end of the block body (the closing delimiter, if any).
    end: usize,
    /// Byte offset of the closing `*/`, when the block has one.
    close: Option<usize>,
    /// Leader for field lines inserted into this block.
    field_prefix: String,
    /// Comment token every line of a line-comment block starts with.
    line_leader: Option<String>,
}

fn locate_block(text: &str) -> Option<Block> {
    let marker = text.find(MARKER)?;
    let start = text[..marker].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let raw_prefix = &text[start..marker];
    let trimmed = raw_prefix.trim();
    let after_marker = marker + MARKER.len();

    let star_style = trimmed.is_empty() || trimmed.starts_with("/*") || trimmed.starts_with('*');
    if star_style {
        let field_prefix = if trimmed.starts_with("/*") {
            " * ".to_string()
        } else {
            raw_prefix.to_string()
        };
        return Some(match text[after_marker..].find(CLOSE) {
            Some(rel) => Block {
                start,
                end: after_marker + rel,
                close: Some(after_marker + rel),
                field_prefix,
                line_leader: None,
            },
            None => Block {
                start,
                end: text.len(),
                close: None,
                field_prefix,
                line_leader: None,
            },
        });
    }

    // Line comments: the block runs while lines keep the marker's leader.
    let mut end = text[after_marker..]
        .find('\n')
        .map(|i| after_marker + i)
        .unwrap_or(text.len());
    while end < text.len() {
        let next_start = end + 1;
        let next_end = text[next_start..]
            .find('\n')
            .map(|i| next_start + i)
            .unwrap_or(text.len());
        if !text[next_start..next_end].trim_start().starts_with(trimmed) {
            break;
        }
        end = next_end;
    }
    Some(Block {
        start,
        end,
        close: None,
        field_prefix: raw_prefix.to_string(),
        line_leader: Some(trimmed.to_string()),
    })
}

/// Raw value of the first `key` line inside the block: absolute byte range
/// plus the trimmed text (quotes intact, trailing `*/` removed).
fn find_field<'a>(text: &'a str, block: &Block, key: &str) -> Option<(Range<usize>, &'a str)> {
    let body = &text[block.start..block.end];
    let caps = field_pattern(block, key).captures(body)?;
    let m = caps.name("value")?;
    let mut raw = m.as_str();
    let lead = raw.len() - raw.trim_start().len();
    raw = raw.trim();
    if let Some(stripped) = raw.strip_suffix(CLOSE) {
        raw = stripped.trim_end();
    }
    let begin = block.start + m.start() + lead;
    Some((begin..begin + raw.len(), raw))
}

fn unquote(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
        .to_string()
}

fn parse_list(raw: &str) -> Option<Vec<String>> {
    let caps = LIST_PATTERN.captures(raw)?;
    let inner = caps.get(1)?.as_str();
    Some(
        inner
            .split(',')
            .map(unquote)
            .filter(|item| !item.is_empty())
            .collect(),
    )
}

fn parse_method_permissions(raw: &str) -> Result<BTreeMap<String, MethodPermission>, String> {
    if !(raw.starts_with('{') && raw.ends_with('}')) {
        return Err("expected a single-line {...} object".to_string());
    }
    let json = raw.replace('\'', "\"");
    serde_json::from_str(&json).map_err(|e| e.to_string())
}

pub struct MetadataExtractor {
    diag: Arc<dyn DiagnosticSink>,
}

impl MetadataExtractor {
    pub fn new(diag: Arc<dyn DiagnosticSink>) -> Self {
        Self { diag }
    }

    pub fn extract(&self, text: &str) -> Option<AiMetadata> {
        self.extract_for(text, None)
    }

    /// Extract the first block in `text`; `subject` names the file in diagnostics.
    pub fn extract_for(&self, text: &str, subject: Option<&str>) -> Option<AiMetadata> {
        let block = locate_block(text)?;
        let scalar = |key: &str| find_field(text, &block, key).map(|(_, raw)| unquote(raw));

        let mut meta = AiMetadata {
            stability: self.parse_enum(scalar(keys::STABILITY), keys::STABILITY, subject),
            edit_permissions: self.parse_enum(
                scalar(keys::EDIT_PERMISSIONS),
                keys::EDIT_PERMISSIONS,
                subject,
            ),
            breaking_changes_risk: self.parse_enum(
                scalar(keys::BREAKING_CHANGES_RISK),
                keys::BREAKING_CHANGES_RISK,
                subject,
            ),
            review_required: scalar(keys::REVIEW_REQUIRED).as_deref() == Some("true"),
            ai_context: scalar(keys::AI_CONTEXT),
            last_modified: scalar(keys::LAST_MODIFIED),
            dependencies: find_field(text, &block, keys::DEPENDENCIES)
                .and_then(|(_, raw)| parse_list(raw)),
            tests: find_field(text, &block, keys::TESTS).and_then(|(_, raw)| parse_list(raw)),
            ..AiMetadata::default()
        };

        if let Some((_, raw)) = find_field(text, &block, keys::METHOD_PERMISSIONS) {
            match parse_method_permissions(raw) {
                Ok(map) => meta.method_permissions = Some(map),
                Err(e) => self.diag.record(Diagnostic::warn(
                    "metadata.method_permissions.malformed",
                    subject,
                    format!("ignoring {} value {:?}: {}", keys::METHOD_PERMISSIONS, raw, e),
                )),
            }
        }

        let mut approvals = ApprovalStatus::default();
        let mut found = false;
        for slot in ApprovalSlot::ALL {
            let [approved, by, date] = approval_keys(slot);
            let entry: &mut ApprovalEntry = approvals.slot_mut(slot);
            if let Some(v) = scalar(&approved) {
                entry.approved = v == "true";
                found = true;
            }
            if let Some(v) = scalar(&by) {
                entry.approved_by = Some(v);
                found = true;
            }
            if let Some(v) = scalar(&date) {
                entry.approved_date = Some(v);
                found = true;
            }
        }
        if found {
            meta.approvals = Some(approvals);
        }

        Some(meta)
    }

    fn parse_enum<T>(&self, value: Option<String>, key: &str, subject: Option<&str>) -> Option<T>
    where
        T: FromStr<Err = String>,
    {
        match value?.parse::<T>() {
            Ok(v) => Some(v),
            Err(e) => {
                self.diag.record(Diagnostic::warn(
                    "metadata.field.invalid",
                    subject,
                    format!("ignoring {}: {}", key, e),
                ));
                None
            }
        }
    }
}

/// Field updates for [`apply_updates`]. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct MetadataPatch {
    pub stability: Option<Stability>,
    pub edit_permissions: Option<EditPermission>,
    pub method_permissions: Option<BTreeMap<String, MethodPermission>>,
    pub breaking_changes_risk: Option<RiskLevel>,
    pub review_required: Option<bool>,
    pub ai_context: Option<String>,
    pub dependencies: Option<Vec<String>>,
    pub tests: Option<Vec<String>>,
}

fn render_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|i| format!("\"{}\"", i)).collect();
    format!("[{}]", quoted.join(", "))
}

fn render_method_permissions(map: &BTreeMap<String, MethodPermission>) -> String {
    if map.is_empty() {
        return "{}".to_string();
    }
    let pairs: Vec<String> = map
        .iter()
        .map(|(method, perm)| format!("\"{}\": \"{}\"", method, perm.as_str()))
        .collect();
    format!("{{ {} }}", pairs.join(", "))
}

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Block key and rendered value for every set field, in block order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if let Some(v) = self.stability {
            out.push((keys::STABILITY, v.as_str().to_string()));
        }
        if let Some(v) = self.edit_permissions {
            out.push((keys::EDIT_PERMISSIONS, v.as_str().to_string()));
        }
        if let Some(v) = &self.method_permissions {
            out.push((keys::METHOD_PERMISSIONS, render_method_permissions(v)));
        }
        if let Some(v) = self.breaking_changes_risk {
            out.push((keys::BREAKING_CHANGES_RISK, v.as_str().to_string()));
        }
        if let Some(v) = self.review_required {
            out.push((keys::REVIEW_REQUIRED, v.to_string()));
        }
        if let Some(v) = &self.ai_context {
            let flat = v.replace(['\n', '\r'], " ").replace('"', "'");
            out.push((keys::AI_CONTEXT, format!("\"{}\"", flat)));
        }
        if let Some(v) = &self.dependencies {
            out.push((keys::DEPENDENCIES, render_list(v)));
        }
        if let Some(v) = &self.tests {
            out.push((keys::TESTS, render_list(v)));
        }
        out
    }
}

fn set_field(text: &str, key: &str, value: &str) -> String {
    let Some(block) = locate_block(text) else {
        return text.to_string();
    };
    let mut out = String::with_capacity(text.len() + value.len() + key.len() + 8);

    if let Some((range, _)) = find_field(text, &block, key) {
        out.push_str(&text[..range.start]);
        out.push_str(value);
        out.push_str(&text[range.end..]);
        return out;
    }

    let line = format!("{}@{}: {}", block.field_prefix, key, value);
    match block.close {
        Some(close) => {
            let close_line_start = text[..close].rfind('\n').map(|i| i + 1).unwrap_or(0);
            if close_line_start > block.start && text[close_line_start..close].trim().is_empty() {
                out.push_str(&text[..close_line_start]);
                out.push_str(&line);
                out.push('\n');
                out.push_str(&text[close_line_start..]);
            } else {
                out.push_str(text[..close].trim_end_matches([' ', '\t']));
                out.push('\n');
                out.push_str(&line);
                out.push('\n');
                out.push_str(&text[close..]);
            }
        }
        None => {
            out.push_str(&text[..block.end]);
            out.push('\n');
            out.push_str(&line);
            out.push_str(&text[block.end..]);
        }
    }
    out
}

fn synthesize_block(entries: &[(&'static str, String)], content: &str) -> String {
    let mut out = String::from("/**\n * ");
    out.push_str(MARKER);
    out.push('\n');
    for (key, value) in entries {
        out.push_str(&format!(" * @{}: {}\n", key, value));
    }
    out.push_str(" */\n");
    if !content.is_empty() {
        out.push('\n');
        out.push_str(content);
    }
    out
}

/// Apply `patch` to the metadata block in `text`, creating a block when
/// there is none. Any non-empty patch also stamps `last-modified`.
pub fn apply_updates(text: &str, patch: &MetadataPatch) -> String {
    apply_updates_at(text, patch, &time::epoch_seconds_z())
}

pub fn apply_updates_at(text: &str, patch: &MetadataPatch, timestamp: &str) -> String {
    let mut entries = patch.entries();
    if entries.is_empty() {
        return text.to_string();
    }
    entries.push((keys::LAST_MODIFIED, timestamp.to_string()));

    if locate_block(text).is_none() {
        return synthesize_block(&entries, text);
    }
    entries
        .iter()
        .fold(text.to_string(), |acc, (key, value)| set_field(&acc, key, value))
}

/// Stamp `last-modified` only; no-op for files without a block.
pub fn touch_last_modified(text: &str, timestamp: &str) -> Option<String> {
    locate_block(text)?;
    Some(set_field(text, keys::LAST_MODIFIED, timestamp))
}
