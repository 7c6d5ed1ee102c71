//! Carapace RPC Interface
//!
//! Agents talk to the gate with line-delimited JSON over stdin/stdout. Each
//! request line yields exactly one response line; rule administration calls
//! affect the gate for the rest of the session.
//!
//! # Standard Response Envelope
//!
//! - `receipt`: op, timestamp, input/output hashes, touched paths
//! - `result`: op-specific payload
//! - `error`: `{code, message}` when `success` is false

use crate::core::error::CarapaceError;
use crate::core::time;
use crate::plugins::approval::ApprovalSlot;
use crate::plugins::gate::ModificationGate;
use crate::plugins::metadata::MetadataPatch;
use crate::plugins::rules::Rule;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::io::{BufRead, Write};

/// Standard RPC request envelope
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcRequest {
    /// Operation to perform
    pub op: String,
    /// Operation parameters
    #[serde(default)]
    pub params: JsonValue,
    /// Request ID for correlation
    #[serde(default = "default_request_id")]
    pub id: String,
}

pub fn default_request_id() -> String {
    time::event_id()
}

/// Standard RPC response envelope
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcResponse {
    pub id: String,
    pub success: bool,
    pub receipt: Receipt,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Receipt documenting what happened
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Receipt {
    pub op: String,
    pub timestamp: String,
    /// SHA-256 of the canonical request params
    pub inputs_hash: String,
    /// SHA-256 of the canonical result
    pub outputs_hash: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub touched_paths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

impl RpcError {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<CarapaceError> for RpcError {
    fn from(e: CarapaceError) -> Self {
        let code = match &e {
            CarapaceError::IoError(_) => "io_error",
            CarapaceError::JsonError(_) => "json_error",
            CarapaceError::ConfigError(_) => "config_error",
            CarapaceError::ValidationError(_) => "validation_error",
            CarapaceError::NotFound(_) => "not_found",
        };
        RpcError::new(code, e.to_string())
    }
}

pub fn canonical_hash(value: &JsonValue) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}

/// Operations understood by [`handle`].
pub const OPS: &[&str] = &[
    "check_before_modification",
    "check_method_modification",
    "get_modification_actions",
    "record_modification",
    "set_approval",
    "get_approval_status",
    "invalidate_approvals",
    "extract_metadata",
    "update_metadata",
    "add_rule",
    "remove_rule",
    "enable_rule",
    "disable_rule",
    "list_rules",
];

#[derive(Deserialize)]
struct PathParams {
    path: String,
}

#[derive(Deserialize)]
struct MethodParams {
    path: String,
    method: String,
}

#[derive(Deserialize)]
struct ApprovalParams {
    path: String,
    slot: String,
    approver: String,
}

fn default_reason() -> String {
    "file modified".to_string()
}

#[derive(Deserialize)]
struct ReasonParams {
    path: String,
    #[serde(default = "default_reason")]
    reason: String,
}

#[derive(Deserialize)]
struct UpdateParams {
    path: String,
    updates: MetadataPatch,
}

#[derive(Deserialize)]
struct IdParams {
    id: String,
}

fn params<T: DeserializeOwned>(raw: &JsonValue) -> Result<T, RpcError> {
    serde_json::from_value(raw.clone()).map_err(|e| RpcError::new("invalid_params", e.to_string()))
}

fn to_json<T: Serialize>(value: &T) -> Result<JsonValue, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::new("json_error", e.to_string()))
}

fn dispatch(
    gate: &mut ModificationGate,
    op: &str,
    raw: &JsonValue,
) -> Result<(JsonValue, Vec<String>), RpcError> {
    match op {
        "check_before_modification" => {
            let p: PathParams = params(raw)?;
            Ok((to_json(&gate.check_before_modification(&p.path))?, vec![]))
        }
        "check_method_modification" => {
            let p: MethodParams = params(raw)?;
            let decision = gate.check_method_modification(&p.path, &p.method);
            Ok((to_json(&decision)?, vec![]))
        }
        "get_modification_actions" => {
            let p: PathParams = params(raw)?;
            Ok((to_json(&gate.get_modification_actions(&p.path))?, vec![]))
        }
        "record_modification" => {
            let p: ReasonParams = params(raw)?;
            let remaining = gate.record_modification(&p.path, &p.reason)?;
            let touched = vec![
                p.path.clone(),
                gate.approvals().memory().path().display().to_string(),
            ];
            Ok((serde_json::json!({ "remaining_actions": remaining }), touched))
        }
        "set_approval" => {
            let p: ApprovalParams = params(raw)?;
            let slot: ApprovalSlot = p
                .slot
                .parse()
                .map_err(|e: CarapaceError| RpcError::new("invalid_params", e.to_string()))?;
            let status = gate.set_approval(&p.path, slot, &p.approver)?;
            let touched = vec![gate.approvals().memory().path().display().to_string()];
            Ok((to_json(&status)?, touched))
        }
        "get_approval_status" => {
            let p: PathParams = params(raw)?;
            Ok((to_json(&gate.get_approval_status(&p.path))?, vec![]))
        }
        "invalidate_approvals" => {
            let p: ReasonParams = params(raw)?;
            gate.invalidate_approvals(&p.path, &p.reason)?;
            let touched = vec![gate.approvals().memory().path().display().to_string()];
            Ok((JsonValue::Null, touched))
        }
        "extract_metadata" => {
            let p: PathParams = params(raw)?;
            Ok((to_json(&gate.extract_metadata(&p.path))?, vec![]))
        }
        "update_metadata" => {
            let p: UpdateParams = params(raw)?;
            gate.update_metadata(&p.path, &p.updates)?;
            Ok((JsonValue::Null, vec![p.path]))
        }
        "add_rule" => {
            let rule: Rule = params(raw)?;
            gate.add_rule(rule)?;
            Ok((JsonValue::Null, vec![]))
        }
        "remove_rule" => {
            let p: IdParams = params(raw)?;
            let removed = gate.remove_rule(&p.id);
            Ok((serde_json::json!({ "removed": removed.is_some() }), vec![]))
        }
        "enable_rule" => {
            let p: IdParams = params(raw)?;
            Ok((serde_json::json!({ "found": gate.enable_rule(&p.id) }), vec![]))
        }
        "disable_rule" => {
            let p: IdParams = params(raw)?;
            Ok((serde_json::json!({ "found": gate.disable_rule(&p.id) }), vec![]))
        }
        "list_rules" => Ok((to_json(&gate.list_rules())?, vec![])),
        other => Err(RpcError::new(
            "unknown_op",
            format!("unknown op '{}'; expected one of {}", other, OPS.join(", ")),
        )),
    }
}

pub fn handle(gate: &mut ModificationGate, req: RpcRequest) -> RpcResponse {
    let inputs_hash = canonical_hash(&req.params);
    let outcome = dispatch(gate, &req.op, &req.params);
    let (success, result, error, touched_paths) = match outcome {
        Ok((value, touched)) => (true, Some(value), None, touched),
        Err(e) => (false, None, Some(e), vec![]),
    };
    let outputs_hash = canonical_hash(result.as_ref().unwrap_or(&JsonValue::Null));
    RpcResponse {
        id: req.id,
        success,
        receipt: Receipt {
            op: req.op,
            timestamp: time::epoch_seconds_z(),
            inputs_hash,
            outputs_hash,
            touched_paths,
        },
        result,
        error,
    }
}

fn invalid_request(message: String) -> RpcResponse {
    RpcResponse {
        id: String::new(),
        success: false,
        receipt: Receipt {
            op: String::new(),
            timestamp: time::epoch_seconds_z(),
            inputs_hash: canonical_hash(&JsonValue::Null),
            outputs_hash: canonical_hash(&JsonValue::Null),
            touched_paths: vec![],
        },
        result: None,
        error: Some(RpcError::new("invalid_request", message)),
    }
}

/// Serve requests until `input` is exhausted.
pub fn serve<R: BufRead, W: Write>(
    gate: &mut ModificationGate,
    input: R,
    mut output: W,
) -> Result<(), CarapaceError> {
    for line in input.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<RpcRequest>(line) {
            Ok(req) => handle(gate, req),
            Err(e) => invalid_request(e.to_string()),
        };
        writeln!(output, "{}", serde_json::to_string(&response)?)?;
        output.flush()?;
    }
    Ok(())
}
