//! The literal JSONL command channel: one JSON object in, one out, per line.
//!
//! ```text
//! {"id":"...","cmd":"read_config|write_config|list_config","args":{...},"auth":"..."?}
//! {"id":"...","ok":true,"data":...}
//! {"id":"...","ok":false,"error":{"code":"...","message":"..."}}
//! ```
//!
//! This sits alongside the richer [`super::transport`]/[`super::router`]
//! machinery (which carries structured [`super::types::AuthPayload`] and an
//! open-ended command set) as the literal wire contract for the config
//! command channel: a bare string `auth` token and exactly three commands.

use super::handler::ConfigRegistry;
use super::path;
use super::router::AuditSink;
use super::types::{AuditRecord, CommandFailure};
use serde_json::{json, Value as JsonValue};

/// Pluggable authorization for the JSONL command channel.
///
/// Distinct from [`super::auth::AuthProvider`]: the wire envelope's `auth`
/// field is a bare optional string, not a structured
/// [`super::types::AuthPayload`].
pub trait CommandAuthorizer: Send + Sync {
    /// Authorize a request given its raw `auth` token, if any.
    fn authorize(&self, auth: Option<&str>) -> Result<(), CommandFailure>;
}

/// Grants every request. **Do not use in production.**
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllAuthorizer;

impl CommandAuthorizer for AllowAllAuthorizer {
    fn authorize(&self, _auth: Option<&str>) -> Result<(), CommandFailure> {
        Ok(())
    }
}

/// Denies unless `auth` is a non-blank member of a fixed token set.
#[derive(Debug, Clone, Default)]
pub struct TokenSetAuthorizer {
    tokens: std::collections::HashSet<String>,
}

impl TokenSetAuthorizer {
    /// Build from an iterator of accepted tokens. Blank tokens are never
    /// admitted even if present in the set.
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).filter(|t: &String| !t.trim().is_empty()).collect(),
        }
    }
}

impl CommandAuthorizer for TokenSetAuthorizer {
    fn authorize(&self, auth: Option<&str>) -> Result<(), CommandFailure> {
        match auth {
            Some(t) if !t.trim().is_empty() && self.tokens.contains(t) => Ok(()),
            _ => Err(CommandFailure::AuthDenied {
                msg: "token missing, blank, or unrecognized".into(),
            }),
        }
    }
}

/// Run one line of the JSONL command channel through parse -> authorize ->
/// validate -> execute, emitting an `attempt` audit record before work and a
/// `result` record after, and return the encoded output line (no trailing
/// newline).
pub async fn execute_command_line(
    registry: &dyn ConfigRegistry,
    authorizer: &dyn CommandAuthorizer,
    audit: &dyn AuditSink,
    line: &str,
) -> String {
    let value: JsonValue = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            let failure = CommandFailure::InvalidCommand { msg: format!("invalid JSON: {e}") };
            record(audit, "unknown", "unknown", "attempt").await;
            record(audit, "unknown", "unknown", &format!("result:error:{}", failure.code())).await;
            return error_line("unknown", &failure);
        }
    };

    let id = value.get("id").and_then(JsonValue::as_str).unwrap_or("unknown").to_string();
    let label = value.get("cmd").and_then(JsonValue::as_str).unwrap_or("unknown").to_string();

    if let Err(e) = audit.record(AuditRecord {
        id: id.clone(),
        label: label.clone(),
        principal: "unknown".into(),
        status: "attempt".into(),
    }).await
    {
        tracing::warn!(error = %e, "audit sink failed recording attempt");
        return error_line(&id, &CommandFailure::Internal { msg: "audit sink failed".into() });
    }
    tracing::info!(id = %id, cmd = %label, "command attempt");

    let outcome = dispatch(registry, authorizer, &value);
    let line_out = match &outcome {
        Ok(data) => ok_line(&id, data.clone()),
        Err(failure) => error_line(&id, failure),
    };

    let status = match &outcome {
        Ok(_) => "result:ok".to_string(),
        Err(e) => format!("result:error:{}", e.code()),
    };
    tracing::info!(id = %id, cmd = %label, status = %status, "command result");
    if let Err(e) = audit.record(AuditRecord { id, label, principal: "unknown".into(), status }).await {
        tracing::warn!(error = %e, "audit sink failed recording result");
    }

    line_out
}

async fn record(audit: &dyn AuditSink, id: &str, label: &str, status: &str) {
    let _ = audit
        .record(AuditRecord {
            id: id.into(),
            label: label.into(),
            principal: "unknown".into(),
            status: status.into(),
        })
        .await;
}

fn ok_line(id: &str, data: JsonValue) -> String {
    json!({ "id": id, "ok": true, "data": data }).to_string()
}

fn error_line(id: &str, failure: &CommandFailure) -> String {
    json!({
        "id": id,
        "ok": false,
        "error": { "code": failure.code(), "message": failure.to_string() },
    })
    .to_string()
}

const TOP_LEVEL_FIELDS: &[&str] = &["id", "cmd", "args", "auth"];
const COMMANDS: &[&str] = &["read_config", "write_config", "list_config"];

fn dispatch(
    registry: &dyn ConfigRegistry,
    authorizer: &dyn CommandAuthorizer,
    value: &JsonValue,
) -> Result<JsonValue, CommandFailure> {
    let auth = value.get("auth").and_then(JsonValue::as_str);
    authorizer.authorize(auth)?;

    let obj = value.as_object().ok_or_else(|| invalid("envelope must be a JSON object"))?;
    for key in obj.keys() {
        if !TOP_LEVEL_FIELDS.contains(&key.as_str()) {
            return Err(invalid(&format!("unknown field: {key}")));
        }
    }
    let cmd = obj
        .get("cmd")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| invalid("missing or non-string 'cmd'"))?;
    if !COMMANDS.contains(&cmd) {
        return Err(invalid(&format!("unknown cmd: {cmd}")));
    }
    let empty_args = json!({});
    let args = obj.get("args").unwrap_or(&empty_args);
    let args_obj = args.as_object().ok_or_else(|| invalid("'args' must be an object"))?;

    match cmd {
        "read_config" => {
            allow_only_args(args_obj, &["path"])?;
            let path = require_str(args_obj, "path")?;
            path::validate_path(&path, false)?;
            let snap = registry.read_snapshot(&path)?;
            Ok(json!({
                "path": snap.path,
                "value": snap.value,
                "formatted": snap.formatted,
                "version": snap.version,
                "updated_at": snap.updated_at,
            }))
        }
        "write_config" => {
            allow_only_args(args_obj, &["path", "value"])?;
            let path = require_str(args_obj, "path")?;
            let raw = require_str(args_obj, "value")?;
            path::validate_path(&path, false)?;
            let snap = registry.write_snapshot(&path, &raw)?;
            Ok(json!({
                "path": snap.path,
                "value": snap.value,
                "formatted": snap.formatted,
                "version": snap.version,
                "updated_at": snap.updated_at,
            }))
        }
        "list_config" => {
            allow_only_args(args_obj, &["prefix"])?;
            let prefix = optional_str(args_obj, "prefix")?;
            if let Some(p) = &prefix {
                let glob = p.contains('*');
                path::validate_path(p, glob)?;
            }
            Ok(json!(registry.keys_with_prefix(prefix.as_deref())))
        }
        _ => unreachable!("validated against COMMANDS above"),
    }
}

fn allow_only_args(
    args: &serde_json::Map<String, JsonValue>,
    allowed: &[&str],
) -> Result<(), CommandFailure> {
    for key in args.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(invalid(&format!("unknown arg: {key}")));
        }
    }
    Ok(())
}

fn require_str(
    args: &serde_json::Map<String, JsonValue>,
    field: &str,
) -> Result<String, CommandFailure> {
    match args.get(field).and_then(JsonValue::as_str) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(invalid(&format!("missing or empty '{field}'"))),
    }
}

fn optional_str(
    args: &serde_json::Map<String, JsonValue>,
    field: &str,
) -> Result<Option<String>, CommandFailure> {
    match args.get(field) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) if !s.is_empty() => Ok(Some(s.clone())),
        _ => Err(invalid(&format!("'{field}' must be a non-empty string"))),
    }
}

fn invalid(msg: &str) -> CommandFailure {
    CommandFailure::InvalidCommand { msg: msg.to_string() }
}
