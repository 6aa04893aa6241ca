//! Factory for parsing built-in commands from JSON.

use super::builtin_commands::*;
use super::command::{Command, CommandFactory};
use serde_json::Value as JsonValue;

/// Factory for all built-in commands.
pub struct BuiltInCommandFactory;

impl CommandFactory for BuiltInCommandFactory {
    fn create(&self, label: &str, args: &JsonValue) -> Result<Box<dyn Command>, String> {
        match label {
            "set" => parse_set(args),
            "get" => parse_get(args),
            "list" => Ok(Box::new(ListCommand)),
            "reset" => Ok(Box::new(ResetCommand)),
            "read_config" => parse_read_config(args),
            "write_config" => parse_write_config(args),
            "list_config" => parse_list_config(args),
            "reset_circuit_breaker" => parse_reset_circuit_breaker(args),
            "get_state" => Ok(Box::new(GetStateCommand)),
            "health" => Ok(Box::new(HealthCommand)),
            _ => Err(format!("unknown built-in command: {}", label)),
        }
    }
}

// =============================================================================
// Parsing helpers
// =============================================================================

fn parse_set(args: &JsonValue) -> Result<Box<dyn Command>, String> {
    let key = args
        .get("key")
        .and_then(|v| v.as_str())
        .ok_or("missing 'key' field")?
        .to_string();
    let value = args
        .get("value")
        .and_then(|v| v.as_str())
        .ok_or("missing 'value' field")?
        .to_string();
    Ok(Box::new(SetCommand { key, value }))
}

fn parse_get(args: &JsonValue) -> Result<Box<dyn Command>, String> {
    let key = args
        .get("key")
        .and_then(|v| v.as_str())
        .ok_or("missing 'key' field")?
        .to_string();
    Ok(Box::new(GetCommand { key }))
}

fn parse_read_config(args: &JsonValue) -> Result<Box<dyn Command>, String> {
    let path = args
        .get("path")
        .and_then(|v| v.as_str())
        .ok_or("missing 'path' field")?
        .to_string();
    Ok(Box::new(ReadConfigCommand { path }))
}

fn parse_write_config(args: &JsonValue) -> Result<Box<dyn Command>, String> {
    let path = args
        .get("path")
        .and_then(|v| v.as_str())
        .ok_or("missing 'path' field")?
        .to_string();
    let value = args
        .get("value")
        .and_then(|v| v.as_str())
        .ok_or("missing 'value' field")?
        .to_string();
    Ok(Box::new(WriteConfigCommand { path, value }))
}

fn parse_list_config(args: &JsonValue) -> Result<Box<dyn Command>, String> {
    let prefix = match args.get("prefix") {
        None | Some(JsonValue::Null) => None,
        Some(JsonValue::String(s)) => Some(s.clone()),
        Some(_) => return Err("'prefix' must be a string".into()),
    };
    Ok(Box::new(ListConfigCommand { prefix }))
}

fn parse_reset_circuit_breaker(args: &JsonValue) -> Result<Box<dyn Command>, String> {
    let id = args
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or("missing 'id' field")?
        .to_string();
    Ok(Box::new(ResetCircuitBreakerCommand { id }))
}
