//! Parsing model-issued tool calls into [`MemoryCommand`]s.
//!
//! A tool call is `{"name": "...", "params": {...}}`; a batch is a JSON array
//! of those.  `params` may be omitted for commands without arguments.  A call
//! that does not decode is kept as [`ToolCall::Invalid`] so one bad entry in
//! a batch does not sink the rest.

use chatmem_types::{ChatMemError, MemoryCommand};
use schemars::schema_for;
use serde_json::{Map, Value};

/// One entry of a parsed tool-call payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    Command(MemoryCommand),
    Invalid { name: String, reason: String },
}

impl From<MemoryCommand> for ToolCall {
    fn from(command: MemoryCommand) -> Self {
        ToolCall::Command(command)
    }
}

impl ToolCall {
    /// Wire name of the call, as given by the caller.
    pub fn name(&self) -> &str {
        match self {
            ToolCall::Command(command) => command.name(),
            ToolCall::Invalid { name, .. } => name,
        }
    }
}

/// Parse a single tool call object or an array of them.
///
/// # Errors
///
/// [`ChatMemError::InvalidCommand`] when `raw` is not JSON, or is JSON but
/// neither an object nor an array.
pub fn parse_tool_calls(raw: &str) -> Result<Vec<ToolCall>, ChatMemError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ChatMemError::InvalidCommand(format!("tool call is not valid JSON: {e}")))?;
    match value {
        Value::Array(items) => Ok(items.into_iter().map(parse_one).collect()),
        Value::Object(_) => Ok(vec![parse_one(value)]),
        _ => Err(ChatMemError::InvalidCommand(
            "expected a tool call object or an array of tool calls".to_string(),
        )),
    }
}

fn parse_one(mut value: Value) -> ToolCall {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
        .to_string();
    if let Value::Object(map) = &mut value {
        let params = map.entry("params").or_insert(Value::Null);
        if params.is_null() {
            *params = Value::Object(Map::new());
        }
    }
    match serde_json::from_value::<MemoryCommand>(value) {
        Ok(command) => ToolCall::Command(command),
        Err(e) => ToolCall::Invalid {
            name,
            reason: e.to_string(),
        },
    }
}

/// JSON schema of [`MemoryCommand`], for advertising the tool to a model.
pub fn tool_schema() -> Value {
    serde_json::to_value(schema_for!(MemoryCommand)).unwrap_or(Value::Null)
}
