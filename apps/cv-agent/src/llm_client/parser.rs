//! Response normalization. Every shape quirk of the Responses API (and its
//! predecessors) is confined to this file; callers get `ToolCallRequest`.

use serde_json::Value;

/// One tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    /// Raw argument payload: usually a JSON-encoded string, sometimes an
    /// already-decoded object, occasionally absent (`Null`).
    pub arguments: Value,
}

const CALL_BLOCK_TYPES: [&str; 3] = ["function_call", "tool_call", "custom_tool_call"];
const NESTED_CALL_TYPES: [&str; 2] = ["tool_call", "custom_tool_call"];

/// Collects tool calls from a response body.
///
/// Accepted shapes, in priority order:
/// 1. `output[]` blocks whose `type` is a call type (`function_call` et al.)
/// 2. call items nested inside an `output[].content[]` array
/// 3. a legacy flat `tool_calls[]` array, only if nothing else matched
pub fn extract_tool_calls(raw: &Value) -> Vec<ToolCallRequest> {
    let mut collected = Vec::new();

    if let Some(outputs) = raw.get("output").and_then(Value::as_array) {
        for block in outputs {
            let kind = block.get("type").and_then(Value::as_str).unwrap_or_default();
            if CALL_BLOCK_TYPES.contains(&kind) {
                if let Some(call) = call_from_block(block, &["arguments", "input"]) {
                    collected.push(call);
                }
                continue;
            }

            if let Some(content) = block.get("content").and_then(Value::as_array) {
                for item in content {
                    let kind = item.get("type").and_then(Value::as_str).unwrap_or_default();
                    if NESTED_CALL_TYPES.contains(&kind) {
                        if let Some(call) = call_from_block(item, &["input", "arguments"]) {
                            collected.push(call);
                        }
                    }
                }
            }
        }
    }

    if collected.is_empty() {
        if let Some(legacy) = raw.get("tool_calls").and_then(Value::as_array) {
            return legacy.iter().filter_map(legacy_call).collect();
        }
    }

    collected
}

fn call_from_block(block: &Value, argument_keys: &[&str]) -> Option<ToolCallRequest> {
    let name = block.get("name").and_then(Value::as_str)?;
    let call_id = block
        .get("call_id")
        .or_else(|| block.get("id"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let arguments = argument_keys
        .iter()
        .find_map(|key| block.get(*key).filter(|v| !v.is_null()))
        .cloned()
        .unwrap_or(Value::Null);

    Some(ToolCallRequest {
        call_id: call_id.to_string(),
        name: name.to_string(),
        arguments,
    })
}

/// Legacy chat-style calls put name/arguments either flat or under `function`.
fn legacy_call(call: &Value) -> Option<ToolCallRequest> {
    let function = call.get("function").unwrap_or(call);
    let name = function.get("name").and_then(Value::as_str)?;
    let call_id = call.get("id").and_then(Value::as_str).unwrap_or_default();
    let arguments = function.get("arguments").cloned().unwrap_or(Value::Null);

    Some(ToolCallRequest {
        call_id: call_id.to_string(),
        name: name.to_string(),
        arguments,
    })
}

/// Joins all assistant text in a response, trimmed, one block per line.
pub fn extract_text(raw: &Value) -> String {
    if let Some(texts) = raw.get("output_text") {
        let joined = match texts {
            Value::String(text) => text.trim().to_string(),
            Value::Array(items) => join_trimmed(items.iter().filter_map(Value::as_str)),
            _ => String::new(),
        };
        if !joined.is_empty() {
            return joined;
        }
    }

    let mut parts: Vec<&str> = Vec::new();
    if let Some(outputs) = raw.get("output").and_then(Value::as_array) {
        for block in outputs {
            if block.get("type").and_then(Value::as_str) == Some("message") {
                if let Some(content) = block.get("content").and_then(Value::as_array) {
                    parts.extend(content.iter().filter_map(|item| item.get("text")?.as_str()));
                }
            } else if let Some(text) = block.get("text").and_then(Value::as_str) {
                parts.push(text);
            }
        }
    }
    join_trimmed(parts.into_iter())
}

fn join_trimmed<'a>(texts: impl Iterator<Item = &'a str>) -> String {
    texts
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
