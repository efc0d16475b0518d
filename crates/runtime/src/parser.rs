//! Tool-call extraction from generated text.
//!
//! Parsing is a pure function of the raw text and the format negotiated when
//! the prompt was rendered. Malformed call syntax never fails: the turn
//! degrades to plain text carrying the raw input unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::message::ToolCall;

const HERMES_OPEN: &str = "<tool_call>";
const HERMES_CLOSE: &str = "</tool_call>";
const PYTHON_TAG: &str = "<|python_tag|>";

/// How tool calls are encoded in a generated turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatFormat {
    /// No tools were offered; the whole turn is content.
    ContentOnly,
    /// `<tool_call>{"name": .., "arguments": {..}}</tool_call>` blocks.
    Hermes,
    /// One JSON object (or array of objects) as the whole turn.
    Llama3Json,
}

impl ChatFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatFormat::ContentOnly => "content-only",
            ChatFormat::Hermes => "hermes",
            ChatFormat::Llama3Json => "llama3-json",
        }
    }
}

/// A parsed assistant turn.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Turn {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl Turn {
    fn plain(raw: &str) -> Self {
        Self {
            content: raw.to_string(),
            tool_calls: Vec::new(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Split a raw turn into free text and tool calls.
pub fn parse_turn(raw: &str, format: ChatFormat) -> Turn {
    let parsed = match format {
        ChatFormat::ContentOnly => None,
        ChatFormat::Hermes => parse_hermes(raw),
        ChatFormat::Llama3Json => parse_llama3(raw),
    };

    match parsed {
        Some((content, calls)) if !calls.is_empty() => Turn {
            content,
            tool_calls: calls
                .into_iter()
                .enumerate()
                .map(|(index, call)| call.into_tool_call(format, raw, index))
                .collect(),
        },
        _ => Turn::plain(raw),
    }
}

/// A call before its id is settled.
struct RawCall {
    id: Option<String>,
    name: String,
    arguments: Value,
}

impl RawCall {
    fn into_tool_call(self, format: ChatFormat, raw: &str, index: usize) -> ToolCall {
        let id = self
            .id
            .unwrap_or_else(|| derive_call_id(format, raw, index));
        ToolCall::new(id, self.name, self.arguments)
    }
}

/// `call_` followed by 12 hex digits of SHA-256 over the turn and position.
fn derive_call_id(format: ChatFormat, raw: &str, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(raw.as_bytes());
    hasher.update([0]);
    hasher.update(index.to_le_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
    format!("call_{hex}")
}

/// `None` means degraded, `Some` with no calls means plain text.
fn parse_hermes(raw: &str) -> Option<(String, Vec<RawCall>)> {
    let mut content = String::new();
    let mut calls = Vec::new();
    let mut rest = raw;

    while let Some(start) = rest.find(HERMES_OPEN) {
        content.push_str(&rest[..start]);
        let after_open = &rest[start + HERMES_OPEN.len()..];
        let Some(end) = after_open.find(HERMES_CLOSE) else {
            debug!("unterminated tool_call block");
            return None;
        };
        let block = after_open[..end].trim();
        calls.push(parse_call_object(serde_json::from_str(block).ok()?, "arguments")?);
        rest = &after_open[end + HERMES_CLOSE.len()..];
    }
    content.push_str(rest);

    Some((content.trim().to_string(), calls))
}

fn parse_llama3(raw: &str) -> Option<(String, Vec<RawCall>)> {
    let trimmed = raw.trim();
    let body = trimmed.strip_prefix(PYTHON_TAG).unwrap_or(trimmed).trim();
    if !(body.starts_with('{') || body.starts_with('[')) {
        return Some((raw.to_string(), Vec::new()));
    }

    let calls = match serde_json::from_str(body).ok()? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| parse_call_object(item, "parameters"))
            .collect::<Option<Vec<_>>>()?,
        object @ Value::Object(_) => vec![parse_call_object(object, "parameters")?],
        _ => return None,
    };
    Some((String::new(), calls))
}

/// Read `{"name", <args_key> | "arguments", "id"?}`.
fn parse_call_object(value: Value, args_key: &str) -> Option<RawCall> {
    let Value::Object(mut object) = value else {
        return None;
    };

    let name = match object.remove("name")? {
        Value::String(name) if !name.trim().is_empty() => name,
        _ => return None,
    };

    let arguments = object
        .remove(args_key)
        .or_else(|| object.remove("arguments"))
        .unwrap_or_else(|| Value::Object(Map::new()));
    let arguments = match arguments {
        Value::String(encoded) => serde_json::from_str(&encoded).ok()?,
        other => other,
    };

    let id = match object.remove("id") {
        Some(Value::String(id)) if !id.is_empty() => Some(id),
        _ => None,
    };

    Some(RawCall {
        id,
        name,
        arguments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hermes_single_call() {
        let raw = "Let me check.\n<tool_call>\n{\"name\": \"shell_command\", \"arguments\": {\"command\": \"ls\"}}\n</tool_call>";
        let turn = parse_turn(raw, ChatFormat::Hermes);
        assert_eq!(turn.content, "Let me check.");
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].name, "shell_command");
        assert_eq!(turn.tool_calls[0].arguments, json!({"command": "ls"}));
        assert!(turn.tool_calls[0].id.starts_with("call_"));
        assert_eq!(turn.tool_calls[0].id.len(), "call_".len() + 12);
    }

    #[test]
    fn hermes_multiple_calls_get_distinct_ids() {
        let raw = r#"<tool_call>{"name":"calculator","arguments":{"expression":"1 + 1"}}</tool_call>
<tool_call>{"name":"calculator","arguments":{"expression":"1 + 1"}}</tool_call>"#;
        let turn = parse_turn(raw, ChatFormat::Hermes);
        assert_eq!(turn.tool_calls.len(), 2);
        assert_ne!(turn.tool_calls[0].id, turn.tool_calls[1].id);
        assert_eq!(turn.content, "");
    }

    #[test]
    fn parsing_is_deterministic() {
        let raw = r#"<tool_call>{"name":"calculator","arguments":{}}</tool_call>"#;
        assert_eq!(
            parse_turn(raw, ChatFormat::Hermes),
            parse_turn(raw, ChatFormat::Hermes)
        );
    }

    #[test]
    fn model_supplied_id_is_kept() {
        let raw = r#"<tool_call>{"id":"abc","name":"calculator","arguments":"{\"expression\":\"2 * 3\"}"}</tool_call>"#;
        let turn = parse_turn(raw, ChatFormat::Hermes);
        assert_eq!(turn.tool_calls[0].id, "abc");
        assert_eq!(turn.tool_calls[0].arguments, json!({"expression": "2 * 3"}));
    }

    #[test]
    fn malformed_blocks_degrade_the_whole_turn() {
        let cases = [
            "<tool_call>{\"name\": \"ls\"",
            "<tool_call>not json</tool_call>",
            "<tool_call>{\"arguments\": {}}</tool_call>",
            "<tool_call>{\"name\": 3}</tool_call>",
            "<tool_call>{\"name\": \"a\", \"arguments\": \"{oops\"}</tool_call>",
            "<tool_call>{\"name\":\"a\"}</tool_call> <tool_call>[1]</tool_call>",
        ];
        for raw in cases {
            let turn = parse_turn(raw, ChatFormat::Hermes);
            assert!(turn.tool_calls.is_empty(), "{raw}");
            assert_eq!(turn.content, raw);
        }
    }

    #[test]
    fn plain_text_is_echoed() {
        let raw = "  The answer is 4.\n";
        for format in [ChatFormat::ContentOnly, ChatFormat::Hermes, ChatFormat::Llama3Json] {
            let turn = parse_turn(raw, format);
            assert!(!turn.has_tool_calls());
            assert_eq!(turn.content, raw);
        }
    }

    #[test]
    fn content_only_ignores_call_syntax() {
        let raw = r#"<tool_call>{"name":"calculator","arguments":{}}</tool_call>"#;
        assert!(parse_turn(raw, ChatFormat::ContentOnly).tool_calls.is_empty());
    }

    #[test]
    fn llama3_object_and_array() {
        let turn = parse_turn(
            r#"<|python_tag|>{"name": "calculator", "parameters": {"expression": "6 / 3"}}"#,
            ChatFormat::Llama3Json,
        );
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].arguments, json!({"expression": "6 / 3"}));

        let turn = parse_turn(
            r#"[{"name": "a", "parameters": {}}, {"name": "b", "arguments": {"x": 1}}]"#,
            ChatFormat::Llama3Json,
        );
        let names: Vec<_> = turn.tool_calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn llama3_json_without_name_is_plain() {
        let raw = r#"{"answer": 4}"#;
        let turn = parse_turn(raw, ChatFormat::Llama3Json);
        assert!(turn.tool_calls.is_empty());
        assert_eq!(turn.content, raw);
    }
}
