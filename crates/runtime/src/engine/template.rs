//! Local chat-template rendering.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::RenderedPrompt;
use crate::message::Message;
use crate::parser::ChatFormat;
use crate::tool::ToolDescriptor;

/// Prompt template family of the served model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Template {
    /// ChatML with Hermes-style `<tool_call>` blocks (Qwen, Hermes).
    #[default]
    ChatMl,
    /// Llama 3.x with JSON tool calls.
    Llama3,
}

impl Template {
    /// Format the model answers in when these tools are offered.
    pub fn format(self, tools: &[ToolDescriptor]) -> ChatFormat {
        match (self, tools.is_empty()) {
            (_, true) => ChatFormat::ContentOnly,
            (Template::ChatMl, false) => ChatFormat::Hermes,
            (Template::Llama3, false) => ChatFormat::Llama3Json,
        }
    }

    /// Render a generation prompt ending at the start of an assistant turn.
    pub fn render(self, messages: &[Message], tools: &[ToolDescriptor]) -> RenderedPrompt {
        let text = match self {
            Template::ChatMl => render_chatml(messages, tools),
            Template::Llama3 => render_llama3(messages, tools),
        };
        RenderedPrompt {
            text,
            format: self.format(tools),
        }
    }
}

fn function_json(tool: &ToolDescriptor) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn chatml_block(out: &mut String, role: &str, body: &str) {
    out.push_str("<|im_start|>");
    out.push_str(role);
    out.push('\n');
    out.push_str(body);
    out.push_str("<|im_end|>\n");
}

fn render_chatml(messages: &[Message], tools: &[ToolDescriptor]) -> String {
    let mut out = String::new();
    let (system, rest) = match messages.first() {
        Some(Message::System { content }) => (Some(content.as_str()), &messages[1..]),
        _ => (None, messages),
    };

    if tools.is_empty() {
        if let Some(system) = system {
            chatml_block(&mut out, "system", system);
        }
    } else {
        let mut body = String::new();
        if let Some(system) = system {
            body.push_str(system);
            body.push_str("\n\n");
        }
        body.push_str(
            "# Tools\n\nYou may call one or more functions to assist with the user query.\n\n\
             You are provided with function signatures within <tools></tools> XML tags:\n<tools>",
        );
        for tool in tools {
            body.push('\n');
            body.push_str(&function_json(tool).to_string());
        }
        body.push_str(
            "\n</tools>\n\nFor each function call, return a json object with function name and \
             arguments within <tool_call></tool_call> XML tags:\n<tool_call>\n\
             {\"name\": <function-name>, \"arguments\": <args-json-object>}\n</tool_call>",
        );
        chatml_block(&mut out, "system", &body);
    }

    let mut i = 0;
    while i < rest.len() {
        match &rest[i] {
            Message::System { content } => chatml_block(&mut out, "system", content),
            Message::User { content } => chatml_block(&mut out, "user", content),
            Message::Assistant {
                content,
                tool_calls,
            } => {
                let mut body = content.clone();
                for call in tool_calls {
                    if !body.is_empty() {
                        body.push('\n');
                    }
                    let payload = json!({"name": call.name, "arguments": call.arguments});
                    body.push_str(&format!("<tool_call>\n{payload}\n</tool_call>"));
                }
                chatml_block(&mut out, "assistant", &body);
            }
            Message::Tool { .. } => {
                // Consecutive results share one user turn.
                let mut body = String::new();
                while let Some(Message::Tool { content, .. }) = rest.get(i) {
                    if !body.is_empty() {
                        body.push('\n');
                    }
                    body.push_str(&format!("<tool_response>\n{content}\n</tool_response>"));
                    i += 1;
                }
                chatml_block(&mut out, "user", &body);
                continue;
            }
        }
        i += 1;
    }

    out.push_str("<|im_start|>assistant\n");
    out
}

fn llama3_block(out: &mut String, role: &str, body: &str) {
    out.push_str("<|start_header_id|>");
    out.push_str(role);
    out.push_str("<|end_header_id|>\n\n");
    out.push_str(body);
    out.push_str("<|eot_id|>");
}

fn render_llama3(messages: &[Message], tools: &[ToolDescriptor]) -> String {
    let mut out = String::from("<|begin_of_text|>");
    let (system, rest) = match messages.first() {
        Some(Message::System { content }) => (Some(content.as_str()), &messages[1..]),
        _ => (None, messages),
    };

    if tools.is_empty() {
        if let Some(system) = system {
            llama3_block(&mut out, "system", system);
        }
    } else {
        let mut body = String::from("Environment: ipython\n\n");
        if let Some(system) = system {
            body.push_str(system);
            body.push_str("\n\n");
        }
        body.push_str(
            "You have access to the following functions. To call a function, respond with \
             JSON for a function call of the form \
             {\"name\": function name, \"parameters\": dictionary of argument name and its value}. \
             Do not use variables.\n",
        );
        for tool in tools {
            body.push('\n');
            body.push_str(&function_json(tool).to_string());
        }
        llama3_block(&mut out, "system", &body);
    }

    for message in rest {
        match message {
            Message::System { content } => llama3_block(&mut out, "system", content),
            Message::User { content } => llama3_block(&mut out, "user", content),
            Message::Assistant {
                content,
                tool_calls,
            } if tool_calls.is_empty() => llama3_block(&mut out, "assistant", content),
            Message::Assistant { tool_calls, .. } => {
                let calls: Vec<Value> = tool_calls
                    .iter()
                    .map(|c| json!({"name": c.name, "parameters": c.arguments}))
                    .collect();
                let body = if calls.len() == 1 {
                    calls[0].to_string()
                } else {
                    Value::Array(calls).to_string()
                };
                llama3_block(&mut out, "assistant", &body);
            }
            Message::Tool { content, .. } => llama3_block(&mut out, "ipython", content),
        }
    }

    out.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    out
}
