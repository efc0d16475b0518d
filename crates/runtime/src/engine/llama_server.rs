//! llama.cpp server backend.
//!
//! Prompts are rendered locally and sent to `POST {base}/completion` with
//! streaming enabled; the response is a server-sent event stream whose
//! `data:` lines carry `{"content": "...", "stop": bool}`.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Engine, EngineError, FragmentStream, RenderedPrompt, Template};
use crate::message::Message;
use crate::tool::ToolDescriptor;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: usize,
    stream: bool,
    temperature: f32,
    cache_prompt: bool,
    stop: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct CompletionEvent {
    #[serde(default)]
    content: String,
    #[serde(default)]
    stop: bool,
}

/// Builder for creating a llama.cpp server engine.
#[derive(Debug, Clone)]
pub struct LlamaServerEngineBuilder {
    base_url: String,
    template: Template,
    temperature: f32,
}

impl LlamaServerEngineBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            template: Template::default(),
            temperature: 0.7,
        }
    }

    /// Set the chat template the served model expects.
    pub fn template(mut self, template: Template) -> Self {
        self.template = template;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Build the engine.
    pub fn build(self) -> LlamaServerEngine {
        LlamaServerEngine {
            client: reqwest::Client::new(),
            base_url: self.base_url.trim_end_matches('/').to_string(),
            template: self.template,
            temperature: self.temperature,
        }
    }
}

impl Default for LlamaServerEngineBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

/// Engine backed by a llama.cpp-compatible completion server.
pub struct LlamaServerEngine {
    client: reqwest::Client,
    base_url: String,
    template: Template,
    temperature: f32,
}

impl LlamaServerEngine {
    /// Create a builder for the engine.
    pub fn builder(base_url: impl Into<String>) -> LlamaServerEngineBuilder {
        LlamaServerEngineBuilder::new(base_url)
    }

    fn stop_markers(&self) -> &'static [&'static str] {
        match self.template {
            Template::ChatMl => &["<|im_end|>"],
            Template::Llama3 => &["<|eot_id|>", "<|eom_id|>"],
        }
    }
}

impl std::fmt::Display for LlamaServerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "llama-server({}, {:?})", self.base_url, self.template)
    }
}

impl Engine for LlamaServerEngine {
    fn render_prompt(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<RenderedPrompt, EngineError> {
        Ok(self.template.render(messages, tools))
    }

    async fn generate(
        &self,
        prompt: &RenderedPrompt,
        max_tokens: usize,
    ) -> Result<FragmentStream, EngineError> {
        let request = CompletionRequest {
            prompt: &prompt.text,
            n_predict: max_tokens,
            stream: true,
            temperature: self.temperature,
            cache_prompt: true,
            stop: self.stop_markers(),
        };

        debug!(url = %self.base_url, max_tokens, "requesting completion");
        let response = self
            .client
            .post(format!("{}/completion", self.base_url))
            .header("accept", "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Status { status, body });
        }

        Ok(Box::pin(event_stream(response)))
    }
}

struct SseState {
    response: reqwest::Response,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    finished: bool,
}

fn event_stream(
    response: reqwest::Response,
) -> impl futures::Stream<Item = Result<String, EngineError>> + Send {
    let state = SseState {
        response,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(fragment) = state.pending.pop_front() {
                return Some((Ok(fragment), state));
            }
            if state.finished {
                return None;
            }

            match state.response.chunk().await {
                Ok(Some(bytes)) => {
                    state.buffer.extend_from_slice(&bytes);
                    if let Err(e) = drain_lines(&mut state) {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                }
                Ok(None) => {
                    // A final line may arrive without a trailing newline.
                    state.buffer.push(b'\n');
                    if let Err(e) = drain_lines(&mut state) {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                    state.finished = true;
                }
                Err(e) => {
                    state.finished = true;
                    return Some((Err(EngineError::Network(e.to_string())), state));
                }
            }
        }
    })
}

/// Move every complete line out of the buffer into pending fragments.
fn drain_lines(state: &mut SseState) -> Result<(), EngineError> {
    while let Some(pos) = state.buffer.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = state.buffer.drain(..=pos).collect();
        if state.finished {
            continue;
        }
        let line = String::from_utf8_lossy(&line);
        if let Some(event) = parse_event(&line)? {
            if !event.content.is_empty() {
                state.pending.push_back(event.content);
            }
            if event.stop {
                state.finished = true;
            }
        }
    }
    Ok(())
}

/// Decode one SSE line. Comments, blank lines and other fields yield `None`.
fn parse_event(line: &str) -> Result<Option<CompletionEvent>, EngineError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim_start();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }

    let value: serde_json::Value =
        serde_json::from_str(data).map_err(|e| EngineError::InvalidResponse(e.to_string()))?;
    if let Some(error) = value.get("error") {
        return Err(EngineError::InvalidResponse(error.to_string()));
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| EngineError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ChatFormat;
    use futures::StreamExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn parse_event_lines() {
        let event = parse_event("data: {\"content\":\"Hi\",\"stop\":false}\n")
            .unwrap()
            .unwrap();
        assert_eq!(event.content, "Hi");
        assert!(!event.stop);

        assert!(parse_event(": keep-alive\n").unwrap().is_none());
        assert!(parse_event("\n").unwrap().is_none());
        assert!(parse_event("data: {\"error\":{\"message\":\"boom\"}}").is_err());
        assert!(parse_event("data: nope").is_err());
    }

    /// Accept one request and answer with an SSE body.
    async fn serve_once(listener: TcpListener, body: &'static str) -> String {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request).to_string();
            if let Some(split) = text.find("\r\n\r\n") {
                let length = text[..split]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if request.len() >= split + 4 + length {
                    break;
                }
            }
            if n == 0 {
                break;
            }
        }

        let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n";
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(body.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        String::from_utf8_lossy(&request).to_string()
    }

    #[tokio::test]
    async fn streams_fragments_until_stop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(serve_once(
            listener,
            "data: {\"content\":\"Hel\",\"stop\":false}\n\n\
             data: {\"content\":\"lo\",\"stop\":false}\n\n\
             data: {\"content\":\"\",\"stop\":true}\n\n\
             data: {\"content\":\"ignored\",\"stop\":false}\n\n",
        ));

        let engine = LlamaServerEngine::builder(format!("http://127.0.0.1:{port}/")).build();
        let prompt = RenderedPrompt {
            text: "hi".into(),
            format: ChatFormat::ContentOnly,
        };
        let stream = engine.generate(&prompt, 16).await.unwrap();
        let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;
        assert_eq!(fragments, ["Hel", "lo"]);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /completion"));
        assert!(request.contains("\"n_predict\":16"));
        assert!(request.contains("\"stream\":true"));
    }
}
