//! The tool-calling control loop.
//!
//! Each round renders the conversation, generates one assistant turn, and
//! either finishes (plain text) or dispatches the requested tools and feeds
//! their results back for another round.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use policy::{CommandPolicy, Decision, strip_chat_markers};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::conversation::Conversation;
use crate::engine::Engine;
use crate::host::ToolHost;
use crate::message::{Message, ToolCall};
use crate::parser::{ChatFormat, parse_turn};
use crate::provider::DispatchError;
use crate::registry::RegistryError;
use crate::{Error, Result};

pub const DEFAULT_MAX_ROUNDS: usize = 5;
pub const DEFAULT_MAX_TOKENS: usize = 256;
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Operator confirmation for command-executing tools.
#[async_trait]
pub trait Approver: Send + Sync {
    /// Return true to let `command` run on behalf of `call`.
    async fn approve(&self, call: &ToolCall, command: &str) -> bool;
}

/// Why a tool call produced an error result instead of output.
#[derive(Debug, thiserror::Error)]
pub enum ToolFailure {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("missing parameter: {0}")]
    MissingCommand(String),

    #[error("command rejected by policy: {0}")]
    PolicyRejected(String),

    #[error("cancelled by operator")]
    Cancelled,

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl From<RegistryError> for ToolFailure {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::NotFound(name) => Self::UnknownTool(name),
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model produced a turn without tool calls.
    Completed,
    /// The round budget ran out while the model was still calling tools.
    RoundBudgetExhausted,
}

/// Summary of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Assistant turns generated.
    pub turns: usize,
    /// Tool-dispatch rounds executed.
    pub rounds: usize,
    /// Tool calls that reached a provider.
    pub dispatched: usize,
    pub stop: StopReason,
}

enum State {
    AwaitingModelTurn,
    ParsingTurn { raw: String, format: ChatFormat },
    DispatchingTools { calls: Vec<ToolCall> },
    Done(StopReason),
}

/// Builder for creating an orchestrator.
pub struct OrchestratorBuilder<E> {
    engine: E,
    max_rounds: usize,
    max_tokens: usize,
    tool_timeout: Duration,
    policy: CommandPolicy,
    approver: Option<Box<dyn Approver>>,
}

impl<E: Engine> OrchestratorBuilder<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_tokens: DEFAULT_MAX_TOKENS,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            policy: CommandPolicy::default(),
            approver: None,
        }
    }

    /// Maximum tool-dispatch rounds per run. Values below 1 are raised to 1.
    pub fn max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    /// Generation budget for each assistant turn.
    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn policy(mut self, policy: CommandPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Ask `approver` before any command-executing tool runs.
    pub fn approver(mut self, approver: impl Approver + 'static) -> Self {
        self.approver = Some(Box::new(approver));
        self
    }

    pub fn build(self) -> Orchestrator<E> {
        Orchestrator {
            engine: self.engine,
            max_rounds: self.max_rounds,
            max_tokens: self.max_tokens,
            tool_timeout: self.tool_timeout,
            policy: self.policy,
            approver: self.approver,
        }
    }
}

/// Drives a conversation through model turns and tool dispatch.
pub struct Orchestrator<E> {
    engine: E,
    max_rounds: usize,
    max_tokens: usize,
    tool_timeout: Duration,
    policy: CommandPolicy,
    approver: Option<Box<dyn Approver>>,
}

impl<E: Engine> Orchestrator<E> {
    /// Create a builder for the orchestrator.
    pub fn builder(engine: E) -> OrchestratorBuilder<E> {
        OrchestratorBuilder::new(engine)
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Append a user message and run to completion.
    pub async fn chat(
        &self,
        conversation: &mut Conversation,
        host: &ToolHost,
        text: impl Into<String>,
    ) -> Result<RunReport> {
        conversation.append(Message::user(text));
        self.run(conversation, host).await
    }

    /// Run rounds until the model stops calling tools or the round budget
    /// is spent.
    ///
    /// Generation failures end the run with an error. Every other failure is
    /// written into the conversation as a tool result.
    pub async fn run(&self, conversation: &mut Conversation, host: &ToolHost) -> Result<RunReport> {
        if conversation.is_empty() {
            return Err(Error::InvalidState("conversation has no messages".into()));
        }

        let mut turns = 0;
        let mut rounds = 0;
        let mut dispatched = 0;
        let mut state = State::AwaitingModelTurn;

        loop {
            state = match state {
                State::AwaitingModelTurn => {
                    let tools = host.schema().await;
                    let prompt = self.engine.render_prompt(conversation.render(), &tools)?;
                    debug!(
                        format = prompt.format.as_str(),
                        tools = tools.len(),
                        "awaiting model turn"
                    );

                    let mut fragments = self.engine.generate(&prompt, self.max_tokens).await?;
                    let mut raw = String::new();
                    while let Some(fragment) = fragments.next().await {
                        raw.push_str(&fragment?);
                    }
                    turns += 1;
                    State::ParsingTurn {
                        raw,
                        format: prompt.format,
                    }
                }

                State::ParsingTurn { raw, format } => {
                    let turn = parse_turn(&raw, format);
                    if !turn.has_tool_calls() {
                        conversation.append(Message::assistant(turn.content));
                        State::Done(StopReason::Completed)
                    } else {
                        let calls = unique_ids(conversation, turn.tool_calls, rounds + 1);
                        debug!(calls = calls.len(), "turn requested tools");
                        conversation
                            .append(Message::assistant_with_calls(turn.content, calls.clone()));
                        State::DispatchingTools { calls }
                    }
                }

                State::DispatchingTools { calls } => {
                    rounds += 1;
                    for call in calls {
                        let content = match self.execute(host, &call, &mut dispatched).await {
                            Ok(output) => output,
                            Err(failure) => {
                                warn!(tool = %call.name, id = %call.id, %failure, "tool call failed");
                                format!("Error: {failure}")
                            }
                        };
                        if !conversation.contains_call(&call.id) {
                            return Err(Error::InvalidState(format!(
                                "result for unknown call id {}",
                                call.id
                            )));
                        }
                        conversation.append(Message::tool(call.id, content));
                    }

                    if rounds >= self.max_rounds {
                        info!(rounds, "round budget exhausted");
                        State::Done(StopReason::RoundBudgetExhausted)
                    } else {
                        State::AwaitingModelTurn
                    }
                }

                State::Done(stop) => {
                    info!(turns, rounds, dispatched, ?stop, "run finished");
                    return Ok(RunReport {
                        turns,
                        rounds,
                        dispatched,
                        stop,
                    });
                }
            };
        }
    }

    /// Resolve, vet, and dispatch one call.
    async fn execute(
        &self,
        host: &ToolHost,
        call: &ToolCall,
        dispatched: &mut usize,
    ) -> std::result::Result<String, ToolFailure> {
        let (provider, descriptor) = host.resolve(&call.name).await?;

        let mut arguments = call.arguments.clone();
        if let Some(argument) = descriptor.command_argument() {
            let command = arguments
                .get(argument)
                .and_then(|v| v.as_str())
                .map(strip_chat_markers)
                .ok_or_else(|| ToolFailure::MissingCommand(argument.to_string()))?;

            if let Decision::Deny { reason } = self.policy.check(&command) {
                return Err(ToolFailure::PolicyRejected(reason));
            }

            if let Some(approver) = &self.approver {
                if !approver.approve(call, &command).await {
                    return Err(ToolFailure::Cancelled);
                }
            }

            // The provider runs exactly the text that was vetted.
            arguments[argument] = Value::String(command);
        }

        *dispatched += 1;
        let output = provider
            .dispatch(&call.name, &arguments, self.tool_timeout)
            .await?;
        Ok(output)
    }
}

/// Rename ids that collide with calls already in the log, or with each
/// other, by appending the round number.
fn unique_ids(
    conversation: &Conversation,
    calls: Vec<ToolCall>,
    round: usize,
) -> Vec<ToolCall> {
    let mut taken: Vec<String> = Vec::with_capacity(calls.len());
    calls
        .into_iter()
        .map(|mut call| {
            let mut candidate = call.id.clone();
            let mut n = 0;
            while conversation.contains_call(&candidate) || taken.contains(&candidate) {
                n += 1;
                candidate = if n == 1 {
                    format!("{}_r{round}", call.id)
                } else {
                    format!("{}_r{round}_{n}", call.id)
                };
            }
            if candidate != call.id {
                debug!(from = %call.id, to = %candidate, "renamed colliding call id");
                call.id = candidate.clone();
            }
            taken.push(candidate);
            call
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ScriptedEngine, Template};
    use crate::tools::LocalProvider;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn local_host() -> ToolHost {
        let host = ToolHost::new();
        host.add_local(LocalProvider::builtin(CommandPolicy::default()))
            .await
            .unwrap();
        host
    }

    fn call(name: &str, args: serde_json::Value) -> String {
        format!("<tool_call>{}</tool_call>", json!({"name": name, "arguments": args}))
    }

    #[tokio::test]
    async fn plain_answer_completes_in_one_turn() {
        let engine = ScriptedEngine::new(Template::ChatMl).turn("Hello there.");
        let orchestrator = Orchestrator::builder(engine).build();
        let host = local_host().await;
        let mut conv = Conversation::new();

        let report = orchestrator.chat(&mut conv, &host, "hi").await.unwrap();
        assert_eq!(report.stop, StopReason::Completed);
        assert_eq!((report.turns, report.rounds, report.dispatched), (1, 0, 0));
        assert_eq!(conv.last().unwrap(), &Message::assistant("Hello there."));
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_result() {
        let engine = ScriptedEngine::new(Template::ChatMl)
            .turn(&call("weather", json!({"city": "Oslo"})))
            .turn("I can't check the weather.");
        let orchestrator = Orchestrator::builder(engine).build();
        let host = local_host().await;
        let mut conv = Conversation::new();

        let report = orchestrator.chat(&mut conv, &host, "weather?").await.unwrap();
        assert_eq!(report.dispatched, 0);
        let tool_msg = &conv.render()[2];
        assert_eq!(tool_msg.content(), "Error: unknown tool: weather");
    }

    #[tokio::test]
    async fn policy_rejection_is_not_dispatched() {
        let engine = ScriptedEngine::new(Template::ChatMl)
            .turn(&call("shell_command", json!({"command": "rm -rf /"})))
            .turn("That command is not allowed.");
        let orchestrator = Orchestrator::builder(engine).build();
        let host = local_host().await;
        let mut conv = Conversation::new();

        let report = orchestrator.chat(&mut conv, &host, "wipe it").await.unwrap();
        assert_eq!(report.dispatched, 0);
        assert!(conv.render()[2].content().starts_with("Error: command rejected by policy"));
    }

    struct Counting {
        allow: bool,
        asked: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Approver for Counting {
        async fn approve(&self, _call: &ToolCall, _command: &str) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.allow
        }
    }

    #[tokio::test]
    async fn declined_confirmation_cancels() {
        let asked = Arc::new(AtomicUsize::new(0));
        let engine = ScriptedEngine::new(Template::ChatMl)
            .turn(&call("shell_command", json!({"command": "pwd"})))
            .turn(&call("calculator", json!({"expression": "1 + 1"})))
            .turn("done");
        let orchestrator = Orchestrator::builder(engine)
            .approver(Counting {
                allow: false,
                asked: asked.clone(),
            })
            .build();
        let host = local_host().await;
        let mut conv = Conversation::new();

        let report = orchestrator.chat(&mut conv, &host, "where am I").await.unwrap();
        assert_eq!(conv.render()[2].content(), "Error: cancelled by operator");
        // Non-command tools never ask.
        assert_eq!(conv.render()[4].content(), "2");
        assert_eq!(asked.load(Ordering::SeqCst), 1);
        assert_eq!(report.dispatched, 1);
    }

    #[tokio::test]
    async fn missing_command_argument() {
        let engine = ScriptedEngine::new(Template::ChatMl)
            .turn(&call("shell_command", json!({"cmd": "ls"})))
            .turn("ok");
        let orchestrator = Orchestrator::builder(engine).build();
        let host = local_host().await;
        let mut conv = Conversation::new();

        orchestrator.chat(&mut conv, &host, "ls").await.unwrap();
        assert_eq!(conv.render()[2].content(), "Error: missing parameter: command");
    }

    #[tokio::test]
    async fn colliding_ids_are_suffixed() {
        let same = r#"<tool_call>{"id":"dup","name":"calculator","arguments":{"expression":"1 + 1"}}</tool_call>"#;
        let engine = ScriptedEngine::new(Template::ChatMl)
            .turn(&format!("{same}{same}"))
            .turn(same)
            .turn("done");
        let orchestrator = Orchestrator::builder(engine).build();
        let host = local_host().await;
        let mut conv = Conversation::new();

        orchestrator.chat(&mut conv, &host, "add").await.unwrap();
        let ids: Vec<_> = conv
            .render()
            .iter()
            .filter_map(|m| m.tool_call_id())
            .collect();
        assert_eq!(ids, ["dup", "dup_r1", "dup_r2"]);
    }

    #[tokio::test]
    async fn generation_failure_is_surfaced() {
        let engine = ScriptedEngine::new(Template::ChatMl).fail("model crashed");
        let orchestrator = Orchestrator::builder(engine).build();
        let host = local_host().await;
        let mut conv = Conversation::new();

        let err = orchestrator.chat(&mut conv, &host, "hi").await.unwrap_err();
        assert!(matches!(err, Error::Engine(_)));
        assert_eq!(conv.len(), 1);
    }

    #[tokio::test]
    async fn empty_conversation_is_rejected() {
        let orchestrator = Orchestrator::builder(ScriptedEngine::new(Template::ChatMl)).build();
        let host = local_host().await;
        let mut conv = Conversation::new();
        assert!(matches!(
            orchestrator.run(&mut conv, &host).await,
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn max_rounds_floor() {
        let builder = OrchestratorBuilder::new(ScriptedEngine::new(Template::ChatMl)).max_rounds(0);
        assert_eq!(builder.max_rounds, 1);
    }
}
