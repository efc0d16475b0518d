//! Engine that replays canned turns.
//!
//! Used for headless runs and tests. Each fragment counts as one token
//! against the generation budget.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::{Engine, EngineError, FragmentStream, RenderedPrompt, Template};
use crate::message::Message;
use crate::tool::ToolDescriptor;

#[derive(Debug, Clone)]
enum Scripted {
    Fragments(Vec<String>),
    Fail(String),
}

/// Replays scripted turns in order and records every prompt it is given.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    template: Template,
    script: Mutex<VecDeque<Scripted>>,
    repeat: Option<Scripted>,
    prompts: Mutex<Vec<RenderedPrompt>>,
}

impl ScriptedEngine {
    pub fn new(template: Template) -> Self {
        Self {
            template,
            ..Self::default()
        }
    }

    /// Queue a turn, streamed as word-sized fragments.
    pub fn turn(self, text: &str) -> Self {
        let fragments = text.split_inclusive(' ').map(str::to_string).collect();
        self.fragments(fragments)
    }

    /// Queue a turn with explicit fragments.
    pub fn fragments(self, fragments: Vec<String>) -> Self {
        self.push(Scripted::Fragments(fragments))
    }

    /// Queue a turn whose generation fails.
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(Scripted::Fail(message.into()))
    }

    /// Once the queue is empty, answer every request with this turn.
    pub fn repeat(mut self, text: &str) -> Self {
        self.repeat = Some(Scripted::Fragments(
            text.split_inclusive(' ').map(str::to_string).collect(),
        ));
        self
    }

    /// Every prompt passed to `generate`, oldest first.
    pub fn prompts(&self) -> Vec<RenderedPrompt> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn push(self, turn: Scripted) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(turn);
        }
        self
    }

    fn next_turn(&self) -> Option<Scripted> {
        let queued = self.script.lock().ok()?.pop_front();
        queued.or_else(|| self.repeat.clone())
    }
}

impl Engine for ScriptedEngine {
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
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.clone());
        }

        match self.next_turn() {
            Some(Scripted::Fragments(fragments)) => {
                let budgeted: Vec<Result<String, EngineError>> =
                    fragments.into_iter().take(max_tokens).map(Ok).collect();
                Ok(Box::pin(futures::stream::iter(budgeted)))
            }
            Some(Scripted::Fail(message)) => Err(EngineError::Scripted(message)),
            None => Err(EngineError::Scripted("script exhausted".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn collect(engine: &ScriptedEngine, max_tokens: usize) -> Result<String, EngineError> {
        let prompt = engine.render_prompt(&[Message::user("hi")], &[])?;
        let mut stream = engine.generate(&prompt, max_tokens).await?;
        let mut out = String::new();
        while let Some(fragment) = stream.next().await {
            out.push_str(&fragment?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn replays_in_order_then_exhausts() {
        let engine = ScriptedEngine::new(Template::ChatMl).turn("one two").turn("three");
        assert_eq!(collect(&engine, 100).await.unwrap(), "one two");
        assert_eq!(collect(&engine, 100).await.unwrap(), "three");
        assert!(collect(&engine, 100).await.is_err());
        assert_eq!(engine.prompts().len(), 3);
    }

    #[tokio::test]
    async fn budget_truncates_fragments() {
        let engine = ScriptedEngine::new(Template::ChatMl).turn("a b c d");
        assert_eq!(collect(&engine, 2).await.unwrap(), "a b ");
    }

    #[tokio::test]
    async fn repeat_and_fail() {
        let engine = ScriptedEngine::new(Template::ChatMl)
            .fail("engine down")
            .repeat("again");
        let err = collect(&engine, 10).await.unwrap_err();
        assert_eq!(err.to_string(), "engine down");
        assert_eq!(collect(&engine, 10).await.unwrap(), "again");
        assert_eq!(collect(&engine, 10).await.unwrap(), "again");
    }
}
