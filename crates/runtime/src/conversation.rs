//! Append-only conversation log.

use crate::message::Message;

/// Ordered message log for one conversation.
///
/// Messages can only be appended; nothing is ever edited or removed.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a conversation with a system prompt.
    pub fn with_system(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(prompt)],
        }
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The full log in append order.
    pub fn render(&self) -> &[Message] {
        &self.messages
    }

    /// Messages appended after the first `mark` messages.
    pub fn since(&self, mark: usize) -> &[Message] {
        self.messages.get(mark..).unwrap_or(&[])
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether any assistant message in the log emitted a call with this id.
    pub fn contains_call(&self, id: &str) -> bool {
        self.messages
            .iter()
            .flat_map(Message::tool_calls)
            .any(|call| call.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCall;
    use serde_json::json;

    #[test]
    fn render_preserves_append_order() {
        let mut conv = Conversation::with_system("be brief");
        conv.append(Message::user("hi"));
        conv.append(Message::assistant("hello"));

        let roles: Vec<_> = conv.render().iter().map(|m| m.role().as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant"]);
        assert_eq!(conv.render()[2].content(), "hello");
        assert_eq!(conv.render(), conv.render());
    }

    #[test]
    fn since_mark() {
        let mut conv = Conversation::new();
        conv.append(Message::user("a"));
        let mark = conv.len();
        conv.append(Message::assistant("b"));
        assert_eq!(conv.since(mark), &[Message::assistant("b")]);
        assert!(conv.since(10).is_empty());
    }

    #[test]
    fn tracks_emitted_call_ids() {
        let mut conv = Conversation::new();
        assert!(!conv.contains_call("c1"));
        conv.append(Message::assistant_with_calls(
            "",
            vec![ToolCall::new("c1", "calculator", json!({}))],
        ));
        assert!(conv.contains_call("c1"));
        assert!(!conv.contains_call("c2"));
    }
}
