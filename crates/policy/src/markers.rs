//! Chat-template marker stripping.

/// Control markers a model sometimes leaks into tool arguments.
const CHAT_MARKERS: &[&str] = &[
    "<|im_start|>",
    "<|im_end|>",
    "<|assistant|>",
    "<|user|>",
    "assistant\n",
    "user\n",
];

/// Remove chat-template control markers and surrounding whitespace.
///
/// Tool handlers and the policy both see the argument text through this
/// function, so a verdict always applies to the text that would run.
pub fn strip_chat_markers(text: &str) -> String {
    let mut cleaned = text.to_string();
    for marker in CHAT_MARKERS {
        while let Some(pos) = cleaned.find(marker) {
            cleaned.replace_range(pos..pos + marker.len(), "");
        }
    }
    cleaned.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markers_and_whitespace() {
        assert_eq!(strip_chat_markers("  ls -la<|im_end|>\n"), "ls -la");
        assert_eq!(strip_chat_markers("<|im_start|>assistant\npwd"), "pwd");
    }

    #[test]
    fn leaves_plain_text_alone() {
        assert_eq!(strip_chat_markers("2 + 2"), "2 + 2");
    }
}
