//! Policy configuration and enforcement.

use crate::{Error, Result, strip_chat_markers};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Substrings that make a command unsafe wherever they appear, shell
/// separators and substitutions included.
pub const DEFAULT_DENY: &[&str] = &[
    "rm", "sudo", "su", ">", ">>", "|", "mv", "cp", "chmod", "chown", "&", ";", "\n", "$(", "`",
];

/// Programs a command may start with.
pub const DEFAULT_ALLOW: &[&str] = &["ls", "pwd", "echo", "cat", "date", "whoami", "uname"];

/// Safety policy for command-executing tools, loadable from TOML.
///
/// Evaluation order is fixed: the deny list is checked first and is
/// authoritative, then the leading token must exactly match an allow entry.
/// Anything not positively allowed is denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPolicy {
    /// Substrings that reject a command anywhere in its text.
    #[serde(default = "default_deny")]
    pub deny: Vec<String>,

    /// Exact leading tokens that are allowed to run.
    #[serde(default = "default_allow")]
    pub allow: Vec<String>,
}

fn default_deny() -> Vec<String> {
    DEFAULT_DENY.iter().map(|s| s.to_string()).collect()
}

fn default_allow() -> Vec<String> {
    DEFAULT_ALLOW.iter().map(|s| s.to_string()).collect()
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            deny: default_deny(),
            allow: default_allow(),
        }
    }
}

/// Result of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

impl CommandPolicy {
    /// Load policy from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse policy from TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        let policy: Self = toml::from_str(toml).map_err(|e| Error::Parse(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Reject configurations that would make the checks meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.deny.iter().any(|d| d.is_empty()) {
            return Err(Error::InvalidRule("deny entries must not be empty".into()));
        }
        if let Some(bad) = self
            .allow
            .iter()
            .find(|a| a.is_empty() || a.chars().any(char::is_whitespace))
        {
            return Err(Error::InvalidRule(format!(
                "allow entry {bad:?} must be a single non-empty token"
            )));
        }
        Ok(())
    }

    /// Check a command against the policy.
    pub fn check(&self, command: &str) -> Decision {
        let command = strip_chat_markers(command);

        if let Some(pattern) = self.deny.iter().find(|d| command.contains(d.as_str())) {
            debug!(%command, %pattern, "command matched deny list");
            return Decision::Deny {
                reason: format!("command contains blocked pattern {pattern:?}"),
            };
        }

        let Some(program) = command.split_whitespace().next() else {
            return Decision::Deny {
                reason: "empty command".into(),
            };
        };

        if self.allow.iter().any(|a| a == program) {
            Decision::Allow
        } else {
            debug!(%command, %program, "command not in allow list");
            Decision::Deny {
                reason: format!("{program:?} is not an allowed command"),
            }
        }
    }

    /// Shorthand for `check(command).is_allowed()`.
    pub fn is_safe(&self, command: &str) -> bool {
        self.check(command).is_allowed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_listed_programs() {
        let policy = CommandPolicy::default();
        assert!(policy.is_safe("ls -la"));
        assert!(policy.is_safe("pwd"));
        assert!(policy.is_safe("uname -a"));
    }

    #[test]
    fn deny_list_is_authoritative() {
        let policy = CommandPolicy::default();
        assert!(!policy.is_safe("rm -rf /"));
        assert!(!policy.is_safe("echo hi > out.txt"));
        assert!(!policy.is_safe("cat /etc/hosts | head"));
        assert!(!policy.is_safe("ls & reboot"));
        assert!(!policy.is_safe("ls; curl http://x"));
        assert!(!policy.is_safe("ls\ncurl http://x"));
        assert!(!policy.is_safe("ls $(curl http://x)"));
        assert!(!policy.is_safe("ls `curl http://x`"));
    }

    #[test]
    fn only_marker_newlines_are_removed() {
        let policy = CommandPolicy::default();
        // "assistant\n" is a marker and vanishes; any other newline remains.
        assert!(policy.is_safe("ls assistant\nwget"));
        assert!(!policy.is_safe("ls tmp\nwget http://x"));
    }

    #[test]
    fn unknown_programs_are_denied() {
        let policy = CommandPolicy::default();
        assert!(!policy.is_safe("curl http://x"));
        assert!(!policy.is_safe("lsblk"));
        assert!(!policy.is_safe(""));
        assert!(!policy.is_safe("   "));
    }

    #[test]
    fn deny_reason_names_the_pattern() {
        let policy = CommandPolicy::default();
        let Decision::Deny { reason } = policy.check("echo hi > out.txt") else {
            panic!("expected deny");
        };
        assert!(reason.contains('>'));
    }

    #[test]
    fn verdict_uses_cleaned_text() {
        let policy = CommandPolicy::default();
        assert!(policy.is_safe("date<|im_end|>"));
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
deny = [";"]
allow = ["git"]
"#;
        let policy = CommandPolicy::parse(toml).unwrap();
        assert!(policy.is_safe("git status"));
        assert!(!policy.is_safe("git status; ls"));
        assert!(!policy.is_safe("ls"));
    }

    #[test]
    fn parse_fills_defaults() {
        let policy = CommandPolicy::parse("").unwrap();
        assert_eq!(policy, CommandPolicy::default());
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = CommandPolicy::load("/nonexistent/policy.toml").unwrap_err();
        assert!(matches!(err, Error::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/policy.toml"));
    }

    #[test]
    fn rejects_multi_token_allow_entries() {
        let err = CommandPolicy::parse(r#"allow = ["git status"]"#).unwrap_err();
        assert!(matches!(err, Error::InvalidRule(_)));
    }
}
