//! Shell command execution tool.
//!
//! Runs commands via `sh -c` after checking them against a [`CommandPolicy`].

use std::process::Stdio;

use async_trait::async_trait;
use policy::{CommandPolicy, Decision};
use serde_json::{Value, json};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ToolError, ToolHandler, text_argument};
use crate::tool::ToolDescriptor;

/// Name under which the shell tool is registered.
pub const SHELL_TOOL: &str = "shell_command";

/// Execute allow-listed shell commands.
///
/// The policy is checked here as well as in the orchestrator, because the
/// tool can be served to remote clients that apply no policy of their own.
pub struct ShellCommand {
    policy: CommandPolicy,
}

impl ShellCommand {
    pub fn new(policy: CommandPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl ToolHandler for ShellCommand {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            SHELL_TOOL,
            "Execute a shell command and return its output. Only simple read-only commands are permitted.",
            json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute"
                    }
                },
                "required": ["command"]
            }),
        )
        .command("command")
    }

    async fn call(&self, arguments: &Value) -> Result<String, ToolError> {
        let command = text_argument(arguments, "command")?;

        if let Decision::Deny { reason } = self.policy.check(&command) {
            warn!(%command, %reason, "refusing command");
            return Err(ToolError::InvalidParameter(format!(
                "command not allowed: {reason}"
            )));
        }

        debug!(%command, "executing shell command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolError::Internal(format!("failed to spawn shell: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output.status.code().unwrap_or(-1);
            debug!(exit_code = code, "command returned non-zero exit code");
            return Err(ToolError::Internal(format!(
                "exit code {code}: {}",
                stderr.trim()
            )));
        }

        Ok(stdout.into_owned())
    }
}
