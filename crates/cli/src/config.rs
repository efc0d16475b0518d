//! Configuration loading from steward.toml.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use mcp::ProcessConfig;
use policy::CommandPolicy;
use runtime::{
    DEFAULT_MAX_ROUNDS, DEFAULT_MAX_TOKENS, DEFAULT_TOOL_TIMEOUT, Endpoint, RemoteSpec, Template,
};
use serde::Deserialize;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are Steward, a helpful assistant with access to tools. Be concise and direct.";
const DEFAULT_ENGINE_URL: &str = "http://127.0.0.1:8080";

/// Top-level configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Command safety rules (deny/allow).
    #[serde(default)]
    pub policy: CommandPolicy,

    #[serde(default)]
    pub local: LocalConfig,

    /// Remote tool servers, in priority order: later entries shadow earlier ones.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    /// Remote tools that execute commands, with the argument holding the command.
    #[serde(default)]
    pub command_tools: Vec<CommandToolConfig>,
}

/// Generation server settings.
#[derive(Debug, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_url")]
    pub url: String,

    #[serde(default)]
    pub template: Template,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: default_engine_url(),
            template: Template::default(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Ask before running any command-executing tool.
    #[serde(default)]
    pub confirm_commands: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            tool_timeout_secs: default_tool_timeout_secs(),
            confirm_commands: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// Built-in tools served in-process.
#[derive(Debug, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// One remote tool server, reached over TCP or spawned as a child process.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ServerConfig {
    /// Resolve the connection endpoint.
    pub fn to_spec(&self) -> Result<RemoteSpec, ConfigError> {
        let endpoint = match (&self.command, self.port) {
            (Some(_), Some(_)) => return Err(ConfigError::AmbiguousServer(self.name.clone())),
            (Some(command), None) => Endpoint::Process(ProcessConfig {
                command: command.clone(),
                args: self.args.clone(),
                env: self.env.clone(),
            }),
            (None, Some(port)) => Endpoint::Tcp {
                host: self.host.clone().unwrap_or_else(|| "127.0.0.1".to_string()),
                port,
            },
            (None, None) => return Err(ConfigError::MissingEndpoint(self.name.clone())),
        };
        Ok(RemoteSpec {
            name: self.name.clone(),
            endpoint,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandToolConfig {
    pub name: String,
    #[serde(default = "default_command_argument")]
    pub argument: String,
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_engine_url() -> String {
    DEFAULT_ENGINE_URL.to_string()
}

fn default_max_tokens() -> usize {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_rounds() -> usize {
    DEFAULT_MAX_ROUNDS
}

fn default_tool_timeout_secs() -> u64 {
    DEFAULT_TOOL_TIMEOUT.as_secs()
}

fn default_true() -> bool {
    true
}

fn default_command_argument() -> String {
    "command".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Load from `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default_config())
        }
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            engine: EngineConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            policy: CommandPolicy::default(),
            local: LocalConfig::default(),
            servers: Vec::new(),
            command_tools: Vec::new(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.policy.validate()?;

        let mut seen = HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::DuplicateServer(server.name.clone()));
            }
            server.to_spec()?;
        }
        Ok(())
    }

    /// Remote servers in configuration order.
    pub fn remote_specs(&self) -> Result<Vec<RemoteSpec>, ConfigError> {
        self.servers.iter().map(ServerConfig::to_spec).collect()
    }

    /// Extra command tool markers, layered over the built-in `shell_command`.
    pub fn command_tools(&self) -> HashMap<String, String> {
        self.command_tools
            .iter()
            .map(|t| (t.name.clone(), t.argument.clone()))
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error(transparent)]
    Policy(#[from] policy::Error),

    #[error("server {0} is configured twice")]
    DuplicateServer(String),

    #[error("server {0} sets both a command and a port")]
    AmbiguousServer(String),

    #[error("server {0} needs either a port or a command")]
    MissingEndpoint(String),
}
