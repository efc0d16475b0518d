mod config;
mod error;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use mcp::Server;
use runtime::{
    Approver, Conversation, LlamaServerEngine, LocalProvider, Message, Orchestrator, StopReason,
    ToolCall, ToolHost,
};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::Result;

const CONFIG_FILE: &str = "steward.toml";
const DEFAULT_SERVE_PORT: u16 = 8889;

#[derive(Parser)]
#[command(name = "steward")]
#[command(about = "Tool-calling orchestrator for local language models", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Log connection and dispatch activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive conversation
    Chat {
        /// Ask before running command-executing tools
        #[arg(long)]
        confirm: bool,
    },
    /// Run a single prompt to completion and print the answer
    Run {
        #[arg(short, long)]
        prompt: String,
        /// Generation budget per model turn
        #[arg(short = 'n', long)]
        max_tokens: Option<usize>,
        /// Ask before running command-executing tools
        #[arg(long)]
        confirm: bool,
    },
    /// Inspect and invoke tools directly
    Console,
    /// Serve the built-in tools to other clients over TCP
    Serve {
        #[arg(short, long, default_value_t = DEFAULT_SERVE_PORT)]
        port: u16,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load_or_default(&cli.config)?;

    match cli.command {
        Some(Commands::Chat { confirm }) => cmd_chat(&config, confirm).await,
        None => cmd_chat(&config, false).await,
        Some(Commands::Run {
            prompt,
            max_tokens,
            confirm,
        }) => cmd_run(&config, &prompt, max_tokens, confirm).await,
        Some(Commands::Console) => cmd_console(&config).await,
        Some(Commands::Serve { port }) => cmd_serve(&config, port).await,
    }
}

/// Logs go to stderr so stdout stays the conversation.
fn init_logging(verbose: bool) {
    let fallback = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Connect every configured provider. Fails only when none are usable.
async fn connect_host(config: &Config) -> Result<ToolHost> {
    let host = ToolHost::new().with_command_tools(config.command_tools());

    if config.local.enabled {
        host.add_local(LocalProvider::builtin(config.policy.clone()))
            .await?;
    }

    let specs = config.remote_specs()?;
    let report = host.connect_all(&specs).await;

    host.ensure_providers().await?;
    info!(
        connected = report.connected.len(),
        failed = report.failed.len(),
        "providers ready"
    );
    Ok(host)
}

fn build_orchestrator(
    config: &Config,
    max_tokens: Option<usize>,
    confirm: bool,
) -> Orchestrator<LlamaServerEngine> {
    let engine = LlamaServerEngine::builder(&config.engine.url)
        .template(config.engine.template)
        .temperature(config.engine.temperature)
        .build();

    let mut builder = Orchestrator::builder(engine)
        .max_rounds(config.orchestrator.max_rounds)
        .max_tokens(max_tokens.unwrap_or(config.engine.max_tokens))
        .tool_timeout(config.orchestrator.tool_timeout())
        .policy(config.policy.clone());
    if confirm || config.orchestrator.confirm_commands {
        builder = builder.approver(StdinApprover);
    }
    builder.build()
}

/// Asks on the terminal before a command runs.
struct StdinApprover;

#[async_trait]
impl Approver for StdinApprover {
    async fn approve(&self, call: &ToolCall, command: &str) -> bool {
        let prompt = format!("Run `{command}` via {}? [y/N] ", call.name);
        let answer = tokio::task::spawn_blocking(move || {
            let mut stdout = io::stdout();
            print!("{prompt}");
            stdout.flush().ok()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line).ok()?;
            Some(line)
        })
        .await;

        matches!(
            answer.ok().flatten().as_deref().map(str::trim),
            Some("y" | "Y" | "yes")
        )
    }
}

async fn cmd_chat(config: &Config, confirm: bool) -> Result<()> {
    println!("steward v{}", env!("CARGO_PKG_VERSION"));

    let host = connect_host(config).await?;
    let orchestrator = build_orchestrator(config, None, confirm);
    println!("Engine: {}", orchestrator.engine());
    println!("Tools: {}", host.schema().await.len());
    println!("Type 'quit' or Ctrl+D to exit.\n");

    let mut conversation = Conversation::with_system(&config.system_prompt);
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        let mark = conversation.len();
        match orchestrator.chat(&mut conversation, &host, input).await {
            Ok(report) => {
                print_round(conversation.since(mark));
                if report.stop == StopReason::RoundBudgetExhausted {
                    println!("(stopped after {} tool rounds)\n", report.rounds);
                }
            }
            Err(e) => eprintln!("Error: {e}\n"),
        }
    }

    println!("\nGoodbye.");
    Ok(())
}

async fn cmd_run(
    config: &Config,
    prompt: &str,
    max_tokens: Option<usize>,
    confirm: bool,
) -> Result<()> {
    let host = connect_host(config).await?;
    let orchestrator = build_orchestrator(config, max_tokens, confirm);

    let mut conversation = Conversation::with_system(&config.system_prompt);
    let report = orchestrator.chat(&mut conversation, &host, prompt).await?;

    if report.stop == StopReason::RoundBudgetExhausted {
        warn!(rounds = report.rounds, "round budget exhausted before a final answer");
    }
    if let Some(Message::Assistant { content, .. }) = conversation.last() {
        println!("{content}");
    }
    Ok(())
}

async fn cmd_console(config: &Config) -> Result<()> {
    let host = connect_host(config).await?;
    let timeout = config.orchestrator.tool_timeout();
    println!("Commands: tools, servers, tool <name> <json>, quit");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("steward> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let input = line.trim();
        let (command, rest) = input.split_once(char::is_whitespace).unwrap_or((input, ""));
        match command {
            "" => continue,
            "quit" | "exit" => break,
            "tools" => {
                for entry in host.tools().await {
                    let marker = if entry.active { "" } else { " (shadowed)" };
                    println!(
                        "  {}/{}{marker}  {}",
                        entry.provider, entry.descriptor.name, entry.descriptor.description
                    );
                }
            }
            "servers" => {
                for provider in host.providers().await {
                    println!(
                        "  {:<16} {:<32} {} tools",
                        provider.name, provider.endpoint, provider.tools
                    );
                }
            }
            "tool" => {
                let rest = rest.trim();
                let (name, payload) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                if name.is_empty() {
                    println!("usage: tool <name> <json>");
                    continue;
                }
                let arguments = match parse_arguments(payload) {
                    Ok(args) => args,
                    Err(e) => {
                        println!("Error: invalid arguments: {e}");
                        continue;
                    }
                };
                match host.call(name, &arguments, timeout).await {
                    Ok(output) => println!("{output}"),
                    Err(e) => println!("Error: {e}"),
                }
            }
            other => println!("unknown command: {other}"),
        }
    }

    Ok(())
}

fn parse_arguments(payload: &str) -> serde_json::Result<Value> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(payload)
}

async fn cmd_serve(config: &Config, port: u16) -> Result<()> {
    let provider = LocalProvider::builtin(config.policy.clone());
    let server = Server::new(Arc::new(provider), "steward", env!("CARGO_PKG_VERSION"));
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    println!("Serving built-in tools on port {port}");
    server.listen(listener).await?;
    Ok(())
}

/// Print what happened since the user's message: tool traffic, then the answer.
fn print_round(messages: &[Message]) {
    for message in messages {
        match message {
            Message::Assistant { content, tool_calls } if !tool_calls.is_empty() => {
                if !content.is_empty() {
                    println!("\n{content}");
                }
                for call in tool_calls {
                    println!("  -> {}({})", call.name, call.arguments);
                }
            }
            Message::Assistant { content, .. } => println!("\n{content}\n"),
            Message::Tool { content, .. } => println!("  <- {}", preview(content)),
            _ => {}
        }
    }
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 200;
    let first = text.lines().next().unwrap_or_default();
    match first.char_indices().nth(LIMIT) {
        Some((end, _)) => format!("{}...", &first[..end]),
        None if text.lines().nth(1).is_some() => format!("{first} ..."),
        None => first.to_string(),
    }
}
