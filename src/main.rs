#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::needless_pass_by_value,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::Result;
use async_trait::async_trait;
use chatcourier::agent::{AgentRunOutcome, AgentRunRequest, AgentRuntime, HttpAgentRuntime, ReplyPayload};
use chatcourier::channels::{self, CliChannel};
use chatcourier::engine::{InboundMessage, TurnError};
use chatcourier::session::SessionStore;
use chatcourier::{Config, Engine};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "chatcourier", version, about = "Session-aware chat front-end for an external agent runtime")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive local chat through the engine
    Start,
    /// Show the status of one session key
    Status {
        /// Session key (defaults to the shared main session)
        #[arg(default_value = "main")]
        key: String,
    },
    /// List all stored sessions
    Sessions,
}

/// Stand-in runtime used when `[agent].endpoint_url` is not configured, so
/// `start` still exercises the whole pipeline locally.
struct OfflineRuntime;

#[async_trait]
impl AgentRuntime for OfflineRuntime {
    async fn run(&self, request: AgentRunRequest) -> Result<AgentRunOutcome> {
        Ok(AgentRunOutcome {
            payloads: vec![ReplyPayload::text(format!(
                "No agent runtime configured (set [agent].endpoint_url). \
                 Would have sent {} chars to {}/{}.",
                request.prompt.chars().count(),
                request.provider,
                request.model
            ))],
            ..AgentRunOutcome::default()
        })
    }
}

fn build_engine(config: Config) -> Result<Engine> {
    let store = Arc::new(SessionStore::new(config.session_store_path()));
    let agent: Arc<dyn AgentRuntime> = match &config.agent.endpoint_url {
        Some(url) => Arc::new(HttpAgentRuntime::new(
            url.clone(),
            Duration::from_secs(config.effective_timeout_secs()),
        )?),
        None => Arc::new(OfflineRuntime),
    };
    Ok(Engine::new(config, store, agent))
}

async fn run_start(engine: Engine) -> Result<()> {
    let channel = CliChannel;
    let cancel = CancellationToken::new();
    println!("chatcourier interactive session. Ctrl-D to exit.");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let msg = InboundMessage::direct("cli", "operator", "operator", line);
        match engine.handle_message(msg, cancel.clone()).await {
            Ok(Some(reply)) => {
                channels::deliver(&channel, "operator", &reply.payloads).await?;
                if reply.restart_requested {
                    println!("(restart requested; exiting)");
                    break;
                }
            }
            Ok(None) => {}
            Err(TurnError::Cancelled) => println!("(turn cancelled)"),
            Err(TurnError::Upstream(e)) => eprintln!("Error: {e:#}"),
        }
    }
    Ok(())
}

async fn run_sessions(engine: Engine) -> Result<()> {
    let sessions = engine.store().list().await?;
    if sessions.is_empty() {
        println!("No sessions stored.");
        return Ok(());
    }
    for (key, record) in sessions {
        let updated = chrono::DateTime::from_timestamp_millis(record.updated_at)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| record.updated_at.to_string());
        println!("{key}  {}  updated {updated}", record.session_id);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respects RUST_LOG, defaults to info.
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::load_or_init()?;
    let engine = build_engine(config)?;

    match cli.command {
        Commands::Start => run_start(engine).await,
        Commands::Status { key } => {
            println!("{}", engine.status_text(&key).await?);
            Ok(())
        }
        Commands::Sessions => run_sessions(engine).await,
    }
}
