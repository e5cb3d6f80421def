//! Convoy CLI — entry point.
//!
//!
//! # Commands
//!
//! - `convoy agent [-m MESSAGE] [-s SESSION]` — main chat (single-shot or REPL)
//! - `convoy onboard` — initialize workspace
//! - `convoy status` — show provider and workspace status
//! - `convoy gateway` — run the agent loop + scheduler as a long-lived process
//! - `convoy cron ...` — manage scheduled tasks

mod helpers;
mod onboard;
mod repl;
mod status;
mod gateway;
mod cron_cmd;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use convoy_agent::{AgentLoop, ExecToolConfig};
use convoy_core::bus::queue::MessageBus;
use convoy_core::utils::get_data_path;
use convoy_core::AgentLoopConfig;
use convoy_cron::CronService;
use convoy_providers::http_provider::create_provider;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// 🦀 Convoy — Ultra-lightweight AI assistant in Rust
#[derive(Parser)]
#[command(name = "convoy", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the AI agent (single-shot or interactive REPL)
    Agent {
        /// Single message (non-interactive). Omit for REPL mode.
        #[arg(short, long)]
        message: Option<String>,

        /// Session identifier (format: "channel:id")
        #[arg(short, long, default_value = "cli:default")]
        session: String,

        /// Disable Markdown rendering in output
        #[arg(long, default_value_t = false)]
        no_markdown: bool,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Initialize the workspace
    Onboard,

    /// Show provider and workspace status
    Status,

    /// Start the gateway (agent loop + scheduler)
    Gateway {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Manage scheduled tasks
    Cron {
        #[command(subcommand)]
        action: cron_cmd::CronCommands,
    },
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Agent {
            message,
            session,
            no_markdown,
            logs,
        } => {
            init_logging(logs);
            run_agent(message, session, !no_markdown, logs).await
        }
        Commands::Onboard => onboard::run(),
        Commands::Status => status::run(),
        Commands::Gateway { logs } => {
            init_logging(logs);
            gateway::run().await
        }
        Commands::Cron { action } => {
            init_logging(false);
            cron_cmd::dispatch(action).await
        }
    }
}

// ─────────────────────────────────────────────
// Agent command
// ─────────────────────────────────────────────

async fn run_agent(
    message: Option<String>,
    session_id: String,
    render_markdown: bool,
    show_logs: bool,
) -> Result<()> {
    let agent_loop = build_agent_loop().await?;

    match message {
        Some(msg) => {
            // Single-shot mode
            info!(session = %session_id, "processing single message");
            let response = agent_loop
                .process_direct(&msg)
                .await
                .context("agent processing failed")?;
            helpers::print_response(&response, render_markdown);
        }
        None => {
            // Interactive REPL mode
            repl::run(agent_loop, &session_id, render_markdown, show_logs).await?;
        }
    }

    Ok(())
}

/// Build an `AgentLoop` reading runtime settings from the environment —
/// there is no config file, so model, workspace, and provider keys all
/// come from `CONVOY_*` / provider-specific env vars.
///
/// Also builds a `CronService` over the default on-disk store, shared with
/// this process alone, so the schedule tool works from single-shot and REPL
/// runs too — just without a live timer loop firing tasks in the background.
pub async fn build_agent_loop() -> Result<AgentLoop> {
    let workspace = helpers::resolve_workspace();
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace: {}", workspace.display()))?;

    let model = helpers::resolve_model();
    let providers_map = helpers::providers_from_env();
    let provider = create_provider(&model, &providers_map).map_err(|e| anyhow::anyhow!(e))?;

    let restrict_to_workspace = helpers::resolve_restrict_to_workspace();

    let bus = Arc::new(MessageBus::new());
    let cron_store_path = get_data_path().join("cron").join("jobs.json");
    let cron_service = Arc::new(CronService::new(bus.clone(), Some(cron_store_path)));
    if let Err(e) = cron_service.load().await {
        tracing::warn!(error = %e, "failed to load cron store");
    }

    let agent_loop = AgentLoop::new(
        bus,
        Arc::new(provider),
        workspace,
        Some(model),
        Some(AgentLoopConfig::default()),
        None, // uses defaults for temperature/max_tokens
        None, // WebSearchTool falls back to BRAVE_API_KEY itself
        Some(ExecToolConfig::default()),
        restrict_to_workspace,
        None, // default JsonlSessionStorage under workspace/sessions
        None, // default agent name "Convoy"
        Some(cron_service),
    );

    Ok(agent_loop)
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("convoy=debug,info")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
