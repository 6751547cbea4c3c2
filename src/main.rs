//! # ExecPilot: Autonomous Task Orchestration
//!
//! Runs the adaptive scheduler against a local JSON data directory.
//!
//! Usage:
//!   execpilot run                  # Start the scheduler until Ctrl-C
//!   execpilot once                 # Run one cycle, print the report
//!   execpilot digest <user>        # Send a digest now
//!   execpilot urgent <user>        # Send urgent-task alerts now
//!   execpilot config               # Print the effective configuration

mod local;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use execpilot_core::ExecPilotConfig;
use execpilot_scheduler::{
    AdaptiveScheduler, Collaborators, NotificationDeduplicator, NotificationDispatcher, PerUserTaskRunner,
};
use tracing_subscriber::EnvFilter;

use crate::local::{LocalWorkspace, OutboxEmailChannel, WebhookChatChannel};

#[derive(Parser)]
#[command(
    name = "execpilot",
    version,
    about = "🧭 ExecPilot: autonomous task orchestration and notifications"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: ~/.execpilot/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Data directory (overrides local.data_dir)
    #[arg(long, global = true)]
    data_dir: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Start the scheduler and run until Ctrl-C
    Run,
    /// Run a single cycle and print its report as JSON
    Once,
    /// Send a digest to one user now
    Digest { user: String },
    /// Send urgent-task alerts to one user now
    Urgent { user: String },
    /// Print the effective configuration as TOML
    Config,
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn load_config(cli: &Cli) -> Result<ExecPilotConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let path = expand_path(path);
            ExecPilotConfig::load_from(&path).with_context(|| format!("loading {}", path.display()))?
        }
        None => ExecPilotConfig::load().context("loading default config")?,
    };
    if let Some(dir) = &cli.data_dir {
        config.local.data_dir = dir.clone();
    }
    Ok(config)
}

fn build_scheduler(config: &ExecPilotConfig) -> AdaptiveScheduler {
    let workspace = Arc::new(LocalWorkspace::new(expand_path(&config.local.data_dir)));

    let mut dispatcher = NotificationDispatcher::new(&config.dispatch)
        .with_email(Arc::new(OutboxEmailChannel::new(expand_path(&config.local.outbox_dir))));
    if let Some(url) = config.local.chat_webhook_url.as_deref().filter(|u| !u.is_empty()) {
        dispatcher = dispatcher.with_chat(Arc::new(WebhookChatChannel::new(url)));
    }

    let runner = PerUserTaskRunner::new(
        Collaborators::single(workspace.clone()),
        Arc::new(dispatcher),
        Arc::new(NotificationDeduplicator::from_config(&config.notifications)),
        config,
    );
    AdaptiveScheduler::new(workspace, runner, &config.scheduler)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "execpilot=debug,execpilot_scheduler=debug,execpilot_core=debug"
    } else {
        "execpilot=info,execpilot_scheduler=info,execpilot_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(&cli)?;

    match cli.command {
        Command::Config => {
            print!("{}", config.to_toml()?);
        }
        Command::Once => {
            let scheduler = build_scheduler(&config);
            let report = scheduler.run_once().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Digest { user } => {
            let scheduler = build_scheduler(&config);
            let outcome = scheduler.trigger_digest(&user).await?;
            println!("📰 Digest for {user}: {outcome}");
        }
        Command::Urgent { user } => {
            let scheduler = build_scheduler(&config);
            let outcome = scheduler.trigger_urgent_tasks(&user).await?;
            println!("🚨 Urgent tasks for {user}: {outcome}");
        }
        Command::Run => {
            let scheduler = build_scheduler(&config);
            println!("🧭 ExecPilot v{}", env!("CARGO_PKG_VERSION"));
            println!("   📂 Data Dir:  {}", expand_path(&config.local.data_dir).display());
            println!("   📤 Outbox:    {}", expand_path(&config.local.outbox_dir).display());
            println!(
                "   💬 Chat:      {}",
                config.local.chat_webhook_url.as_deref().unwrap_or("(not configured)")
            );
            println!(
                "   ⏱️  Interval:  {} min (bounds {}-{} min)",
                config.scheduler.interval_minutes,
                config.scheduler.min_interval_minutes,
                config.scheduler.max_interval_minutes
            );
            println!();

            scheduler.start();
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            tracing::info!("🛑 Shutdown requested, finishing current cycle");
            scheduler.stop().await;

            let status = scheduler.status();
            println!("✅ Stopped after {} cycles", status.cycles_completed);
            for (kind, healthy, failures) in scheduler.runner().dispatcher().health_status() {
                let mark = if healthy { "🟢" } else { "🔴" };
                println!("   {mark} {kind}: {failures} consecutive failures");
            }
        }
    }

    Ok(())
}
