//! # deskclaw — schedule loop for terminal assistant sessions
//!
//! Reads a human-edited schedule file, polls once a minute, and dispatches
//! due entries: inject text into a live tmux session, spawn a new assistant
//! session, or run a registered in-process job.
//!
//! Usage:
//!   deskclaw                          # Run with ~/.deskclaw/config.toml
//!   deskclaw -s ./schedule.md         # Explicit schedule file
//!   deskclaw --poll-secs 20 -v        # Faster polling, verbose logs

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use deskclaw_core::config::DeskclawConfig;
use deskclaw_gateway::AppState;
use deskclaw_scheduler::{
    Dispatcher, EventBus, HistoryStore, JobRegistry, Scheduler, SpawnPolicy,
};
use deskclaw_session::TmuxBridge;

#[derive(Parser)]
#[command(
    name = "deskclaw",
    version,
    about = "🗓️ deskclaw — schedule loop for terminal assistant sessions"
)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "~/.deskclaw/config.toml")]
    config: String,

    /// Schedule file path (overrides config)
    #[arg(short, long)]
    schedule: Option<String>,

    /// Poll interval in seconds (overrides config)
    #[arg(long)]
    poll_secs: Option<u64>,

    /// Control API port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Disable the control API
    #[arg(long)]
    no_gateway: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "deskclaw=debug,tower_http=debug"
    } else {
        "deskclaw=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    // Load config, then apply CLI overrides.
    let config_path = PathBuf::from(expand_path(&cli.config));
    let mut config = if config_path.exists() {
        DeskclawConfig::load_from(&config_path)?
    } else {
        DeskclawConfig::default()
    };
    if let Some(schedule) = cli.schedule {
        config.scheduler.schedule_path = schedule;
    }
    if let Some(poll_secs) = cli.poll_secs {
        config.scheduler.poll_secs = poll_secs;
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    config.scheduler.schedule_path = expand_path(&config.scheduler.schedule_path);
    config.scheduler.history_db = expand_path(&config.scheduler.history_db);

    tracing::info!(
        "🗓️ deskclaw v{} — schedule: {}",
        env!("CARGO_PKG_VERSION"),
        config.scheduler.schedule_path
    );

    // Wire the pieces: history, session bridge, jobs, dispatcher, engine.
    let history = Arc::new(
        HistoryStore::open(Path::new(&config.scheduler.history_db))
            .map_err(anyhow::Error::msg)?,
    );
    let bridge = Arc::new(TmuxBridge::new(&config.session));
    let jobs = Arc::new(builtin_jobs(history.clone()));
    let dispatcher = Dispatcher::new(
        bridge,
        jobs,
        SpawnPolicy::from_config(&config.scheduler.spawn_policy),
        Duration::from_secs(config.scheduler.dispatch_timeout_secs),
    );
    let alert_webhook = if config.notify.webhook_url.is_empty() {
        None
    } else {
        Some(config.notify.webhook_url.clone())
    };
    let scheduler = Arc::new(Scheduler::new(
        &config.scheduler,
        history,
        dispatcher,
        EventBus::default(),
        alert_webhook,
    ));

    // A schedule we cannot read on startup is fatal — running silently
    // with an empty schedule is not.
    scheduler.load()?;

    if config.gateway.enabled && !cli.no_gateway {
        let state = AppState {
            scheduler: scheduler.clone(),
            start_time: std::time::Instant::now(),
        };
        let host = config.gateway.host.clone();
        let port = config.gateway.port;
        tokio::spawn(async move {
            if let Err(e) = deskclaw_gateway::serve(state, &host, port).await {
                tracing::error!("Gateway failed: {e}");
            }
        });
    }

    let loop_scheduler = scheduler.clone();
    let loop_handle = tokio::spawn(async move { loop_scheduler.run().await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    scheduler.shutdown();
    let _ = loop_handle.await;
    Ok(())
}

/// Built-in jobs available to `exec` lines out of the box. External
/// modules register theirs here before the loop starts.
fn builtin_jobs(history: Arc<HistoryStore>) -> JobRegistry {
    let mut registry = JobRegistry::new();

    registry.register_fn("log", |payload| {
        tracing::info!("📝 {payload}");
        Ok(())
    });

    // Retention sweep over the execution history. Payload is the age in
    // days, e.g. "0 4 * * * exec history-prune 30".
    registry.register_fn("history-prune", move |payload| {
        let days: u32 = payload.trim().parse().unwrap_or(30);
        let deleted = history.prune_older_than(days)?;
        tracing::info!("🧹 Pruned {deleted} execution records older than {days} days");
        Ok(())
    });

    registry
}
