//! streamlagd: the streamlag daemon.
//!
//! Loads triggers from a TOML file and serves their metrics over HTTP so
//! the orchestration layer can poll them on its own cadence.
//!
//! # Usage
//!
//! ```text
//! streamlagd serve --config /etc/streamlag/streamlagd.toml
//! streamlagd poll  --config streamlagd.toml     # one poll per trigger, JSON lines
//! streamlagd check --config streamlagd.toml     # validate, no network
//! ```

mod config;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use streamlag_api::{ApiState, build_router};
use streamlag_core::ReplicaBounds;
use streamlag_scaler::{PollOutcome, SentinelStreamScaler, TriggerRegistry};

use crate::config::DaemonConfig;

#[derive(Parser)]
#[command(name = "streamlagd", about = "Redis sentinel stream-lag trigger daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Serve trigger metrics over HTTP.
    Serve {
        /// Path to streamlagd.toml.
        #[arg(long, short)]
        config: PathBuf,

        /// Override `server.listen`.
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Poll every trigger once and print the results as JSON lines.
    Poll {
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Validate the configuration without touching the network.
    Check {
        #[arg(long, short)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve { config, listen } => run_serve(&config, listen).await,
        Command::Poll { config } => run_poll(&config).await,
        Command::Check { config } => run_check(&config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,streamlagd=debug,streamlag_scaler=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Triggers plus the replica bounds configured for them.
struct Loaded {
    config: DaemonConfig,
    registry: TriggerRegistry,
    replicas: HashMap<String, ReplicaBounds>,
}

/// Parse the config and build every scaler. No network I/O.
fn load(path: &Path) -> anyhow::Result<Loaded> {
    let config = DaemonConfig::from_file(path)?;
    let env = |var: &str| std::env::var(var).ok();

    let mut registry = TriggerRegistry::new();
    let mut replicas = HashMap::new();
    for (index, trigger) in config.triggers.iter().enumerate() {
        let meta = trigger.to_metadata(index, &env)?;
        let scaler = SentinelStreamScaler::from_metadata(&meta)
            .with_context(|| format!("trigger `{}`", trigger.name))?;
        registry.register(trigger.name.clone(), scaler)?;
        if let Some(bounds) = trigger.replicas {
            replicas.insert(trigger.name.clone(), bounds);
        }
    }

    Ok(Loaded {
        config,
        registry,
        replicas,
    })
}

async fn run_serve(path: &Path, listen: Option<SocketAddr>) -> anyhow::Result<()> {
    info!(config = %path.display(), "streamlag daemon starting");

    let Loaded {
        config,
        registry,
        replicas,
    } = load(path)?;
    if registry.is_empty() {
        warn!(config = %path.display(), "no triggers configured");
    }
    info!(triggers = registry.len(), "triggers loaded");

    let state = ApiState::new(registry.clone())
        .with_poll_timeout(config.server.poll_timeout()?)
        .with_replicas(replicas);
    let router = build_router(state);

    // ── Start API server ───────────────────────────────────────

    let addr = listen.unwrap_or(config.server.listen);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "API server listening");

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    registry.shutdown().await;
    info!("streamlag daemon stopped");
    Ok(())
}

async fn run_poll(path: &Path) -> anyhow::Result<()> {
    let Loaded {
        config,
        registry,
        replicas,
    } = load(path)?;
    let poll_timeout = config.server.poll_timeout()?;

    let mut misconfigured = 0usize;
    for name in registry.names() {
        let Some(trigger) = registry.get(name) else {
            continue;
        };

        let polled = tokio::time::timeout(poll_timeout, async {
            let mut trigger = trigger.lock().await;
            let outcome = trigger.poll().await;
            (outcome, trigger.snapshot())
        })
        .await;

        let line = match polled {
            Ok((Ok(outcome), snapshot)) => {
                let verdict = outcome.verdict();
                let error = match &outcome {
                    PollOutcome::Degraded { error, .. } => Some(error.to_string()),
                    PollOutcome::Measured { .. } => None,
                };
                serde_json::json!({
                    "trigger": name,
                    "metricName": snapshot.metric_name,
                    "metricValue": verdict.metric_value,
                    "active": verdict.active,
                    "lag": outcome.lag().map(|l| l.get()),
                    "stale": outcome.is_stale(),
                    "projectedReplicas": replicas.get(name).map(|b| {
                        streamlag_core::project_replicas(&verdict, snapshot.thresholds.lag_count, *b)
                    }),
                    "error": error,
                })
            }
            Ok((Err(e), _)) => {
                misconfigured += 1;
                serde_json::json!({ "trigger": name, "error": e.to_string(), "misconfigured": true })
            }
            Err(_) => serde_json::json!({
                "trigger": name,
                "error": format!("poll exceeded {poll_timeout:?}"),
                "stale": true,
            }),
        };
        println!("{line}");
    }

    registry.shutdown().await;
    if misconfigured > 0 {
        bail!("{misconfigured} trigger(s) misconfigured");
    }
    Ok(())
}

fn run_check(path: &Path) -> anyhow::Result<()> {
    let Loaded { registry, .. } = load(path)?;
    for name in registry.names() {
        println!("{name}: ok");
    }
    info!(triggers = registry.len(), "configuration valid");
    Ok(())
}
