// crates/grapevine-daemon/src/main.rs
//
// Binary entrypoint for the Grapevine trust pipeline.
//
// Parses CLI arguments, loads configuration, initializes tracing, wires
// Ctrl-C to the cooperative shutdown signal, runs the requested stages, and
// prints a JSON run summary whether or not the stages succeeded.

mod config;
mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config::GrapevineConfig;
use grapevine_core::relationship::RelationshipKind;
use grapevine_core::shutdown::{shutdown_channel, ShutdownSignal};
use pipeline::RunSummary;

/// Grapevine: relationship reconciliation, GrapeRank trust scoring, and
/// publication fan-out.
#[derive(Parser, Debug)]
#[command(name = "grapevine", version = "0.1.0", about = "Grapevine trust pipeline")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "~/.grapevine/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Diff source snapshots against the mirror and write delta streams.
    Reconcile {
        /// Only this kind (follows, mutes or reports). Default: all three.
        #[arg(long)]
        kind: Option<RelationshipKind>,

        /// Directory for the delta files. Default: <data_dir>/deltas.
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Aggregate ratings and run GrapeRank, writing scorecards.
    Calculate,

    /// Publish finalized events to the configured relay endpoints.
    Publish {
        /// JSON Lines file of signed events. Default: <data_dir>/events.jsonl.
        #[arg(long)]
        events: Option<PathBuf>,
    },

    /// Reconcile all three kinds, then calculate.
    Cycle,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Configuration is loaded before tracing so its log level can serve as
    // the filter default; the outcome is logged once tracing is up.
    let loaded = GrapevineConfig::load(&args.config);
    let default_level = match &loaded {
        Ok(cfg) => cfg.log_level.clone(),
        Err(_) => "info".to_string(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&default_level)),
        )
        .init();

    let daemon_config = match loaded {
        Ok(cfg) => {
            tracing::info!("Loaded configuration from {}", args.config);
            cfg
        }
        Err(e) => {
            tracing::warn!("{}. Using defaults.", e);
            GrapevineConfig::default()
        }
    };

    if let Err(e) = daemon_config.validate() {
        tracing::error!("{}", e);
        return Err(e.into());
    }

    tracing::info!("Grapevine v0.1.0");
    tracing::info!("Data directory: {}", daemon_config.data_dir().display());

    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal, finishing in-flight work");
            trigger.trigger();
        }
    });

    let mut summary = RunSummary::default();
    let result = run(&args.command, &daemon_config, &shutdown, &mut summary).await;
    if let Err(e) = &result {
        tracing::error!("Run failed: {}", e);
        summary.error = Some(e.to_string());
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    result.map_err(Into::into)
}

async fn run(
    command: &Command,
    config: &GrapevineConfig,
    shutdown: &ShutdownSignal,
    summary: &mut RunSummary,
) -> Result<(), grapevine_core::GrapevineError> {
    match command {
        Command::Reconcile { kind, out_dir } => {
            let kinds = match kind {
                Some(kind) => vec![*kind],
                None => RelationshipKind::ALL.to_vec(),
            };
            let out_dir = out_dir.clone().unwrap_or_else(|| config.deltas_dir());
            pipeline::reconcile(config, &kinds, &out_dir, shutdown, summary).await
        }
        Command::Calculate => pipeline::calculate(config, shutdown, summary).await,
        Command::Publish { events } => {
            let events = events.clone().unwrap_or_else(|| config.events_path());
            pipeline::publish(config, &events, shutdown, summary).await
        }
        Command::Cycle => {
            pipeline::reconcile(
                config,
                &RelationshipKind::ALL,
                &config.deltas_dir(),
                shutdown,
                summary,
            )
            .await?;
            if shutdown.is_triggered() {
                tracing::info!("Shutdown requested, skipping calculation");
                return Ok(());
            }
            pipeline::calculate(config, shutdown, summary).await
        }
    }
}
