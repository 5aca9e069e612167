// crates/grapevine-daemon/src/pipeline.rs
//
// Stage runners behind the CLI subcommands. Each stage builds its
// collaborators from the validated configuration and adds its report to the
// run summary, so a summary exists even when a later stage fails.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use grapevine_core::error::GrapevineError;
use grapevine_core::relationship::RelationshipKind;
use grapevine_core::scorecard::CalculationRun;
use grapevine_core::shutdown::ShutdownSignal;
use grapevine_core::traits::RelationshipSource;
use grapevine_publish::{read_events, PublishReport, Publisher, WebSocketTransport};
use grapevine_reputation::{AggregateStats, GrapeRank, RatingsAggregator};
use grapevine_store::{JsonScorecardStore, ShardDirectory};
use grapevine_sync::{reconcile_all, ReconcileReport, Reconciler};

use crate::config::GrapevineConfig;

/// Everything a run did, printed as JSON when the binary exits.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reconcile: Vec<ReconcileReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregateStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculation: Option<CalculationRun>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reconcile source against mirror for each kind, writing delta files to
/// `out_dir`. Stops early if shutdown fires.
pub async fn reconcile(
    config: &GrapevineConfig,
    kinds: &[RelationshipKind],
    out_dir: &Path,
    shutdown: &ShutdownSignal,
    summary: &mut RunSummary,
) -> Result<(), GrapevineError> {
    let reconciler = Reconciler::new(config.reconcile_config()?);
    let snapshots: Vec<(Arc<dyn RelationshipSource>, Arc<dyn RelationshipSource>)> = kinds
        .iter()
        .map(|&kind| {
            let source: Arc<dyn RelationshipSource> =
                Arc::new(ShardDirectory::new(config.source_dir(kind), kind));
            let mirror: Arc<dyn RelationshipSource> =
                Arc::new(ShardDirectory::new(config.mirror_dir(kind), kind));
            (source, mirror)
        })
        .collect();

    tracing::info!("Writing delta streams to {}", out_dir.display());
    summary.reconcile = reconcile_all(&reconciler, snapshots, out_dir, shutdown).await?;
    Ok(())
}

/// Aggregate ratings from the source snapshots and run GrapeRank, persisting
/// scorecards and run metadata.
pub async fn calculate(
    config: &GrapevineConfig,
    shutdown: &ShutdownSignal,
    summary: &mut RunSummary,
) -> Result<(), GrapevineError> {
    let root = config.root_pubkey()?;
    let aggregator = RatingsAggregator::new(config.rating_curve.clone(), root)?
        .with_context(config.context.clone());
    let engine = GrapeRank::new(config.graperank_params()?, root)?;

    let snapshot = |kind| ShardDirectory::new(config.source_dir(kind), kind);
    let follows = snapshot(RelationshipKind::Follow);
    let mutes = snapshot(RelationshipKind::Mute);
    let reports = snapshot(RelationshipKind::Report);

    let (ratings, stats) = aggregator
        .aggregate_snapshots(&follows, &mutes, &reports, shutdown)
        .await?;
    summary.aggregation = Some(stats);

    let store = JsonScorecardStore::new(config.scorecards_path(), config.metadata_path());
    let outcome = engine.run_with_sink(ratings, &store, shutdown).await?;
    tracing::info!(
        "Scorecards written to {} ({} entries)",
        store.scorecards_path().display(),
        outcome.run.total_scorecards
    );
    summary.calculation = Some(outcome.run);
    Ok(())
}

/// Publish every event in `events_path` to the configured endpoints.
pub async fn publish(
    config: &GrapevineConfig,
    events_path: &Path,
    shutdown: &ShutdownSignal,
    summary: &mut RunSummary,
) -> Result<(), GrapevineError> {
    let publisher = Publisher::new(
        config.publish_config()?,
        Arc::new(WebSocketTransport::new(config.connect_timeout())),
    )?;
    let events = read_events(events_path).await?;
    let report = publisher.publish_all(events, shutdown).await;
    if !report.failures.is_empty() {
        tracing::warn!("{} event/endpoint pairs failed permanently", report.failures.len());
    }
    summary.publish = Some(report);
    Ok(())
}
