// crates/grapevine-sync/src/reconcile.rs
//
// Relationship reconciliation: compute the add/delete edge sets that bring a
// Mirror snapshot in line with a Source snapshot.
//
// Raters are processed independently by a fixed-size pool of tasks. Each
// task loads one rater's shard from both sides, diffs them, and hands the
// resulting batch to the delta sink. At most `concurrency` shard pairs are
// in memory at once.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::io::AsyncWrite;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use grapevine_core::error::GrapevineError;
use grapevine_core::relationship::{
    DeltaOperation, Pubkey, RaterShard, RelationshipDelta, RelationshipKind,
};
use grapevine_core::shutdown::ShutdownSignal;
use grapevine_core::traits::RelationshipSource;

use crate::sink::{DeltaSender, DeltaSink, SinkTotals};

/// Configuration for a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileConfig {
    /// Maximum rater shards compared concurrently. Default: 10.
    pub concurrency: usize,
    /// Rater batches queued in the delta sink before producers block. Default: 1024.
    pub sink_capacity: usize,
    /// Log progress every this many raters. Default: 10_000.
    pub progress_interval: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            sink_capacity: 1024,
            progress_interval: 10_000,
        }
    }
}

impl ReconcileConfig {
    pub fn validate(&self) -> Result<(), GrapevineError> {
        if self.concurrency == 0 {
            return Err(GrapevineError::Configuration(
                "reconcile concurrency must be at least 1".to_string(),
            ));
        }
        if self.sink_capacity == 0 {
            return Err(GrapevineError::Configuration(
                "reconcile sink_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Summary of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub kind: RelationshipKind,
    pub raters_processed: u64,
    pub malformed_shards: u64,
    pub adds: u64,
    pub deletes: u64,
    /// True if the shutdown signal stopped the run before every rater was seen.
    pub cancelled: bool,
}

/// Outcome of comparing one rater's shards.
#[derive(Debug, Default)]
struct RaterOutcome {
    adds: u64,
    deletes: u64,
    malformed: u64,
}

/// Compares two snapshots of the same relationship kind.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Diff `source` against `mirror`, pushing batches into `sender`.
    ///
    /// Malformed or unreadable shards are logged and treated as empty. A
    /// closed sink aborts the run. The shutdown signal is checked before
    /// each rater is dispatched; raters already in flight finish.
    pub async fn reconcile(
        &self,
        source: Arc<dyn RelationshipSource>,
        mirror: Arc<dyn RelationshipSource>,
        sender: DeltaSender,
        shutdown: &ShutdownSignal,
    ) -> Result<ReconcileReport, GrapevineError> {
        self.config.validate()?;
        let kind = source.kind();
        if mirror.kind() != kind {
            return Err(GrapevineError::Configuration(format!(
                "cannot reconcile {} source against {} mirror",
                kind,
                mirror.kind()
            )));
        }

        let mut raters: BTreeSet<Pubkey> = source.list_raters().await?.into_iter().collect();
        raters.extend(mirror.list_raters().await?);
        let total = raters.len();
        tracing::info!("Reconciling {} snapshots: {} raters", kind, total);

        let mut report = ReconcileReport {
            kind,
            raters_processed: 0,
            malformed_shards: 0,
            adds: 0,
            deletes: 0,
            cancelled: false,
        };

        let permits = Arc::new(Semaphore::new(self.config.concurrency));
        let mut workers: JoinSet<Result<RaterOutcome, GrapevineError>> = JoinSet::new();

        for rater in raters {
            if shutdown.is_triggered() {
                tracing::warn!("Shutdown requested; stopping {} reconciliation", kind);
                report.cancelled = true;
                break;
            }

            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| GrapevineError::Cancelled("worker pool closed".to_string()))?;

            // Collect finished workers so the join set stays bounded.
            while let Some(joined) = workers.try_join_next() {
                self.absorb(&mut report, joined, total)?;
            }

            let source = source.clone();
            let mirror = mirror.clone();
            let sender = sender.clone();
            workers.spawn(async move {
                let outcome =
                    compare_rater(kind, &rater, source.as_ref(), mirror.as_ref(), &sender).await;
                drop(permit);
                outcome
            });
        }

        while let Some(joined) = workers.join_next().await {
            self.absorb(&mut report, joined, total)?;
        }

        tracing::info!(
            "Reconciled {}: {} raters, {} to add, {} to delete, {} malformed shards",
            kind,
            report.raters_processed,
            report.adds,
            report.deletes,
            report.malformed_shards
        );
        Ok(report)
    }

    fn absorb(
        &self,
        report: &mut ReconcileReport,
        joined: Result<Result<RaterOutcome, GrapevineError>, tokio::task::JoinError>,
        total: usize,
    ) -> Result<(), GrapevineError> {
        let outcome = joined
            .map_err(|e| GrapevineError::Sink(format!("reconcile worker panicked: {}", e)))??;
        report.raters_processed += 1;
        report.adds += outcome.adds;
        report.deletes += outcome.deletes;
        report.malformed_shards += outcome.malformed;

        let interval = self.config.progress_interval as u64;
        if interval > 0 && report.raters_processed % interval == 0 {
            tracing::info!(
                "{} reconciliation progress: {}/{} raters",
                report.kind,
                report.raters_processed,
                total
            );
        }
        Ok(())
    }

    /// Run a reconciliation with its own delta sink over the given writers.
    ///
    /// Returns the report and the writers once everything is flushed. A sink
    /// write failure takes precedence over the "sink stopped" error the
    /// producers observe.
    pub async fn reconcile_to_writers<A, D>(
        &self,
        source: Arc<dyn RelationshipSource>,
        mirror: Arc<dyn RelationshipSource>,
        adds: A,
        deletes: D,
        shutdown: &ShutdownSignal,
    ) -> Result<(ReconcileReport, A, D), GrapevineError>
    where
        A: AsyncWrite + Unpin + Send + 'static,
        D: AsyncWrite + Unpin + Send + 'static,
    {
        let sink = DeltaSink::spawn(adds, deletes, self.config.sink_capacity);
        let result = self.reconcile(source, mirror, sink.sender(), shutdown).await;
        let finished = sink.finish().await;

        match (result, finished) {
            (Ok(report), Ok((totals, adds, deletes))) => {
                debug_assert_eq!(
                    totals,
                    SinkTotals {
                        adds: report.adds,
                        deletes: report.deletes
                    }
                );
                Ok((report, adds, deletes))
            }
            (_, Err(sink_err)) => Err(sink_err),
            (Err(e), Ok(_)) => Err(e),
        }
    }
}

/// Load one side's shard, treating unreadable shards as empty.
async fn load_shard(
    side: &str,
    kind: RelationshipKind,
    rater: &str,
    snapshot: &dyn RelationshipSource,
    malformed: &mut u64,
) -> RaterShard {
    match snapshot.read_shard(rater).await {
        Ok(Some(shard)) => shard,
        Ok(None) => RaterShard::empty(kind),
        Err(e) => {
            tracing::warn!(
                "Treating {} {} shard for rater {} as empty: {}",
                side,
                kind,
                rater,
                e
            );
            *malformed += 1;
            RaterShard::empty(kind)
        }
    }
}

async fn compare_rater(
    kind: RelationshipKind,
    rater: &str,
    source: &dyn RelationshipSource,
    mirror: &dyn RelationshipSource,
    sender: &DeltaSender,
) -> Result<RaterOutcome, GrapevineError> {
    let mut outcome = RaterOutcome::default();
    let source_shard = load_shard("source", kind, rater, source, &mut outcome.malformed).await;
    let mirror_shard = load_shard("mirror", kind, rater, mirror, &mut outcome.malformed).await;

    let mut batch = diff_shards(kind, rater, &source_shard, &mirror_shard);
    // Shards are released before waiting on the sink.
    drop(source_shard);
    drop(mirror_shard);

    for delta in &batch {
        match delta.operation {
            DeltaOperation::Add => outcome.adds += 1,
            DeltaOperation::Delete => outcome.deletes += 1,
        }
    }
    tracing::trace!(
        "Rater {}: {} adds, {} deletes",
        rater,
        outcome.adds,
        outcome.deletes
    );
    batch.shrink_to_fit();
    sender.send(batch).await?;
    Ok(outcome)
}

/// Compute the deltas for one rater: edges only in `source` become adds,
/// edges only in `mirror` become deletes.
///
/// Follow and Mute shards are compared by ratee; Report shards by
/// `(report_type, ratee)`. Output is sorted by operation, report type, ratee.
pub fn diff_shards(
    kind: RelationshipKind,
    rater: &str,
    source: &RaterShard,
    mirror: &RaterShard,
) -> Vec<RelationshipDelta> {
    let mut deltas = Vec::new();
    one_side(kind, rater, source, mirror, DeltaOperation::Add, &mut deltas);
    one_side(kind, rater, mirror, source, DeltaOperation::Delete, &mut deltas);
    deltas
}

/// Push every edge of `left` missing from `right` as `operation`.
fn one_side(
    kind: RelationshipKind,
    rater: &str,
    left: &RaterShard,
    right: &RaterShard,
    operation: DeltaOperation,
    out: &mut Vec<RelationshipDelta>,
) {
    let start = out.len();
    let make = |ratee: &str, report_type: Option<&str>, timestamp: i64| RelationshipDelta {
        rater: rater.to_string(),
        ratee: ratee.to_string(),
        kind,
        report_type: report_type.map(str::to_string),
        timestamp,
        operation,
    };

    match left {
        RaterShard::Flat(ratees) => {
            let other = flat_view(right);
            for (ratee, &ts) in ratees {
                if !other.is_some_and(|o| o.contains_key(ratee)) {
                    out.push(make(ratee, None, ts));
                }
            }
        }
        RaterShard::Reports(groups) => {
            for (report_type, ratees) in groups {
                let other = report_view(right, report_type);
                for (ratee, &ts) in ratees {
                    if !other.is_some_and(|o| o.contains_key(ratee)) {
                        out.push(make(ratee, Some(report_type), ts));
                    }
                }
            }
        }
    }

    out[start..].sort_by(|a, b| {
        a.report_type
            .cmp(&b.report_type)
            .then_with(|| a.ratee.cmp(&b.ratee))
    });
}

fn flat_view(shard: &RaterShard) -> Option<&HashMap<Pubkey, i64>> {
    match shard {
        RaterShard::Flat(map) => Some(map),
        RaterShard::Reports(_) => None,
    }
}

fn report_view<'a>(shard: &'a RaterShard, report_type: &str) -> Option<&'a HashMap<Pubkey, i64>> {
    match shard {
        RaterShard::Reports(groups) => groups.get(report_type),
        RaterShard::Flat(_) => None,
    }
}
