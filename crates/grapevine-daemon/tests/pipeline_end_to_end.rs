// crates/grapevine-daemon/tests/pipeline_end_to_end.rs
//
// End-to-end tests for the Grapevine pipeline: reconcile on-disk snapshots,
// aggregate ratings, run GrapeRank against the JSON scorecard store, and
// fan the resulting events out to relays.
//
// These tests use the public APIs of the underlying library crates directly
// since the daemon is a binary crate with no lib.rs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use grapevine_core::error::GrapevineError;
use grapevine_core::relationship::{DeltaLine, Pubkey, RaterShard, RelationshipKind};
use grapevine_core::scorecard::{Scorecard, StopReason};
use grapevine_core::shutdown::ShutdownSignal;
use grapevine_core::traits::{RelationshipSource, ScorecardSink};
use grapevine_core::{GrapeRankParams, RatingCurve};
use grapevine_publish::{
    EndpointConfig, OutboundEvent, PublishConfig, Publisher, RelayConnection, RelayTransport,
    Verdict,
};
use grapevine_reputation::{GrapeRank, RatingsAggregator};
use grapevine_store::{JsonScorecardStore, ShardDirectory};
use grapevine_sync::{delta_paths, read_delta_file, reconcile_to_dir, ReconcileConfig, Reconciler};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Create a temporary directory path using UUID to avoid conflicts.
fn temp_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("grapevine_test_{}_{}", label, Uuid::now_v7()))
}

fn pk(c: char) -> Pubkey {
    c.to_string().repeat(64)
}

fn flat(entries: &[(char, i64)]) -> RaterShard {
    RaterShard::Flat(entries.iter().map(|&(c, ts)| (pk(c), ts)).collect())
}

fn reports(entries: &[(&str, char, i64)]) -> RaterShard {
    let mut by_type: HashMap<String, HashMap<Pubkey, i64>> = HashMap::new();
    for &(report_type, c, ts) in entries {
        by_type
            .entry(report_type.to_string())
            .or_default()
            .insert(pk(c), ts);
    }
    RaterShard::Reports(by_type)
}

fn snapshot(root: &Path, side: &str, kind: RelationshipKind) -> ShardDirectory {
    ShardDirectory::new(root.join(side).join(kind.as_str()), kind)
}

fn sorted(mut lines: Vec<DeltaLine>) -> Vec<(String, String, Option<String>, i64)> {
    lines.sort_by(|a, b| (&a.pk_rater, &a.pk_ratee).cmp(&(&b.pk_rater, &b.pk_ratee)));
    lines
        .into_iter()
        .map(|l| (l.pk_rater, l.pk_ratee, l.report_type, l.timestamp))
        .collect()
}

/// Lay out the fixture graph rooted at F:
///   source follows:  F -> {A, B}, A -> {C}
///   source mutes:    B -> {C}
///   source reports:  C -> spam:{A}
///   mirror follows:  F -> {A, D}
///   mirror reports:  C -> spam:{A}, impersonation:{B}
async fn write_fixture(data: &Path) {
    let follow = snapshot(data, "source", RelationshipKind::Follow);
    follow.write_shard(&pk('f'), &flat(&[('a', 100), ('b', 100)])).await.unwrap();
    follow.write_shard(&pk('a'), &flat(&[('c', 200)])).await.unwrap();
    snapshot(data, "source", RelationshipKind::Mute)
        .write_shard(&pk('b'), &flat(&[('c', 300)]))
        .await
        .unwrap();
    snapshot(data, "source", RelationshipKind::Report)
        .write_shard(&pk('c'), &reports(&[("spam", 'a', 400)]))
        .await
        .unwrap();

    snapshot(data, "mirror", RelationshipKind::Follow)
        .write_shard(&pk('f'), &flat(&[('a', 100), ('d', 50)]))
        .await
        .unwrap();
    snapshot(data, "mirror", RelationshipKind::Report)
        .write_shard(&pk('c'), &reports(&[("spam", 'a', 400), ("impersonation", 'b', 10)]))
        .await
        .unwrap();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconcile_writes_delta_files_per_kind() {
    let data = temp_dir("reconcile");
    write_fixture(&data).await;
    let out = data.join("deltas");
    let reconciler = Reconciler::new(ReconcileConfig::default());
    let shutdown = ShutdownSignal::never();

    let mut totals = Vec::new();
    for kind in RelationshipKind::ALL {
        let source: Arc<dyn RelationshipSource> = Arc::new(snapshot(&data, "source", kind));
        let mirror: Arc<dyn RelationshipSource> = Arc::new(snapshot(&data, "mirror", kind));
        let report = reconcile_to_dir(&reconciler, source, mirror, &out, &shutdown)
            .await
            .unwrap();
        assert!(!report.cancelled);
        assert_eq!(report.malformed_shards, 0);
        totals.push((kind, report.adds, report.deletes));
    }
    assert_eq!(
        totals,
        vec![
            (RelationshipKind::Follow, 2, 1),
            (RelationshipKind::Mute, 1, 0),
            (RelationshipKind::Report, 0, 1),
        ]
    );

    let (follow_add, follow_delete) = delta_paths(&out, RelationshipKind::Follow);
    assert_eq!(
        sorted(read_delta_file(&follow_add).await.unwrap()),
        vec![
            (pk('a'), pk('c'), None, 200),
            (pk('f'), pk('b'), None, 100),
        ]
    );
    assert_eq!(
        sorted(read_delta_file(&follow_delete).await.unwrap()),
        vec![(pk('f'), pk('d'), None, 50)]
    );

    let (_, report_delete) = delta_paths(&out, RelationshipKind::Report);
    assert_eq!(
        sorted(read_delta_file(&report_delete).await.unwrap()),
        vec![(pk('c'), pk('b'), Some("impersonation".to_string()), 10)]
    );

    // Reconciling the source against itself produces nothing.
    for kind in RelationshipKind::ALL {
        let source: Arc<dyn RelationshipSource> = Arc::new(snapshot(&data, "source", kind));
        let same: Arc<dyn RelationshipSource> = Arc::new(snapshot(&data, "source", kind));
        let report = reconcile_to_dir(&reconciler, source, same, &data.join("noop"), &shutdown)
            .await
            .unwrap();
        assert_eq!((report.adds, report.deletes), (0, 0));
    }

    let _ = tokio::fs::remove_dir_all(&data).await;
}

#[tokio::test]
async fn calculate_persists_scorecards_and_reseeds_from_them() {
    let data = temp_dir("calculate");
    write_fixture(&data).await;
    let root = pk('f');
    let shutdown = ShutdownSignal::never();

    let aggregator = RatingsAggregator::new(RatingCurve::default(), root.clone()).unwrap();
    let engine = GrapeRank::new(GrapeRankParams::default(), root.clone()).unwrap();
    let store = JsonScorecardStore::new(
        data.join("scorecards.json"),
        data.join("scorecards_metadata.json"),
    );

    let follows = snapshot(&data, "source", RelationshipKind::Follow);
    let mutes = snapshot(&data, "source", RelationshipKind::Mute);
    let report_dir = snapshot(&data, "source", RelationshipKind::Report);

    let (ratings, stats) = aggregator
        .aggregate_snapshots(&follows, &mutes, &report_dir, &shutdown)
        .await
        .unwrap();
    assert_eq!(stats.ratings_emitted, 5);
    assert_eq!(stats.malformed_shards, 0);

    let first = engine.run_with_sink(ratings, &store, &shutdown).await.unwrap();
    assert!(first.run.converged);
    assert_eq!(first.run.stop_reason, StopReason::Converged);
    assert_eq!(first.run.total_scorecards, 4);

    let saved = store.load_scorecards().await.unwrap().unwrap();
    assert_eq!(saved.len(), 4);
    assert_eq!(saved[&root], Scorecard::ROOT);
    assert!(!saved.contains_key(&pk('d')));

    // B is followed only by the root: input 0.5, confidence 1 - 2^-0.5.
    let b = saved[&pk('b')];
    assert!((b.average - 1.0).abs() < 1e-9);
    assert!((b.confidence - (1.0 - 0.5f64.sqrt())).abs() < 1e-9);

    // C is followed by A but muted by B, whose weight dominates.
    let c = saved[&pk('c')];
    assert!(c.average < 0.5);
    assert!(c.confidence < 1.0);

    let meta = store.load_run().await.unwrap().unwrap();
    assert_eq!(meta.total_scorecards, 4);
    assert_eq!(meta.parameters.rigor, 0.5);

    // A second run starts from the stored scorecards and settles at once.
    let (ratings, _) = aggregator
        .aggregate_snapshots(&follows, &mutes, &report_dir, &shutdown)
        .await
        .unwrap();
    let second = engine.run_with_sink(ratings, &store, &shutdown).await.unwrap();
    assert!(second.run.converged);
    assert!(second.run.iterations <= first.run.iterations);
    for (pubkey, card) in &second.scorecards {
        assert!(card.max_abs_diff(&saved[pubkey]) < 1e-3);
    }

    let _ = tokio::fs::remove_dir_all(&data).await;
}

#[tokio::test]
async fn malformed_shard_does_not_stop_the_pipeline() {
    let data = temp_dir("malformed");
    write_fixture(&data).await;
    let bad = data.join("source").join("follow").join(format!("{}.json", pk('e')));
    tokio::fs::write(&bad, b"{ not json").await.unwrap();

    let reconciler = Reconciler::new(ReconcileConfig::default());
    let shutdown = ShutdownSignal::never();
    let source: Arc<dyn RelationshipSource> =
        Arc::new(snapshot(&data, "source", RelationshipKind::Follow));
    let mirror: Arc<dyn RelationshipSource> =
        Arc::new(snapshot(&data, "mirror", RelationshipKind::Follow));
    let report = reconcile_to_dir(&reconciler, source, mirror, &data.join("deltas"), &shutdown)
        .await
        .unwrap();
    assert_eq!(report.malformed_shards, 1);
    assert_eq!((report.adds, report.deletes), (2, 1));

    let aggregator = RatingsAggregator::new(RatingCurve::default(), pk('f')).unwrap();
    let (_, stats) = aggregator
        .aggregate_snapshots(
            &snapshot(&data, "source", RelationshipKind::Follow),
            &snapshot(&data, "source", RelationshipKind::Mute),
            &snapshot(&data, "source", RelationshipKind::Report),
            &shutdown,
        )
        .await
        .unwrap();
    assert_eq!(stats.malformed_shards, 1);
    assert_eq!(stats.ratings_emitted, 5);

    let _ = tokio::fs::remove_dir_all(&data).await;
}

// ---------------------------------------------------------------------------
// Publication
// ---------------------------------------------------------------------------

/// Accepts everything, except endpoints listed as silent, which never answer.
struct StubRelays {
    silent: Vec<String>,
}

struct StubConnection {
    silent: bool,
}

#[async_trait]
impl RelayTransport for StubRelays {
    async fn connect(&self, url: &str) -> Result<Box<dyn RelayConnection>, GrapevineError> {
        Ok(Box::new(StubConnection {
            silent: self.silent.iter().any(|s| s == url),
        }))
    }
}

#[async_trait]
impl RelayConnection for StubConnection {
    async fn publish(&mut self, _event: &OutboundEvent) -> Result<Verdict, GrapevineError> {
        if self.silent {
            std::future::pending::<()>().await;
        }
        Ok(Verdict::Accepted)
    }
}

#[tokio::test]
async fn scorecard_events_fan_out_to_all_endpoints() {
    let events: Vec<OutboundEvent> = ['a', 'b', 'c']
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            OutboundEvent::from_value(json!({
                "id": format!("{:064x}", i),
                "kind": 30382,
                "tags": [["d", pk(c)]],
            }))
            .unwrap()
        })
        .collect();

    let config = PublishConfig {
        endpoints: vec![
            EndpointConfig {
                url: "ws://primary.test".to_string(),
                max_connections: 4,
                max_attempts: 3,
            },
            EndpointConfig {
                url: "ws://mirror.test".to_string(),
                max_connections: 1,
                max_attempts: 3,
            },
        ],
        processing_window: Duration::from_millis(25),
        base_delay: Duration::from_millis(1),
        max_in_flight: None,
    };
    let relays = Arc::new(StubRelays {
        silent: vec!["ws://mirror.test".to_string()],
    });
    let publisher = Publisher::new(config, relays).unwrap();

    let report = publisher.publish_all(events, &ShutdownSignal::never()).await;

    assert_eq!(report.events, 3);
    let primary = report.endpoint("ws://primary.test").unwrap();
    assert_eq!(primary.accepted, 3);
    let mirror = report.endpoint("ws://mirror.test").unwrap();
    assert_eq!(mirror.tentative, 3);
    assert_eq!(mirror.attempts, 3);
    assert!(report.failures.is_empty());
    assert!(!report.cancelled);
}
