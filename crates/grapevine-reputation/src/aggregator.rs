// crates/grapevine-reputation/src/aggregator.rs
//
// Ratings aggregation: turn relationship edges into one rating per
// (rater, ratee) pair.
//
// When a pair has several relationship kinds, they are applied in the fixed
// order Follow, Mute, Report and the last one applied wins, so a report
// always overrides a mute, which always overrides a follow.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use grapevine_core::config::{validate_pubkey, RatingCurve};
use grapevine_core::error::GrapevineError;
use grapevine_core::relationship::{Pubkey, Relationship, RelationshipKind};
use grapevine_core::scorecard::Rating;
use grapevine_core::shutdown::ShutdownSignal;
use grapevine_core::traits::RelationshipSource;

use crate::ratings::RatingsTable;

/// Default rating context.
pub const DEFAULT_CONTEXT: &str = "verifiedUsers";

/// Which relationship kinds exist for one (rater, ratee) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairKinds {
    pub follow: bool,
    pub mute: bool,
    pub report: bool,
}

impl PairKinds {
    pub fn mark(&mut self, kind: RelationshipKind) {
        match kind {
            RelationshipKind::Follow => self.follow = true,
            RelationshipKind::Mute => self.mute = true,
            RelationshipKind::Report => self.report = true,
        }
    }

    fn has(&self, kind: RelationshipKind) -> bool {
        match kind {
            RelationshipKind::Follow => self.follow,
            RelationshipKind::Mute => self.mute,
            RelationshipKind::Report => self.report,
        }
    }
}

/// Counters for one aggregation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    pub relationships_seen: u64,
    pub self_ratings_dropped: u64,
    pub ratings_emitted: u64,
    pub malformed_shards: u64,
}

/// Converts relationships into ratings using a rating curve.
#[derive(Debug, Clone)]
pub struct RatingsAggregator {
    curve: RatingCurve,
    root: Pubkey,
    context: String,
}

impl RatingsAggregator {
    /// Create an aggregator for `root`. Fails if the curve or root is invalid.
    pub fn new(curve: RatingCurve, root: impl Into<Pubkey>) -> Result<Self, GrapevineError> {
        let root = root.into();
        curve.validate()?;
        validate_pubkey(&root)?;
        Ok(Self {
            curve,
            root,
            context: DEFAULT_CONTEXT.to_string(),
        })
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// `(score, confidence)` for one (rater, ratee) pair, or `None` if no
    /// kinds are present or the pair is a self-rating.
    pub fn rate_pair(&self, rater: &str, ratee: &str, kinds: PairKinds) -> Option<(f64, f64)> {
        if rater == ratee {
            return None;
        }
        let mut rating = None;
        for kind in RelationshipKind::ALL {
            if !kinds.has(kind) {
                continue;
            }
            let point = self.curve.point(kind);
            let confidence = if kind == RelationshipKind::Follow && rater == self.root {
                self.curve.observer_follow_confidence
            } else {
                point.confidence
            };
            rating = Some((point.score, confidence));
        }
        rating
    }

    /// Rate one pair from its relationships, in any order.
    pub fn rate_relationships(&self, relationships: &[Relationship]) -> Option<Rating> {
        let first = relationships.first()?;
        let mut kinds = PairKinds::default();
        for rel in relationships {
            if rel.rater != first.rater || rel.ratee != first.ratee {
                tracing::debug!(
                    "Ignoring relationship {} -> {} outside pair {} -> {}",
                    rel.rater,
                    rel.ratee,
                    first.rater,
                    first.ratee
                );
                continue;
            }
            kinds.mark(rel.kind);
        }
        let (score, confidence) = self.rate_pair(&first.rater, &first.ratee, kinds)?;
        Some(Rating {
            context: self.context.clone(),
            rater: first.rater.clone(),
            ratee: first.ratee.clone(),
            score,
            confidence,
        })
    }

    /// Aggregate an arbitrary stream of relationships into a ratings table.
    ///
    /// Ratings are inserted in (rater, ratee) order whatever the input order,
    /// so the table and any sums over it are reproducible.
    pub fn aggregate<I>(&self, relationships: I) -> (RatingsTable, AggregateStats)
    where
        I: IntoIterator<Item = Relationship>,
    {
        let mut stats = AggregateStats::default();
        let mut pairs: BTreeMap<(Pubkey, Pubkey), PairKinds> = BTreeMap::new();
        for rel in relationships {
            stats.relationships_seen += 1;
            if rel.is_self_loop() {
                stats.self_ratings_dropped += 1;
                continue;
            }
            pairs.entry((rel.rater, rel.ratee)).or_default().mark(rel.kind);
        }

        let mut table = RatingsTable::new(self.context.clone());
        for ((rater, ratee), kinds) in pairs {
            if let Some((score, confidence)) = self.rate_pair(&rater, &ratee, kinds) {
                table.insert(&rater, &ratee, score, confidence);
                stats.ratings_emitted += 1;
            }
        }
        (table, stats)
    }

    /// Build the ratings table straight from the three relationship
    /// snapshots, one rater at a time.
    ///
    /// Unreadable shards are logged and skipped. Returns
    /// `GrapevineError::Cancelled` if the shutdown signal fires between raters.
    pub async fn aggregate_snapshots(
        &self,
        follows: &dyn RelationshipSource,
        mutes: &dyn RelationshipSource,
        reports: &dyn RelationshipSource,
        shutdown: &ShutdownSignal,
    ) -> Result<(RatingsTable, AggregateStats), GrapevineError> {
        let sources: [&dyn RelationshipSource; 3] = [follows, mutes, reports];
        for (source, expected) in sources.iter().zip(RelationshipKind::ALL) {
            if source.kind() != expected {
                return Err(GrapevineError::Configuration(format!(
                    "expected a {} snapshot, got {}",
                    expected,
                    source.kind()
                )));
            }
        }

        let mut raters = BTreeSet::new();
        for source in &sources {
            raters.extend(source.list_raters().await?);
        }
        tracing::info!("Aggregating ratings for {} raters", raters.len());

        let mut table = RatingsTable::new(self.context.clone());
        let mut stats = AggregateStats::default();

        for rater in raters {
            if shutdown.is_triggered() {
                return Err(GrapevineError::Cancelled(
                    "ratings aggregation interrupted".to_string(),
                ));
            }

            let mut ratees: BTreeMap<Pubkey, PairKinds> = BTreeMap::new();
            for source in &sources {
                let shard = match source.read_shard(&rater).await {
                    Ok(Some(shard)) => shard,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(
                            "Skipping {} shard for rater {}: {}",
                            source.kind(),
                            rater,
                            e
                        );
                        stats.malformed_shards += 1;
                        continue;
                    }
                };
                for rel in shard.into_relationships(source.kind(), &rater) {
                    stats.relationships_seen += 1;
                    if rel.is_self_loop() {
                        stats.self_ratings_dropped += 1;
                        continue;
                    }
                    ratees.entry(rel.ratee).or_default().mark(rel.kind);
                }
            }

            for (ratee, kinds) in ratees {
                if let Some((score, confidence)) = self.rate_pair(&rater, &ratee, kinds) {
                    table.insert(&rater, &ratee, score, confidence);
                    stats.ratings_emitted += 1;
                }
            }
        }

        tracing::info!(
            "Aggregated {} ratings from {} relationships ({} self-ratings dropped)",
            stats.ratings_emitted,
            stats.relationships_seen,
            stats.self_ratings_dropped
        );
        Ok((table, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grapevine_store::MemorySnapshot;

    fn root() -> String {
        "f".repeat(64)
    }

    fn rel(rater: &str, ratee: &str, kind: RelationshipKind) -> Relationship {
        Relationship {
            rater: rater.to_string(),
            ratee: ratee.to_string(),
            kind,
            report_type: None,
            observed_at: 0,
        }
    }

    fn aggregator() -> RatingsAggregator {
        RatingsAggregator::new(RatingCurve::default(), root()).unwrap()
    }

    #[test]
    fn follow_uses_curve_values() {
        let rating = aggregator()
            .rate_relationships(&[rel("A", "B", RelationshipKind::Follow)])
            .unwrap();
        assert_eq!(rating.score, 1.0);
        assert_eq!(rating.confidence, 0.03);
        assert_eq!(rating.context, DEFAULT_CONTEXT);
    }

    #[test]
    fn root_follow_gets_observer_confidence() {
        let rating = aggregator()
            .rate_relationships(&[rel(&root(), "B", RelationshipKind::Follow)])
            .unwrap();
        assert_eq!(rating.confidence, 0.5);
    }

    #[test]
    fn root_mute_keeps_mute_confidence() {
        let mut curve = RatingCurve::default();
        curve.mute.confidence = 0.4;
        let agg = RatingsAggregator::new(curve, root()).unwrap();
        let rating = agg
            .rate_relationships(&[rel(&root(), "B", RelationshipKind::Mute)])
            .unwrap();
        assert_eq!(rating.confidence, 0.4);
    }

    #[test]
    fn precedence_is_independent_of_input_order() {
        let agg = aggregator();
        let orders = [
            vec![
                rel("A", "B", RelationshipKind::Report),
                rel("A", "B", RelationshipKind::Follow),
            ],
            vec![
                rel("A", "B", RelationshipKind::Follow),
                rel("A", "B", RelationshipKind::Report),
            ],
        ];
        for rels in orders {
            let rating = agg.rate_relationships(&rels).unwrap();
            assert_eq!(rating.score, 0.0);
            assert_eq!(rating.confidence, 0.5);
        }
    }

    #[test]
    fn mute_overrides_follow() {
        let mut curve = RatingCurve::default();
        curve.mute.confidence = 0.7;
        let agg = RatingsAggregator::new(curve, root()).unwrap();
        let kinds = PairKinds {
            follow: true,
            mute: true,
            report: false,
        };
        assert_eq!(agg.rate_pair("A", "B", kinds), Some((0.0, 0.7)));
    }

    #[test]
    fn self_ratings_never_emitted() {
        let agg = aggregator();
        assert!(agg
            .rate_relationships(&[rel("A", "A", RelationshipKind::Follow)])
            .is_none());

        let (table, stats) = agg.aggregate(vec![
            rel("A", "A", RelationshipKind::Follow),
            rel("A", "B", RelationshipKind::Follow),
            rel("B", "B", RelationshipKind::Mute),
        ]);
        assert_eq!(stats.self_ratings_dropped, 2);
        assert_eq!(stats.ratings_emitted, 1);
        assert!(table.iter().all(|r| r.rater != r.ratee));
    }

    #[test]
    fn aggregate_collapses_pairs() {
        let (table, stats) = aggregator().aggregate(vec![
            rel("A", "B", RelationshipKind::Follow),
            rel("A", "B", RelationshipKind::Mute),
            rel("C", "B", RelationshipKind::Follow),
        ]);
        assert_eq!(stats.relationships_seen, 3);
        assert_eq!(table.len(), 2);
        let for_b = table.ratings_for("B");
        let from_a = for_b.iter().find(|r| r.rater == "A").unwrap();
        assert_eq!(from_a.score, 0.0);
    }

    #[test]
    fn table_order_is_independent_of_input_order() {
        let forward = vec![
            rel("A", "C", RelationshipKind::Follow),
            rel("B", "C", RelationshipKind::Mute),
            rel("D", "C", RelationshipKind::Follow),
            rel("B", "A", RelationshipKind::Follow),
        ];
        let mut backward = forward.clone();
        backward.reverse();

        let agg = aggregator();
        let (first, _) = agg.aggregate(forward);
        let (second, _) = agg.aggregate(backward);
        assert_eq!(first.pubkeys(), second.pubkeys());
        assert_eq!(first.iter().collect::<Vec<_>>(), second.iter().collect::<Vec<_>>());

        let raters: Vec<String> = first.ratings_for("C").into_iter().map(|r| r.rater).collect();
        assert_eq!(raters, ["A", "B", "D"]);
    }

    #[test]
    fn invalid_root_rejected() {
        assert!(RatingsAggregator::new(RatingCurve::default(), "").is_err());
    }

    #[test]
    fn negative_curve_score_rejected() {
        let mut curve = RatingCurve::default();
        curve.mute.score = -1.0;
        assert!(matches!(
            RatingsAggregator::new(curve, root()),
            Err(GrapevineError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn aggregate_snapshots_reads_all_three_kinds() {
        let follows = MemorySnapshot::from_json(
            RelationshipKind::Follow,
            r#"{"A":{"B":1,"C":1,"A":1},"B":{"C":1}}"#,
        )
        .unwrap();
        let mut mutes =
            MemorySnapshot::from_json(RelationshipKind::Mute, r#"{"A":{"C":2}}"#).unwrap();
        mutes.insert_raw("B", "{broken");
        let reports = MemorySnapshot::from_json(
            RelationshipKind::Report,
            r#"{"D":{"spam":{"B":3},"illegal":{"B":4}}}"#,
        )
        .unwrap();

        let (table, stats) = aggregator()
            .aggregate_snapshots(&follows, &mutes, &reports, &ShutdownSignal::never())
            .await
            .unwrap();

        assert_eq!(stats.self_ratings_dropped, 1);
        assert_eq!(stats.malformed_shards, 1);
        // A->B follow, A->C mute (overrides follow), B->C follow, D->B report.
        assert_eq!(table.len(), 4);
        let from_a_to_c = table
            .ratings_for("C")
            .into_iter()
            .find(|r| r.rater == "A")
            .unwrap();
        assert_eq!((from_a_to_c.score, from_a_to_c.confidence), (0.0, 0.5));
        let from_d = table
            .ratings_for("B")
            .into_iter()
            .filter(|r| r.rater == "D")
            .count();
        assert_eq!(from_d, 1);
    }

    #[tokio::test]
    async fn aggregate_snapshots_checks_kinds() {
        let follows = MemorySnapshot::new(RelationshipKind::Follow);
        let result = aggregator()
            .aggregate_snapshots(&follows, &follows, &follows, &ShutdownSignal::never())
            .await;
        assert!(matches!(result, Err(GrapevineError::Configuration(_))));
    }
}
