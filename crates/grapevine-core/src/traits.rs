// crates/grapevine-core/src/traits.rs

use async_trait::async_trait;

use crate::error::GrapevineError;
use crate::relationship::{Pubkey, RaterShard, RelationshipKind};
use crate::scorecard::{CalculationRun, ScorecardMap};

/// Read access to one relationship snapshot, one rater shard at a time.
///
/// Implemented by grapevine-store (shard directories and in-memory fakes).
#[async_trait]
pub trait RelationshipSource: Send + Sync {
    /// The relationship kind held by this snapshot.
    fn kind(&self) -> RelationshipKind;

    /// List every rater with a shard, sorted ascending.
    async fn list_raters(&self) -> Result<Vec<Pubkey>, GrapevineError>;

    /// Read one rater's shard.
    ///
    /// Returns `Ok(None)` when the rater has no shard and
    /// `Err(GrapevineError::MalformedShard)` when the shard cannot be parsed.
    async fn read_shard(&self, rater: &str) -> Result<Option<RaterShard>, GrapevineError>;
}

/// Persistence for scorecards and run metadata.
///
/// Implemented by grapevine-store (JSON files and in-memory fakes).
#[async_trait]
pub trait ScorecardSink: Send + Sync {
    /// Load the previous scorecard map, or `None` on a first run.
    async fn load_scorecards(&self) -> Result<Option<ScorecardMap>, GrapevineError>;

    /// Replace the stored scorecard map.
    async fn save_scorecards(&self, scorecards: &ScorecardMap) -> Result<(), GrapevineError>;

    /// Record the metadata of a finished run.
    async fn save_run(&self, run: &CalculationRun) -> Result<(), GrapevineError>;
}
