// crates/grapevine-store/src/memory.rs
//
// In-memory collaborators for tests and small graphs.
//
// `MemorySnapshot` keeps raw shard bodies and parses them on every read, so
// malformed shards behave exactly as they do on disk.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use grapevine_core::error::GrapevineError;
use grapevine_core::relationship::{Pubkey, RaterShard, RelationshipKind};
use grapevine_core::scorecard::{CalculationRun, ScorecardMap};
use grapevine_core::traits::{RelationshipSource, ScorecardSink};

/// A relationship snapshot held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemorySnapshot {
    kind: RelationshipKind,
    shards: BTreeMap<Pubkey, Vec<u8>>,
}

impl MemorySnapshot {
    pub fn new(kind: RelationshipKind) -> Self {
        Self {
            kind,
            shards: BTreeMap::new(),
        }
    }

    /// Build a snapshot from a whole-snapshot JSON document,
    /// e.g. `{"A":{"B":100},"C":{"D":5}}`. Each top-level key becomes a shard.
    pub fn from_json(kind: RelationshipKind, json: &str) -> Result<Self, GrapevineError> {
        let doc: BTreeMap<Pubkey, serde_json::Value> = serde_json::from_str(json)?;
        let mut snapshot = Self::new(kind);
        for (rater, inner) in doc {
            let mut outer = serde_json::Map::new();
            outer.insert(rater.clone(), inner);
            let body = serde_json::to_vec(&serde_json::Value::Object(outer))?;
            snapshot.shards.insert(rater, body);
        }
        Ok(snapshot)
    }

    pub fn insert_shard(&mut self, rater: &str, shard: &RaterShard) -> Result<(), GrapevineError> {
        let body = serde_json::to_vec(&shard.to_json(rater)?)?;
        self.shards.insert(rater.to_string(), body);
        Ok(())
    }

    /// Store an arbitrary shard body, valid or not.
    pub fn insert_raw(&mut self, rater: &str, body: impl Into<Vec<u8>>) {
        self.shards.insert(rater.to_string(), body.into());
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

#[async_trait]
impl RelationshipSource for MemorySnapshot {
    fn kind(&self) -> RelationshipKind {
        self.kind
    }

    async fn list_raters(&self) -> Result<Vec<Pubkey>, GrapevineError> {
        Ok(self.shards.keys().cloned().collect())
    }

    async fn read_shard(&self, rater: &str) -> Result<Option<RaterShard>, GrapevineError> {
        match self.shards.get(rater) {
            Some(body) => RaterShard::parse(self.kind, rater, body).map(Some),
            None => Ok(None),
        }
    }
}

/// Scorecard persistence held in memory.
#[derive(Debug, Default)]
pub struct MemoryScorecardSink {
    scorecards: Mutex<Option<ScorecardMap>>,
    runs: Mutex<Vec<CalculationRun>>,
}

impl MemoryScorecardSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the sink with a previous scorecard map.
    pub fn with_scorecards(scorecards: ScorecardMap) -> Self {
        Self {
            scorecards: Mutex::new(Some(scorecards)),
            runs: Mutex::new(Vec::new()),
        }
    }

    pub async fn runs(&self) -> Vec<CalculationRun> {
        self.runs.lock().await.clone()
    }
}

#[async_trait]
impl ScorecardSink for MemoryScorecardSink {
    async fn load_scorecards(&self) -> Result<Option<ScorecardMap>, GrapevineError> {
        Ok(self.scorecards.lock().await.clone())
    }

    async fn save_scorecards(&self, scorecards: &ScorecardMap) -> Result<(), GrapevineError> {
        *self.scorecards.lock().await = Some(scorecards.clone());
        Ok(())
    }

    async fn save_run(&self, run: &CalculationRun) -> Result<(), GrapevineError> {
        self.runs.lock().await.push(run.clone());
        Ok(())
    }
}
