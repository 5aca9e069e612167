// crates/grapevine-core/src/relationship.rs
//
// Relationship edges, per-rater shards, and reconciliation deltas.
//
// A snapshot of one relationship kind is never held in memory as a whole:
// it is read one rater shard at a time through a `RelationshipSource`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GrapevineError;

/// Opaque node identifier (64-char hex public key).
pub type Pubkey = String;

/// The kinds of directed relationship tracked in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipKind {
    Follow,
    Mute,
    Report,
}

impl RelationshipKind {
    /// All kinds, in rating precedence order (lowest severity first).
    pub const ALL: [RelationshipKind; 3] = [
        RelationshipKind::Follow,
        RelationshipKind::Mute,
        RelationshipKind::Report,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::Follow => "follow",
            RelationshipKind::Mute => "mute",
            RelationshipKind::Report => "report",
        }
    }

    /// Whether shards of this kind are keyed by report type first.
    pub fn is_nested(&self) -> bool {
        matches!(self, RelationshipKind::Report)
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipKind {
    type Err = GrapevineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "follow" | "follows" => Ok(RelationshipKind::Follow),
            "mute" | "mutes" => Ok(RelationshipKind::Mute),
            "report" | "reports" => Ok(RelationshipKind::Report),
            other => Err(GrapevineError::Configuration(format!(
                "unknown relationship kind: {}",
                other
            ))),
        }
    }
}

/// A single directed edge as observed by one subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub rater: Pubkey,
    pub ratee: Pubkey,
    pub kind: RelationshipKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_type: Option<String>,
    pub observed_at: i64,
}

impl Relationship {
    pub fn is_self_loop(&self) -> bool {
        self.rater == self.ratee
    }
}

/// All relationships of one kind held by a single rater.
///
/// Follow and Mute shards map `ratee -> observed_at`. Report shards are two
/// levels deep: `report_type -> ratee -> observed_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaterShard {
    Flat(HashMap<Pubkey, i64>),
    Reports(HashMap<String, HashMap<Pubkey, i64>>),
}

impl RaterShard {
    /// An empty shard of the right shape for `kind`.
    pub fn empty(kind: RelationshipKind) -> Self {
        if kind.is_nested() {
            RaterShard::Reports(HashMap::new())
        } else {
            RaterShard::Flat(HashMap::new())
        }
    }

    /// Parse a shard file body: `{ "<rater>": { ... } }`.
    ///
    /// The single top-level key must name `rater`. An empty object is an
    /// empty shard. Anything else is `MalformedShard`.
    pub fn parse(kind: RelationshipKind, rater: &str, body: &[u8]) -> Result<Self, GrapevineError> {
        let malformed = |reason: String| GrapevineError::MalformedShard {
            rater: rater.to_string(),
            reason,
        };

        if kind.is_nested() {
            let mut outer: HashMap<String, HashMap<String, HashMap<Pubkey, i64>>> =
                serde_json::from_slice(body).map_err(|e| malformed(e.to_string()))?;
            check_single_key(outer.keys(), rater).map_err(malformed)?;
            Ok(RaterShard::Reports(outer.remove(rater).unwrap_or_default()))
        } else {
            let mut outer: HashMap<String, HashMap<Pubkey, i64>> =
                serde_json::from_slice(body).map_err(|e| malformed(e.to_string()))?;
            check_single_key(outer.keys(), rater).map_err(malformed)?;
            Ok(RaterShard::Flat(outer.remove(rater).unwrap_or_default()))
        }
    }

    /// Serialize back into the shard file format.
    pub fn to_json(&self, rater: &str) -> Result<serde_json::Value, GrapevineError> {
        let inner = match self {
            RaterShard::Flat(map) => serde_json::to_value(map)?,
            RaterShard::Reports(map) => serde_json::to_value(map)?,
        };
        let mut outer = serde_json::Map::new();
        outer.insert(rater.to_string(), inner);
        Ok(serde_json::Value::Object(outer))
    }

    /// Number of edges in the shard (report edges counted per report type).
    pub fn len(&self) -> usize {
        match self {
            RaterShard::Flat(map) => map.len(),
            RaterShard::Reports(map) => map.values().map(HashMap::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expand the shard into owned relationships for `rater`.
    pub fn into_relationships(self, kind: RelationshipKind, rater: &str) -> Vec<Relationship> {
        match self {
            RaterShard::Flat(map) => map
                .into_iter()
                .map(|(ratee, observed_at)| Relationship {
                    rater: rater.to_string(),
                    ratee,
                    kind,
                    report_type: None,
                    observed_at,
                })
                .collect(),
            RaterShard::Reports(map) => map
                .into_iter()
                .flat_map(|(report_type, ratees)| {
                    ratees.into_iter().map(move |(ratee, observed_at)| Relationship {
                        rater: rater.to_string(),
                        ratee,
                        kind,
                        report_type: Some(report_type.clone()),
                        observed_at,
                    })
                })
                .collect(),
        }
    }
}

fn check_single_key<'a>(
    mut keys: impl Iterator<Item = &'a String>,
    rater: &str,
) -> Result<(), String> {
    match (keys.next(), keys.next()) {
        (None, _) => Ok(()),
        (Some(k), None) if k == rater => Ok(()),
        (Some(k), None) => Err(format!("top-level key {} does not match rater", k)),
        (Some(_), Some(_)) => Err("more than one top-level rater key".to_string()),
    }
}

/// Whether a delta adds or deletes an edge on the mirror side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaOperation {
    Add,
    Delete,
}

/// One unit of reconciliation output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDelta {
    pub rater: Pubkey,
    pub ratee: Pubkey,
    pub kind: RelationshipKind,
    pub report_type: Option<String>,
    pub timestamp: i64,
    pub operation: DeltaOperation,
}

/// JSON-Lines wire shape of a delta. Add and delete streams are separate
/// files, so neither the kind nor the operation is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaLine {
    pub pk_rater: Pubkey,
    pub pk_ratee: Pubkey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_type: Option<String>,
    pub timestamp: i64,
}

impl From<&RelationshipDelta> for DeltaLine {
    fn from(d: &RelationshipDelta) -> Self {
        DeltaLine {
            pk_rater: d.rater.clone(),
            pk_ratee: d.ratee.clone(),
            report_type: d.report_type.clone(),
            timestamp: d.timestamp,
        }
    }
}
