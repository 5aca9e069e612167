// crates/grapevine-core/src/lib.rs
//
// grapevine-core: Core types, configuration values, traits, and errors for
// the Grapevine trust pipeline.
//
// This is the leaf crate that all other crates in the workspace depend on.
// It defines relationships and shards, ratings and scorecards, the
// collaborator traits used to read snapshots and persist scorecards, and the
// cooperative shutdown signal.

pub mod config;
pub mod error;
pub mod relationship;
pub mod scorecard;
pub mod shutdown;
pub mod traits;

// Re-export key types for ergonomic access from downstream crates.
// Usage: `use grapevine_core::Scorecard;`

pub use config::{validate_pubkey, CurvePoint, GrapeRankParams, RatingCurve};
pub use error::GrapevineError;
pub use relationship::{
    DeltaLine, DeltaOperation, Pubkey, RaterShard, Relationship, RelationshipDelta,
    RelationshipKind,
};
pub use scorecard::{CalculationRun, Rating, RunParameters, Scorecard, ScorecardMap, StopReason};
pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
pub use traits::{RelationshipSource, ScorecardSink};
