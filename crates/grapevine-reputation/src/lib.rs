// crates/grapevine-reputation/src/lib.rs
//
// grapevine-reputation: Ratings aggregation and GrapeRank trust propagation
// for the Grapevine trust pipeline.
//
// Relationships become ratings through a configurable rating curve, and
// ratings become scorecards through GrapeRank: a personalized,
// confidence-weighted fixed-point iteration anchored at one root pubkey.

pub mod aggregator;
pub mod graperank;
pub mod ratings;

pub use aggregator::{AggregateStats, PairKinds, RatingsAggregator, DEFAULT_CONTEXT};
pub use graperank::{GrapeRank, PropagationOutcome};
pub use ratings::{RatedEdge, RatingsTable};
