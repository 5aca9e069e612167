// crates/grapevine-core/src/scorecard.rs
//
// Ratings, scorecards, and calculation-run metadata.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::GrapeRankParams;
use crate::relationship::Pubkey;

/// A single rater's opinion of a ratee after precedence resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub context: String,
    pub rater: Pubkey,
    pub ratee: Pubkey,
    pub score: f64,
    pub confidence: f64,
}

/// Per-pubkey GrapeRank state.
///
/// Stored on disk as `[influence, average, confidence, input]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Scorecard {
    pub influence: f64,
    pub average: f64,
    pub confidence: f64,
    pub input: f64,
}

impl Scorecard {
    /// The fixed scorecard of the root (owner) pubkey.
    pub const ROOT: Scorecard = Scorecard {
        influence: 1.0,
        average: 1.0,
        confidence: 1.0,
        input: 9999.0,
    };

    /// Neutral state for a pubkey with no incoming ratings.
    pub const NEUTRAL: Scorecard = Scorecard {
        influence: 0.0,
        average: 0.0,
        confidence: 0.0,
        input: 0.0,
    };

    /// Largest absolute difference across the four fields.
    pub fn max_abs_diff(&self, other: &Scorecard) -> f64 {
        (self.influence - other.influence)
            .abs()
            .max((self.average - other.average).abs())
            .max((self.confidence - other.confidence).abs())
            .max((self.input - other.input).abs())
    }
}

impl From<[f64; 4]> for Scorecard {
    fn from(v: [f64; 4]) -> Self {
        Scorecard {
            influence: v[0],
            average: v[1],
            confidence: v[2],
            input: v[3],
        }
    }
}

impl From<Scorecard> for [f64; 4] {
    fn from(s: Scorecard) -> Self {
        [s.influence, s.average, s.confidence, s.input]
    }
}

/// Scorecards keyed by pubkey, the on-disk scorecard store shape.
pub type ScorecardMap = HashMap<Pubkey, Scorecard>;

/// Why a propagation run stopped iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Converged,
    IterationCap,
    Cancelled,
}

/// Metadata written once per propagation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationRun {
    pub timestamp: DateTime<Utc>,
    pub calculation_time_ms: i64,
    pub iterations: u32,
    pub converged: bool,
    pub stop_reason: StopReason,
    pub max_difference: f64,
    pub total_scorecards: usize,
    pub parameters: RunParameters,
}

/// The parameter subset recorded with each run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    pub attenuation_factor: f64,
    pub rigor: f64,
    pub max_iterations: u32,
    pub convergence_threshold: f64,
}

impl From<&GrapeRankParams> for RunParameters {
    fn from(p: &GrapeRankParams) -> Self {
        RunParameters {
            attenuation_factor: p.attenuation_factor,
            rigor: p.rigor,
            max_iterations: p.max_iterations,
            convergence_threshold: p.convergence_threshold,
        }
    }
}
