// crates/grapevine-core/src/config.rs
//
// Immutable configuration values handed to each component's entry point.
// Components never read process-wide state; the daemon builds these from
// its TOML file and validates them before any work starts.

use serde::{Deserialize, Serialize};

use crate::error::GrapevineError;
use crate::relationship::RelationshipKind;

/// Tuning parameters for the GrapeRank propagation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrapeRankParams {
    /// Controls how fast accumulated input saturates into confidence. Must be in (0, 1).
    pub rigor: f64,
    /// Weight decay applied to every rater other than the root. Must be in (0, 1].
    pub attenuation_factor: f64,
    /// Hard cap on the number of sweeps. Default: 20.
    pub max_iterations: u32,
    /// Stop once the largest scorecard change drops below this. Default: 1e-4.
    pub convergence_threshold: f64,
    /// Ratees processed per chunk within one sweep. Default: 10_000.
    pub chunk_size: usize,
}

impl Default for GrapeRankParams {
    fn default() -> Self {
        Self {
            rigor: 0.5,
            attenuation_factor: 0.85,
            max_iterations: 20,
            convergence_threshold: 1e-4,
            chunk_size: 10_000,
        }
    }
}

impl GrapeRankParams {
    pub fn validate(&self) -> Result<(), GrapevineError> {
        if !(self.rigor > 0.0 && self.rigor < 1.0) {
            return Err(GrapevineError::Configuration(format!(
                "rigor must be strictly between 0 and 1, got {}",
                self.rigor
            )));
        }
        if !(self.attenuation_factor > 0.0 && self.attenuation_factor <= 1.0) {
            return Err(GrapevineError::Configuration(format!(
                "attenuation_factor must be in (0, 1], got {}",
                self.attenuation_factor
            )));
        }
        if self.max_iterations == 0 {
            return Err(GrapevineError::Configuration(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if !(self.convergence_threshold > 0.0 && self.convergence_threshold.is_finite()) {
            return Err(GrapevineError::Configuration(format!(
                "convergence_threshold must be positive, got {}",
                self.convergence_threshold
            )));
        }
        if self.chunk_size == 0 {
            return Err(GrapevineError::Configuration(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// `-ln(rigor)`, the exponent scale of the confidence curve.
    pub fn rigority(&self) -> f64 {
        -self.rigor.ln()
    }
}

/// A `(score, confidence)` pair assigned to one relationship kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub score: f64,
    pub confidence: f64,
}

/// Maps relationship kinds to rating values. Fields missing from a
/// deserialized curve keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingCurve {
    pub follow: CurvePoint,
    pub mute: CurvePoint,
    pub report: CurvePoint,
    /// Confidence used instead of `follow.confidence` when the rater is the root.
    pub observer_follow_confidence: f64,
}

impl Default for RatingCurve {
    fn default() -> Self {
        Self {
            follow: CurvePoint {
                score: 1.0,
                confidence: 0.03,
            },
            mute: CurvePoint {
                score: 0.0,
                confidence: 0.5,
            },
            report: CurvePoint {
                score: 0.0,
                confidence: 0.5,
            },
            observer_follow_confidence: 0.5,
        }
    }
}

impl RatingCurve {
    pub fn point(&self, kind: RelationshipKind) -> CurvePoint {
        match kind {
            RelationshipKind::Follow => self.follow,
            RelationshipKind::Mute => self.mute,
            RelationshipKind::Report => self.report,
        }
    }

    pub fn validate(&self) -> Result<(), GrapevineError> {
        for kind in RelationshipKind::ALL {
            let p = self.point(kind);
            // Negative scores would give raters negative weight downstream.
            if !(0.0..=1.0).contains(&p.score) {
                return Err(GrapevineError::Configuration(format!(
                    "rating curve score for {} must be in [0, 1], got {}",
                    kind, p.score
                )));
            }
            if !(0.0..=1.0).contains(&p.confidence) {
                return Err(GrapevineError::Configuration(format!(
                    "rating curve confidence for {} must be in [0, 1], got {}",
                    kind, p.confidence
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.observer_follow_confidence) {
            return Err(GrapevineError::Configuration(format!(
                "observer_follow_confidence must be in [0, 1], got {}",
                self.observer_follow_confidence
            )));
        }
        Ok(())
    }
}

/// Check that a pubkey is 64 hex characters.
pub fn validate_pubkey(pubkey: &str) -> Result<(), GrapevineError> {
    if pubkey.len() == 64 && pubkey.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(GrapevineError::Configuration(format!(
            "root pubkey must be 64 hex characters, got {:?}",
            pubkey
        )))
    }
}
