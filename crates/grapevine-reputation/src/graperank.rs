// crates/grapevine-reputation/src/graperank.rs
//
// GrapeRank: confidence-weighted trust propagation from a single root.
//
// Each sweep recomputes every non-root scorecard from the previous sweep's
// scorecards only, so the update is independent of processing order:
//
//   weight     = influence(rater) * rating.confidence  (* attenuation unless rater is root)
//   input      = sum(weight)
//   average    = sum(score * weight) / input            (0 when input is 0)
//   confidence = 1 - exp(-input * -ln(rigor))
//   influence  = average * confidence
//
// The root's scorecard is pinned to (1, 1, 1, 9999) after every sweep.
// Iteration stops when the largest componentwise change drops below the
// convergence threshold or the iteration cap is reached.

use std::time::Instant;

use grapevine_core::config::{validate_pubkey, GrapeRankParams};
use grapevine_core::error::GrapevineError;
use grapevine_core::relationship::Pubkey;
use grapevine_core::scorecard::{
    CalculationRun, RunParameters, Scorecard, ScorecardMap, StopReason,
};
use grapevine_core::shutdown::ShutdownSignal;
use grapevine_core::traits::ScorecardSink;

use crate::ratings::RatingsTable;

/// Largest confidence a non-root scorecard can reach. `1 - exp(-x)` rounds to
/// exactly 1.0 once `x` passes ~37, which would break `confidence < 1`.
const MAX_CONFIDENCE: f64 = 1.0 - f64::EPSILON;

/// Result of one propagation run.
#[derive(Debug, Clone)]
pub struct PropagationOutcome {
    pub scorecards: ScorecardMap,
    pub run: CalculationRun,
}

/// The GrapeRank propagation engine for one root pubkey.
#[derive(Debug, Clone)]
pub struct GrapeRank {
    params: GrapeRankParams,
    root: Pubkey,
}

impl GrapeRank {
    /// Validate the parameters and root before any work is done.
    pub fn new(params: GrapeRankParams, root: impl Into<Pubkey>) -> Result<Self, GrapevineError> {
        let root = root.into();
        params.validate()?;
        validate_pubkey(&root)?;
        Ok(Self { params, root })
    }

    pub fn params(&self) -> &GrapeRankParams {
        &self.params
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Run propagation to convergence (or the iteration cap).
    ///
    /// `prior` seeds the first sweep; pubkeys missing from it start neutral.
    /// The shutdown signal is checked before each sweep.
    pub fn run(
        &self,
        mut ratings: RatingsTable,
        prior: Option<&ScorecardMap>,
        shutdown: &ShutdownSignal,
    ) -> PropagationOutcome {
        let started = Instant::now();

        // Universe: raters, ratees, prior pubkeys, and the root.
        if let Some(prior) = prior {
            for pubkey in prior.keys() {
                ratings.intern(pubkey);
            }
        }
        let root = ratings.intern(&self.root);
        let n = ratings.pubkey_count();

        let mut prev: Vec<Scorecard> = ratings
            .pubkeys()
            .iter()
            .map(|pk| {
                prior
                    .and_then(|p| p.get(pk))
                    .copied()
                    .unwrap_or(Scorecard::NEUTRAL)
            })
            .collect();
        prev[root] = Scorecard::ROOT;
        let mut next = prev.clone();

        let rigority = self.params.rigority();
        let chunk_size = self.params.chunk_size.max(1);
        let mut iterations = 0;
        let mut max_difference = 0.0_f64;
        let mut stop_reason = StopReason::IterationCap;

        tracing::info!(
            "GrapeRank starting: {} pubkeys, {} ratings, rigor={}, attenuation={}",
            n,
            ratings.len(),
            self.params.rigor,
            self.params.attenuation_factor
        );

        for iteration in 1..=self.params.max_iterations {
            if shutdown.is_triggered() {
                tracing::warn!("GrapeRank interrupted before iteration {}", iteration);
                stop_reason = StopReason::Cancelled;
                break;
            }

            let mut start = 0;
            while start < n {
                let end = (start + chunk_size).min(n);
                let chunk: Vec<Scorecard> = (start..end)
                    .map(|idx| {
                        if idx == root {
                            Scorecard::ROOT
                        } else {
                            self.score_one(&ratings, idx, root, &prev, rigority)
                        }
                    })
                    .collect();
                next[start..end].copy_from_slice(&chunk);
                start = end;
            }
            next[root] = Scorecard::ROOT;

            max_difference = prev
                .iter()
                .zip(next.iter())
                .map(|(a, b)| a.max_abs_diff(b))
                .fold(0.0, f64::max);
            std::mem::swap(&mut prev, &mut next);
            iterations = iteration;

            tracing::debug!(
                "GrapeRank iteration {}: max difference {:.6}",
                iteration,
                max_difference
            );

            if max_difference < self.params.convergence_threshold {
                stop_reason = StopReason::Converged;
                break;
            }
        }

        let converged = stop_reason == StopReason::Converged;
        if stop_reason == StopReason::IterationCap {
            tracing::warn!(
                "GrapeRank hit the iteration cap ({}) before converging (max difference {:.6})",
                self.params.max_iterations,
                max_difference
            );
        }

        let scorecards: ScorecardMap = ratings
            .pubkeys()
            .iter()
            .cloned()
            .zip(prev.into_iter())
            .collect();

        let run = CalculationRun {
            timestamp: chrono::Utc::now(),
            calculation_time_ms: started.elapsed().as_millis() as i64,
            iterations,
            converged,
            stop_reason,
            max_difference,
            total_scorecards: scorecards.len(),
            parameters: RunParameters::from(&self.params),
        };
        tracing::info!(
            "GrapeRank finished: {} iterations, converged={}, {} scorecards in {} ms",
            run.iterations,
            run.converged,
            run.total_scorecards,
            run.calculation_time_ms
        );

        PropagationOutcome { scorecards, run }
    }

    /// Load the previous scorecards from `sink`, run, and persist both the
    /// new scorecards and the run metadata. Sink failures are fatal.
    pub async fn run_with_sink(
        &self,
        ratings: RatingsTable,
        sink: &dyn ScorecardSink,
        shutdown: &ShutdownSignal,
    ) -> Result<PropagationOutcome, GrapevineError> {
        let prior = sink.load_scorecards().await?;
        if prior.is_none() {
            tracing::info!("No previous scorecards; starting from neutral state");
        }
        let outcome = self.run(ratings, prior.as_ref(), shutdown);
        sink.save_scorecards(&outcome.scorecards).await?;
        sink.save_run(&outcome.run).await?;
        Ok(outcome)
    }

    fn score_one(
        &self,
        ratings: &RatingsTable,
        idx: usize,
        root: usize,
        prev: &[Scorecard],
        rigority: f64,
    ) -> Scorecard {
        let mut products_sum = 0.0;
        let mut weights_sum = 0.0;
        for edge in ratings.incoming(idx) {
            let mut weight = prev[edge.rater].influence * edge.confidence;
            if edge.rater != root {
                weight *= self.params.attenuation_factor;
            }
            products_sum += edge.score * weight;
            weights_sum += weight;
        }

        let input = weights_sum;
        let average = if weights_sum != 0.0 {
            products_sum / weights_sum
        } else {
            0.0
        };
        let confidence = (1.0 - (-input * rigority).exp()).clamp(0.0, MAX_CONFIDENCE);
        Scorecard {
            influence: average * confidence,
            average,
            confidence,
            input,
        }
    }
}
