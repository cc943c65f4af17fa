//! Search strategies built on top of [`local_search`].
//!
//! - local: one simplex run from the initial guess
//! - multi-start: the guess plus `starts - 1` log-uniform restarts, run in
//!   parallel with rayon; the lowest chi-square wins, ties go to the lower
//!   start index
//! - basin hopping: log-normal perturbation of the current point, a local
//!   run, Metropolis acceptance
//!
//! All randomness comes from `StdRng` seeded by `OptimizerOptions::seed`, so a
//! fixed seed reproduces the same fit.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;

use crate::domain::{OptimizerOptions, Strategy};
use crate::fit::objective::{Objective, clip_to_bounds};
use crate::fit::optimizer::{LocalOutcome, SearchContext, SearchError, local_search};

/// Result of a whole strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub free: Vec<f64>,
    pub chi_square: f64,
    /// Simplex iterations summed over every local run.
    pub iterations: u64,
    /// Whether the local run that produced the optimum met its tolerance.
    pub converged: bool,
    pub local_runs: usize,
    pub accepted_hops: usize,
}

impl SearchOutcome {
    fn single(run: LocalOutcome) -> Self {
        Self {
            free: run.free,
            chi_square: run.chi_square,
            iterations: run.iterations,
            converged: run.converged,
            local_runs: 1,
            accepted_hops: 0,
        }
    }
}

pub fn run_search(
    objective: &Objective<'_>,
    options: &OptimizerOptions,
    context: &SearchContext<'_>,
) -> Result<SearchOutcome, SearchError> {
    let start = objective.parameters().initial_free();
    // Nothing to randomize without free parameters.
    if start.is_empty() {
        return local_search(objective, &start, options, context).map(SearchOutcome::single);
    }
    match options.strategy {
        Strategy::Local => local_search(objective, &start, options, context).map(SearchOutcome::single),
        Strategy::MultiStart => multi_start(objective, &start, options, context),
        Strategy::BasinHopping => basin_hopping(objective, &start, options, context),
    }
}

/// Restart points for multi-start: the guess first, then `starts - 1`
/// draws of `tau * spread^u`, `u ~ U(-1, 1)`, clipped into the bounds.
pub fn restart_points(start: &[f64], bounds: &[(f64, f64)], options: &OptimizerOptions) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(options.seed);
    let log_spread = options.spread.ln();
    let mut points = Vec::with_capacity(options.starts);
    points.push(start.to_vec());
    for _ in 1..options.starts {
        let draw: Vec<f64> = start
            .iter()
            .map(|&tau| tau * (log_spread * rng.gen_range(-1.0..=1.0)).exp())
            .collect();
        points.push(clip_to_bounds(&draw, bounds));
    }
    points
}

fn multi_start(
    objective: &Objective<'_>,
    start: &[f64],
    options: &OptimizerOptions,
    context: &SearchContext<'_>,
) -> Result<SearchOutcome, SearchError> {
    let bounds = objective.parameters().bounds();
    let points = restart_points(start, &bounds, options);

    let runs: Vec<Result<LocalOutcome, SearchError>> = points
        .par_iter()
        .map(|p| local_search(objective, p, options, context))
        .collect();

    let mut best: Option<LocalOutcome> = None;
    let mut iterations = 0;
    let local_runs = runs.len();
    for run in runs {
        let run = run?;
        iterations += run.iterations;
        // Strict comparison keeps the lowest index on ties.
        if best.as_ref().is_none_or(|b| run.chi_square < b.chi_square) {
            best = Some(run);
        }
    }
    let Some(best) = best else {
        return Err(SearchError::Solver("multi-start produced no runs".to_string()));
    };

    tracing::debug!(local_runs, chi_square = best.chi_square, "multi-start finished");
    Ok(SearchOutcome {
        free: best.free,
        chi_square: best.chi_square,
        iterations,
        converged: best.converged,
        local_runs,
        accepted_hops: 0,
    })
}

fn basin_hopping(
    objective: &Objective<'_>,
    start: &[f64],
    options: &OptimizerOptions,
    context: &SearchContext<'_>,
) -> Result<SearchOutcome, SearchError> {
    let bounds = objective.parameters().bounds();
    let mut rng = StdRng::seed_from_u64(options.seed);

    let mut current = local_search(objective, start, options, context)?;
    let mut best = current.clone();
    let mut iterations = current.iterations;
    let mut local_runs = 1;
    let mut accepted_hops = 0;

    for hop in 0..options.hops {
        let trial: Vec<f64> = current
            .free
            .iter()
            .map(|&tau| {
                let z: f64 = StandardNormal.sample(&mut rng);
                tau * (options.step * z).exp()
            })
            .collect();
        let trial = clip_to_bounds(&trial, &bounds);

        let candidate = local_search(objective, &trial, options, context)?;
        iterations += candidate.iterations;
        local_runs += 1;

        let scale = options.temperature * current.chi_square.max(f64::MIN_POSITIVE);
        let delta = candidate.chi_square - current.chi_square;
        let u: f64 = rng.r#gen();
        let accept = delta < 0.0 || u < (-delta / scale).exp();
        tracing::trace!(hop, chi_square = candidate.chi_square, accept, "basin hop");

        if candidate.chi_square < best.chi_square {
            best = candidate.clone();
        }
        if accept {
            accepted_hops += 1;
            current = candidate;
        }
    }

    tracing::debug!(local_runs, accepted_hops, chi_square = best.chi_square, "basin hopping finished");
    Ok(SearchOutcome {
        free: best.free,
        chi_square: best.chi_square,
        iterations,
        converged: best.converged,
        local_runs,
        accepted_hops,
    })
}
