//! Local simplex search over the free lifetimes.
//!
//! The search itself is argmin's Nelder–Mead. Around it we keep:
//!
//! - bound handling: every trial point is clipped into its box before it is
//!   evaluated, and the reported optimum is clipped the same way
//! - cancellation: the token is checked at the start of every evaluation
//! - a best-so-far record shared by every local run of a session, so a
//!   cancelled search still has something to report

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use argmin::core::{CostFunction, Error, Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::neldermead::NelderMead;

use crate::domain::OptimizerOptions;
use crate::fit::objective::{Objective, PENALTY_CHI_SQUARE, clip_to_bounds};

/// Relative size of the initial simplex edges.
const SIMPLEX_STEP: f64 = 0.05;

/// Absolute edge used for a zero starting component.
const SIMPLEX_ZERO_STEP: f64 = 0.00025;

/// The simplex never tries to resolve chi-square spreads below this.
const MIN_SD_TOLERANCE: f64 = 1e-24;

/// Shared cancellation flag. Cloning hands out another handle to the same
/// flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Snapshot sent to progress observers whenever the best chi-square improves.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub evaluations: u64,
    pub best_chi_square: f64,
    /// Full lifetime vector (fixed slots included) at the best point.
    pub best_lifetimes: Vec<f64>,
}

#[derive(Debug, thiserror::Error)]
#[error("fit cancelled")]
pub struct Cancelled;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SearchError {
    #[error("fit cancelled")]
    Cancelled,
    #[error("optimizer failed: {0}")]
    Solver(String),
}

impl From<Error> for SearchError {
    fn from(err: Error) -> Self {
        if err.downcast_ref::<Cancelled>().is_some() {
            SearchError::Cancelled
        } else {
            SearchError::Solver(err.to_string())
        }
    }
}

/// Best free-parameter vector seen so far and its chi-square.
#[derive(Debug, Clone, PartialEq)]
pub struct BestPoint {
    pub free: Vec<f64>,
    pub chi_square: f64,
}

/// State shared by every local run of one session.
pub struct SearchContext<'a> {
    cancel: CancelToken,
    evaluations: AtomicU64,
    penalized: AtomicU64,
    best: Mutex<Option<BestPoint>>,
    progress: Option<&'a (dyn Fn(Progress) + Sync)>,
}

impl<'a> SearchContext<'a> {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            evaluations: AtomicU64::new(0),
            penalized: AtomicU64::new(0),
            best: Mutex::new(None),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: &'a (dyn Fn(Progress) + Sync)) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn penalized_evaluations(&self) -> u64 {
        self.penalized.load(Ordering::Relaxed)
    }

    pub fn best(&self) -> Option<BestPoint> {
        match self.best.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Evaluate `free` (already inside its bounds) and update the counters
    /// and the best-so-far record.
    pub fn evaluate(&self, objective: &Objective<'_>, free: &[f64]) -> f64 {
        let (chi_square, penalized) = objective.penalized_chi_square(free);
        let evaluations = self.evaluations.fetch_add(1, Ordering::Relaxed) + 1;
        if penalized {
            self.penalized.fetch_add(1, Ordering::Relaxed);
            return chi_square;
        }

        let improved = {
            let mut guard = match self.best.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let better = guard.as_ref().is_none_or(|b| chi_square < b.chi_square);
            if better {
                *guard = Some(BestPoint {
                    free: free.to_vec(),
                    chi_square,
                });
            }
            better
        };

        if improved {
            if let Some(progress) = self.progress {
                progress(Progress {
                    evaluations,
                    best_chi_square: chi_square,
                    best_lifetimes: objective.parameters().expand(free),
                });
            }
        }
        chi_square
    }
}

/// Outcome of one Nelder–Mead run.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalOutcome {
    pub free: Vec<f64>,
    pub chi_square: f64,
    pub iterations: u64,
    pub converged: bool,
}

struct SimplexCost<'s, 'o> {
    objective: &'s Objective<'o>,
    bounds: &'s [(f64, f64)],
    context: &'s SearchContext<'s>,
}

impl CostFunction for SimplexCost<'_, '_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> Result<Self::Output, Error> {
        if self.context.is_cancelled() {
            return Err(Cancelled.into());
        }
        let clipped = clip_to_bounds(theta, self.bounds);
        Ok(self.context.evaluate(self.objective, &clipped))
    }
}

/// Minimize the chi-square from `start` with a bounded Nelder–Mead simplex.
///
/// With no free parameters the start point is evaluated and returned as
/// converged.
pub fn local_search(
    objective: &Objective<'_>,
    start: &[f64],
    options: &OptimizerOptions,
    context: &SearchContext<'_>,
) -> Result<LocalOutcome, SearchError> {
    if context.is_cancelled() {
        return Err(SearchError::Cancelled);
    }
    let bounds = objective.parameters().bounds();
    let start = clip_to_bounds(start, &bounds);

    let chi0 = context.evaluate(objective, &start);
    if start.is_empty() {
        return Ok(LocalOutcome {
            free: start,
            chi_square: chi0,
            iterations: 0,
            converged: true,
        });
    }

    let sd_tolerance = if chi0 >= PENALTY_CHI_SQUARE {
        options.tolerance
    } else {
        (options.tolerance * chi0).max(MIN_SD_TOLERANCE)
    };
    let solver = NelderMead::new(initial_simplex(&start, &bounds))
        .with_sd_tolerance(sd_tolerance)?;

    let cost = SimplexCost {
        objective,
        bounds: &bounds,
        context,
    };
    let max_iterations = options.max_iterations;
    let result = Executor::new(cost, solver)
        .configure(|state| state.max_iters(max_iterations))
        .run()?;

    let state = result.state();
    let converged = matches!(
        state.get_termination_status(),
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
    );
    let free = state
        .get_best_param()
        .map(|p| clip_to_bounds(p, &bounds))
        .unwrap_or(start);
    let chi_square = objective
        .chi_square(&free)
        .unwrap_or(PENALTY_CHI_SQUARE);

    tracing::debug!(
        iterations = state.get_iter(),
        chi_square,
        converged,
        "local simplex finished"
    );

    Ok(LocalOutcome {
        free,
        chi_square,
        iterations: state.get_iter(),
        converged,
    })
}

/// `n + 1` vertices: the start plus one relative step along every axis.
///
/// A step that would leave the box through the upper bound is taken
/// downwards instead.
fn initial_simplex(start: &[f64], bounds: &[(f64, f64)]) -> Vec<Vec<f64>> {
    let mut simplex = Vec::with_capacity(start.len() + 1);
    simplex.push(start.to_vec());
    for (i, &value) in start.iter().enumerate() {
        let mut vertex = start.to_vec();
        let up = if value == 0.0 {
            SIMPLEX_ZERO_STEP
        } else {
            value * (1.0 + SIMPLEX_STEP)
        };
        vertex[i] = if up > bounds[i].1 {
            value * (1.0 - SIMPLEX_STEP)
        } else {
            up
        };
        simplex.push(vertex);
    }
    simplex
}
