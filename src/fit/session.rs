//! Fit orchestration.
//!
//! A [`FitSession`] owns the dataset, the kinetic model and the parameter
//! schema. Running it walks the state machine
//!
//! ```text
//! Configured -> Evaluating -> Converged | Exhausted | Cancelled | Failed
//! ```
//!
//! and packages the optimum into a [`FitResult`]. Sessions run either on the
//! calling thread ([`FitSession::run`]) or on a worker thread
//! ([`FitSession::spawn`]) that reports [`FitEvent`]s over a channel.

use std::sync::mpsc;
use std::thread;

use crate::domain::{
    Diagnostics, FitResult, FitStatus, FitWarning, LifetimeParameter, ModelDescriptor, OptimizerOptions,
    SolverPath, SpectralDataset, TimeOrigin,
};
use crate::error::{FitError, NumericalError, ValidationError};
use crate::fit::objective::{Objective, ParameterSet};
use crate::fit::optimizer::{CancelToken, Progress, SearchContext, SearchError};
use crate::fit::strategy::{SearchOutcome, run_search};
use crate::models::KineticModel;

/// Condition numbers of the concentration matrix above this are reported.
pub const ILL_CONDITIONED_SPECTRA: f64 = 1e8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitState {
    Configured,
    Evaluating,
    Converged,
    Exhausted,
    Cancelled,
    Failed,
}

impl FitState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, FitState::Configured | FitState::Evaluating)
    }
}

/// Messages sent by a spawned session.
#[derive(Debug)]
pub enum FitEvent {
    Progress(Progress),
    Finished(Result<FitResult, FitError>),
}

#[derive(Debug)]
pub struct FitSession {
    dataset: SpectralDataset,
    model: KineticModel,
    parameters: ParameterSet,
    initial_concentrations: Option<Vec<f64>>,
    origin: TimeOrigin,
    options: OptimizerOptions,
    cancel: CancelToken,
    state: FitState,
}

impl FitSession {
    /// Build and validate a session. Every input error surfaces here, before
    /// any objective evaluation.
    pub fn new(
        dataset: SpectralDataset,
        descriptor: &ModelDescriptor,
        lifetimes: Vec<LifetimeParameter>,
        initial_concentrations: Option<Vec<f64>>,
        origin: TimeOrigin,
        options: OptimizerOptions,
    ) -> Result<Self, ValidationError> {
        let model = KineticModel::build(descriptor)?;
        Self::with_model(dataset, model, lifetimes, initial_concentrations, origin, options)
    }

    pub fn with_model(
        dataset: SpectralDataset,
        model: KineticModel,
        lifetimes: Vec<LifetimeParameter>,
        initial_concentrations: Option<Vec<f64>>,
        origin: TimeOrigin,
        options: OptimizerOptions,
    ) -> Result<Self, ValidationError> {
        options.validate()?;
        let parameters = ParameterSet::new(lifetimes, &model)?;
        // Validates the initial concentrations and the degrees of freedom.
        Objective::new(&dataset, &model, &parameters, initial_concentrations.as_deref(), origin)?;

        Ok(Self {
            dataset,
            model,
            parameters,
            initial_concentrations,
            origin,
            options,
            cancel: CancelToken::new(),
            state: FitState::Configured,
        })
    }

    pub fn state(&self) -> FitState {
        self.state
    }

    /// A handle that stops the search at the next objective evaluation.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn run(&mut self) -> Result<FitResult, FitError> {
        self.run_with_progress(|_| {})
    }

    /// A session runs once; a finished session keeps its terminal state.
    pub fn run_with_progress<F>(&mut self, progress: F) -> Result<FitResult, FitError>
    where
        F: Fn(Progress) + Sync,
    {
        if self.state.is_terminal() {
            return Err(FitError::SessionFinished);
        }
        let outcome = self.execute(&progress);
        self.state = match &outcome {
            Ok(result) => match result.status {
                FitStatus::Converged => FitState::Converged,
                FitStatus::Exhausted => FitState::Exhausted,
                FitStatus::Cancelled => FitState::Cancelled,
            },
            Err(_) => FitState::Failed,
        };
        outcome
    }

    /// Run the session on a worker thread.
    pub fn spawn(mut self) -> FitHandle {
        let (sender, events) = mpsc::channel();
        let cancel = self.cancel.clone();
        let worker = thread::spawn(move || {
            let progress_sender = sender.clone();
            let result = self.run_with_progress(move |p| {
                // The receiver may be gone; progress is best effort.
                let _ = progress_sender.send(FitEvent::Progress(p));
            });
            let _ = sender.send(FitEvent::Finished(result));
        });
        FitHandle {
            events,
            cancel,
            worker: Some(worker),
        }
    }

    fn execute(&mut self, progress: &(dyn Fn(Progress) + Sync)) -> Result<FitResult, FitError> {
        self.state = FitState::Evaluating;
        let objective = Objective::new(
            &self.dataset,
            &self.model,
            &self.parameters,
            self.initial_concentrations.as_deref(),
            self.origin,
        )?;

        tracing::info!(
            model = %self.model.equation(),
            strategy = self.options.strategy.display_name(),
            free = self.parameters.free_count(),
            delays = self.dataset.n_delays(),
            wavelengths = self.dataset.n_wavelengths(),
            "fit started"
        );

        let context = SearchContext::new(self.cancel.clone()).with_progress(progress);
        let (free, status, search) = match run_search(&objective, &self.options, &context) {
            Ok(outcome) => {
                let status = if outcome.converged {
                    FitStatus::Converged
                } else {
                    FitStatus::Exhausted
                };
                (outcome.free.clone(), status, Some(outcome))
            }
            Err(SearchError::Cancelled) => {
                let free = context
                    .best()
                    .map(|b| b.free)
                    .unwrap_or_else(|| self.parameters.initial_free());
                tracing::info!("fit cancelled, reporting best point so far");
                (free, FitStatus::Cancelled, None)
            }
            Err(SearchError::Solver(reason)) => {
                return Err(NumericalError::Optimizer { reason }.into());
            }
        };

        let evaluation = objective.evaluate(&free)?;

        let (iterations, local_runs, accepted_hops) = search
            .as_ref()
            .map(|s: &SearchOutcome| (s.iterations, s.local_runs, s.accepted_hops))
            .unwrap_or((0, 0, 0));
        let penalized = context.penalized_evaluations();
        let condition = evaluation.decomposition.condition;

        let mut warnings = Vec::new();
        if status == FitStatus::Exhausted {
            tracing::warn!(iterations, "optimizer budget exhausted before convergence");
            warnings.push(FitWarning::NotConverged { iterations });
        }
        if condition > ILL_CONDITIONED_SPECTRA {
            tracing::warn!(condition, "ill-conditioned concentration matrix");
            warnings.push(FitWarning::IllConditionedSpectra { condition });
        }
        if evaluation.profile.path == SolverPath::MatrixExponential {
            tracing::warn!("degenerate rate matrix at the optimum");
            warnings.push(FitWarning::MatrixExponentialFallback);
        }
        if penalized > 0 {
            warnings.push(FitWarning::PenalizedEvaluations { count: penalized });
        }

        tracing::info!(
            chi_square = evaluation.chi_square,
            ?status,
            evaluations = context.evaluations(),
            "fit finished"
        );

        Ok(FitResult {
            lifetimes: evaluation.lifetimes,
            fixed: self.parameters.fixed_flags(),
            initial_concentrations: objective.initial_concentrations().to_vec(),
            rate_matrix: evaluation.rate_matrix,
            spectra: evaluation.decomposition.spectra,
            concentrations: evaluation.profile.matrix,
            reconstruction: evaluation.decomposition.reconstruction,
            residuals: evaluation.decomposition.residuals,
            chi_square: evaluation.chi_square,
            degrees_of_freedom: objective.degrees_of_freedom(),
            status,
            diagnostics: Diagnostics {
                strategy: self.options.strategy,
                iterations,
                evaluations: context.evaluations(),
                penalized_evaluations: penalized,
                local_runs,
                accepted_hops,
                solver_path: evaluation.profile.path,
                spectra_condition: condition,
                warnings,
            },
        })
    }
}

/// Handle to a session running on a worker thread.
#[derive(Debug)]
pub struct FitHandle {
    events: mpsc::Receiver<FitEvent>,
    cancel: CancelToken,
    worker: Option<thread::JoinHandle<()>>,
}

impl FitHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn events(&self) -> &mpsc::Receiver<FitEvent> {
        &self.events
    }

    /// Block until the worker reports its result. Progress events still in
    /// the channel are dropped.
    pub fn wait(mut self) -> Result<FitResult, FitError> {
        let mut result = Err(FitError::WorkerLost);
        for event in self.events.iter() {
            if let FitEvent::Finished(r) = event {
                result = r;
                break;
            }
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                return Err(FitError::WorkerLost);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SyntheticSpec, generate};
    use crate::domain::Strategy;

    fn scenario(guesses: [f64; 2]) -> FitSession {
        // Delays -1..200 in steps of 1, 20 wavelengths, no noise.
        let spec = SyntheticSpec::default();
        let data = generate(&ModelDescriptor::Equation("A->B->v".to_string()), &[5.0, 50.0], &spec).unwrap();
        FitSession::new(
            data.dataset,
            &ModelDescriptor::Equation("A->B->v".to_string()),
            guesses.iter().map(|&g| LifetimeParameter::free(g)).collect(),
            Some(vec![1.0, 0.0]),
            TimeOrigin::Zero,
            OptimizerOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn sequential_scenario_recovers_lifetimes() {
        let mut session = scenario([3.0, 70.0]);
        assert_eq!(session.state(), FitState::Configured);
        let result = session.run().unwrap();

        assert!((result.lifetimes[0] - 5.0).abs() / 5.0 < 0.01, "{:?}", result.lifetimes);
        assert!((result.lifetimes[1] - 50.0).abs() / 50.0 < 0.01, "{:?}", result.lifetimes);
        assert!(result.chi_square < 1e-8);
        assert_eq!(result.degrees_of_freedom, 202 * 20 - 2);
        assert_eq!(result.spectra.shape(), (2, 20));
        assert_eq!(result.concentrations.shape(), (202, 2));
        assert!(session.state().is_terminal());
        assert_eq!(result.diagnostics.solver_path, SolverPath::Eigen);
    }

    #[test]
    fn bounds_hold_at_the_optimum() {
        let spec = SyntheticSpec::default();
        let descriptor = ModelDescriptor::Gla { count: 2 };
        let data = generate(&descriptor, &[8.0, 60.0], &spec).unwrap();
        let mut session = FitSession::new(
            data.dataset,
            &descriptor,
            vec![
                LifetimeParameter::free(5.0).with_bounds(Some(1.0), Some(6.0)),
                LifetimeParameter::free(90.0).with_bounds(Some(70.0), None),
            ],
            None,
            TimeOrigin::Zero,
            OptimizerOptions::default(),
        )
        .unwrap();
        let result = session.run().unwrap();
        assert!(result.lifetimes[0] >= 1.0 && result.lifetimes[0] <= 6.0);
        assert!(result.lifetimes[1] >= 70.0);
    }

    #[test]
    fn fixed_lifetime_is_returned_unchanged() {
        let spec = SyntheticSpec::default();
        let descriptor = ModelDescriptor::Equation("A->B->v".to_string());
        let data = generate(&descriptor, &[5.0, 50.0], &spec).unwrap();
        let mut session = FitSession::new(
            data.dataset,
            &descriptor,
            vec![LifetimeParameter::free(3.0), LifetimeParameter::fixed(50.0)],
            None,
            TimeOrigin::Zero,
            OptimizerOptions::default(),
        )
        .unwrap();
        let result = session.run().unwrap();
        assert_eq!(result.lifetimes[1], 50.0);
        assert_eq!(result.fixed, vec![false, true]);
        assert!((result.lifetimes[0] - 5.0).abs() < 0.05);
    }

    #[test]
    fn cancel_before_start_reports_cancelled() {
        let mut session = scenario([3.0, 70.0]);
        session.cancel_token().cancel();
        let result = session.run().unwrap();
        assert_eq!(result.status, FitStatus::Cancelled);
        assert_eq!(result.lifetimes, vec![3.0, 70.0]);
        assert_eq!(session.state(), FitState::Cancelled);
    }

    #[test]
    fn spawned_session_reports_progress_and_result() {
        let mut session = scenario([3.0, 70.0]);
        session.options.strategy = Strategy::MultiStart;
        session.options.starts = 3;
        let handle = session.spawn();
        let mut progress = 0;
        let result = loop {
            match handle.events().recv() {
                Ok(FitEvent::Progress(_)) => progress += 1,
                Ok(FitEvent::Finished(r)) => break r,
                Err(_) => panic!("worker hung up"),
            }
        };
        let result = result.unwrap();
        assert!(progress > 0);
        assert_eq!(result.diagnostics.local_runs, 3);
        assert!((result.lifetimes[0] - 5.0).abs() / 5.0 < 0.01);
    }

    #[test]
    fn cancelled_worker_still_reports_a_result() {
        let mut session = scenario([3.0, 70.0]);
        session.options.strategy = Strategy::BasinHopping;
        session.options.hops = 200;
        let handle = session.spawn();
        handle.cancel();
        let result = handle.wait().unwrap();
        // The worker may finish its first local run before it sees the flag.
        assert_eq!(result.lifetimes.len(), 2);
        assert!(result.chi_square.is_finite());
    }

    #[test]
    fn budget_exhausted_is_a_warning_not_an_error() {
        let mut session = scenario([3.0, 70.0]);
        session.options.max_iterations = 3;
        let result = session.run().unwrap();
        assert_eq!(result.status, FitStatus::Exhausted);
        assert!(result.diagnostics.warnings.contains(&FitWarning::NotConverged { iterations: 3 }));
        assert!(result.chi_square.is_finite());
        assert_eq!(session.state(), FitState::Exhausted);
    }

    #[test]
    fn non_unique_spectra_fail_the_session() {
        // B and C are both fed by A alone, so their profiles are proportional.
        let descriptor = ModelDescriptor::Equation("A->B; A->C".to_string());
        let data = generate(&descriptor, &[5.0, 20.0], &SyntheticSpec::default()).unwrap();
        let mut session = FitSession::new(
            data.dataset,
            &descriptor,
            vec![LifetimeParameter::free(5.0), LifetimeParameter::free(20.0)],
            None,
            TimeOrigin::Zero,
            OptimizerOptions::default(),
        )
        .unwrap();
        let err = session.run().unwrap_err();
        assert!(
            matches!(err, FitError::Numerical(NumericalError::RankDeficient { .. })),
            "{err:?}"
        );
        assert_eq!(session.state(), FitState::Failed);
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn rank_deficient_start_is_penalized_and_left_behind() {
        let descriptor = ModelDescriptor::Gla { count: 2 };
        let data = generate(&descriptor, &[8.0, 60.0], &SyntheticSpec::default()).unwrap();
        let mut session = FitSession::new(
            data.dataset,
            &descriptor,
            vec![LifetimeParameter::free(10.0), LifetimeParameter::free(10.0)],
            None,
            TimeOrigin::Zero,
            OptimizerOptions::default(),
        )
        .unwrap();
        let result = session.run().unwrap();

        assert_eq!(result.status, FitStatus::Converged);
        assert!(result.diagnostics.penalized_evaluations > 0);
        assert!(
            result
                .diagnostics
                .warnings
                .iter()
                .any(|w| matches!(w, FitWarning::PenalizedEvaluations { .. }))
        );
        // GLA is symmetric under swapping the slots.
        let mut lifetimes = result.lifetimes.clone();
        lifetimes.sort_by(f64::total_cmp);
        assert!((lifetimes[0] - 8.0).abs() / 8.0 < 0.01, "{lifetimes:?}");
        assert!((lifetimes[1] - 60.0).abs() / 60.0 < 0.01, "{lifetimes:?}");
    }

    #[test]
    fn finished_session_refuses_to_run_again() {
        let mut session = scenario([3.0, 70.0]);
        session.options.max_iterations = 3;
        session.run().unwrap();
        assert_eq!(session.state(), FitState::Exhausted);

        assert!(matches!(session.run(), Err(FitError::SessionFinished)));
        assert_eq!(session.state(), FitState::Exhausted);
    }

    #[test]
    fn validation_happens_at_construction() {
        let spec = SyntheticSpec::default();
        let descriptor = ModelDescriptor::Equation("A->B->v".to_string());
        let data = generate(&descriptor, &[5.0, 50.0], &spec).unwrap();
        let err = FitSession::new(
            data.dataset,
            &descriptor,
            vec![LifetimeParameter::free(3.0)],
            None,
            TimeOrigin::Zero,
            OptimizerOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::LifetimeCountMismatch { expected: 2, found: 1 }));
    }
}
