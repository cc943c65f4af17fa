//! Shared "fit pipeline" logic used by the `fit` and `demo` commands.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! load (or simulate) -> resolve model -> build lifetime slots -> fit
//!
//! The command handlers can then focus on presentation.

use crate::data::{SyntheticSpec, generate};
use crate::domain::{DemoConfig, FitConfig, FitResult, LifetimeParameter, ModelDescriptor, ModelSpec};
use crate::error::{FitError, ValidationError};
use crate::fit::{FitEvent, FitSession};
use crate::io::{DatasetStats, load_dataset, load_lifetime_matrix};
use crate::models::{KineticModel, matrix_lifetimes};

/// All computed outputs of a single run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub model: KineticModel,
    pub stats: Option<DatasetStats>,
    pub wavelengths: Vec<f64>,
    pub delays: Vec<f64>,
    pub result: FitResult,
}

/// Turn the command-line model choice into a descriptor.
///
/// Also returns the lifetimes implied by the model source (the non-zero
/// entries of a lifetime table), used when no `--tau` is given.
pub fn resolve_model(spec: &ModelSpec, lifetimes: &[f64]) -> Result<(ModelDescriptor, Vec<f64>), FitError> {
    let resolved = match spec {
        ModelSpec::Gla => (ModelDescriptor::Gla { count: lifetimes.len() }, Vec::new()),
        ModelSpec::Preset { id, species } => (
            ModelDescriptor::Preset {
                id: *id,
                species: *species,
            },
            Vec::new(),
        ),
        ModelSpec::Equation(text) => (ModelDescriptor::Equation(text.clone()), Vec::new()),
        ModelSpec::MatrixFile(path) => {
            let m = load_lifetime_matrix(path)?;
            let defaults = matrix_lifetimes(&m);
            (ModelDescriptor::LifetimeMatrix(m), defaults)
        }
    };
    Ok(resolved)
}

/// Per-slot parameters from initial values, 1-based fixed slots and bounds.
pub fn build_lifetime_parameters(
    values: &[f64],
    fixed: &[usize],
    bounds: &[(usize, Option<f64>, Option<f64>)],
) -> Result<Vec<LifetimeParameter>, ValidationError> {
    let count = values.len();
    let mut params: Vec<LifetimeParameter> = values.iter().map(|&v| LifetimeParameter::free(v)).collect();
    for &slot in fixed {
        let p = slot_mut(&mut params, slot, count)?;
        p.fixed = true;
    }
    for &(slot, lower, upper) in bounds {
        let p = slot_mut(&mut params, slot, count)?;
        p.lower = lower;
        p.upper = upper;
    }
    Ok(params)
}

fn slot_mut(params: &mut [LifetimeParameter], slot: usize, count: usize) -> Result<&mut LifetimeParameter, ValidationError> {
    slot.checked_sub(1)
        .and_then(|i| params.get_mut(i))
        .ok_or(ValidationError::UnknownSlot { slot, count })
}

/// Load the dataset and fit it.
pub fn run_fit(config: &FitConfig) -> Result<RunOutput, FitError> {
    let loaded = load_dataset(&config.dataset)?;
    let (descriptor, defaults) = resolve_model(&config.model, &config.lifetimes)?;
    let values = if config.lifetimes.is_empty() {
        defaults
    } else {
        config.lifetimes.clone()
    };
    let params = build_lifetime_parameters(&values, &config.fixed, &config.bounds)?;
    let model = KineticModel::build(&descriptor)?;

    let wavelengths = loaded.dataset.wavelengths().to_vec();
    let delays = loaded.dataset.delays().to_vec();
    let session = FitSession::with_model(
        loaded.dataset,
        model.clone(),
        params,
        config.initial_concentrations.clone(),
        config.time_origin,
        config.optimizer.clone(),
    )?;
    let result = run_on_worker(session)?;

    Ok(RunOutput {
        model,
        stats: Some(loaded.stats),
        wavelengths,
        delays,
        result,
    })
}

/// Simulate data for `config.equation` and fit it back.
pub fn run_demo(config: &DemoConfig) -> Result<RunOutput, FitError> {
    let descriptor = ModelDescriptor::Equation(config.equation.clone());
    let spec = SyntheticSpec {
        noise: config.noise,
        seed: config.noise_seed,
        initial_concentrations: config.initial_concentrations.clone(),
        time_origin: config.time_origin,
        ..SyntheticSpec::default()
    };
    let data = generate(&descriptor, &config.truth, &spec)?;

    let guesses = if config.lifetimes.is_empty() {
        perturbed_guesses(&config.truth)
    } else {
        config.lifetimes.clone()
    };
    let params = build_lifetime_parameters(&guesses, &config.fixed, &config.bounds)?;

    let wavelengths = data.dataset.wavelengths().to_vec();
    let delays = data.dataset.delays().to_vec();
    let session = FitSession::with_model(
        data.dataset,
        data.model.clone(),
        params,
        config.initial_concentrations.clone(),
        config.time_origin,
        config.optimizer.clone(),
    )?;
    let result = run_on_worker(session)?;

    Ok(RunOutput {
        model: data.model,
        stats: None,
        wavelengths,
        delays,
        result,
    })
}

/// Truth scaled alternately by 0.6 and 1.4.
pub fn perturbed_guesses(truth: &[f64]) -> Vec<f64> {
    truth
        .iter()
        .enumerate()
        .map(|(i, &t)| if i % 2 == 0 { t * 0.6 } else { t * 1.4 })
        .collect()
}

/// Run the session on a worker thread, logging progress as it arrives.
fn run_on_worker(session: FitSession) -> Result<FitResult, FitError> {
    let handle = session.spawn();
    while let Ok(event) = handle.events().recv() {
        match event {
            FitEvent::Progress(p) => {
                tracing::debug!(
                    evaluations = p.evaluations,
                    chi_square = p.best_chi_square,
                    lifetimes = ?p.best_lifetimes,
                    "improved"
                );
            }
            FitEvent::Finished(result) => return result,
        }
    }
    Err(FitError::WorkerLost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OptimizerOptions, TimeOrigin};

    #[test]
    fn lifetime_parameters_apply_fixed_and_bounds() {
        let params = build_lifetime_parameters(&[1.0, 2.0, 3.0], &[2], &[(3, Some(0.5), None)]).unwrap();
        assert!(!params[0].fixed);
        assert!(params[1].fixed);
        assert_eq!(params[2].lower, Some(0.5));
        assert_eq!(params[2].upper, None);

        assert_eq!(
            build_lifetime_parameters(&[1.0], &[2], &[]).unwrap_err(),
            ValidationError::UnknownSlot { slot: 2, count: 1 }
        );
        assert!(build_lifetime_parameters(&[1.0], &[], &[(0, None, None)]).is_err());
    }

    #[test]
    fn gla_count_follows_lifetimes() {
        let (descriptor, defaults) = resolve_model(&ModelSpec::Gla, &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(descriptor, ModelDescriptor::Gla { count: 3 });
        assert!(defaults.is_empty());
    }

    #[test]
    fn demo_recovers_truth() {
        let config = DemoConfig {
            equation: "A->B->v".to_string(),
            truth: vec![5.0, 50.0],
            lifetimes: vec![3.0, 70.0],
            noise: 0.0,
            noise_seed: 7,
            fixed: Vec::new(),
            bounds: Vec::new(),
            initial_concentrations: None,
            time_origin: TimeOrigin::Zero,
            optimizer: OptimizerOptions::default(),
            spectra: false,
            json: false,
        };
        let out = run_demo(&config).unwrap();
        assert!((out.result.lifetimes[0] - 5.0).abs() / 5.0 < 0.01);
        assert!((out.result.lifetimes[1] - 50.0).abs() / 50.0 < 0.01);
        assert!(out.stats.is_none());
        assert_eq!(out.wavelengths.len(), 20);
    }

    #[test]
    fn guesses_are_perturbed_alternately() {
        let g = perturbed_guesses(&[10.0, 100.0]);
        assert!((g[0] - 6.0).abs() < 1e-12);
        assert!((g[1] - 140.0).abs() < 1e-12);
    }
}
