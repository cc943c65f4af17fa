//! Synthetic transient-absorption data.
//!
//! `D = C(τ) · S + noise` for a kinetic model, where every species gets a
//! Gaussian band (alternating sign, so ground-state bleach and excited-state
//! absorption both show up) and the noise is i.i.d. normal.

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::domain::{ModelDescriptor, SpectralDataset, TimeOrigin};
use crate::error::{FitError, ValidationError};
use crate::fit::{resolve_initial_concentrations, solve_profile};
use crate::models::KineticModel;

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSpec {
    pub wavelengths: Vec<f64>,
    pub delays: Vec<f64>,
    /// Standard deviation of the additive noise; 0 gives exact data.
    pub noise: f64,
    pub seed: u64,
    pub initial_concentrations: Option<Vec<f64>>,
    pub time_origin: TimeOrigin,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            wavelengths: linear_axis(400.0, 590.0, 20),
            delays: linear_axis(-1.0, 200.0, 202),
            noise: 0.0,
            seed: 7,
            initial_concentrations: None,
            time_origin: TimeOrigin::Zero,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticData {
    pub dataset: SpectralDataset,
    pub model: KineticModel,
    pub lifetimes: Vec<f64>,
    /// Noise-free `N x P` spectra used to build the data.
    pub spectra: DMatrix<f64>,
}

/// `count` evenly spaced values from `start` to `end` inclusive.
pub fn linear_axis(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (count - 1) as f64;
            (0..count).map(|i| start + step * i as f64).collect()
        }
    }
}

/// One Gaussian band per species, centres spread evenly across the axis.
pub fn band_spectra(species: usize, wavelengths: &[f64]) -> DMatrix<f64> {
    let (lo, hi) = match (wavelengths.first(), wavelengths.last()) {
        (Some(&lo), Some(&hi)) => (lo, hi),
        _ => return DMatrix::zeros(species, 0),
    };
    let span = (hi - lo).max(f64::EPSILON);
    let width = span / (species as f64 + 1.0);
    DMatrix::from_fn(species, wavelengths.len(), |i, p| {
        let centre = lo + span * (i as f64 + 1.0) / (species as f64 + 1.0);
        let sign = if i % 2 == 0 { 1.0 } else { -0.6 };
        let x = (wavelengths[p] - centre) / width;
        sign * (-0.5 * x * x).exp()
    })
}

pub fn generate(
    descriptor: &ModelDescriptor,
    lifetimes: &[f64],
    spec: &SyntheticSpec,
) -> Result<SyntheticData, FitError> {
    let model = KineticModel::build(descriptor)?;
    if lifetimes.len() != model.slot_count() {
        return Err(ValidationError::LifetimeCountMismatch {
            expected: model.slot_count(),
            found: lifetimes.len(),
        }
        .into());
    }
    for (i, &tau) in lifetimes.iter().enumerate() {
        if !(tau > 0.0) {
            return Err(ValidationError::InvalidLifetime { slot: i + 1, value: tau }.into());
        }
    }
    if !(spec.noise.is_finite() && spec.noise >= 0.0) {
        return Err(ValidationError::InvalidOption {
            name: "noise",
            reason: "must be finite and >= 0".to_string(),
        }
        .into());
    }

    let c0 = resolve_initial_concentrations(&model, spec.initial_concentrations.as_deref())?;
    let t0 = spec.time_origin.resolve(&spec.delays);
    let k = model.rate_matrix(lifetimes);
    let profile = solve_profile(&k, &c0, &spec.delays, t0)?;
    let spectra = band_spectra(model.species_count(), &spec.wavelengths);
    let mut absorption = &profile.matrix * &spectra;

    if spec.noise > 0.0 {
        let mut rng = StdRng::seed_from_u64(spec.seed);
        let normal = Normal::new(0.0, spec.noise).map_err(|e| ValidationError::InvalidOption {
            name: "noise",
            reason: e.to_string(),
        })?;
        for v in absorption.iter_mut() {
            *v += normal.sample(&mut rng);
        }
    }

    let dataset = SpectralDataset::new(spec.wavelengths.clone(), spec.delays.clone(), absorption)?;
    tracing::debug!(
        model = %model.equation(),
        delays = dataset.n_delays(),
        wavelengths = dataset.n_wavelengths(),
        noise = spec.noise,
        "generated synthetic dataset"
    );

    Ok(SyntheticData {
        dataset,
        model,
        lifetimes: lifetimes.to_vec(),
        spectra,
    })
}
