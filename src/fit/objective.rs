//! Chi-square objective over the free lifetimes.
//!
//! One evaluation:
//! 1. merge free lifetimes with the fixed ones
//! 2. assemble the rate matrix
//! 3. solve the concentration profile
//! 4. decompose the data into spectra
//! 5. `chi² = Σ R² / (M·P − n_free)`
//!
//! Nothing is cached between evaluations.

use nalgebra::DMatrix;

use crate::domain::{LifetimeParameter, SpectralDataset, TimeOrigin};
use crate::error::{NumericalError, ValidationError};
use crate::fit::decompose::{Decomposition, decompose};
use crate::fit::profile::{ConcentrationProfile, solve_profile};
use crate::models::KineticModel;

/// Objective value reported for evaluations that fail numerically.
///
/// Finite so the simplex can still rank vertices, and far above any
/// chi-square a real dataset produces.
pub const PENALTY_CHI_SQUARE: f64 = 1.0e150;

/// Validated lifetime slots and the mapping between the optimizer's vector
/// (free slots only) and the full per-slot lifetime vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet {
    params: Vec<LifetimeParameter>,
    free_slots: Vec<usize>,
}

impl ParameterSet {
    pub fn new(params: Vec<LifetimeParameter>, model: &KineticModel) -> Result<Self, ValidationError> {
        if params.len() != model.slot_count() {
            return Err(ValidationError::LifetimeCountMismatch {
                expected: model.slot_count(),
                found: params.len(),
            });
        }

        for (i, p) in params.iter().enumerate() {
            let slot = i + 1;
            // Fixed lifetimes may be infinite (non-decaying component).
            let valid = if p.fixed {
                p.value > 0.0
            } else {
                p.value.is_finite() && p.value > 0.0
            };
            if !valid {
                return Err(ValidationError::InvalidLifetime { slot, value: p.value });
            }
            for bound in [p.lower, p.upper].into_iter().flatten() {
                if bound.is_nan() {
                    return Err(ValidationError::InvalidBound { slot, value: bound });
                }
            }
            let lower = p.lower.unwrap_or(f64::NEG_INFINITY);
            let upper = p.upper.unwrap_or(f64::INFINITY);
            if lower > upper {
                return Err(ValidationError::BoundOrder { slot, lower, upper });
            }
            if !p.fixed && (p.value < lower || p.value > upper) {
                return Err(ValidationError::InitialOutsideBounds {
                    slot,
                    value: p.value,
                    lower,
                    upper,
                });
            }
        }

        let free_slots = params
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.fixed)
            .map(|(i, _)| i)
            .collect();
        Ok(Self { params, free_slots })
    }

    pub fn free_count(&self) -> usize {
        self.free_slots.len()
    }

    pub fn fixed_flags(&self) -> Vec<bool> {
        self.params.iter().map(|p| p.fixed).collect()
    }

    /// Starting point of the search.
    pub fn initial_free(&self) -> Vec<f64> {
        self.free_slots.iter().map(|&s| self.params[s].value).collect()
    }

    /// `(lower, upper)` per free slot, open ends as infinities.
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.free_slots
            .iter()
            .map(|&s| {
                let p = &self.params[s];
                (p.lower.unwrap_or(f64::NEG_INFINITY), p.upper.unwrap_or(f64::INFINITY))
            })
            .collect()
    }

    /// Full per-slot lifetime vector for a free-parameter vector.
    ///
    /// # Panics
    /// Panics if `free.len() != self.free_count()`.
    pub fn expand(&self, free: &[f64]) -> Vec<f64> {
        assert_eq!(free.len(), self.free_slots.len());
        let mut out: Vec<f64> = self.params.iter().map(|p| p.value).collect();
        for (&slot, &value) in self.free_slots.iter().zip(free) {
            out[slot] = value;
        }
        out
    }
}

/// Clip every component of `theta` into its `[lower, upper]` interval.
pub fn clip_to_bounds(theta: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    theta
        .iter()
        .zip(bounds)
        .map(|(&v, &(lo, hi))| v.max(lo).min(hi))
        .collect()
}

/// Everything computed by one objective evaluation.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub lifetimes: Vec<f64>,
    pub rate_matrix: DMatrix<f64>,
    pub profile: ConcentrationProfile,
    pub decomposition: Decomposition,
    pub chi_square: f64,
}

/// The fixed inputs of a fit: data, model, parameter schema, initial
/// populations and time origin.
#[derive(Debug, Clone)]
pub struct Objective<'a> {
    dataset: &'a SpectralDataset,
    model: &'a KineticModel,
    parameters: &'a ParameterSet,
    initial_concentrations: Vec<f64>,
    t0: f64,
    dof: usize,
}

impl<'a> Objective<'a> {
    pub fn new(
        dataset: &'a SpectralDataset,
        model: &'a KineticModel,
        parameters: &'a ParameterSet,
        initial_concentrations: Option<&[f64]>,
        origin: TimeOrigin,
    ) -> Result<Self, ValidationError> {
        let c0 = resolve_initial_concentrations(model, initial_concentrations)?;

        let points = dataset.n_delays() * dataset.n_wavelengths();
        let parameters_count = parameters.free_count();
        if points <= parameters_count {
            return Err(ValidationError::NoDegreesOfFreedom {
                points,
                parameters: parameters_count,
            });
        }

        Ok(Self {
            dataset,
            model,
            parameters,
            initial_concentrations: c0,
            t0: origin.resolve(dataset.delays()),
            dof: points - parameters_count,
        })
    }

    pub fn degrees_of_freedom(&self) -> usize {
        self.dof
    }

    pub fn initial_concentrations(&self) -> &[f64] {
        &self.initial_concentrations
    }

    pub fn parameters(&self) -> &ParameterSet {
        self.parameters
    }

    /// Full evaluation at the free-parameter vector `free`.
    pub fn evaluate(&self, free: &[f64]) -> Result<Evaluation, NumericalError> {
        let lifetimes = self.parameters.expand(free);
        for (i, &tau) in lifetimes.iter().enumerate() {
            if !(tau > 0.0) {
                return Err(NumericalError::NonPositiveLifetime { slot: i + 1, value: tau });
            }
        }

        let rate_matrix = self.model.rate_matrix(&lifetimes);
        let profile = solve_profile(&rate_matrix, &self.initial_concentrations, self.dataset.delays(), self.t0)?;
        let decomposition = decompose(&profile.matrix, self.dataset.absorption())?;
        let chi_square = decomposition.sum_of_squares() / self.dof as f64;
        if !chi_square.is_finite() {
            return Err(NumericalError::NonFiniteChiSquare);
        }

        Ok(Evaluation {
            lifetimes,
            rate_matrix,
            profile,
            decomposition,
            chi_square,
        })
    }

    /// Chi-square at `free`, or [`PENALTY_CHI_SQUARE`] when the evaluation
    /// fails numerically.
    pub fn chi_square(&self, free: &[f64]) -> Result<f64, NumericalError> {
        self.evaluate(free).map(|e| e.chi_square)
    }

    pub fn penalized_chi_square(&self, free: &[f64]) -> (f64, bool) {
        match self.chi_square(free) {
            Ok(value) => (value, false),
            Err(err) => {
                tracing::trace!(?free, %err, "penalized evaluation");
                (PENALTY_CHI_SQUARE, true)
            }
        }
    }
}

/// Default populations: one unit in every component for parallel models,
/// one unit in the first species for target models.
pub fn resolve_initial_concentrations(
    model: &KineticModel,
    given: Option<&[f64]>,
) -> Result<Vec<f64>, ValidationError> {
    let n = model.species_count();
    let c0 = match given {
        Some(values) => {
            if values.len() != n {
                return Err(ValidationError::ConcentrationCountMismatch {
                    expected: n,
                    found: values.len(),
                });
            }
            values.to_vec()
        }
        None if model.is_gla() => vec![1.0; n],
        None => {
            let mut c0 = vec![0.0; n];
            c0[0] = 1.0;
            c0
        }
    };
    for (index, &value) in c0.iter().enumerate() {
        if !(value.is_finite() && value >= 0.0) {
            return Err(ValidationError::InvalidConcentration { index, value });
        }
    }
    Ok(c0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parse_equation;

    fn synthetic(model: &KineticModel, taus: &[f64]) -> SpectralDataset {
        let delays: Vec<f64> = (0..80).map(|i| -1.0 + i as f64 * 2.5).collect();
        let wavelengths: Vec<f64> = (0..12).map(|i| 400.0 + 10.0 * i as f64).collect();
        let k = model.rate_matrix(taus);
        let mut c0 = vec![0.0; model.species_count()];
        c0[0] = 1.0;
        let c = solve_profile(&k, &c0, &delays, 0.0).unwrap().matrix;
        let s = DMatrix::from_fn(model.species_count(), wavelengths.len(), |i, p| {
            ((p as f64 + 1.0) * (i as f64 + 1.0) * 0.3).sin()
        });
        SpectralDataset::new(wavelengths, delays, &c * &s).unwrap()
    }

    #[test]
    fn parameter_set_validation() {
        let model = parse_equation("A->B->v").unwrap();
        assert!(matches!(
            ParameterSet::new(vec![LifetimeParameter::free(1.0)], &model),
            Err(ValidationError::LifetimeCountMismatch { expected: 2, found: 1 })
        ));
        assert!(matches!(
            ParameterSet::new(
                vec![
                    LifetimeParameter::free(1.0).with_bounds(Some(5.0), Some(2.0)),
                    LifetimeParameter::free(3.0)
                ],
                &model
            ),
            Err(ValidationError::BoundOrder { slot: 1, .. })
        ));
        assert!(matches!(
            ParameterSet::new(vec![LifetimeParameter::free(-1.0), LifetimeParameter::free(3.0)], &model),
            Err(ValidationError::InvalidLifetime { slot: 1, .. })
        ));
        assert!(matches!(
            ParameterSet::new(
                vec![
                    LifetimeParameter::free(1.0),
                    LifetimeParameter::free(30.0).with_bounds(None, Some(10.0))
                ],
                &model
            ),
            Err(ValidationError::InitialOutsideBounds { slot: 2, .. })
        ));
    }

    #[test]
    fn fixed_slots_are_excluded_from_search_vector() {
        let model = parse_equation("A->B->C->v").unwrap();
        let set = ParameterSet::new(
            vec![
                LifetimeParameter::free(1.0),
                LifetimeParameter::fixed(10.0),
                LifetimeParameter::free(100.0).with_bounds(Some(50.0), None),
            ],
            &model,
        )
        .unwrap();
        assert_eq!(set.free_count(), 2);
        assert_eq!(set.initial_free(), vec![1.0, 100.0]);
        assert_eq!(set.expand(&[2.0, 200.0]), vec![2.0, 10.0, 200.0]);
        assert_eq!(set.bounds()[1], (50.0, f64::INFINITY));
    }

    #[test]
    fn true_lifetimes_give_zero_chi_square() {
        let model = parse_equation("A->B->v").unwrap();
        let data = synthetic(&model, &[5.0, 50.0]);
        let set = ParameterSet::new(vec![LifetimeParameter::free(3.0), LifetimeParameter::free(70.0)], &model).unwrap();
        let objective = Objective::new(&data, &model, &set, None, TimeOrigin::Zero).unwrap();
        assert_eq!(objective.degrees_of_freedom(), 80 * 12 - 2);

        let at_truth = objective.chi_square(&[5.0, 50.0]).unwrap();
        let at_guess = objective.chi_square(&[3.0, 70.0]).unwrap();
        assert!(at_truth < 1e-20);
        assert!(at_guess > at_truth);
    }

    #[test]
    fn non_positive_lifetimes_are_penalized() {
        let model = parse_equation("A->B->v").unwrap();
        let data = synthetic(&model, &[5.0, 50.0]);
        let set = ParameterSet::new(vec![LifetimeParameter::free(3.0), LifetimeParameter::free(70.0)], &model).unwrap();
        let objective = Objective::new(&data, &model, &set, None, TimeOrigin::Zero).unwrap();
        assert!(matches!(
            objective.chi_square(&[-1.0, 50.0]),
            Err(NumericalError::NonPositiveLifetime { slot: 1, .. })
        ));
        assert_eq!(objective.penalized_chi_square(&[-1.0, 50.0]), (PENALTY_CHI_SQUARE, true));
    }

    #[test]
    fn initial_concentration_defaults() {
        let gla = KineticModel::gla(3).unwrap();
        assert_eq!(resolve_initial_concentrations(&gla, None).unwrap(), vec![1.0; 3]);
        let gta = parse_equation("A->B->v").unwrap();
        assert_eq!(resolve_initial_concentrations(&gta, None).unwrap(), vec![1.0, 0.0]);
        assert!(resolve_initial_concentrations(&gta, Some(&[1.0])).is_err());
        assert!(resolve_initial_concentrations(&gta, Some(&[1.0, -0.5])).is_err());
    }
}
