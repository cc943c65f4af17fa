//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - handed to a presentation layer (plots, tables) without conversion
//! - serialized as JSON by the `gta` binary

use std::path::PathBuf;

use clap::ValueEnum;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Measured transient-absorption data.
///
/// `absorption` is stored as `M x P`: one row per delay, one column per
/// wavelength.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralDataset {
    wavelengths: Vec<f64>,
    delays: Vec<f64>,
    absorption: DMatrix<f64>,
}

impl SpectralDataset {
    pub fn new(
        wavelengths: Vec<f64>,
        delays: Vec<f64>,
        absorption: DMatrix<f64>,
    ) -> Result<Self, ValidationError> {
        check_axis("wavelength", &wavelengths)?;
        check_axis("delay", &delays)?;
        if absorption.nrows() != delays.len() || absorption.ncols() != wavelengths.len() {
            return Err(ValidationError::DimensionMismatch {
                rows: absorption.nrows(),
                cols: absorption.ncols(),
                expected_rows: delays.len(),
                expected_cols: wavelengths.len(),
            });
        }
        for col in 0..absorption.ncols() {
            for row in 0..absorption.nrows() {
                if !absorption[(row, col)].is_finite() {
                    return Err(ValidationError::NonFiniteAbsorption { row, col });
                }
            }
        }
        Ok(Self {
            wavelengths,
            delays,
            absorption,
        })
    }

    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    pub fn delays(&self) -> &[f64] {
        &self.delays
    }

    pub fn absorption(&self) -> &DMatrix<f64> {
        &self.absorption
    }

    pub fn n_delays(&self) -> usize {
        self.delays.len()
    }

    pub fn n_wavelengths(&self) -> usize {
        self.wavelengths.len()
    }

    /// Multiply every absorption value by `multiplier` (e.g. OD -> mOD).
    pub fn scaled(mut self, multiplier: f64) -> Result<Self, ValidationError> {
        if !multiplier.is_finite() || multiplier == 0.0 {
            return Err(ValidationError::InvalidMultiplier { value: multiplier });
        }
        self.absorption *= multiplier;
        Ok(self)
    }

    /// Keep only delays and wavelengths inside the (inclusive) crop ranges.
    pub fn crop(&self, crop: &Crop) -> Result<Self, ValidationError> {
        let rows = crop.delay.select("delay", &self.delays)?;
        let cols = crop.wavelength.select("wavelength", &self.wavelengths)?;

        let absorption = DMatrix::from_fn(rows.len(), cols.len(), |r, c| {
            self.absorption[(rows[r], cols[c])]
        });
        Ok(Self {
            wavelengths: cols.iter().map(|&c| self.wavelengths[c]).collect(),
            delays: rows.iter().map(|&r| self.delays[r]).collect(),
            absorption,
        })
    }
}

fn check_axis(axis: &'static str, values: &[f64]) -> Result<(), ValidationError> {
    if values.is_empty() {
        return Err(ValidationError::EmptyAxis { axis });
    }
    for (index, v) in values.iter().enumerate() {
        if !v.is_finite() {
            return Err(ValidationError::NonFiniteAxis { axis, index });
        }
    }
    for index in 1..values.len() {
        if values[index] <= values[index - 1] {
            return Err(ValidationError::AxisNotAscending { axis, index });
        }
    }
    Ok(())
}

/// Inclusive value range on one axis; `None` leaves that end open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl AxisRange {
    pub fn new(lower: Option<f64>, upper: Option<f64>) -> Self {
        Self { lower, upper }
    }

    fn select(&self, axis: &'static str, values: &[f64]) -> Result<Vec<usize>, ValidationError> {
        let lower = self.lower.unwrap_or(f64::NEG_INFINITY);
        let upper = self.upper.unwrap_or(f64::INFINITY);
        if lower.is_nan() || upper.is_nan() || lower > upper {
            return Err(ValidationError::CropOrder { axis, lower, upper });
        }
        let idx: Vec<usize> = values
            .iter()
            .enumerate()
            .filter(|(_, v)| **v >= lower && **v <= upper)
            .map(|(i, _)| i)
            .collect();
        if idx.is_empty() {
            return Err(ValidationError::EmptyCrop { axis });
        }
        Ok(idx)
    }
}

/// Crop window applied at load time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Crop {
    pub delay: AxisRange,
    pub wavelength: AxisRange,
}

/// One lifetime slot: initial value, fixed/free flag and optional bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LifetimeParameter {
    pub value: f64,
    pub fixed: bool,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl LifetimeParameter {
    pub fn free(value: f64) -> Self {
        Self {
            value,
            fixed: false,
            lower: None,
            upper: None,
        }
    }

    pub fn fixed(value: f64) -> Self {
        Self {
            value,
            fixed: true,
            lower: None,
            upper: None,
        }
    }

    pub fn with_bounds(mut self, lower: Option<f64>, upper: Option<f64>) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }
}

/// How the kinetic model is described.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelDescriptor {
    /// Global lifetime analysis: `count` independent exponentials.
    Gla { count: usize },
    /// One of the eight canonical topologies.
    Preset { id: u8, species: Option<usize> },
    /// Reaction-equation text, e.g. `A->B->v; A->C`.
    Equation(String),
    /// Square lifetime table: entry (target, source) is the lifetime of
    /// source->target, diagonal (j, j) the lifetime of j->ground, 0 = none.
    LifetimeMatrix(DMatrix<f64>),
}

/// Where the excitation happens on the delay axis.
///
/// Delays before the origin carry no excited-state population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TimeOrigin {
    /// Excitation at delay 0.
    #[default]
    Zero,
    /// Excitation at the first (smallest) delay of the dataset.
    FirstDelay,
}

impl TimeOrigin {
    pub fn resolve(self, delays: &[f64]) -> f64 {
        match self {
            TimeOrigin::Zero => 0.0,
            TimeOrigin::FirstDelay => delays.first().copied().unwrap_or(0.0),
        }
    }
}

/// Search strategy over the free lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// A single deterministic Nelder–Mead run from the initial guess.
    #[default]
    Local,
    /// Local runs from the guess plus randomized restarts, in parallel.
    MultiStart,
    /// Perturb-and-minimize with Metropolis acceptance.
    BasinHopping,
}

impl Strategy {
    pub fn display_name(self) -> &'static str {
        match self {
            Strategy::Local => "local simplex",
            Strategy::MultiStart => "multi-start",
            Strategy::BasinHopping => "basin hopping",
        }
    }
}

/// Optimizer tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerOptions {
    pub strategy: Strategy,
    /// Iteration budget of every local simplex run.
    pub max_iterations: u64,
    /// Simplex stops once the spread of its chi-square values drops below
    /// `tolerance * chi2(theta0)`.
    pub tolerance: f64,
    /// Total local runs for multi-start (including the one from the guess).
    pub starts: usize,
    /// Perturbation rounds for basin hopping.
    pub hops: usize,
    /// Multi-start draws each lifetime log-uniformly in `[tau / spread, tau * spread]`.
    pub spread: f64,
    /// Basin-hopping perturbation: `tau * exp(step * N(0, 1))`.
    pub step: f64,
    /// Basin-hopping acceptance temperature, relative to the current chi-square.
    pub temperature: f64,
    pub seed: u64,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::Local,
            max_iterations: 2000,
            tolerance: 1e-10,
            starts: 8,
            hops: 20,
            spread: 3.0,
            step: 0.5,
            temperature: 0.1,
            seed: 42,
        }
    }
}

impl OptimizerOptions {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_iterations == 0 {
            return Err(invalid_option("max_iterations", "must be > 0"));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(invalid_option("tolerance", "must be finite and > 0"));
        }
        if self.starts == 0 {
            return Err(invalid_option("starts", "must be >= 1"));
        }
        if !(self.spread.is_finite() && self.spread > 1.0) {
            return Err(invalid_option("spread", "must be finite and > 1"));
        }
        if !(self.step.is_finite() && self.step > 0.0) {
            return Err(invalid_option("step", "must be finite and > 0"));
        }
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return Err(invalid_option("temperature", "must be finite and > 0"));
        }
        Ok(())
    }
}

fn invalid_option(name: &'static str, reason: &str) -> ValidationError {
    ValidationError::InvalidOption {
        name,
        reason: reason.to_string(),
    }
}

/// Terminal status of a successful session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitStatus {
    Converged,
    /// Iteration budget spent before the tolerance was met.
    Exhausted,
    /// Stopped by the caller; the best point seen so far is reported.
    Cancelled,
}

/// How the concentration profile was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolverPath {
    Diagonal,
    Eigen,
    MatrixExponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FitWarning {
    NotConverged { iterations: u64 },
    IllConditionedSpectra { condition: f64 },
    MatrixExponentialFallback,
    PenalizedEvaluations { count: u64 },
}

impl std::fmt::Display for FitWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitWarning::NotConverged { iterations } => {
                write!(f, "optimizer budget exhausted after {iterations} iterations")
            }
            FitWarning::IllConditionedSpectra { condition } => {
                write!(f, "concentration matrix is ill-conditioned (condition {condition:.2e})")
            }
            FitWarning::MatrixExponentialFallback => {
                write!(f, "degenerate rate matrix, profiles computed by matrix exponential")
            }
            FitWarning::PenalizedEvaluations { count } => {
                write!(f, "{count} evaluations failed numerically and were penalized")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub strategy: Strategy,
    pub iterations: u64,
    pub evaluations: u64,
    pub penalized_evaluations: u64,
    /// Local runs performed (1 for the plain local strategy).
    pub local_runs: usize,
    /// Accepted basin-hopping moves.
    pub accepted_hops: usize,
    pub solver_path: SolverPath,
    pub spectra_condition: f64,
    pub warnings: Vec<FitWarning>,
}

/// Output of a fit session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// All lifetime slots, fixed ones included.
    pub lifetimes: Vec<f64>,
    pub fixed: Vec<bool>,
    pub initial_concentrations: Vec<f64>,
    pub rate_matrix: DMatrix<f64>,
    /// `N x P` decay- or species-associated spectra.
    pub spectra: DMatrix<f64>,
    /// `M x N` concentration profile at the optimum.
    pub concentrations: DMatrix<f64>,
    pub reconstruction: DMatrix<f64>,
    pub residuals: DMatrix<f64>,
    pub chi_square: f64,
    pub degrees_of_freedom: usize,
    pub status: FitStatus,
    pub diagnostics: Diagnostics,
}

impl FitResult {
    pub fn rates(&self) -> Vec<f64> {
        self.lifetimes.iter().map(|t| 1.0 / t).collect()
    }
}

/// Where to read the three input series from.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSpec {
    pub wavelengths: PathBuf,
    pub delays: PathBuf,
    pub absorption: PathBuf,
    pub crop: Crop,
    pub multiplier: f64,
}

/// Model choice as given on the command line.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSpec {
    Gla,
    Preset { id: u8, species: Option<usize> },
    Equation(String),
    MatrixFile(PathBuf),
}

/// Fully resolved configuration of a `gta fit` run.
#[derive(Debug, Clone, PartialEq)]
pub struct FitConfig {
    pub dataset: DatasetSpec,
    pub model: ModelSpec,
    /// Initial lifetimes per slot; may be empty for a lifetime-matrix model.
    pub lifetimes: Vec<f64>,
    /// 1-based slot numbers held fixed.
    pub fixed: Vec<usize>,
    /// `(slot, lower, upper)` with 1-based slot numbers.
    pub bounds: Vec<(usize, Option<f64>, Option<f64>)>,
    pub initial_concentrations: Option<Vec<f64>>,
    pub time_origin: TimeOrigin,
    pub optimizer: OptimizerOptions,
    /// Print the spectra table after the summary.
    pub spectra: bool,
    pub json: bool,
}

/// Configuration of a `gta demo` run: simulate, then fit back.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoConfig {
    pub equation: String,
    /// Lifetimes used to simulate the data.
    pub truth: Vec<f64>,
    /// Initial guesses; empty means derived from the truth.
    pub lifetimes: Vec<f64>,
    pub noise: f64,
    pub noise_seed: u64,
    pub fixed: Vec<usize>,
    pub bounds: Vec<(usize, Option<f64>, Option<f64>)>,
    pub initial_concentrations: Option<Vec<f64>>,
    pub time_origin: TimeOrigin,
    pub optimizer: OptimizerOptions,
    pub spectra: bool,
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> SpectralDataset {
        let wl = vec![400.0, 450.0, 500.0];
        let delays = vec![-1.0, 0.0, 1.0, 2.0];
        let abs = DMatrix::from_fn(4, 3, |r, c| (r * 3 + c) as f64);
        SpectralDataset::new(wl, delays, abs).unwrap()
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let err = SpectralDataset::new(vec![1.0, 2.0], vec![0.0], DMatrix::zeros(2, 2)).unwrap_err();
        assert!(matches!(err, ValidationError::DimensionMismatch { .. }));
    }

    #[test]
    fn rejects_descending_axis() {
        let err = SpectralDataset::new(vec![2.0, 1.0], vec![0.0], DMatrix::zeros(1, 2)).unwrap_err();
        assert_eq!(
            err,
            ValidationError::AxisNotAscending {
                axis: "wavelength",
                index: 1
            }
        );
    }

    #[test]
    fn crop_keeps_inclusive_ranges() {
        let crop = Crop {
            delay: AxisRange::new(Some(0.0), None),
            wavelength: AxisRange::new(Some(420.0), Some(500.0)),
        };
        let cropped = dataset().crop(&crop).unwrap();
        assert_eq!(cropped.delays(), &[0.0, 1.0, 2.0]);
        assert_eq!(cropped.wavelengths(), &[450.0, 500.0]);
        // Row for delay 0.0 (index 1), wavelength 450 (index 1) -> 4.0.
        assert_eq!(cropped.absorption()[(0, 0)], 4.0);
    }

    #[test]
    fn crop_to_nothing_is_an_error() {
        let crop = Crop {
            delay: AxisRange::new(Some(10.0), Some(20.0)),
            ..Crop::default()
        };
        assert_eq!(
            dataset().crop(&crop).unwrap_err(),
            ValidationError::EmptyCrop { axis: "delay" }
        );
    }

    #[test]
    fn multiplier_scales_absorption() {
        let scaled = dataset().scaled(1000.0).unwrap();
        assert_eq!(scaled.absorption()[(1, 1)], 4000.0);
        assert!(dataset().scaled(0.0).is_err());
    }

    #[test]
    fn optimizer_options_validate() {
        assert!(OptimizerOptions::default().validate().is_ok());
        let bad = OptimizerOptions {
            spread: 1.0,
            ..OptimizerOptions::default()
        };
        assert!(bad.validate().is_err());
    }
}
