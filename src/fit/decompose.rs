//! Spectral decomposition: recover per-species spectra from concentrations.
//!
//! Given `C` (`M x N`) and the measured `D` (`M x P`), we solve
//! `S = argmin ||C·S − D||²` and report the reconstruction `C·S` and the
//! residual `D − C·S`.

use nalgebra::DMatrix;

use crate::error::NumericalError;
use crate::math::solve_least_squares;

#[derive(Debug, Clone)]
pub struct Decomposition {
    /// `N x P` decay- or species-associated spectra.
    pub spectra: DMatrix<f64>,
    pub reconstruction: DMatrix<f64>,
    pub residuals: DMatrix<f64>,
    /// Condition number of `C`.
    pub condition: f64,
}

impl Decomposition {
    pub fn sum_of_squares(&self) -> f64 {
        self.residuals.norm_squared()
    }
}

pub fn decompose(concentrations: &DMatrix<f64>, absorption: &DMatrix<f64>) -> Result<Decomposition, NumericalError> {
    let ls = solve_least_squares(concentrations, absorption)?;
    let reconstruction = concentrations * &ls.solution;
    let residuals = absorption - &reconstruction;
    Ok(Decomposition {
        spectra: ls.solution,
        reconstruction,
        residuals,
        condition: ls.condition,
    })
}
