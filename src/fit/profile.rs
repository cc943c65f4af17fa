//! Concentration profiles `C(t)` for a rate matrix and initial populations.
//!
//! - diagonal `K` (global lifetime analysis): `C_i(t) = C0_i · exp(K_ii (t − t0))`
//! - general `K`: eigen expansion, or the matrix exponential when the
//!   eigenbasis is degenerate
//!
//! Delays before the time origin `t0` carry zero population.

use nalgebra::{DMatrix, DVector};

use crate::domain::SolverPath;
use crate::error::NumericalError;
use crate::math::{eigenbasis, expm_apply};

/// Negative values below `-NEGATIVE_RTOL · ΣC0` are reported, not clamped.
const NEGATIVE_RTOL: f64 = 1e-9;

/// `M x N` concentrations, one row per delay.
#[derive(Debug, Clone)]
pub struct ConcentrationProfile {
    pub matrix: DMatrix<f64>,
    pub path: SolverPath,
}

/// Solve `dC/dt = K·C`, `C(t0) = c0`, at every delay.
///
/// Diagonal rate matrices take the direct exponential path.
pub fn solve_profile(
    k: &DMatrix<f64>,
    c0: &[f64],
    delays: &[f64],
    t0: f64,
) -> Result<ConcentrationProfile, NumericalError> {
    if k.iter().any(|v| !v.is_finite()) {
        return Err(NumericalError::NonFiniteRateMatrix);
    }
    let profile = if is_diagonal(k) {
        solve_diagonal(k, c0, delays, t0)
    } else {
        solve_general(k, c0, delays, t0)
    };
    check_profile(&profile.matrix, c0)?;
    Ok(profile)
}

/// Independent exponentials from the diagonal of `k`.
pub fn solve_diagonal(k: &DMatrix<f64>, c0: &[f64], delays: &[f64], t0: f64) -> ConcentrationProfile {
    let n = k.nrows();
    let matrix = DMatrix::from_fn(delays.len(), n, |row, i| {
        let dt = delays[row] - t0;
        if dt < 0.0 {
            0.0
        } else {
            c0[i] * (k[(i, i)] * dt).exp()
        }
    });
    ConcentrationProfile {
        matrix,
        path: SolverPath::Diagonal,
    }
}

/// Eigen expansion with a matrix-exponential fallback.
pub fn solve_general(k: &DMatrix<f64>, c0: &[f64], delays: &[f64], t0: f64) -> ConcentrationProfile {
    let n = k.nrows();
    let c0 = DVector::from_column_slice(c0);
    let mut matrix = DMatrix::<f64>::zeros(delays.len(), n);

    let path = match eigenbasis(k) {
        Some(basis) => {
            let coefficients = basis.coefficients(&c0);
            for (row, &t) in delays.iter().enumerate() {
                let dt = t - t0;
                if dt >= 0.0 {
                    matrix.set_row(row, &basis.propagate(&coefficients, dt).transpose());
                }
            }
            SolverPath::Eigen
        }
        None => {
            tracing::trace!("degenerate rate matrix, using matrix exponential");
            for (row, &t) in delays.iter().enumerate() {
                let dt = t - t0;
                if dt >= 0.0 {
                    matrix.set_row(row, &expm_apply(k, &c0, dt).transpose());
                }
            }
            SolverPath::MatrixExponential
        }
    };

    ConcentrationProfile { matrix, path }
}

fn is_diagonal(k: &DMatrix<f64>) -> bool {
    for col in 0..k.ncols() {
        for row in 0..k.nrows() {
            if row != col && k[(row, col)] != 0.0 {
                return false;
            }
        }
    }
    true
}

fn check_profile(matrix: &DMatrix<f64>, c0: &[f64]) -> Result<(), NumericalError> {
    let total: f64 = c0.iter().map(|c| c.abs()).sum();
    let floor = -NEGATIVE_RTOL * total.max(1.0);
    for species in 0..matrix.ncols() {
        for delay_index in 0..matrix.nrows() {
            let value = matrix[(delay_index, species)];
            if !value.is_finite() {
                return Err(NumericalError::NonFiniteConcentration);
            }
            if value < floor {
                return Err(NumericalError::NegativeConcentration {
                    species,
                    delay_index,
                    value,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parse_equation;

    fn delays() -> Vec<f64> {
        (0..=60).map(|i| -1.0 + i as f64 * 3.5).collect()
    }

    #[test]
    fn diagonal_and_general_paths_agree() {
        let k = DMatrix::from_diagonal(&DVector::from_vec(vec![-1.0 / 5.0, -1.0 / 50.0, -1.0 / 400.0]));
        let c0 = [1.0, 0.7, 0.3];
        let fast = solve_diagonal(&k, &c0, &delays(), 0.0);
        let general = solve_general(&k, &c0, &delays(), 0.0);
        assert_eq!(general.path, SolverPath::Eigen);
        assert!((fast.matrix - general.matrix).amax() < 1e-12);
    }

    #[test]
    fn sequential_chain_matches_analytic_solution() {
        let (t1, t2) = (5.0, 50.0);
        let model = parse_equation("A->B->v").unwrap();
        let k = model.rate_matrix(&[t1, t2]);
        let profile = solve_profile(&k, &[1.0, 0.0], &delays(), 0.0).unwrap();
        assert_eq!(profile.path, SolverPath::Eigen);

        let (k1, k2) = (1.0 / t1, 1.0 / t2);
        for (row, &t) in delays().iter().enumerate() {
            let (a, b) = if t < 0.0 {
                (0.0, 0.0)
            } else {
                let a = (-k1 * t).exp();
                (a, k1 / (k2 - k1) * (a - (-k2 * t).exp()))
            };
            assert!((profile.matrix[(row, 0)] - a).abs() < 1e-12);
            assert!((profile.matrix[(row, 1)] - b).abs() < 1e-12);
        }
    }

    #[test]
    fn repeated_lifetimes_fall_back_to_matrix_exponential() {
        let tau = 10.0;
        let model = parse_equation("A->B->v").unwrap();
        let k = model.rate_matrix(&[tau, tau]);
        let profile = solve_profile(&k, &[1.0, 0.0], &delays(), 0.0).unwrap();
        assert_eq!(profile.path, SolverPath::MatrixExponential);
        for (row, &t) in delays().iter().enumerate() {
            let expected = if t < 0.0 { 0.0 } else { t / tau * (-t / tau).exp() };
            assert!((profile.matrix[(row, 1)] - expected).abs() < 1e-9, "t={t}");
        }
    }

    #[test]
    fn population_before_origin_is_zero() {
        let model = parse_equation("A->B->v").unwrap();
        let k = model.rate_matrix(&[2.0, 20.0]);
        let delays = [-2.0, -0.5, 0.0, 1.0];
        let at_zero = solve_profile(&k, &[1.0, 0.0], &delays, 0.0).unwrap();
        assert_eq!(at_zero.matrix.row(0).sum(), 0.0);
        assert_eq!(at_zero.matrix.row(1).sum(), 0.0);
        assert!((at_zero.matrix[(2, 0)] - 1.0).abs() < 1e-12);

        let at_first = solve_profile(&k, &[1.0, 0.0], &delays, -2.0).unwrap();
        assert!((at_first.matrix[(0, 0)] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn total_population_decays_monotonically() {
        let model = parse_equation("A->B->C->v; B->A").unwrap();
        let k = model.rate_matrix(&[3.0, 7.0, 40.0, 11.0]);
        let d: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let profile = solve_profile(&k, &[1.0, 0.0, 0.0], &d, 0.0).unwrap();
        let totals: Vec<f64> = profile.matrix.row_iter().map(|r| r.sum()).collect();
        for w in totals.windows(2) {
            assert!(w[1] <= w[0] + 1e-12);
        }
        assert!(totals[0] <= 1.0 + 1e-12);
    }

    #[test]
    fn invalid_rate_matrix_is_reported() {
        // Population flowing *into* A from nowhere drives B negative.
        let k = DMatrix::from_row_slice(2, 2, &[-0.1, 0.0, -0.5, -0.1]);
        let err = solve_profile(&k, &[1.0, 0.0], &[0.0, 1.0, 5.0], 0.0).unwrap_err();
        assert!(matches!(err, NumericalError::NegativeConcentration { species: 1, .. }));
    }
}
