//! Least squares with a matrix right-hand side.
//!
//! For global analysis we solve, for every wavelength column at once,
//!
//! ```text
//! minimize || C · S − D ||²
//! ```
//!
//! Implementation choices:
//! - SVD of the (tall, thin) concentration matrix `C`. This handles `M >> N`
//!   and gives the numerical rank and condition number for free.
//! - A rank-deficient `C` (e.g. two identical lifetimes in a parallel model)
//!   has no unique solution, so we refuse to return one.

use nalgebra::DMatrix;

use crate::error::NumericalError;

/// Singular values below `RANK_RTOL * σ_max` count as zero.
const RANK_RTOL: f64 = 1e-10;

#[derive(Debug, Clone)]
pub struct LeastSquares {
    pub solution: DMatrix<f64>,
    /// `σ_max / σ_min` of the design matrix.
    pub condition: f64,
}

/// Solve `argmin_S ||x·S − y||²` by SVD.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DMatrix<f64>) -> Result<LeastSquares, NumericalError> {
    let columns = x.ncols();
    if x.nrows() != y.nrows() {
        return Err(NumericalError::LeastSquares {
            reason: format!("design has {} rows, data has {}", x.nrows(), y.nrows()),
        });
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(NumericalError::LeastSquares {
            reason: "design matrix contains non-finite values".to_string(),
        });
    }
    if x.nrows() < columns {
        return Err(NumericalError::RankDeficient {
            rank: x.nrows(),
            columns,
        });
    }

    let svd = x.clone().svd(true, true);
    let sigma_max = svd.singular_values.max();
    let sigma_min = svd.singular_values.min();
    let tol = sigma_max * RANK_RTOL;
    let rank = svd.singular_values.iter().filter(|s| **s > tol).count();
    if sigma_max <= 0.0 || rank < columns {
        return Err(NumericalError::RankDeficient { rank, columns });
    }

    let solution = svd
        .solve(y, tol)
        .map_err(|e| NumericalError::LeastSquares { reason: e.to_string() })?;
    if solution.iter().any(|v| !v.is_finite()) {
        return Err(NumericalError::LeastSquares {
            reason: "solution contains non-finite values".to_string(),
        });
    }

    Ok(LeastSquares {
        solution,
        condition: sigma_max / sigma_min,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2], two right-hand sides.
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DMatrix::from_row_slice(3, 2, &[2.0, -1.0, 5.0, -1.0, 8.0, -1.0]);

        let ls = solve_least_squares(&x, &y).unwrap();
        assert!((ls.solution[(0, 0)] - 2.0).abs() < 1e-10);
        assert!((ls.solution[(1, 0)] - 3.0).abs() < 1e-10);
        assert!((ls.solution[(0, 1)] + 1.0).abs() < 1e-10);
        assert!(ls.solution[(1, 1)].abs() < 1e-10);
        assert!(ls.condition >= 1.0);
    }

    #[test]
    fn duplicate_columns_are_rank_deficient() {
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 1.0, 0.5, 0.5, 0.25, 0.25]);
        let y = DMatrix::from_row_slice(3, 1, &[1.0, 2.0, 3.0]);
        assert_eq!(
            solve_least_squares(&x, &y).unwrap_err(),
            NumericalError::RankDeficient { rank: 1, columns: 2 }
        );
    }

    #[test]
    fn too_few_rows_is_rank_deficient() {
        let x = DMatrix::from_row_slice(1, 2, &[1.0, 2.0]);
        let y = DMatrix::from_row_slice(1, 1, &[1.0]);
        assert!(matches!(
            solve_least_squares(&x, &y),
            Err(NumericalError::RankDeficient { .. })
        ));
    }
}
