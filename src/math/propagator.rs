//! Propagators for the linear system `dC/dt = K · C`.
//!
//! Two representations of `exp(K t)`:
//!
//! - an eigenbasis `K = V Λ V⁻¹`, valid when the eigenvalues are real and
//!   well separated, giving `exp(K t) = V exp(Λ t) V⁻¹`
//! - the scaling-and-squaring Padé exponential of `K t`, used when the
//!   eigenbasis is missing or untrustworthy (repeated or complex eigenvalues,
//!   ill-conditioned `V`)

use nalgebra::{DMatrix, DVector};

/// Eigenvalues closer than this (relative) are treated as repeated.
pub const DEGENERACY_RTOL: f64 = 1e-6;

/// Imaginary parts below this fraction of the spectral scale count as real.
const IMAG_RTOL: f64 = 1e-10;

/// `‖V‖·‖V⁻¹‖` above this rejects the eigenbasis.
pub const MAX_EIGENBASIS_CONDITION: f64 = 1e10;

#[derive(Debug, Clone)]
pub struct Eigenbasis {
    pub values: DVector<f64>,
    pub vectors: DMatrix<f64>,
    pub inverse: DMatrix<f64>,
}

impl Eigenbasis {
    /// `exp(K t) · c0` via the eigen expansion.
    pub fn propagate(&self, coefficients: &DVector<f64>, t: f64) -> DVector<f64> {
        let n = self.values.len();
        let mut out = DVector::<f64>::zeros(n);
        for i in 0..n {
            let weight = coefficients[i] * (self.values[i] * t).exp();
            if weight != 0.0 {
                out.axpy(weight, &self.vectors.column(i), 1.0);
            }
        }
        out
    }

    /// `V⁻¹ · c0`, the weights of each eigenmode.
    pub fn coefficients(&self, c0: &DVector<f64>) -> DVector<f64> {
        &self.inverse * c0
    }
}

/// Real, non-degenerate eigenbasis of `k`, or `None` when the caller must
/// fall back to [`expm_apply`].
pub fn eigenbasis(k: &DMatrix<f64>) -> Option<Eigenbasis> {
    let n = k.nrows();
    if n == 0 || n != k.ncols() || k.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let scale = k.amax().max(f64::MIN_POSITIVE);
    let complex = k.complex_eigenvalues();
    if complex.iter().any(|z| z.im.abs() > IMAG_RTOL * scale) {
        return None;
    }
    let values: Vec<f64> = complex.iter().map(|z| z.re).collect();
    if has_repeated(&values, scale) {
        return None;
    }

    let mut columns = Vec::with_capacity(n);
    let identity = DMatrix::<f64>::identity(n, n);
    for &lambda in &values {
        let shifted = k - &identity * lambda;
        let svd = shifted.svd(false, true);
        let v_t = svd.v_t?;
        let idx = svd.singular_values.imin();
        let v = v_t.row(idx).transpose();
        columns.push(v);
    }
    let vectors = DMatrix::from_columns(&columns);
    let inverse = vectors.clone().try_inverse()?;
    let condition = vectors.norm() * inverse.norm();
    if !condition.is_finite() || condition > MAX_EIGENBASIS_CONDITION {
        return None;
    }

    Some(Eigenbasis {
        values: DVector::from_vec(values),
        vectors,
        inverse,
    })
}

fn has_repeated(values: &[f64], scale: f64) -> bool {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted.windows(2).any(|w| {
        let gap = (w[1] - w[0]).abs();
        let size = w[0].abs().max(w[1].abs()).max(scale * f64::EPSILON);
        gap <= DEGENERACY_RTOL * size
    })
}

/// `exp(K t) · c0` by scaling-and-squaring Padé approximation.
pub fn expm_apply(k: &DMatrix<f64>, c0: &DVector<f64>, t: f64) -> DVector<f64> {
    (k * t).exp() * c0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eigen_and_expm_agree_on_chain() {
        let k = DMatrix::from_row_slice(2, 2, &[-0.2, 0.0, 0.2, -0.02]);
        let basis = eigenbasis(&k).expect("distinct real eigenvalues");
        let c0 = DVector::from_vec(vec![1.0, 0.0]);
        let coeffs = basis.coefficients(&c0);
        for &t in &[0.0, 1.0, 10.0, 100.0] {
            let a = basis.propagate(&coeffs, t);
            let b = expm_apply(&k, &c0, t);
            assert!((a - b).amax() < 1e-10, "t={t}");
        }
    }

    #[test]
    fn repeated_eigenvalues_have_no_eigenbasis() {
        // A->B->v with equal lifetimes: defective matrix.
        let k = DMatrix::from_row_slice(2, 2, &[-0.1, 0.0, 0.1, -0.1]);
        assert!(eigenbasis(&k).is_none());
    }

    #[test]
    fn complex_eigenvalues_have_no_eigenbasis() {
        // Rotation-like generator.
        let k = DMatrix::from_row_slice(2, 2, &[-0.1, -1.0, 1.0, -0.1]);
        assert!(eigenbasis(&k).is_none());
    }

    #[test]
    fn zero_eigenvalue_is_fine() {
        // A->B, B never decays.
        let k = DMatrix::from_row_slice(2, 2, &[-0.5, 0.0, 0.5, 0.0]);
        let basis = eigenbasis(&k).unwrap();
        let c0 = DVector::from_vec(vec![1.0, 0.0]);
        let c = basis.propagate(&basis.coefficients(&c0), 2.0);
        let a = (-1.0f64).exp();
        assert!((c[0] - a).abs() < 1e-12);
        assert!((c[1] - (1.0 - a)).abs() < 1e-12);
    }
}
