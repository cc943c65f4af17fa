//! Linear-algebra utilities: least squares and `exp(K t)` propagators.

pub mod ols;
pub mod propagator;

pub use ols::*;
pub use propagator::*;
