//! Fitting engine.
//!
//! Responsibilities:
//!
//! - solve concentration profiles for a rate matrix (`profile`)
//! - recover spectra by linear least squares (`decompose`)
//! - score a lifetime vector by chi-square (`objective`)
//! - search the free lifetimes (`optimizer`, `strategy`)
//! - orchestrate a whole fit, optionally on a worker thread (`session`)

pub mod decompose;
pub mod objective;
pub mod optimizer;
pub mod profile;
pub mod session;
pub mod strategy;

pub use decompose::*;
pub use objective::*;
pub use optimizer::*;
pub use profile::*;
pub use session::*;
pub use strategy::*;
