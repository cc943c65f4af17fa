//! Kinetic model construction.
//!
//! Models come from three places, all producing the same [`KineticModel`]:
//!
//! - reaction-equation text (`equation`)
//! - the eight canonical presets (`presets`, built on top of the parser)
//! - an explicit lifetime table (`KineticModel::from_lifetime_matrix`)

pub mod equation;
pub mod kinetic;
pub mod presets;

pub use equation::*;
pub use kinetic::*;
pub use presets::*;
