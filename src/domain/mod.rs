//! Domain types used throughout the engine.
//!
//! This module defines:
//!
//! - the measured dataset and its crop window (`SpectralDataset`, `Crop`)
//! - lifetime slots and model descriptors (`LifetimeParameter`, `ModelDescriptor`)
//! - optimizer configuration (`OptimizerOptions`, `Strategy`)
//! - fit outputs (`FitResult`, `Diagnostics`, `FitWarning`)

pub mod types;

pub use types::*;
