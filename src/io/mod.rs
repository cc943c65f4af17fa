//! Input helpers.
//!
//! - text ingest of axes, absorption and lifetime tables (`ingest`)

pub mod ingest;

pub use ingest::*;
