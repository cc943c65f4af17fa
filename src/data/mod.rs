//! Data sources other than files on disk.
//!
//! - synthetic datasets for demos and tests (`synthetic`)

pub mod synthetic;

pub use synthetic::*;
