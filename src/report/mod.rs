//! Reporting: plain-text summaries and the JSON summary.

pub mod format;

pub use format::*;
