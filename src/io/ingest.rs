//! Text ingest for the three input series.
//!
//! Each input is a plain text file:
//!
//! - numbers separated by whitespace or commas
//! - one matrix row per line
//! - blank lines and everything after `#` ignored
//!
//! The absorption matrix may be stored either way round (delays as rows or
//! as columns). We detect the orientation from the axis lengths.

use std::fs;
use std::path::Path;

use nalgebra::DMatrix;

use crate::domain::{DatasetSpec, SpectralDataset};
use crate::error::{FitError, LoadError, ValidationError};

/// Summary stats about the dataset actually used for fitting.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetStats {
    pub n_delays: usize,
    pub n_wavelengths: usize,
    pub delay_min: f64,
    pub delay_max: f64,
    pub wavelength_min: f64,
    pub wavelength_max: f64,
    pub absorption_min: f64,
    pub absorption_max: f64,
    /// The file stored wavelengths as rows and was transposed on load.
    pub transposed: bool,
}

impl DatasetStats {
    pub fn from_dataset(dataset: &SpectralDataset, transposed: bool) -> Self {
        let axis_range = |v: &[f64]| (v.first().copied().unwrap_or(f64::NAN), v.last().copied().unwrap_or(f64::NAN));
        let (delay_min, delay_max) = axis_range(dataset.delays());
        let (wavelength_min, wavelength_max) = axis_range(dataset.wavelengths());
        Self {
            n_delays: dataset.n_delays(),
            n_wavelengths: dataset.n_wavelengths(),
            delay_min,
            delay_max,
            wavelength_min,
            wavelength_max,
            absorption_min: dataset.absorption().min(),
            absorption_max: dataset.absorption().max(),
            transposed,
        }
    }
}

/// Loaded dataset plus what happened on the way.
#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub dataset: SpectralDataset,
    pub stats: DatasetStats,
}

/// Read, orient, scale and crop the dataset described by `spec`.
pub fn load_dataset(spec: &DatasetSpec) -> Result<LoadedDataset, FitError> {
    let wavelengths = parse_axis(&read_file(&spec.wavelengths)?, &origin(&spec.wavelengths))?;
    let delays = parse_axis(&read_file(&spec.delays)?, &origin(&spec.delays))?;
    let raw = parse_matrix(&read_file(&spec.absorption)?, &origin(&spec.absorption))?;

    let (absorption, transposed) = orient(raw, delays.len(), wavelengths.len())?;
    let dataset = SpectralDataset::new(wavelengths, delays, absorption)?
        .scaled(spec.multiplier)?
        .crop(&spec.crop)?;
    let stats = DatasetStats::from_dataset(&dataset, transposed);

    tracing::info!(
        delays = stats.n_delays,
        wavelengths = stats.n_wavelengths,
        transposed,
        "dataset loaded"
    );
    Ok(LoadedDataset { dataset, stats })
}

/// Load a square lifetime table for the explicit-matrix model path.
pub fn load_lifetime_matrix(path: &Path) -> Result<DMatrix<f64>, FitError> {
    let m = parse_matrix(&read_file(path)?, &origin(path))?;
    if m.nrows() != m.ncols() {
        return Err(ValidationError::NonSquareMatrix {
            rows: m.nrows(),
            cols: m.ncols(),
        }
        .into());
    }
    Ok(m)
}

/// Every number in `text`, in reading order.
pub fn parse_axis(text: &str, origin: &str) -> Result<Vec<f64>, LoadError> {
    let rows = parse_rows(text, origin)?;
    let values: Vec<f64> = rows.into_iter().flat_map(|(_, row)| row).collect();
    if values.is_empty() {
        return Err(LoadError::Empty {
            origin: origin.to_string(),
        });
    }
    Ok(values)
}

/// One matrix row per non-empty line; all rows must have the same length.
pub fn parse_matrix(text: &str, origin: &str) -> Result<DMatrix<f64>, LoadError> {
    let rows = parse_rows(text, origin)?;
    let Some((_, first)) = rows.first() else {
        return Err(LoadError::Empty {
            origin: origin.to_string(),
        });
    };
    let ncols = first.len();
    for (line, row) in &rows {
        if row.len() != ncols {
            return Err(LoadError::RaggedRow {
                origin: origin.to_string(),
                line: *line,
                found: row.len(),
                expected: ncols,
            });
        }
    }
    let nrows = rows.len();
    Ok(DMatrix::from_fn(nrows, ncols, |r, c| rows[r].1[c]))
}

/// Bring `raw` to `delays x wavelengths`.
///
/// A square matrix is taken as stored.
fn orient(raw: DMatrix<f64>, n_delays: usize, n_wavelengths: usize) -> Result<(DMatrix<f64>, bool), ValidationError> {
    if raw.shape() == (n_delays, n_wavelengths) {
        Ok((raw, false))
    } else if raw.shape() == (n_wavelengths, n_delays) {
        Ok((raw.transpose(), true))
    } else {
        Err(ValidationError::DimensionMismatch {
            rows: raw.nrows(),
            cols: raw.ncols(),
            expected_rows: n_delays,
            expected_cols: n_wavelengths,
        })
    }
}

fn parse_rows(text: &str, origin: &str) -> Result<Vec<(usize, Vec<f64>)>, LoadError> {
    let mut rows = Vec::new();
    for (idx, raw_line) in text.lines().enumerate() {
        let line = raw_line.split('#').next().unwrap_or("");
        let mut row = Vec::new();
        for token in line.split(|c: char| c.is_whitespace() || c == ',').filter(|t| !t.is_empty()) {
            let value = token.parse::<f64>().map_err(|_| LoadError::Parse {
                origin: origin.to_string(),
                line: idx + 1,
                token: token.to_string(),
            })?;
            row.push(value);
        }
        if !row.is_empty() {
            rows.push((idx + 1, row));
        }
    }
    Ok(rows)
}

fn read_file(path: &Path) -> Result<String, LoadError> {
    fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn origin(path: &Path) -> String {
    path.display().to_string()
}
