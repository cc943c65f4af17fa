//! Error taxonomy.
//!
//! - [`ValidationError`]: malformed user input (equations, lifetimes, bounds,
//!   axes). Raised before any objective evaluation runs.
//! - [`NumericalError`]: a single evaluation failed (bad rate matrix, rank
//!   deficient least squares, ...). The optimizer turns these into penalties.
//! - [`LoadError`]: reading the whitespace-delimited input files.
//!
//! [`FitError`] wraps all of them and maps to a process exit code for the
//! `gta` binary.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("reaction equation is empty")]
    EmptyEquation,
    #[error("unexpected character '{found}' at position {position}")]
    UnexpectedCharacter { found: char, position: usize },
    #[error("species '{found}' at position {position} is out of alphabetical order (expected '{expected}')")]
    SpeciesOutOfOrder {
        found: char,
        expected: char,
        position: usize,
    },
    #[error("species '{found}' at position {position} has not been declared yet")]
    UndeclaredSpecies { found: char, position: usize },
    #[error("too many species: {count} (at most {max})")]
    TooManySpecies { count: usize, max: usize },
    #[error("species '{species}' already decays to ground (second 'v' at position {position})")]
    DuplicateGround { species: char, position: usize },
    #[error("arrow at position {position} is not followed by a species or 'v'")]
    DanglingArrow { position: usize },
    #[error("clause at position {position} contains no transition")]
    EmptyClause { position: usize },
    #[error("ground state 'v' at position {position} can only end a chain")]
    MisplacedGround { position: usize },
    #[error("self transition {species}->{species} at position {position}")]
    SelfTransition { species: char, position: usize },
    #[error("duplicate transition {from}->{to} at position {position}")]
    DuplicateTransition {
        from: char,
        to: char,
        position: usize,
    },
    #[error("model has no transitions")]
    NoTransitions,
    #[error("transition {index} references species {species}, but the model has {count}")]
    TransitionOutOfRange {
        index: usize,
        species: usize,
        count: usize,
    },

    #[error("unknown preset {id} (expected 1-8)")]
    UnknownPreset { id: u8 },
    #[error("preset {id} {requirement}")]
    PresetSpeciesCount { id: u8, requirement: String },

    #[error("lifetime matrix must be square, got {rows}x{cols}")]
    NonSquareMatrix { rows: usize, cols: usize },
    #[error("lifetime matrix entry ({row}, {col}) = {value} is not a finite, non-negative lifetime")]
    InvalidMatrixEntry { row: usize, col: usize, value: f64 },

    #[error("model has {expected} lifetime slots, got {found} lifetimes")]
    LifetimeCountMismatch { expected: usize, found: usize },
    #[error("tau{slot} = {value} is not a valid lifetime")]
    InvalidLifetime { slot: usize, value: f64 },
    #[error("bound for tau{slot} is not a number: {value}")]
    InvalidBound { slot: usize, value: f64 },
    #[error("bounds for tau{slot} are inverted: lower {lower} > upper {upper}")]
    BoundOrder { slot: usize, lower: f64, upper: f64 },
    #[error("initial tau{slot} = {value} lies outside [{lower}, {upper}]")]
    InitialOutsideBounds {
        slot: usize,
        value: f64,
        lower: f64,
        upper: f64,
    },
    #[error("slot tau{slot} does not exist (model has {count} lifetimes)")]
    UnknownSlot { slot: usize, count: usize },

    #[error("model has {expected} species, got {found} initial concentrations")]
    ConcentrationCountMismatch { expected: usize, found: usize },
    #[error("initial concentration {index} = {value} must be finite and non-negative")]
    InvalidConcentration { index: usize, value: f64 },

    #[error("{axis} axis is empty")]
    EmptyAxis { axis: &'static str },
    #[error("{axis} axis value at index {index} is not finite")]
    NonFiniteAxis { axis: &'static str, index: usize },
    #[error("{axis} axis is not strictly ascending at index {index}")]
    AxisNotAscending { axis: &'static str, index: usize },
    #[error("absorption matrix is {rows}x{cols}, expected {expected_rows}x{expected_cols} (delays x wavelengths)")]
    DimensionMismatch {
        rows: usize,
        cols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },
    #[error("absorption value at row {row}, column {col} is not finite")]
    NonFiniteAbsorption { row: usize, col: usize },
    #[error("crop bounds for the {axis} axis are inverted: {lower} > {upper}")]
    CropOrder {
        axis: &'static str,
        lower: f64,
        upper: f64,
    },
    #[error("crop leaves no {axis} values")]
    EmptyCrop { axis: &'static str },
    #[error("multiplier {value} must be finite and non-zero")]
    InvalidMultiplier { value: f64 },
    #[error("{points} data points leave no degrees of freedom for {parameters} free lifetimes")]
    NoDegreesOfFreedom { points: usize, parameters: usize },

    #[error("invalid optimizer option {name}: {reason}")]
    InvalidOption { name: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NumericalError {
    #[error("tau{slot} = {value} is not a positive lifetime")]
    NonPositiveLifetime { slot: usize, value: f64 },
    #[error("rate matrix contains non-finite entries")]
    NonFiniteRateMatrix,
    #[error("negative concentration {value:.3e} for species {species} at delay index {delay_index}")]
    NegativeConcentration {
        species: usize,
        delay_index: usize,
        value: f64,
    },
    #[error("concentration profile contains non-finite values")]
    NonFiniteConcentration,
    #[error("concentration matrix has rank {rank} < {columns}; spectra are not unique")]
    RankDeficient { rank: usize, columns: usize },
    #[error("least-squares solve failed: {reason}")]
    LeastSquares { reason: String },
    #[error("chi-square is not finite")]
    NonFiniteChiSquare,
    #[error("optimizer failed: {reason}")]
    Optimizer { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{origin}:{line}: cannot parse '{token}' as a number")]
    Parse {
        origin: String,
        line: usize,
        token: String,
    },
    #[error("{origin}:{line}: row has {found} values, expected {expected}")]
    RaggedRow {
        origin: String,
        line: usize,
        found: usize,
        expected: usize,
    },
    #[error("{origin}: no numeric data")]
    Empty { origin: String },
}

#[derive(Debug, thiserror::Error)]
pub enum FitError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),
    #[error("numerical failure: {0}")]
    Numerical(#[from] NumericalError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("fit worker stopped without reporting a result")]
    WorkerLost,
    #[error("fit session already finished")]
    SessionFinished,
}

impl FitError {
    pub fn exit_code(&self) -> u8 {
        match self {
            FitError::Validation(_) | FitError::SessionFinished => 2,
            FitError::Load(_) => 3,
            FitError::Numerical(_) | FitError::WorkerLost => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_category() {
        let validation = FitError::from(ValidationError::EmptyEquation);
        let numerical = FitError::from(NumericalError::NonFiniteChiSquare);
        let load = FitError::from(LoadError::Empty {
            origin: "delays.txt".to_string(),
        });
        assert_eq!(validation.exit_code(), 2);
        assert_eq!(load.exit_code(), 3);
        assert_eq!(numerical.exit_code(), 4);
        assert_eq!(FitError::SessionFinished.exit_code(), 2);
    }

    #[test]
    fn out_of_order_message_names_the_letter() {
        let err = ValidationError::SpeciesOutOfOrder {
            found: 'C',
            expected: 'B',
            position: 1,
        };
        assert!(err.to_string().contains("'C'"));
    }
}
