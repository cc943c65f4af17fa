//! Kinetic model: species, transitions and the rate matrix they induce.
//!
//! Every transition owns exactly one lifetime slot. For a lifetime vector `τ`
//! the rate matrix `K` is assembled as
//!
//! ```text
//! K[from, from] -= 1/τ_s
//! K[to,   from] += 1/τ_s      (only when `to` is a tracked species)
//! ```
//!
//! so each column loses exactly what it hands to other rows, plus whatever
//! leaves the system through the ground state.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::domain::ModelDescriptor;
use crate::error::ValidationError;
use crate::models::equation::parse_equation;
use crate::models::presets::build_preset;

/// Species letters run `A..=Z`.
pub const MAX_SPECIES: usize = 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
    Species(usize),
    Ground,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transition {
    pub from: usize,
    pub to: Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum ModelKind {
    /// Independent exponentials (no rate matrix topology).
    Gla,
    /// Compartmental target model.
    Gta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KineticModel {
    kind: ModelKind,
    species: usize,
    transitions: Vec<Transition>,
}

/// Letter used for species index `i` (`0 -> 'A'`).
pub fn species_label(i: usize) -> char {
    (b'A' + (i % MAX_SPECIES) as u8) as char
}

impl KineticModel {
    /// Build a model from any descriptor.
    pub fn build(descriptor: &ModelDescriptor) -> Result<Self, ValidationError> {
        match descriptor {
            ModelDescriptor::Gla { count } => Self::gla(*count),
            ModelDescriptor::Preset { id, species } => build_preset(*id, *species),
            ModelDescriptor::Equation(text) => parse_equation(text),
            ModelDescriptor::LifetimeMatrix(m) => Self::from_lifetime_matrix(m),
        }
    }

    /// `count` species, each decaying to ground on its own.
    pub fn gla(count: usize) -> Result<Self, ValidationError> {
        let transitions = (0..count)
            .map(|from| Transition {
                from,
                to: Target::Ground,
            })
            .collect();
        let mut model = Self::from_transitions(count, transitions)?;
        model.kind = ModelKind::Gla;
        Ok(model)
    }

    pub fn from_transitions(
        species: usize,
        transitions: Vec<Transition>,
    ) -> Result<Self, ValidationError> {
        if species > MAX_SPECIES {
            return Err(ValidationError::TooManySpecies {
                count: species,
                max: MAX_SPECIES,
            });
        }
        if transitions.is_empty() {
            return Err(ValidationError::NoTransitions);
        }

        let mut grounded = vec![false; species];
        for (index, t) in transitions.iter().enumerate() {
            let to_index = match t.to {
                Target::Species(to) => Some(to),
                Target::Ground => None,
            };
            for s in std::iter::once(t.from).chain(to_index) {
                if s >= species {
                    return Err(ValidationError::TransitionOutOfRange {
                        index,
                        species: s,
                        count: species,
                    });
                }
            }
            match t.to {
                Target::Species(to) if to == t.from => {
                    return Err(ValidationError::SelfTransition {
                        species: species_label(to),
                        position: index,
                    });
                }
                Target::Ground => {
                    if grounded[t.from] {
                        return Err(ValidationError::DuplicateGround {
                            species: species_label(t.from),
                            position: index,
                        });
                    }
                    grounded[t.from] = true;
                }
                Target::Species(to) => {
                    if transitions[..index].contains(t) {
                        return Err(ValidationError::DuplicateTransition {
                            from: species_label(t.from),
                            to: species_label(to),
                            position: index,
                        });
                    }
                }
            }
        }

        Ok(Self {
            kind: ModelKind::Gta,
            species,
            transitions,
        })
    }

    /// Build from a square lifetime table (row = target, column = source).
    ///
    /// Slots are allocated in row-major order of the non-zero entries.
    pub fn from_lifetime_matrix(m: &DMatrix<f64>) -> Result<Self, ValidationError> {
        if m.nrows() != m.ncols() {
            return Err(ValidationError::NonSquareMatrix {
                rows: m.nrows(),
                cols: m.ncols(),
            });
        }
        let n = m.nrows();
        if n > MAX_SPECIES {
            return Err(ValidationError::TooManySpecies {
                count: n,
                max: MAX_SPECIES,
            });
        }

        let mut transitions = Vec::new();
        for row in 0..n {
            for col in 0..n {
                let value = m[(row, col)];
                if !value.is_finite() || value < 0.0 {
                    return Err(ValidationError::InvalidMatrixEntry { row, col, value });
                }
                if value == 0.0 {
                    continue;
                }
                let to = if row == col {
                    Target::Ground
                } else {
                    Target::Species(row)
                };
                transitions.push(Transition { from: col, to });
            }
        }
        Self::from_transitions(n, transitions)
    }

    pub fn is_gla(&self) -> bool {
        self.kind == ModelKind::Gla
    }

    pub fn species_count(&self) -> usize {
        self.species
    }

    pub fn slot_count(&self) -> usize {
        self.transitions.len()
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Species that never decay (no outgoing transition).
    pub fn terminal_species(&self) -> Vec<usize> {
        (0..self.species)
            .filter(|s| !self.transitions.iter().any(|t| t.from == *s))
            .collect()
    }

    /// Assemble `K` for the given per-slot lifetimes. An infinite lifetime
    /// contributes a zero rate.
    ///
    /// # Panics
    /// Panics if `lifetimes.len() != self.slot_count()`.
    pub fn rate_matrix(&self, lifetimes: &[f64]) -> DMatrix<f64> {
        assert_eq!(lifetimes.len(), self.transitions.len());
        let n = self.species;
        let mut k = DMatrix::<f64>::zeros(n, n);
        for (t, tau) in self.transitions.iter().zip(lifetimes) {
            let rate = 1.0 / tau;
            k[(t.from, t.from)] -= rate;
            if let Target::Species(to) = t.to {
                k[(to, t.from)] += rate;
            }
        }
        k
    }

    /// Rate leaving each species towards the ground state.
    pub fn ground_rates(&self, lifetimes: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.species];
        for (t, tau) in self.transitions.iter().zip(lifetimes) {
            if t.to == Target::Ground {
                out[t.from] += 1.0 / tau;
            }
        }
        out
    }

    /// One line per slot, e.g. `tau2: B -> v`.
    pub fn describe(&self) -> Vec<String> {
        self.transitions
            .iter()
            .enumerate()
            .map(|(slot, t)| format!("tau{}: {} -> {}", slot + 1, species_label(t.from), target_label(t.to)))
            .collect()
    }

    /// Canonical reaction equation, one clause per transition.
    pub fn equation(&self) -> String {
        let clauses: Vec<String> = self
            .transitions
            .iter()
            .map(|t| format!("{}->{}", species_label(t.from), target_label(t.to)))
            .collect();
        clauses.join("; ")
    }

    /// Symbolic rate matrix with `k1..kS` standing for `1/tau1..1/tauS`.
    pub fn rate_matrix_symbolic(&self) -> Vec<Vec<String>> {
        let n = self.species;
        let mut cells = vec![vec![String::new(); n]; n];
        for (slot, t) in self.transitions.iter().enumerate() {
            let k = format!("k{}", slot + 1);
            let diag = &mut cells[t.from][t.from];
            diag.push('-');
            diag.push_str(&k);
            if let Target::Species(to) = t.to {
                let cell = &mut cells[to][t.from];
                if !cell.is_empty() {
                    cell.push('+');
                }
                cell.push_str(&k);
            }
        }
        for row in cells.iter_mut() {
            for cell in row.iter_mut() {
                if cell.is_empty() {
                    cell.push('0');
                }
            }
        }
        cells
    }
}

fn target_label(target: Target) -> char {
    match target {
        Target::Species(s) => species_label(s),
        Target::Ground => 'v',
    }
}

/// Non-zero entries of a lifetime table in slot order (row-major).
pub fn matrix_lifetimes(m: &DMatrix<f64>) -> Vec<f64> {
    let mut out = Vec::new();
    for row in 0..m.nrows() {
        for col in 0..m.ncols() {
            let v = m[(row, col)];
            if v != 0.0 {
                out.push(v);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_conserves(model: &KineticModel, lifetimes: &[f64]) {
        let k = model.rate_matrix(lifetimes);
        let ground = model.ground_rates(lifetimes);
        for col in 0..k.ncols() {
            let mut outflow = ground[col];
            for row in 0..k.nrows() {
                if row != col {
                    assert!(k[(row, col)] >= 0.0);
                    outflow += k[(row, col)];
                }
            }
            let diag = -k[(col, col)];
            assert!(
                (diag - outflow).abs() <= 1e-12 * diag.abs().max(1.0),
                "column {col}: diag {diag} vs outflow {outflow}"
            );
        }
    }

    #[test]
    fn sequential_chain_matrix() {
        let model = parse_equation("A->B->v").unwrap();
        let k = model.rate_matrix(&[5.0, 50.0]);
        assert!((k[(0, 0)] + 0.2).abs() < 1e-15);
        assert!((k[(1, 0)] - 0.2).abs() < 1e-15);
        assert!((k[(1, 1)] + 0.02).abs() < 1e-15);
        assert_eq!(k[(0, 1)], 0.0);
    }

    #[test]
    fn columns_conserve_population() {
        for eq in ["A->B->v", "A->B->C->v; A->v; B->A", "A->B->v; A->C->v; C->B", "AB;BA;Bv"] {
            let model = parse_equation(eq).unwrap();
            let taus: Vec<f64> = (0..model.slot_count()).map(|i| 1.0 + i as f64 * 3.7).collect();
            assert_conserves(&model, &taus);
        }
    }

    #[test]
    fn gla_is_diagonal() {
        let model = KineticModel::gla(3).unwrap();
        assert!(model.is_gla());
        let k = model.rate_matrix(&[1.0, 10.0, f64::INFINITY]);
        assert_eq!(k[(0, 0)], -1.0);
        assert_eq!(k[(1, 1)], -0.1);
        assert_eq!(k[(2, 2)], 0.0);
        assert_eq!(k[(1, 0)], 0.0);
    }

    #[test]
    fn lifetime_matrix_matches_equation() {
        // A->B (5), A->v (20), B->v (50)
        let m = DMatrix::from_row_slice(2, 2, &[20.0, 0.0, 5.0, 50.0]);
        let model = KineticModel::from_lifetime_matrix(&m).unwrap();
        assert_eq!(matrix_lifetimes(&m), vec![20.0, 5.0, 50.0]);
        let from_eq = parse_equation("A->v; A->B->v").unwrap();
        assert_eq!(model, from_eq);
        assert_conserves(&model, &matrix_lifetimes(&m));
    }

    #[test]
    fn lifetime_matrix_rejects_bad_input() {
        let non_square = DMatrix::<f64>::zeros(2, 3);
        assert!(matches!(
            KineticModel::from_lifetime_matrix(&non_square),
            Err(ValidationError::NonSquareMatrix { rows: 2, cols: 3 })
        ));
        let negative = DMatrix::from_row_slice(1, 1, &[-1.0]);
        assert!(matches!(
            KineticModel::from_lifetime_matrix(&negative),
            Err(ValidationError::InvalidMatrixEntry { .. })
        ));
        let too_big = DMatrix::<f64>::zeros(27, 27);
        assert!(matches!(
            KineticModel::from_lifetime_matrix(&too_big),
            Err(ValidationError::TooManySpecies { count: 27, .. })
        ));
    }

    #[test]
    fn symbolic_matrix_and_terminal_species() {
        let model = parse_equation("A->B->C").unwrap();
        let sym = model.rate_matrix_symbolic();
        assert_eq!(sym[0][0], "-k1");
        assert_eq!(sym[1][0], "k1");
        assert_eq!(sym[2][1], "k2");
        assert_eq!(sym[0][2], "0");
        assert_eq!(model.terminal_species(), vec![2]);
        assert_eq!(model.equation(), "A->B; B->C");
    }
}
