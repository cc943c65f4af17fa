//! The eight canonical target-model topologies.
//!
//! Each preset is written as a reaction equation and built through
//! [`parse_equation`], so a preset and its equation can never disagree.

use crate::error::ValidationError;
use crate::models::equation::parse_equation;
use crate::models::kinetic::{KineticModel, MAX_SPECIES, species_label};

pub const PRESET_IDS: std::ops::RangeInclusive<u8> = 1..=8;

/// Short human-readable name of a preset.
pub fn preset_name(id: u8) -> Option<&'static str> {
    let name = match id {
        1 => "sequential chain to ground",
        2 => "sequential chain, final species non-decaying",
        3 => "parallel branching",
        4 => "branch with direct ground decay",
        5 => "reversible pair",
        6 => "sequential chain with ground leak at each step",
        7 => "sequential chain with terminal equilibrium",
        8 => "chain with mid-chain branch",
        _ => return None,
    };
    Some(name)
}

/// Reaction equation equivalent to preset `id` with `species` species.
pub fn preset_equation(id: u8, species: Option<usize>) -> Result<String, ValidationError> {
    let equation = match id {
        1 => format!("{}->v", chain(variable_count(id, species, 1)?)),
        2 => chain(variable_count(id, species, 2)?),
        3 => fixed_count(id, species, 3, "A->B->v; A->C->v")?,
        4 => fixed_count(id, species, 2, "A->B->v; A->v")?,
        5 => fixed_count(id, species, 2, "A->B->v; B->A")?,
        6 => {
            let n = variable_count(id, species, 1)?;
            let mut clauses = vec![format!("{}->v", chain(n))];
            clauses.extend((0..n - 1).map(|i| format!("{}->v", species_label(i))));
            clauses.join("; ")
        }
        7 => {
            let n = variable_count(id, species, 2)?;
            format!(
                "{}->v; {}->{}",
                chain(n),
                species_label(n - 1),
                species_label(n - 2)
            )
        }
        8 => fixed_count(id, species, 4, "A->B->C->v; B->D->v")?,
        _ => return Err(ValidationError::UnknownPreset { id }),
    };
    Ok(equation)
}

/// Build the kinetic model of preset `id`.
pub fn build_preset(id: u8, species: Option<usize>) -> Result<KineticModel, ValidationError> {
    parse_equation(&preset_equation(id, species)?)
}

fn chain(n: usize) -> String {
    let letters: Vec<String> = (0..n).map(|i| species_label(i).to_string()).collect();
    letters.join("->")
}

fn variable_count(id: u8, species: Option<usize>, min: usize) -> Result<usize, ValidationError> {
    match species {
        Some(n) if (min..=MAX_SPECIES).contains(&n) => Ok(n),
        Some(n) => Err(ValidationError::PresetSpeciesCount {
            id,
            requirement: format!("needs between {min} and {MAX_SPECIES} species, got {n}"),
        }),
        None => Err(ValidationError::PresetSpeciesCount {
            id,
            requirement: "needs a species count".to_string(),
        }),
    }
}

fn fixed_count(
    id: u8,
    species: Option<usize>,
    count: usize,
    equation: &str,
) -> Result<String, ValidationError> {
    match species {
        Some(n) if n != count => Err(ValidationError::PresetSpeciesCount {
            id,
            requirement: format!("has exactly {count} species, got {n}"),
        }),
        _ => Ok(equation.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_counts_per_preset() {
        let cases = [
            (1, Some(3), 3, 3),
            (2, Some(3), 3, 2),
            (3, None, 3, 4),
            (4, None, 2, 3),
            (5, Some(2), 2, 3),
            (6, Some(3), 3, 5),
            (7, Some(3), 3, 4),
            (8, None, 4, 5),
        ];
        for (id, species, n, slots) in cases {
            let model = build_preset(id, species).unwrap();
            assert_eq!(model.species_count(), n, "preset {id}");
            assert_eq!(model.slot_count(), slots, "preset {id}");
            assert!(preset_name(id).is_some());
        }
    }

    #[test]
    fn preset_equations_read_naturally() {
        assert_eq!(preset_equation(1, Some(2)).unwrap(), "A->B->v");
        assert_eq!(preset_equation(2, Some(3)).unwrap(), "A->B->C");
        assert_eq!(preset_equation(6, Some(3)).unwrap(), "A->B->C->v; A->v; B->v");
        assert_eq!(preset_equation(7, Some(3)).unwrap(), "A->B->C->v; C->B");
    }

    #[test]
    fn preset_two_leaves_final_species_terminal() {
        let model = build_preset(2, Some(4)).unwrap();
        assert_eq!(model.terminal_species(), vec![3]);
    }

    #[test]
    fn invalid_presets() {
        assert_eq!(
            build_preset(9, Some(2)).unwrap_err(),
            ValidationError::UnknownPreset { id: 9 }
        );
        assert!(matches!(
            build_preset(1, None).unwrap_err(),
            ValidationError::PresetSpeciesCount { id: 1, .. }
        ));
        assert!(matches!(
            build_preset(3, Some(5)).unwrap_err(),
            ValidationError::PresetSpeciesCount { id: 3, .. }
        ));
        assert!(build_preset(1, Some(27)).is_err());
    }
}
