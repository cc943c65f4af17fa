//! Formatted terminal output and the JSON summary.
//!
//! We keep formatting code in one place so:
//! - the fitting code stays clean and testable
//! - output changes are localized

use serde::Serialize;

use crate::domain::{FitResult, FitStatus};
use crate::io::DatasetStats;
use crate::models::{KineticModel, preset_name, species_label};

/// Machine-readable summary written by `gta fit --json`.
#[derive(Debug, Clone, Serialize)]
pub struct FitSummary<'a> {
    pub model: String,
    pub species: Vec<String>,
    pub transitions: Vec<String>,
    pub wavelengths: &'a [f64],
    pub delays: &'a [f64],
    #[serde(flatten)]
    pub result: &'a FitResult,
}

impl<'a> FitSummary<'a> {
    pub fn new(model: &KineticModel, wavelengths: &'a [f64], delays: &'a [f64], result: &'a FitResult) -> Self {
        Self {
            model: model.equation(),
            species: (0..model.species_count()).map(|i| species_label(i).to_string()).collect(),
            transitions: model.describe(),
            wavelengths,
            delays,
            result,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Model topology: one line per lifetime slot plus the symbolic rate matrix.
pub fn format_model(model: &KineticModel) -> String {
    let mut out = String::new();
    let kind = if model.is_gla() { "GLA" } else { "GTA" };
    out.push_str(&format!("Model ({kind}): {}\n", model.equation()));
    out.push_str(&format!("Species: {}\n", model.species_count()));
    for line in model.describe() {
        out.push_str(&format!("  {line}\n"));
    }

    let symbolic = model.rate_matrix_symbolic();
    let width = symbolic
        .iter()
        .flatten()
        .map(|s| s.chars().count())
        .max()
        .unwrap_or(1)
        .max(1);
    out.push_str("Rate matrix K:\n");
    for row in &symbolic {
        let cells: Vec<String> = row.iter().map(|c| format!("{c:>width$}")).collect();
        out.push_str(&format!("  [ {} ]\n", cells.join("  ")));
    }
    out
}

/// Presets with their one-line descriptions.
pub fn format_presets() -> String {
    let mut out = String::new();
    for id in crate::models::PRESET_IDS {
        if let Some(name) = preset_name(id) {
            out.push_str(&format!("{id}: {name}\n"));
        }
    }
    out
}

/// Dataset stats, lifetimes, chi-square and diagnostics.
pub fn format_fit_summary(model: &KineticModel, stats: Option<&DatasetStats>, result: &FitResult) -> String {
    let mut out = String::new();

    out.push_str("=== gta - global analysis ===\n");
    out.push_str(&format_model(model));

    if let Some(s) = stats {
        out.push_str(&format!(
            "Data: {} delays [{:.4}, {:.4}] x {} wavelengths [{:.2}, {:.2}]{}\n",
            s.n_delays,
            s.delay_min,
            s.delay_max,
            s.n_wavelengths,
            s.wavelength_min,
            s.wavelength_max,
            if s.transposed { " (transposed on load)" } else { "" }
        ));
    }

    out.push_str("\nLifetimes:\n");
    out.push_str(&format!("{:<6} {:>14} {:>14}  {}\n", "slot", "tau", "rate", "transition").trim_end());
    out.push('\n');
    let labels = model.describe();
    for (i, (tau, rate)) in result.lifetimes.iter().zip(result.rates()).enumerate() {
        let marker = if result.fixed.get(i).copied().unwrap_or(false) { " (fixed)" } else { "" };
        let transition = labels.get(i).map(String::as_str).unwrap_or("");
        out.push_str(
            format!(
                "{:<6} {:>14} {:>14}  {}{}\n",
                format!("tau{}", i + 1),
                fmt_num(*tau),
                fmt_num(rate),
                transition.split_once(": ").map(|(_, t)| t).unwrap_or(transition),
                marker
            )
            .trim_end(),
        );
        out.push('\n');
    }

    out.push_str(&format!(
        "\nchi2 = {:.6e} (dof = {})\n",
        result.chi_square, result.degrees_of_freedom
    ));
    out.push_str(&format!("status: {}\n", status_label(result.status)));

    let d = &result.diagnostics;
    out.push_str(&format!(
        "optimizer: {} | iterations={} evaluations={} local runs={}",
        d.strategy.display_name(),
        d.iterations,
        d.evaluations,
        d.local_runs
    ));
    if d.accepted_hops > 0 {
        out.push_str(&format!(" accepted hops={}", d.accepted_hops));
    }
    out.push('\n');
    out.push_str(&format!(
        "profiles: {:?} | spectra condition={:.3e}\n",
        d.solver_path, d.spectra_condition
    ));
    out.push_str(&format!("C0: {}\n", fmt_vec(&result.initial_concentrations)));

    if !d.warnings.is_empty() {
        out.push_str("\nWarnings:\n");
        for w in &d.warnings {
            out.push_str(&format!("- {w}\n"));
        }
    }
    out
}

/// Spectra table: one row per wavelength, one column per species.
pub fn format_spectra(model: &KineticModel, wavelengths: &[f64], result: &FitResult) -> String {
    let kind = if model.is_gla() { "DAS" } else { "SAS" };
    let mut out = format!("{kind}:\n");
    let mut header = format!("{:>10}", "lambda");
    for i in 0..result.spectra.nrows() {
        header.push_str(&format!(" {:>12}", species_label(i)));
    }
    out.push_str(&header);
    out.push('\n');
    for (p, wl) in wavelengths.iter().enumerate() {
        let mut line = format!("{wl:>10.2}");
        for i in 0..result.spectra.nrows() {
            line.push_str(&format!(" {:>12.5e}", result.spectra[(i, p)]));
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn status_label(status: FitStatus) -> &'static str {
    match status {
        FitStatus::Converged => "converged",
        FitStatus::Exhausted => "iteration budget exhausted",
        FitStatus::Cancelled => "cancelled (best point so far)",
    }
}

fn fmt_num(v: f64) -> String {
    if v.is_infinite() {
        "inf".to_string()
    } else {
        format!("{v:.6}")
    }
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.3}")).collect();
    format!("[{}]", parts.join(", "))
}
