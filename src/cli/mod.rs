//! Command-line parsing for the global-analysis fitter.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modeling/math code.

use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};

use crate::domain::{OptimizerOptions, Strategy, TimeOrigin};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "gta", version, about = "Global lifetime / target analysis of transient-absorption spectra")]
pub struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace). `RUST_LOG` wins when set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit a kinetic model to a measured dataset.
    Fit(FitArgs),
    /// Generate a synthetic dataset and fit it back.
    Demo(DemoArgs),
    /// Validate a model description and print its rate matrix.
    Parse(ParseArgs),
}

/// How the kinetic model is chosen. Exactly one source is required.
#[derive(Debug, Args, Clone)]
#[command(group(
    ArgGroup::new("model_source")
        .required(true)
        .args(["gla", "preset", "equation", "matrix"])
))]
pub struct ModelArgs {
    /// Global lifetime analysis: one independent exponential per `--tau`.
    #[arg(long)]
    pub gla: bool,

    /// Preset topology (1-8).
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=8))]
    pub preset: Option<u8>,

    /// Species count for the variable-length presets (1, 2, 6, 7).
    #[arg(long, requires = "preset")]
    pub species: Option<usize>,

    /// Reaction equation, e.g. "A->B->v; A->C->v".
    #[arg(long)]
    pub equation: Option<String>,

    /// Lifetime table file: entry (row j, col i) is the lifetime of i->j,
    /// the diagonal the lifetime to ground, 0 for no transition.
    #[arg(long, value_name = "FILE")]
    pub matrix: Option<PathBuf>,
}

/// Optimizer tunables shared by `fit` and `demo`.
#[derive(Debug, Args, Clone)]
pub struct OptimizerArgs {
    /// Search strategy.
    #[arg(long, value_enum, default_value_t = Strategy::Local)]
    pub strategy: Strategy,

    /// Iteration budget per local simplex run.
    #[arg(long, default_value_t = 2000)]
    pub max_iterations: u64,

    /// Relative chi-square spread at which the simplex stops.
    #[arg(long, default_value_t = 1e-10)]
    pub tolerance: f64,

    /// Local runs for multi-start (the guess counts as one).
    #[arg(long, default_value_t = 8)]
    pub starts: usize,

    /// Perturbation rounds for basin hopping.
    #[arg(long, default_value_t = 20)]
    pub hops: usize,

    /// Multi-start draws lifetimes within [tau/spread, tau*spread].
    #[arg(long, default_value_t = 3.0)]
    pub spread: f64,

    /// Basin-hopping log-normal step size.
    #[arg(long, default_value_t = 0.5)]
    pub step: f64,

    /// Basin-hopping temperature, relative to the current chi-square.
    #[arg(long, default_value_t = 0.1)]
    pub temperature: f64,

    /// Seed for the randomized strategies.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl OptimizerArgs {
    pub fn to_options(&self) -> OptimizerOptions {
        OptimizerOptions {
            strategy: self.strategy,
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            starts: self.starts,
            hops: self.hops,
            spread: self.spread,
            step: self.step,
            temperature: self.temperature,
            seed: self.seed,
        }
    }
}

/// Per-slot lifetime settings shared by `fit` and `demo`.
#[derive(Debug, Args, Clone)]
pub struct LifetimeArgs {
    /// Fix lifetime slot N (1-based) at its initial value. Repeatable.
    #[arg(long = "fix", value_name = "N")]
    pub fixed: Vec<usize>,

    /// Bounds for one slot as N:LOWER:UPPER; either end may be empty. Repeatable.
    #[arg(long = "bound", value_name = "N:LO:HI", value_parser = parse_bound)]
    pub bounds: Vec<(usize, Option<f64>, Option<f64>)>,

    /// Initial concentrations, one per species (comma-separated).
    #[arg(long = "c0", value_delimiter = ',', allow_negative_numbers = true)]
    pub initial_concentrations: Option<Vec<f64>>,

    /// Where excitation happens on the delay axis.
    #[arg(long, value_enum, default_value_t = TimeOrigin::Zero)]
    pub time_origin: TimeOrigin,
}

/// Options for `gta fit`.
#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// Wavelength axis file.
    #[arg(long, value_name = "FILE")]
    pub wavelengths: PathBuf,

    /// Delay axis file.
    #[arg(long, value_name = "FILE")]
    pub delays: PathBuf,

    /// Absorption matrix file (delays x wavelengths, or transposed).
    #[arg(long, value_name = "FILE")]
    pub absorption: PathBuf,

    #[command(flatten)]
    pub model: ModelArgs,

    /// Initial lifetimes, one per slot (comma-separated). Optional with `--matrix`.
    #[arg(long = "tau", value_delimiter = ',', allow_negative_numbers = true)]
    pub lifetimes: Vec<f64>,

    #[command(flatten)]
    pub lifetime: LifetimeArgs,

    /// Keep delays >= this value.
    #[arg(long, allow_negative_numbers = true)]
    pub delay_min: Option<f64>,

    /// Keep delays <= this value.
    #[arg(long, allow_negative_numbers = true)]
    pub delay_max: Option<f64>,

    /// Keep wavelengths >= this value.
    #[arg(long)]
    pub wl_min: Option<f64>,

    /// Keep wavelengths <= this value.
    #[arg(long)]
    pub wl_max: Option<f64>,

    /// Multiply every absorption value (e.g. 1000 for OD -> mOD).
    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    pub multiplier: f64,

    #[command(flatten)]
    pub optimizer: OptimizerArgs,

    /// Print the fitted spectra table.
    #[arg(long)]
    pub spectra: bool,

    /// Emit the result as JSON on stdout instead of the text summary.
    #[arg(long)]
    pub json: bool,
}

/// Options for `gta demo`.
#[derive(Debug, Args, Clone)]
pub struct DemoArgs {
    /// Reaction equation of the simulated system.
    #[arg(long, default_value = "A->B->v")]
    pub equation: String,

    /// True lifetimes used to simulate the data.
    #[arg(long = "truth", value_delimiter = ',', default_values_t = vec![5.0, 50.0])]
    pub truth: Vec<f64>,

    /// Initial guesses; defaults to the truth scaled by 0.6 / 1.4 alternately.
    #[arg(long = "tau", value_delimiter = ',')]
    pub lifetimes: Vec<f64>,

    /// Gaussian noise standard deviation.
    #[arg(long, default_value_t = 0.0)]
    pub noise: f64,

    /// Seed for the simulated noise.
    #[arg(long, default_value_t = 7)]
    pub noise_seed: u64,

    #[command(flatten)]
    pub lifetime: LifetimeArgs,

    #[command(flatten)]
    pub optimizer: OptimizerArgs,

    /// Print the fitted spectra table.
    #[arg(long)]
    pub spectra: bool,

    /// Emit the result as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}

/// Options for `gta parse`.
#[derive(Debug, Args, Clone)]
pub struct ParseArgs {
    /// Reaction equation to validate.
    #[arg(long, conflicts_with_all = ["preset", "matrix", "list_presets"])]
    pub equation: Option<String>,

    /// Preset to expand.
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=8), conflicts_with = "matrix")]
    pub preset: Option<u8>,

    /// Species count for variable-length presets.
    #[arg(long, requires = "preset")]
    pub species: Option<usize>,

    /// Lifetime table file.
    #[arg(long, value_name = "FILE")]
    pub matrix: Option<PathBuf>,

    /// List the available presets.
    #[arg(long)]
    pub list_presets: bool,
}

/// Parse `N:LO:HI` where either bound may be empty.
pub fn parse_bound(text: &str) -> Result<(usize, Option<f64>, Option<f64>), String> {
    let parts: Vec<&str> = text.split(':').collect();
    let [slot, lower, upper] = parts.as_slice() else {
        return Err(format!("expected N:LO:HI, got '{text}'"));
    };
    let slot: usize = slot
        .trim()
        .parse()
        .map_err(|_| format!("invalid slot number '{slot}'"))?;
    let bound = |s: &str| -> Result<Option<f64>, String> {
        let s = s.trim();
        if s.is_empty() {
            Ok(None)
        } else {
            s.parse::<f64>().map(Some).map_err(|_| format!("invalid bound '{s}'"))
        }
    };
    Ok((slot, bound(*lower)?, bound(*upper)?))
}
