//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and installs logging
//! - maps arguments into plain config structs
//! - runs the fit pipeline
//! - prints the text or JSON report

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, DemoArgs, FitArgs, ParseArgs};
use crate::domain::{AxisRange, Crop, DatasetSpec, DemoConfig, FitConfig, ModelDescriptor, ModelSpec};
use crate::error::{FitError, ValidationError};
use crate::io::load_lifetime_matrix;
use crate::models::KineticModel;
use crate::report::{FitSummary, format_fit_summary, format_model, format_presets, format_spectra};

pub mod pipeline;

/// Entry point for the `gta` binary.
pub fn run() -> Result<(), FitError> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Fit(args) => handle_fit(&args),
        Command::Demo(args) => handle_demo(&args),
        Command::Parse(args) => handle_parse(&args),
    }
}

/// Logs go to stderr so stdout stays a clean report. `RUST_LOG` takes
/// precedence over `-v`.
pub fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // A second install (e.g. from tests) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn handle_fit(args: &FitArgs) -> Result<(), FitError> {
    let config = fit_config_from_args(args)?;
    let run = pipeline::run_fit(&config)?;
    print_run(&run, config.spectra, config.json)
}

fn handle_demo(args: &DemoArgs) -> Result<(), FitError> {
    let config = demo_config_from_args(args);
    let run = pipeline::run_demo(&config)?;
    if !config.json {
        println!("Simulated lifetimes: {:?}", config.truth);
    }
    print_run(&run, config.spectra, config.json)
}

fn handle_parse(args: &ParseArgs) -> Result<(), FitError> {
    if args.list_presets {
        print!("{}", format_presets());
        return Ok(());
    }
    let descriptor = if let Some(text) = &args.equation {
        ModelDescriptor::Equation(text.clone())
    } else if let Some(id) = args.preset {
        ModelDescriptor::Preset {
            id,
            species: args.species,
        }
    } else if let Some(path) = &args.matrix {
        ModelDescriptor::LifetimeMatrix(load_lifetime_matrix(path)?)
    } else {
        return Err(ValidationError::InvalidOption {
            name: "parse",
            reason: "give --equation, --preset, --matrix or --list-presets".to_string(),
        }
        .into());
    };
    let model = KineticModel::build(&descriptor)?;
    print!("{}", format_model(&model));
    Ok(())
}

fn print_run(run: &pipeline::RunOutput, spectra: bool, json: bool) -> Result<(), FitError> {
    if json {
        let summary = FitSummary::new(&run.model, &run.wavelengths, &run.delays, &run.result);
        let text = summary.to_json().map_err(|e| ValidationError::InvalidOption {
            name: "json",
            reason: e.to_string(),
        })?;
        println!("{text}");
        return Ok(());
    }
    println!("{}", format_fit_summary(&run.model, run.stats.as_ref(), &run.result));
    if spectra {
        println!("{}", format_spectra(&run.model, &run.wavelengths, &run.result));
    }
    Ok(())
}

pub fn fit_config_from_args(args: &FitArgs) -> Result<FitConfig, FitError> {
    let m = &args.model;
    let model = if m.gla {
        ModelSpec::Gla
    } else if let Some(id) = m.preset {
        ModelSpec::Preset { id, species: m.species }
    } else if let Some(text) = &m.equation {
        ModelSpec::Equation(text.clone())
    } else if let Some(path) = &m.matrix {
        ModelSpec::MatrixFile(path.clone())
    } else {
        return Err(ValidationError::InvalidOption {
            name: "model",
            reason: "one of --gla, --preset, --equation, --matrix is required".to_string(),
        }
        .into());
    };

    Ok(FitConfig {
        dataset: DatasetSpec {
            wavelengths: args.wavelengths.clone(),
            delays: args.delays.clone(),
            absorption: args.absorption.clone(),
            crop: Crop {
                delay: AxisRange::new(args.delay_min, args.delay_max),
                wavelength: AxisRange::new(args.wl_min, args.wl_max),
            },
            multiplier: args.multiplier,
        },
        model,
        lifetimes: args.lifetimes.clone(),
        fixed: args.lifetime.fixed.clone(),
        bounds: args.lifetime.bounds.clone(),
        initial_concentrations: args.lifetime.initial_concentrations.clone(),
        time_origin: args.lifetime.time_origin,
        optimizer: args.optimizer.to_options(),
        spectra: args.spectra,
        json: args.json,
    })
}

pub fn demo_config_from_args(args: &DemoArgs) -> DemoConfig {
    DemoConfig {
        equation: args.equation.clone(),
        truth: args.truth.clone(),
        lifetimes: args.lifetimes.clone(),
        noise: args.noise,
        noise_seed: args.noise_seed,
        fixed: args.lifetime.fixed.clone(),
        bounds: args.lifetime.bounds.clone(),
        initial_concentrations: args.lifetime.initial_concentrations.clone(),
        time_origin: args.lifetime.time_origin,
        optimizer: args.optimizer.to_options(),
        spectra: args.spectra,
        json: args.json,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Strategy, TimeOrigin};

    #[test]
    fn fit_args_map_into_config() {
        let cli = Cli::try_parse_from([
            "gta",
            "fit",
            "--wavelengths",
            "wl.txt",
            "--delays",
            "d.txt",
            "--absorption",
            "a.txt",
            "--preset",
            "1",
            "--species",
            "3",
            "--tau",
            "1,10,100",
            "--fix",
            "3",
            "--bound",
            "1:0.5:2",
            "--delay-min",
            "-0.5",
            "--strategy",
            "multi-start",
            "--time-origin",
            "first-delay",
        ])
        .unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        let config = fit_config_from_args(&args).unwrap();
        assert_eq!(config.model, ModelSpec::Preset { id: 1, species: Some(3) });
        assert_eq!(config.lifetimes, vec![1.0, 10.0, 100.0]);
        assert_eq!(config.fixed, vec![3]);
        assert_eq!(config.bounds, vec![(1, Some(0.5), Some(2.0))]);
        assert_eq!(config.dataset.crop.delay.lower, Some(-0.5));
        assert_eq!(config.dataset.multiplier, 1.0);
        assert_eq!(config.optimizer.strategy, Strategy::MultiStart);
        assert_eq!(config.time_origin, TimeOrigin::FirstDelay);
    }

    #[test]
    fn demo_defaults() {
        let cli = Cli::try_parse_from(["gta", "demo"]).unwrap();
        let Command::Demo(args) = cli.command else {
            panic!("expected demo");
        };
        let config = demo_config_from_args(&args);
        assert_eq!(config.equation, "A->B->v");
        assert_eq!(config.truth, vec![5.0, 50.0]);
        assert!(config.lifetimes.is_empty());
        assert_eq!(config.optimizer.max_iterations, 2000);
    }
}
