//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - installs the log subscriber
//! - runs the fit or simulate pipeline
//! - prints summaries and writes optional exports

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, FitArgs, SimulateArgs};
use crate::domain::{FitConfig, SimulateConfig};
use crate::error::AppError;

pub mod pipeline;

/// b-values on the command line are in s/mm²; the library works in s/m².
const BVALUE_SCALE: f64 = 1e6;

/// Entry point for the `csd` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Fit(args) => handle_fit(&args),
        Command::Simulate(args) => handle_simulate(&args),
    }
}

/// Log to stderr. `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A subscriber may already be installed (tests); keep it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn handle_fit(args: &FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(args);
    let run = pipeline::run_fit(&config)?;

    println!("{}", crate::report::format_fit_summary(&run.report, &run.scheme));
    if config.top_n > 0 {
        println!("Worst-fitting voxels:");
        let rows = crate::report::rank_worst_voxels(&run.report, config.top_n);
        println!("{}", crate::report::format_voxel_table(&rows));
    }

    Ok(())
}

fn handle_simulate(args: &SimulateArgs) -> Result<(), AppError> {
    let config = simulate_config_from_args(args);
    let request = pipeline::run_simulate(&config)?;
    println!(
        "Wrote {} voxels x {} measurements to {}",
        request.signals.len(),
        request.bvalues.len(),
        config.output.display()
    );
    Ok(())
}

pub fn fit_config_from_args(args: &FitArgs) -> FitConfig {
    FitConfig {
        input: args.input.clone(),
        export: args.export.clone(),
        sh_order: args.sh_order,
        no_unity: args.no_unity,
        max_iter: args.max_iter,
        tol: args.tol,
        peak_threshold: args.peak_threshold,
        peak_separation_deg: args.peak_separation,
        max_peaks: args.max_peaks,
        top_n: args.top,
    }
}

pub fn simulate_config_from_args(args: &SimulateArgs) -> SimulateConfig {
    SimulateConfig {
        output: args.output.clone(),
        voxels: args.voxels,
        seed: args.seed,
        snr: args.snr,
        crossing_angle_deg: args.angle,
        shells: args.shells.iter().map(|b| b * BVALUE_SCALE).collect(),
        n_b0: args.n_b0,
        lambda_par: args.lambda_par,
        lambda_iso: args.lambda_iso,
        iso_fraction: args.iso_fraction,
        sh_order: args.sh_order,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulate_shells_convert_to_si() {
        let cli = Cli::parse_from(["csd", "simulate", "-o", "x.json", "--shells", "1000,3000"]);
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        let config = simulate_config_from_args(&args);
        assert_eq!(config.shells, vec![1e9, 3e9]);
    }
}
