//! Command-line parsing for the `csd` binary.
//!
//! Argument parsing and command dispatch stay separate from the deconvolution
//! code; `app` turns these arguments into run configurations.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "csd", version, about = "Multi-compartment constrained spherical deconvolution")]
pub struct Cli {
    /// Increase log verbosity (`-v` = debug, `-vv` = trace). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit every voxel of a request file and print a summary.
    Fit(FitArgs),
    /// Write a synthetic request (two crossing sticks plus a ball).
    Simulate(SimulateArgs),
}

/// Options for `csd fit`.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Request JSON (acquisition, models, fixed parameters, signals).
    #[arg(short, long, value_name = "JSON")]
    pub input: PathBuf,

    /// Write the per-voxel report to JSON.
    #[arg(long, value_name = "JSON")]
    pub export: Option<PathBuf>,

    /// Override the request's spherical harmonics order (even).
    #[arg(long)]
    pub sh_order: Option<usize>,

    /// Drop the constraint that volume fractions sum to one.
    #[arg(long)]
    pub no_unity: bool,

    /// Solver iteration limit per voxel.
    #[arg(long, default_value_t = 200)]
    pub max_iter: usize,

    /// Interior point convergence tolerance.
    #[arg(long, default_value_t = 1e-8)]
    pub tol: f64,

    /// Peaks below this fraction of the FOD maximum are ignored.
    #[arg(long, default_value_t = 0.5)]
    pub peak_threshold: f64,

    /// Minimum angle between reported peaks (degrees).
    #[arg(long, default_value_t = 25.0)]
    pub peak_separation: f64,

    /// Maximum peaks reported per voxel.
    #[arg(long, default_value_t = 5)]
    pub max_peaks: usize,

    /// Show the N worst-fitting voxels.
    #[arg(long, default_value_t = 10)]
    pub top: usize,
}

/// Options for `csd simulate`.
#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    /// Output request JSON.
    #[arg(short, long, value_name = "JSON")]
    pub output: PathBuf,

    /// Number of voxels to generate.
    #[arg(short = 'n', long, default_value_t = 10)]
    pub voxels: usize,

    /// Random seed (fiber azimuths and noise).
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Signal-to-noise ratio of the b0 signal; omit for noise-free data.
    #[arg(long)]
    pub snr: Option<f64>,

    /// Crossing angle between the two sticks (degrees).
    #[arg(long, default_value_t = 90.0)]
    pub angle: f64,

    /// Diffusion-weighted shells in s/mm².
    #[arg(long, value_delimiter = ',', default_values_t = vec![1000.0, 2000.0, 3000.0])]
    pub shells: Vec<f64>,

    /// Number of b0 measurements.
    #[arg(long, default_value_t = 6)]
    pub n_b0: usize,

    /// Stick parallel diffusivity (m²/s).
    #[arg(long, default_value_t = 1.7e-9)]
    pub lambda_par: f64,

    /// Ball diffusivity (m²/s).
    #[arg(long, default_value_t = 3e-9)]
    pub lambda_iso: f64,

    /// Fraction of signal in the ball.
    #[arg(long, default_value_t = 0.3)]
    pub iso_fraction: f64,

    /// SH order written into the request.
    #[arg(long, default_value_t = 8)]
    pub sh_order: usize,
}
