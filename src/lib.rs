//! `mc-csd` library crate.
//!
//! Multi-compartment constrained spherical deconvolution: recover a fiber
//! orientation distribution (as real symmetric spherical harmonics) together
//! with the volume fractions of isotropic compartments from multi-shell
//! diffusion MRI signals.
//!
//! The binary (`csd`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the optimizer can be embedded in other pipelines

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
pub mod scheme;
