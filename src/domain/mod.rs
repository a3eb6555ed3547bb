//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - parameter descriptions and values (`ParameterSpec`, `ParameterEntry`, `ParameterMap`)
//! - compartment kinds (`ModelKind`) and solver status (`SolveStatus`)
//! - request/report file schemas (`FitRequest`, `FitReport`)
//! - CLI-derived run configuration (`FitConfig`, `SimulateConfig`)

pub mod types;

pub use types::*;
