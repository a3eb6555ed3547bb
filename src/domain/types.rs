//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - read from / written to JSON request and report files
//! - passed between the CLI front end and the fitting pipeline

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::CsdError;

/// How a parameter is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    /// Plain scalar (diffusivity, radius, ...).
    Normal,
    /// Direction `[theta, phi]`. A model with one of these is orientation-bearing.
    Orientation,
    /// Relative signal contribution of one compartment.
    VolumeFraction,
    /// Spherical-harmonic coefficients of the FOD.
    ShCoefficients,
}

/// Static description of a compartment-model parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub cardinality: usize,
    pub kind: ParameterType,
    /// Plausible range in SI units (informational; not enforced by CSD).
    pub range: (f64, f64),
}

/// One entry of a multi-compartment parameter layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterEntry {
    pub name: String,
    pub cardinality: usize,
    pub kind: ParameterType,
}

/// Named parameter values. Scalars are stored as length-1 vectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterMap(BTreeMap<String, Vec<f64>>);

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.0.insert(name.into(), values);
    }

    pub fn insert_scalar(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), vec![value]);
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.0.get(name).map(|v| v.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Scalar lookup that reports the missing name.
    pub fn scalar(&self, name: &str) -> Result<f64, CsdError> {
        match self.0.get(name).and_then(|v| v.first()) {
            Some(v) => Ok(*v),
            None => Err(CsdError::MissingParameter(name.to_string())),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<f64>)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Vec<f64>)> for ParameterMap {
    fn from_iter<T: IntoIterator<Item = (String, Vec<f64>)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Compartment kernels available to the CLI and request files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Isotropic Gaussian diffusion.
    Ball,
    /// Zero-radius cylinder.
    Stick,
    /// Axially symmetric tensor.
    Zeppelin,
    /// Non-diffusing (restricted) compartment.
    Dot,
}

impl ModelKind {
    /// Model name used as parameter-name prefix.
    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::Ball => "G1Ball",
            ModelKind::Stick => "C1Stick",
            ModelKind::Zeppelin => "G2Zeppelin",
            ModelKind::Dot => "S1Dot",
        }
    }
}

/// Termination status of the convex solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Solved,
    /// Iteration budget exhausted; the iterate is returned as-is (inaccurate).
    MaxIterations,
}

/// A fit request file (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitRequest {
    /// b-values in s/m².
    pub bvalues: Vec<f64>,
    /// Gradient directions (unit vectors; zero allowed for b0 measurements).
    pub gradient_directions: Vec<[f64; 3]>,
    /// Compartment kernels in model order.
    pub models: Vec<ModelKind>,
    #[serde(default = "default_sh_order")]
    pub sh_order: usize,
    #[serde(default = "default_unity")]
    pub unity_constraint: bool,
    /// Kernel parameters held fixed during deconvolution (multi-compartment names).
    #[serde(default)]
    pub fixed_parameters: ParameterMap,
    /// One signal-attenuation vector per voxel.
    pub signals: Vec<Vec<f64>>,
}

fn default_sh_order() -> usize {
    8
}

fn default_unity() -> bool {
    true
}

/// A direction of maximal FOD amplitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FodPeak {
    pub direction: [f64; 3],
    pub value: f64,
}

/// Fit output for one voxel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoxelReport {
    pub parameters: ParameterMap,
    pub volume_fractions: Vec<f64>,
    pub sse: f64,
    pub rmse: f64,
    pub status: SolveStatus,
    pub iterations: usize,
    /// Only present when the model has an orientation compartment.
    pub anisotropy_index: Option<f64>,
    pub peaks: Vec<FodPeak>,
}

/// A report file (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitReport {
    pub tool: String,
    pub models: Vec<ModelKind>,
    pub model_names: Vec<String>,
    pub sh_order: usize,
    pub unity_constraint: bool,
    pub voxels: Vec<VoxelReport>,
}

/// A `csd fit` run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub input: PathBuf,
    pub export: Option<PathBuf>,
    /// Overrides the request's SH order when set.
    pub sh_order: Option<usize>,
    /// Forces the unity constraint off when `true`.
    pub no_unity: bool,
    pub max_iter: usize,
    pub tol: f64,
    /// Peaks below this fraction of the largest FOD value are dropped.
    pub peak_threshold: f64,
    /// Minimum angle (degrees) between reported peaks.
    pub peak_separation_deg: f64,
    pub max_peaks: usize,
    /// Rows in the worst-voxel table.
    pub top_n: usize,
}

/// A `csd simulate` run's configuration.
#[derive(Debug, Clone)]
pub struct SimulateConfig {
    pub output: PathBuf,
    pub voxels: usize,
    pub seed: u64,
    /// `None` disables noise.
    pub snr: Option<f64>,
    /// Crossing angle between the two sticks (degrees).
    pub crossing_angle_deg: f64,
    /// b-values of the diffusion-weighted shells (s/m²).
    pub shells: Vec<f64>,
    /// Number of b0 measurements.
    pub n_b0: usize,
    pub lambda_par: f64,
    pub lambda_iso: f64,
    /// Fraction of signal in the isotropic compartment.
    pub iso_fraction: f64,
    pub sh_order: usize,
}
