//! Deconvolution and post-processing.
//!
//! Responsibilities:
//!
//! - assemble and solve the per-voxel constrained least squares problem
//! - run the solver over many voxels (parallel)
//! - analyse fitted FODs (anisotropy, peaks)

pub mod csd;
pub mod fod;
pub mod qp;
pub mod voxels;

pub use csd::*;
pub use fod::*;
pub use qp::*;
pub use voxels::*;
