//! Reporting utilities: fit summaries and voxel tables.

pub mod format;

pub use format::*;
