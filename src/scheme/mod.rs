//! Acquisition scheme representation (shells, per-shell SH bases).

pub mod acquisition;

pub use acquisition::*;
