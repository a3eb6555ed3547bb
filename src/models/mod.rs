//! Compartment kernels and the multi-compartment parameter layout.
//!
//! Kernels are small types behind the `CompartmentModel` trait so that
//! problem assembly can stay generic over the tissue model.

pub mod compartment;
pub mod multi;

pub use compartment::*;
pub use multi::*;
