//! Mathematical utilities: Legendre functions, quadrature, the spherical
//! harmonic basis and sphere sampling.

pub mod legendre;
pub mod sh;
pub mod sphere;

pub use legendre::*;
pub use sh::*;
pub use sphere::*;
