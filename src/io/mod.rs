//! Input/output helpers.
//!
//! - fit request JSON read/write + validation (`request`)
//! - fit report JSON read/write (`report`)

pub mod report;
pub mod request;

pub use report::*;
pub use request::*;
