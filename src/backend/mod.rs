//! Backend abstraction layer
//!
//! Capability traits the render graph is driven through, the plain-data types
//! they exchange, and a dummy implementation for tests and tooling.

pub mod dummy;
pub mod traits;
pub mod types;

pub use traits::*;
pub use types::*;
