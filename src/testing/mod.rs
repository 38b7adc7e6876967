//! Testing utilities and mock implementations
//!
//! Mocks for the dispatcher's processor seam and filesystem fixtures for
//! processor tests, so neither needs running servers.

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;
