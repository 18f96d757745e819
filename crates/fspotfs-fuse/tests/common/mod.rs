//! Shared helpers for mounted integration tests.

pub mod harness;

#[allow(unused_imports)]
pub use harness::*;
