//! Common test utilities for daemon integration tests.

pub mod harness;

pub use harness::*;
