//! Shared test utilities for splatforge integration tests.
//!
//! `TestHarness` builds an isolated service: temp database, local bucket,
//! upload root, and shell stand-ins for the trainer and converter.

pub mod harness;

pub use harness::{TestHarness, Trainer};
