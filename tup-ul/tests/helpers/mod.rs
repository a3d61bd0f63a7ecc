//! Test Helper Utilities
//!
//! Shared utilities for testing tup-ul

#![allow(dead_code)]

pub mod fixtures;
pub mod mocks;

// Re-export commonly used items
pub use fixtures::{collection, stem, test_services, track, track_with_stems, TestHarness};
pub use mocks::{ChainCall, MockChain, MockStorage, RecordingProgress, RecordingReporter};
