//! # TUP Common Library
//!
//! Shared code for the track upload pipeline crates:
//! - Error type and result alias
//! - TOML bootstrap configuration (loading, env overrides, atomic writes)
//! - Upload event types (progress updates, lifecycle events) and the event bus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
