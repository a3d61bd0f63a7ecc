//! tup-ul library interface
//!
//! Concurrent two-phase upload pipeline: audio files (and their stems) are
//! written to storage by one worker pool, then committed to the registry by a
//! second pool. A single coordinator owns all pipeline state and enforces the
//! publish ordering between stems, parents and collection members.

pub mod error;
pub mod local;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod services;

pub use crate::error::{PipelineError, ServiceError, TaskFailure};
pub use crate::orchestrator::UploadOrchestrator;
pub use crate::pipeline::{PipelineConfig, UploadPipeline};
pub use crate::services::Services;
