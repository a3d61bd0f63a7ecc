//! Error types for tup-ul
//!
//! Three layers:
//! - [`ServiceError`]: a collaborator call (storage, chain) failed
//! - [`TaskFailure`]: why one upload task ended up errored; accumulated, not raised
//! - [`PipelineError`]: the conditions that do escalate to the caller
//!
//! [`CompensationFailure`] describes a failed best-effort cleanup. It is logged
//! and never escalated.

use crate::models::{RegistryEntry, TaskKey};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tup_common::events::TrackId;

/// Collaborator call failure
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage write or read failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Chain write or query failed
    #[error("Chain error: {0}")]
    Chain(String),

    /// Write was accepted but could not be confirmed
    #[error("Could not confirm transaction for entry {entity_id} (block {block_number})")]
    Unconfirmed { entity_id: u64, block_number: u64 },

    /// Referenced entry does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// tup-common error
    #[error("Common error: {0}")]
    Common(#[from] tup_common::Error),
}

/// Pipeline phase a task was in when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Upload,
    Publish,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Upload => "upload",
            Phase::Publish => "publish",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a single task failed
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskFailure {
    /// Storage write failed for this file
    #[error("upload failed: {message}")]
    UploadPhase { message: String },

    /// Chain write failed after a successful upload
    #[error("publish failed: {message}")]
    PublishPhase { message: String },

    /// Synthesized on a parent track because one of its stems failed
    #[error("stem {stem_index} failed: {message}")]
    CascadedParent { stem_index: usize, message: String },
}

impl TaskFailure {
    /// Build the failure for a collaborator error in the given phase
    pub fn from_service(phase: Phase, error: &ServiceError) -> Self {
        let message = error.to_string();
        match phase {
            Phase::Upload => TaskFailure::UploadPhase { message },
            Phase::Publish => TaskFailure::PublishPhase { message },
        }
    }

    /// Phase the failure is attributed to
    ///
    /// A cascaded parent never reaches publish, so it is attributed there.
    pub fn phase(&self) -> Phase {
        match self {
            TaskFailure::UploadPhase { .. } => Phase::Upload,
            TaskFailure::PublishPhase { .. } | TaskFailure::CascadedParent { .. } => Phase::Publish,
        }
    }

    /// Report category name
    pub fn category(&self) -> &'static str {
        match self {
            TaskFailure::UploadPhase { .. } => "UploadPhaseError",
            TaskFailure::PublishPhase { .. } => "PublishPhaseError",
            TaskFailure::CascadedParent { .. } => "CascadedParentError",
        }
    }

    pub fn is_cascaded(&self) -> bool {
        matches!(self, TaskFailure::CascadedParent { .. })
    }
}

/// One entry of the pipeline's `errored` list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub key: TaskKey,
    /// Identifier known for the task at failure time (preset or permanent)
    pub track_id: Option<TrackId>,
    pub failure: TaskFailure,
}

impl ErrorRecord {
    pub fn phase(&self) -> Phase {
        self.failure.phase()
    }
}

/// A failure that escalates out of the pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Request contained no tracks
    #[error("No tracks to upload")]
    NoTracks,

    /// Request was malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Preset identifiers could not be allocated before upload
    #[error("Failed to allocate track ids: {0}")]
    IdAllocation(#[source] ServiceError),

    /// Collection artwork could not be stored
    #[error("Failed to upload collection artwork: {0}")]
    CollectionArtwork(#[source] ServiceError),

    /// At least one collection member failed; nothing was kept
    #[error("Failed to upload tracks for collection ({} failed)", errored.len())]
    CollectionUpload { errored: Vec<ErrorRecord> },

    /// Standalone upload finished with no top-level track published
    #[error("No tracks were published ({} failed)", errored.len())]
    NothingPublished { errored: Vec<ErrorRecord> },

    /// Every member published but the collection record could not be created
    #[error("Failed to create collection: {source}")]
    CollectionCreate {
        #[source]
        source: ServiceError,
        /// Member and stem identifiers that were rolled back
        deleted_tracks: Vec<TrackId>,
    },

    /// All workers stopped before every task settled
    #[error("Upload workers stopped before all tasks finished ({} failed)", errored.len())]
    WorkersExited { errored: Vec<ErrorRecord> },
}

impl PipelineError {
    /// Per-task failures carried by this error (empty for request-level errors)
    pub fn errored(&self) -> &[ErrorRecord] {
        match self {
            PipelineError::CollectionUpload { errored }
            | PipelineError::NothingPublished { errored }
            | PipelineError::WorkersExited { errored } => errored,
            _ => &[],
        }
    }
}

/// A best-effort compensating delete that failed
#[derive(Debug, Error)]
#[error("Failed to delete {entry}: {source}")]
pub struct CompensationFailure {
    pub entry: RegistryEntry,
    #[source]
    pub source: ServiceError,
}
