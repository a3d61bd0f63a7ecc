//! Per-file progress updates streamed to the UI layer

use serde::{Deserialize, Serialize};

/// Which file of an upload task a progress update refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKey {
    Audio,
    Art,
}

impl ProgressKey {
    pub const ALL: [ProgressKey; 2] = [ProgressKey::Audio, ProgressKey::Art];
}

/// Coarse state of a single file transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    /// Bytes still moving
    Uploading,
    /// All bytes received, storage is transcoding/processing
    Processing,
    /// Published to the registry
    Complete,
    Error,
}

impl ProgressStatus {
    /// Status derived from raw byte counts reported by storage
    ///
    /// Unknown counts are treated as still uploading.
    pub fn from_bytes(loaded: Option<u64>, total: Option<u64>) -> Self {
        match (loaded, total) {
            (Some(loaded), Some(total)) if loaded == total => ProgressStatus::Processing,
            _ => ProgressStatus::Uploading,
        }
    }
}

/// One progress update keyed by `(track_index, stem_index, key)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Top-level track position in the request
    pub track_index: usize,
    /// Stem position under the track (`None` for the track itself)
    pub stem_index: Option<usize>,
    pub key: ProgressKey,
    /// Bytes transferred so far
    pub loaded: Option<u64>,
    /// Total bytes to transfer
    pub total: Option<u64>,
    /// Transcode completion ratio (0.0-1.0) when storage reports it
    pub transcode: Option<f64>,
    pub status: ProgressStatus,
}

impl ProgressUpdate {
    /// Status-only update with no byte counts
    pub fn status(
        track_index: usize,
        stem_index: Option<usize>,
        key: ProgressKey,
        status: ProgressStatus,
    ) -> Self {
        Self {
            track_index,
            stem_index,
            key,
            loaded: None,
            total: None,
            transcode: None,
            status,
        }
    }
}
