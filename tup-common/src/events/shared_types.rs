//! Identifier and kind types shared between the pipeline and its observers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Permanent registry identifier of a track (assigned at publish time)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry identifier of a playlist or album
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(pub u64);

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account performing the upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a pipeline run is uploading
///
/// `Album` and `Playlist` are collections: all-or-nothing, finalized into a
/// collection record. `Tracks` tolerates partial success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadKind {
    Tracks,
    Album,
    Playlist,
}

impl UploadKind {
    pub fn is_collection(&self) -> bool {
        matches!(self, UploadKind::Album | UploadKind::Playlist)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadKind::Tracks => "tracks",
            UploadKind::Album => "album",
            UploadKind::Playlist => "playlist",
        }
    }
}

impl fmt::Display for UploadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
