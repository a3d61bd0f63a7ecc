//! Upload request and result models
//!
//! Request types deserialize from the JSON manifest accepted by the binary.
//! `SourceFile::size` may be omitted there and filled in by
//! [`UploadRequest::resolve_files`].

use crate::error::ErrorRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tup_common::events::{CollectionId, TrackId, UploadKind};

// ============================================================================
// Files and metadata
// ============================================================================

/// A local file to be transferred to storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Size in bytes
    #[serde(default)]
    pub size: u64,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
        }
    }

    /// Final path component, for reports
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.to_string_lossy().to_string())
    }

    /// Make the path absolute against `base` and read its size from disk
    pub fn resolve(&mut self, base: &Path) -> std::io::Result<()> {
        if self.path.is_relative() {
            self.path = base.join(&self.path);
        }
        self.size = std::fs::metadata(&self.path)?.len();
        Ok(())
    }
}

/// Link from a stem to the track it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StemOf {
    /// Parent identifier, stamped once it has been allocated
    #[serde(default)]
    pub parent_track_id: Option<TrackId>,
    /// Stem category (e.g. "bass", "vocals")
    pub category: String,
}

/// Track metadata carried through both phases
///
/// Storage fills in `track_cid`/`cover_art_cid`; the chain record is written
/// from the updated copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub mood: String,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub release_date: Option<chrono::NaiveDate>,
    /// Cover art to upload with the audio
    #[serde(default)]
    pub artwork: Option<SourceFile>,
    /// Preset permanent identifier, when allocated before upload
    #[serde(default)]
    pub track_id: Option<TrackId>,
    /// Provisional storage identifier of the audio
    #[serde(default)]
    pub track_cid: Option<String>,
    /// Provisional storage identifier of the cover art
    #[serde(default)]
    pub cover_art_cid: Option<String>,
    #[serde(default)]
    pub stem_of: Option<StemOf>,
}

/// A stem uploaded alongside its parent track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadStem {
    pub file: SourceFile,
    pub metadata: TrackMetadata,
    pub category: String,
}

/// A top-level track and its stems
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTrack {
    pub file: SourceFile,
    pub metadata: TrackMetadata,
    #[serde(default)]
    pub stems: Vec<UploadStem>,
}

/// Genre/mood/tags applied to collection members that lack their own
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackDetails {
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
}

/// Playlist or album metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub artwork: Option<SourceFile>,
    #[serde(default)]
    pub release_date: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub track_details: TrackDetails,
    /// Storage identifier of the collection artwork, set after it is stored
    #[serde(default)]
    pub cover_art_cid: Option<String>,
}

// ============================================================================
// Requests
// ============================================================================

/// How the user asked for the upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadType {
    IndividualTrack,
    IndividualTracks,
    Playlist,
    Album,
}

impl UploadType {
    pub fn kind(&self) -> UploadKind {
        match self {
            UploadType::Playlist => UploadKind::Playlist,
            UploadType::Album => UploadKind::Album,
            UploadType::IndividualTrack | UploadType::IndividualTracks => UploadKind::Tracks,
        }
    }
}

/// A complete upload request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub upload_type: UploadType,
    pub tracks: Vec<UploadTrack>,
    /// Required for playlists and albums
    #[serde(default)]
    pub collection: Option<CollectionMetadata>,
}

impl UploadRequest {
    /// Resolve every referenced file against `base` and fill in sizes
    pub fn resolve_files(&mut self, base: &Path) -> std::io::Result<()> {
        for track in &mut self.tracks {
            track.file.resolve(base)?;
            if let Some(art) = track.metadata.artwork.as_mut() {
                art.resolve(base)?;
            }
            for stem in &mut track.stems {
                stem.file.resolve(base)?;
                if let Some(art) = stem.metadata.artwork.as_mut() {
                    art.resolve(base)?;
                }
            }
        }
        if let Some(art) = self
            .collection
            .as_mut()
            .and_then(|c| c.artwork.as_mut())
        {
            art.resolve(base)?;
        }
        Ok(())
    }
}

// ============================================================================
// Pipeline identities and results
// ============================================================================

/// Position of a task in the request: `(track_index, stem_index)`
///
/// `stem_index == None` is the top-level track itself. Ordering sorts a parent
/// before its stems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskKey {
    pub track_index: usize,
    pub stem_index: Option<usize>,
}

impl TaskKey {
    pub fn track(track_index: usize) -> Self {
        Self {
            track_index,
            stem_index: None,
        }
    }

    pub fn stem(track_index: usize, stem_index: usize) -> Self {
        Self {
            track_index,
            stem_index: Some(stem_index),
        }
    }

    pub fn is_stem(&self) -> bool {
        self.stem_index.is_some()
    }

    /// Key of the top-level track this task belongs to
    pub fn parent(&self) -> TaskKey {
        TaskKey::track(self.track_index)
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stem_index {
            Some(stem) => write!(f, "track {} stem {}", self.track_index, stem),
            None => write!(f, "track {}", self.track_index),
        }
    }
}

/// Registry entry targeted by a compensating delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "entity", content = "id", rename_all = "snake_case")]
pub enum RegistryEntry {
    Track(TrackId),
    Collection(CollectionId),
}

impl fmt::Display for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryEntry::Track(id) => write!(f, "track {}", id),
            RegistryEntry::Collection(id) => write!(f, "collection {}", id),
        }
    }
}

/// A top-level track that reached its permanent record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PublishedTrack {
    pub track_index: usize,
    pub track_id: TrackId,
}

/// Result of a standalone (non-collection) pipeline run
///
/// `published` holds top-level tracks only, ascending by `track_index`.
/// `stems` holds the identifiers of every published stem. `failed` lists
/// every task that errored so callers can surface them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UploadOutcome {
    pub published: Vec<PublishedTrack>,
    pub stems: Vec<TrackId>,
    pub failed: Vec<ErrorRecord>,
}

impl UploadOutcome {
    /// Permanent identifiers in request order
    pub fn track_ids(&self) -> Vec<TrackId> {
        self.published.iter().map(|p| p.track_id).collect()
    }

    /// Top-level track indices that did not publish
    pub fn failed_track_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .failed
            .iter()
            .filter(|r| !r.key.is_stem())
            .map(|r| r.key.track_index)
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

/// Result of a successful playlist/album upload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionOutcome {
    pub collection_id: CollectionId,
    pub is_album: bool,
    pub track_ids: Vec<TrackId>,
}

/// Result of [`crate::UploadOrchestrator::upload`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UploadResult {
    Tracks(UploadOutcome),
    Collection(CollectionOutcome),
}
