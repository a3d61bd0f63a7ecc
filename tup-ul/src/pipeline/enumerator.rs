//! Task enumeration
//!
//! Flattens the request into one upload task per file: each top-level track
//! `{i, None}` followed by its stems `{i, Some(j)}`, and records how many stems
//! each parent waits on.

use crate::models::{SourceFile, StemOf, TaskKey, TrackMetadata, UploadTrack};
use std::collections::HashMap;

/// One file to upload, immutable once enqueued
#[derive(Debug, Clone, PartialEq)]
pub struct UploadItem {
    pub key: TaskKey,
    pub source: SourceFile,
    pub metadata: TrackMetadata,
}

/// Flattened task list plus the per-parent stem counters
#[derive(Debug, Clone, Default)]
pub struct TaskPlan {
    items: Vec<UploadItem>,
    positions: HashMap<TaskKey, usize>,
    pending_stems: HashMap<usize, usize>,
    track_count: usize,
}

impl TaskPlan {
    /// All tasks in enqueue order
    pub fn items(&self) -> &[UploadItem] {
        &self.items
    }

    pub fn item(&self, key: &TaskKey) -> Option<&UploadItem> {
        self.positions.get(key).map(|&i| &self.items[i])
    }

    /// Total task count (tracks plus stems)
    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Number of top-level tracks
    pub fn track_count(&self) -> usize {
        self.track_count
    }

    /// Initial stem count for every parent (0 for tracks without stems)
    pub fn pending_stems(&self) -> &HashMap<usize, usize> {
        &self.pending_stems
    }

    /// Keys of the stems belonging to `track_index`
    pub fn stems_of(&self, track_index: usize) -> impl Iterator<Item = TaskKey> + '_ {
        let count = self.pending_stems.get(&track_index).copied().unwrap_or(0);
        (0..count).map(move |j| TaskKey::stem(track_index, j))
    }
}

/// Build the task plan for a request
pub fn enumerate(tracks: Vec<UploadTrack>) -> TaskPlan {
    let track_count = tracks.len();
    let total = track_count + tracks.iter().map(|t| t.stems.len()).sum::<usize>();

    let mut items = Vec::with_capacity(total);
    let mut pending_stems = HashMap::with_capacity(track_count);

    for (i, track) in tracks.into_iter().enumerate() {
        pending_stems.insert(i, track.stems.len());
        let parent_id = track.metadata.track_id;
        items.push(UploadItem {
            key: TaskKey::track(i),
            source: track.file,
            metadata: track.metadata,
        });
        for (j, stem) in track.stems.into_iter().enumerate() {
            let mut metadata = stem.metadata;
            // Stems always publish with a link to their parent
            metadata.stem_of.get_or_insert_with(|| StemOf {
                parent_track_id: parent_id,
                category: stem.category,
            });
            items.push(UploadItem {
                key: TaskKey::stem(i, j),
                source: stem.file,
                metadata,
            });
        }
    }

    let positions = items
        .iter()
        .enumerate()
        .map(|(pos, item)| (item.key, pos))
        .collect();

    TaskPlan {
        items,
        positions,
        pending_stems,
        track_count,
    }
}
