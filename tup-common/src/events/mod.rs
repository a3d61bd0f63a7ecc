//! Event types for the upload event system
//!
//! Provides shared event definitions and the broadcast EventBus that
//! observers (UI bridges, loggers) subscribe to.

// Sub-modules (supporting types)
mod progress_types;
mod shared_types;

pub use progress_types::{ProgressKey, ProgressStatus, ProgressUpdate};
pub use shared_types::{CollectionId, TrackId, UploadKind, UserId};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Upload lifecycle events
///
/// Broadcast via EventBus and serializable for transmission to a UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UploadEvent {
    /// An upload request was accepted and work is starting
    UploadStarted {
        /// Upload session this run belongs to
        session_id: Uuid,
        kind: UploadKind,
        /// Number of top-level tracks in the request
        count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Progress for one file of one task
    Progress {
        session_id: Uuid,
        update: ProgressUpdate,
    },

    /// A top-level track reached its permanent record
    TrackPublished {
        session_id: Uuid,
        track_index: usize,
        track_id: TrackId,
        kind: UploadKind,
    },

    /// A stem reached its permanent record
    StemPublished {
        session_id: Uuid,
        track_id: TrackId,
        /// Parent track identifier, when it was assigned before upload
        parent_track_id: Option<TrackId>,
        /// Stem category (e.g. "bass", "vocals")
        category: Option<String>,
    },

    /// A task failed (directly or by cascade from a stem)
    TrackFailed {
        session_id: Uuid,
        track_index: usize,
        stem_index: Option<usize>,
        /// "upload" or "publish"
        phase: String,
        message: String,
        kind: UploadKind,
    },

    /// The pipeline finished with at least one published track
    UploadCompleted {
        session_id: Uuid,
        /// Number of top-level tracks published
        count: usize,
        kind: UploadKind,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A playlist or album record was created from its published members
    CollectionCreated {
        session_id: Uuid,
        collection_id: CollectionId,
        is_album: bool,
        track_count: usize,
    },
}

impl UploadEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            UploadEvent::UploadStarted { .. } => "UploadStarted",
            UploadEvent::Progress { .. } => "Progress",
            UploadEvent::TrackPublished { .. } => "TrackPublished",
            UploadEvent::StemPublished { .. } => "StemPublished",
            UploadEvent::TrackFailed { .. } => "TrackFailed",
            UploadEvent::UploadCompleted { .. } => "UploadCompleted",
            UploadEvent::CollectionCreated { .. } => "CollectionCreated",
        }
    }
}

/// Central event distribution bus
///
/// Wraps a `tokio::sync::broadcast` channel. Slow subscribers lose the oldest
/// events rather than stalling the pipeline.
///
/// # Examples
///
/// ```
/// use tup_common::events::{EventBus, UploadEvent, UploadKind};
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
///
/// bus.emit_lossy(UploadEvent::UploadStarted {
///     session_id: uuid::Uuid::new_v4(),
///     kind: UploadKind::Tracks,
///     count: 3,
///     timestamp: chrono::Utc::now(),
/// });
///
/// let event = rx.try_recv().unwrap();
/// assert_eq!(event.event_type(), "UploadStarted");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UploadEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered per subscriber before the
    /// oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: UploadEvent,
    ) -> Result<usize, broadcast::error::SendError<UploadEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: UploadEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
