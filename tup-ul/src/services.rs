//! Collaborator interfaces consumed by the pipeline
//!
//! The pipeline never talks to a concrete storage node or chain; it is handed
//! a [`Services`] bundle of trait objects. [`crate::local`] provides filesystem
//! implementations, tests provide scriptable mocks.

use crate::error::{Phase, ServiceError};
use crate::models::{CollectionMetadata, RegistryEntry, SourceFile, TrackMetadata};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tup_common::events::{
    CollectionId, EventBus, ProgressKey, ProgressUpdate, TrackId, UploadEvent, UploadKind, UserId,
};
use uuid::Uuid;

// ============================================================================
// Storage
// ============================================================================

/// Raw progress reported by storage for one file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StorageProgress {
    pub key: ProgressKey,
    pub loaded: Option<u64>,
    pub total: Option<u64>,
    /// Transcode completion ratio (0.0-1.0)
    pub transcode: Option<f64>,
}

/// Callback storage invokes as bytes move
pub type ProgressCallback = Arc<dyn Fn(StorageProgress) + Send + Sync>;

/// Remote file storage
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Store one audio file plus optional cover art
    ///
    /// Returns `metadata` updated with the provisional storage identifiers.
    async fn upload_files(
        &self,
        user_id: UserId,
        audio: &SourceFile,
        cover_art: Option<&SourceFile>,
        metadata: &TrackMetadata,
        on_progress: ProgressCallback,
    ) -> Result<TrackMetadata, ServiceError>;

    /// Store a standalone image, returning its storage identifier
    async fn upload_image(&self, user_id: UserId, image: &SourceFile) -> Result<String, ServiceError>;
}

// ============================================================================
// Chain
// ============================================================================

/// Receipt of an accepted chain write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReceipt {
    /// Entity written
    pub entry: RegistryEntry,
    pub block_hash: String,
    pub block_number: u64,
}

impl ChainReceipt {
    /// Bare numeric identifier of the written entity
    pub fn entity_id(&self) -> u64 {
        match self.entry {
            RegistryEntry::Track(id) => id.0,
            RegistryEntry::Collection(id) => id.0,
        }
    }
}

/// Chain-backed registry of permanent records
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Reserve a track identifier ahead of publish
    async fn generate_track_id(&self) -> Result<TrackId, ServiceError>;

    /// Write a track record, under `preset_id` when one was reserved
    async fn write_to_chain(
        &self,
        user_id: UserId,
        preset_id: Option<TrackId>,
        metadata: &TrackMetadata,
    ) -> Result<ChainReceipt, ServiceError>;

    /// Whether the write behind `receipt` is final
    async fn confirm_transaction(&self, receipt: &ChainReceipt) -> Result<bool, ServiceError>;

    /// Remove an entry; used only for compensation
    async fn delete_entry(&self, user_id: UserId, entry: RegistryEntry) -> Result<(), ServiceError>;

    /// Reserve an unclaimed playlist/album identifier
    async fn allocate_collection_id(&self) -> Result<CollectionId, ServiceError>;

    /// Write the collection record referencing `track_ids` in order
    async fn create_collection(
        &self,
        user_id: UserId,
        collection_id: CollectionId,
        metadata: &CollectionMetadata,
        is_album: bool,
        track_ids: &[TrackId],
    ) -> Result<ChainReceipt, ServiceError>;
}

// ============================================================================
// Progress and error reporting
// ============================================================================

/// Receives per-file progress for the UI layer
///
/// Called from the pipeline's dispatcher task; must not block.
pub trait ProgressSink: Send + Sync {
    fn update(&self, session_id: Uuid, update: ProgressUpdate);
}

/// Counts at the moment an error was reported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportCounts {
    pub total: usize,
    pub uploaded: usize,
    pub published: usize,
    pub errored: usize,
}

/// Task-level context of an error report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskContext {
    pub track_index: usize,
    pub stem_index: Option<usize>,
    pub track_id: Option<TrackId>,
    pub phase: Phase,
    pub title: String,
    pub file_name: String,
    pub file_size: u64,
}

/// Structured failure report with enough context to reproduce
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub session_id: Uuid,
    pub kind: UploadKind,
    /// Taxonomy name (e.g. "UploadPhaseError", "CollectionCreateError")
    pub category: &'static str,
    pub message: String,
    pub task: Option<TaskContext>,
    pub counts: ReportCounts,
}

/// Error-tracking collaborator
///
/// Fire-and-forget: implementations must return promptly.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, report: ErrorReport);
}

/// Reporter that writes reports to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, report: ErrorReport) {
        match &report.task {
            Some(task) => tracing::error!(
                session_id = %report.session_id,
                kind = %report.kind,
                category = report.category,
                track_index = task.track_index,
                stem_index = ?task.stem_index,
                phase = %task.phase,
                file_name = %task.file_name,
                file_size = task.file_size,
                uploaded = report.counts.uploaded,
                published = report.counts.published,
                errored = report.counts.errored,
                total = report.counts.total,
                "{}",
                report.message
            ),
            None => tracing::error!(
                session_id = %report.session_id,
                kind = %report.kind,
                category = report.category,
                published = report.counts.published,
                total = report.counts.total,
                "{}",
                report.message
            ),
        }
    }
}

/// Progress sink that forwards updates onto the event bus
#[derive(Clone)]
pub struct EventBusProgressSink {
    bus: EventBus,
}

impl EventBusProgressSink {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl ProgressSink for EventBusProgressSink {
    fn update(&self, session_id: Uuid, update: ProgressUpdate) {
        self.bus.emit_lossy(UploadEvent::Progress { session_id, update });
    }
}

// ============================================================================
// Bundle
// ============================================================================

/// Everything the pipeline needs from the outside world
#[derive(Clone)]
pub struct Services {
    pub storage: Arc<dyn StorageClient>,
    pub chain: Arc<dyn ChainClient>,
    pub progress: Arc<dyn ProgressSink>,
    pub reporter: Arc<dyn ErrorReporter>,
    pub events: EventBus,
}

impl Services {
    /// Bundle with progress routed to the event bus and reports to tracing
    pub fn new(storage: Arc<dyn StorageClient>, chain: Arc<dyn ChainClient>, events: EventBus) -> Self {
        Self {
            storage,
            chain,
            progress: Arc::new(EventBusProgressSink::new(events.clone())),
            reporter: Arc::new(TracingErrorReporter),
            events,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }
}
