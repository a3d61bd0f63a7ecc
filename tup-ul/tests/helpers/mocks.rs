//! Scriptable collaborator mocks
//!
//! Failures, latency and unconfirmed writes are keyed by track title so a
//! test can target one file regardless of scheduling.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tup_common::events::{CollectionId, ProgressKey, ProgressUpdate, TrackId, UserId};
use tup_ul::error::ServiceError;
use tup_ul::models::{CollectionMetadata, RegistryEntry, SourceFile, TrackMetadata};
use tup_ul::services::{
    ChainClient, ChainReceipt, ErrorReport, ErrorReporter, ProgressCallback, ProgressSink,
    StorageClient, StorageProgress,
};
use uuid::Uuid;

// ============================================================================
// Storage
// ============================================================================

#[derive(Default)]
pub struct MockStorage {
    failures: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    fail_images: AtomicBool,
    uploads: Mutex<Vec<String>>,
    images: Mutex<Vec<String>>,
    timeline: Mutex<Option<Arc<MockChain>>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(self, title: &str) -> Self {
        self.failures.lock().unwrap().insert(title.to_string());
        self
    }

    pub fn delay(self, title: &str, ms: u64) -> Self {
        self.delays
            .lock()
            .unwrap()
            .insert(title.to_string(), Duration::from_millis(ms));
        self
    }

    pub fn fail_images(self) -> Self {
        self.fail_images.store(true, Ordering::SeqCst);
        self
    }

    /// Log completed uploads into the chain's call log
    pub fn attach_timeline(&self, chain: Arc<MockChain>) {
        *self.timeline.lock().unwrap() = Some(chain);
    }

    /// Titles whose upload completed successfully, in completion order
    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn images(&self) -> Vec<String> {
        self.images.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageClient for MockStorage {
    async fn upload_files(
        &self,
        _user_id: UserId,
        audio: &SourceFile,
        cover_art: Option<&SourceFile>,
        metadata: &TrackMetadata,
        on_progress: ProgressCallback,
    ) -> Result<TrackMetadata, ServiceError> {
        let title = metadata.title.clone();
        let delay = self.delays.lock().unwrap().get(&title).copied();

        on_progress(StorageProgress {
            key: ProgressKey::Audio,
            loaded: Some(0),
            total: Some(audio.size),
            transcode: None,
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failures.lock().unwrap().contains(&title) {
            return Err(ServiceError::Storage(format!("injected failure for {}", title)));
        }
        on_progress(StorageProgress {
            key: ProgressKey::Audio,
            loaded: Some(audio.size),
            total: Some(audio.size),
            transcode: Some(1.0),
        });

        let mut updated = metadata.clone();
        updated.track_cid = Some(format!("cid-{}", title));
        if let Some(art) = cover_art {
            updated.cover_art_cid = Some(format!("art-{}", art.file_name()));
        }
        if let Some(chain) = self.timeline.lock().unwrap().as_ref() {
            chain.record(ChainCall::Uploaded(title.clone()));
        }
        self.uploads.lock().unwrap().push(title);
        Ok(updated)
    }

    async fn upload_image(&self, _user_id: UserId, image: &SourceFile) -> Result<String, ServiceError> {
        if self.fail_images.load(Ordering::SeqCst) {
            return Err(ServiceError::Storage("image rejected".to_string()));
        }
        let cid = format!("img-{}", image.file_name());
        self.images.lock().unwrap().push(cid.clone());
        Ok(cid)
    }
}

// ============================================================================
// Chain
// ============================================================================

/// One recorded chain interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainCall {
    /// Written by a [`MockStorage`] sharing this log
    Uploaded(String),
    GenerateId(TrackId),
    WriteStarted(String),
    WriteCompleted(String, TrackId),
    Delete(RegistryEntry),
    AllocateCollection(CollectionId),
    CreateCollection(CollectionId, Vec<TrackId>),
    /// Written by a [`RecordingReporter`] sharing this log
    Reported(&'static str),
}

pub struct MockChain {
    next_id: AtomicU64,
    failures: Mutex<HashSet<String>>,
    unconfirmed: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    fail_id_allocation: AtomicBool,
    fail_create: AtomicBool,
    fail_deletes: AtomicBool,
    /// entity id -> title, for confirmation lookups
    written: Mutex<HashMap<u64, String>>,
    calls: Mutex<Vec<ChainCall>>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(100),
            failures: Mutex::default(),
            unconfirmed: Mutex::default(),
            delays: Mutex::default(),
            fail_id_allocation: AtomicBool::new(false),
            fail_create: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            written: Mutex::default(),
            calls: Mutex::default(),
        }
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(self, title: &str) -> Self {
        self.failures.lock().unwrap().insert(title.to_string());
        self
    }

    pub fn unconfirmed(self, title: &str) -> Self {
        self.unconfirmed.lock().unwrap().insert(title.to_string());
        self
    }

    pub fn delay(self, title: &str, ms: u64) -> Self {
        self.delays
            .lock()
            .unwrap()
            .insert(title.to_string(), Duration::from_millis(ms));
        self
    }

    pub fn fail_id_allocation(self) -> Self {
        self.fail_id_allocation.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_create(self) -> Self {
        self.fail_create.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_deletes(self) -> Self {
        self.fail_deletes.store(true, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<ChainCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Titles whose chain write started, in order
    pub fn writes_started(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ChainCall::WriteStarted(title) => Some(title),
                _ => None,
            })
            .collect()
    }

    /// Titles whose chain write completed, in order
    pub fn writes_completed(&self) -> Vec<(String, TrackId)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ChainCall::WriteCompleted(title, id) => Some((title, id)),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<RegistryEntry> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ChainCall::Delete(entry) => Some(entry),
                _ => None,
            })
            .collect()
    }

    pub fn collections_created(&self) -> Vec<(CollectionId, Vec<TrackId>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ChainCall::CreateCollection(id, tracks) => Some((id, tracks)),
                _ => None,
            })
            .collect()
    }

    /// Position of a call in the log
    pub fn position(&self, call: &ChainCall) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn record(&self, call: ChainCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn generate_track_id(&self) -> Result<TrackId, ServiceError> {
        if self.fail_id_allocation.load(Ordering::SeqCst) {
            return Err(ServiceError::Chain("id service unavailable".to_string()));
        }
        let id = TrackId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.record(ChainCall::GenerateId(id));
        Ok(id)
    }

    async fn write_to_chain(
        &self,
        _user_id: UserId,
        preset_id: Option<TrackId>,
        metadata: &TrackMetadata,
    ) -> Result<ChainReceipt, ServiceError> {
        let title = metadata.title.clone();
        self.record(ChainCall::WriteStarted(title.clone()));

        let delay = self.delays.lock().unwrap().get(&title).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failures.lock().unwrap().contains(&title) {
            return Err(ServiceError::Chain(format!("injected failure for {}", title)));
        }

        let id = preset_id.unwrap_or_else(|| TrackId(self.next_id.fetch_add(1, Ordering::SeqCst)));
        self.written.lock().unwrap().insert(id.0, title.clone());
        self.record(ChainCall::WriteCompleted(title, id));
        Ok(ChainReceipt {
            entry: RegistryEntry::Track(id),
            block_hash: format!("0x{:x}", id.0),
            block_number: id.0,
        })
    }

    async fn confirm_transaction(&self, receipt: &ChainReceipt) -> Result<bool, ServiceError> {
        let RegistryEntry::Track(id) = receipt.entry else {
            return Ok(true);
        };
        let title = self.written.lock().unwrap().get(&id.0).cloned();
        Ok(match title {
            Some(title) => !self.unconfirmed.lock().unwrap().contains(&title),
            None => false,
        })
    }

    async fn delete_entry(&self, _user_id: UserId, entry: RegistryEntry) -> Result<(), ServiceError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(ServiceError::Chain("delete rejected".to_string()));
        }
        self.record(ChainCall::Delete(entry));
        Ok(())
    }

    async fn allocate_collection_id(&self) -> Result<CollectionId, ServiceError> {
        let id = CollectionId(9000 + self.next_id.fetch_add(1, Ordering::SeqCst));
        self.record(ChainCall::AllocateCollection(id));
        Ok(id)
    }

    async fn create_collection(
        &self,
        _user_id: UserId,
        collection_id: CollectionId,
        _metadata: &CollectionMetadata,
        _is_album: bool,
        track_ids: &[TrackId],
    ) -> Result<ChainReceipt, ServiceError> {
        self.record(ChainCall::CreateCollection(collection_id, track_ids.to_vec()));
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ServiceError::Chain("collection write rejected".to_string()));
        }
        Ok(ChainReceipt {
            entry: RegistryEntry::Collection(collection_id),
            block_hash: "0xc0".to_string(),
            block_number: collection_id.0,
        })
    }
}

// ============================================================================
// Sinks
// ============================================================================

#[derive(Default)]
pub struct RecordingProgress {
    updates: Mutex<Vec<ProgressUpdate>>,
}

impl RecordingProgress {
    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.lock().unwrap().clone()
    }

    /// Updates for one task
    pub fn for_task(&self, track_index: usize, stem_index: Option<usize>) -> Vec<ProgressUpdate> {
        self.updates()
            .into_iter()
            .filter(|u| u.track_index == track_index && u.stem_index == stem_index)
            .collect()
    }
}

impl ProgressSink for RecordingProgress {
    fn update(&self, _session_id: Uuid, update: ProgressUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<ErrorReport>>,
    timeline: Option<Arc<MockChain>>,
}

impl RecordingReporter {
    /// Also log each report into the chain's call log, to check ordering
    /// against compensating deletes
    pub fn with_timeline(chain: Arc<MockChain>) -> Self {
        Self {
            reports: Mutex::default(),
            timeline: Some(chain),
        }
    }

    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn categories(&self) -> Vec<&'static str> {
        self.reports().iter().map(|r| r.category).collect()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, report: ErrorReport) {
        if let Some(chain) = &self.timeline {
            chain.record(ChainCall::Reported(report.category));
        }
        self.reports.lock().unwrap().push(report);
    }
}
