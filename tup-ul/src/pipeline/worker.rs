//! Upload and publish workers
//!
//! Workers are stateless loops: take one task from a shared queue, make one
//! collaborator call, push one [`WorkerResult`]. They never touch pipeline
//! state and stop only when cancelled or when their queue closes. A publish
//! already in flight runs to completion so its result still reaches the
//! coordinator.

use super::enumerator::UploadItem;
use crate::error::{Phase, ServiceError};
use crate::models::{RegistryEntry, TaskKey, TrackMetadata};
use crate::services::{ChainClient, ProgressCallback, StorageClient, StorageProgress};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tup_common::events::{ProgressStatus, ProgressUpdate, TrackId, UserId};

/// Storage-phase queue entry
pub type UploadTask = UploadItem;

/// Chain-phase queue entry: an uploaded item ready to commit
#[derive(Debug, Clone, PartialEq)]
pub struct PublishTask {
    pub key: TaskKey,
    /// Preset identifier to publish under, if one was reserved
    pub track_id: Option<TrackId>,
    /// Metadata as updated by storage
    pub metadata: TrackMetadata,
}

/// What a worker reports back to the coordinator
#[derive(Debug)]
pub enum WorkerResult {
    Uploaded {
        key: TaskKey,
        metadata: TrackMetadata,
    },
    Published {
        key: TaskKey,
        track_id: TrackId,
        metadata: TrackMetadata,
    },
    Error {
        key: TaskKey,
        track_id: Option<TrackId>,
        phase: Phase,
        error: ServiceError,
    },
}

/// Multi-consumer view over an mpsc receiver
///
/// Each task is delivered to exactly one worker.
pub struct WorkQueue<T> {
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<T> WorkQueue<T> {
    pub fn new(rx: mpsc::Receiver<T>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Next task, or `None` once every sender is gone and the queue is empty
    pub async fn next(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }
}

/// Shared handles for the storage-phase workers
#[derive(Clone)]
pub struct UploadWorkerContext {
    pub user_id: UserId,
    pub storage: Arc<dyn StorageClient>,
    pub progress: mpsc::UnboundedSender<ProgressUpdate>,
    pub responses: mpsc::Sender<WorkerResult>,
    pub cancel: CancellationToken,
}

/// Shared handles for the chain-phase workers
#[derive(Clone)]
pub struct PublishWorkerContext {
    pub user_id: UserId,
    pub chain: Arc<dyn ChainClient>,
    pub responses: mpsc::Sender<WorkerResult>,
    pub cancel: CancellationToken,
}

/// Storage-phase worker loop
pub async fn upload_worker(worker_id: usize, queue: WorkQueue<UploadTask>, ctx: UploadWorkerContext) {
    loop {
        let task = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            task = queue.next() => match task {
                Some(task) => task,
                None => break,
            },
        };

        debug!(worker_id, task = %task.key, "Uploading");
        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            result = upload_one(&ctx, task) => result,
        };

        if ctx.responses.send(result).await.is_err() {
            break;
        }
    }
    debug!(worker_id, "Upload worker stopped");
}

async fn upload_one(ctx: &UploadWorkerContext, task: UploadTask) -> WorkerResult {
    let key = task.key;
    let on_progress = progress_callback(key, ctx.progress.clone());

    match ctx
        .storage
        .upload_files(
            ctx.user_id,
            &task.source,
            task.metadata.artwork.as_ref(),
            &task.metadata,
            on_progress,
        )
        .await
    {
        Ok(metadata) => WorkerResult::Uploaded { key, metadata },
        Err(error) => WorkerResult::Error {
            key,
            track_id: task.metadata.track_id,
            phase: Phase::Upload,
            error,
        },
    }
}

/// Map raw storage progress to keyed updates on the progress channel
///
/// Sends after the channel closes are dropped.
fn progress_callback(key: TaskKey, tx: mpsc::UnboundedSender<ProgressUpdate>) -> ProgressCallback {
    Arc::new(move |p: StorageProgress| {
        let _ = tx.send(ProgressUpdate {
            track_index: key.track_index,
            stem_index: key.stem_index,
            key: p.key,
            loaded: p.loaded,
            total: p.total,
            transcode: p.transcode,
            status: ProgressStatus::from_bytes(p.loaded, p.total),
        });
    })
}

/// Chain-phase worker loop
pub async fn publish_worker(worker_id: usize, queue: WorkQueue<PublishTask>, ctx: PublishWorkerContext) {
    loop {
        let task = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            task = queue.next() => match task {
                Some(task) => task,
                None => break,
            },
        };

        // Not cancellable: a write that reached the chain must be reported
        debug!(worker_id, task = %task.key, "Publishing");
        let result = publish_one(&ctx, task).await;

        if ctx.responses.send(result).await.is_err() {
            break;
        }
    }
    debug!(worker_id, "Publish worker stopped");
}

async fn publish_one(ctx: &PublishWorkerContext, task: PublishTask) -> WorkerResult {
    let PublishTask {
        key,
        track_id,
        metadata,
    } = task;

    match write_and_confirm(ctx, track_id, &metadata).await {
        Ok(published_id) => WorkerResult::Published {
            key,
            track_id: published_id,
            metadata,
        },
        Err(error) => WorkerResult::Error {
            key,
            track_id,
            phase: Phase::Publish,
            error,
        },
    }
}

async fn write_and_confirm(
    ctx: &PublishWorkerContext,
    preset_id: Option<TrackId>,
    metadata: &TrackMetadata,
) -> Result<TrackId, ServiceError> {
    let receipt = ctx
        .chain
        .write_to_chain(ctx.user_id, preset_id, metadata)
        .await?;

    if !ctx.chain.confirm_transaction(&receipt).await? {
        return Err(ServiceError::Unconfirmed {
            entity_id: receipt.entity_id(),
            block_number: receipt.block_number,
        });
    }
    match receipt.entry {
        RegistryEntry::Track(track_id) => Ok(track_id),
        other => Err(ServiceError::Chain(format!("track write returned {}", other))),
    }
}
