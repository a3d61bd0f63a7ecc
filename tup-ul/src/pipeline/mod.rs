//! Two-phase upload pipeline
//!
//! # Architecture
//! - **Enumerate**: flatten tracks and stems into one task per file
//! - **Upload pool** (N workers): storage write per task
//! - **Publish pool** (M workers): chain write + confirmation per task
//! - **Coordinator**: sole consumer of the response channel and sole owner of
//!   pipeline state; decides when a task may publish
//! - **Cleanup**: delete orphaned stems, and in collection mode every published
//!   member when any member failed
//!
//! # Error Handling
//! - Per-task failures are recorded and reported, never raised directly
//! - Collections are all-or-nothing: the first failure ends the run
//! - Standalone runs return the successful subset; only "nothing published"
//!   escalates
//!
//! Workers run in a `JoinSet` scoped to one call of [`UploadPipeline::run`];
//! every exit path cancels them, drains the response channel and joins them
//! before cleanup starts.

pub mod compensator;
pub mod coordinator;
pub mod enumerator;
pub mod finalizer;
pub mod worker;

pub use compensator::{CompensationReport, Compensator};
pub use coordinator::{Coordinator, Effects, PipelineState, PublishedRecord, TaskState};
pub use enumerator::{enumerate, TaskPlan, UploadItem};
pub use finalizer::CollectionFinalizer;
pub use worker::{PublishTask, UploadTask, WorkQueue, WorkerResult};

use crate::error::{ErrorRecord, PipelineError};
use crate::models::{PublishedTrack, UploadOutcome, UploadTrack};
use crate::services::{ErrorReport, ProgressSink, ReportCounts, Services, TaskContext};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument};
use tup_common::config::{UploadSettings, DEFAULT_MAX_CONCURRENT_PUBLISHES, DEFAULT_MAX_CONCURRENT_UPLOADS};
use tup_common::events::{ProgressUpdate, TrackId, UploadEvent, UploadKind, UserId};
use uuid::Uuid;
use worker::{PublishWorkerContext, UploadWorkerContext};

/// Response channel buffer; workers wait when the coordinator falls behind
const RESPONSE_BUFFER: usize = 16;

/// Pipeline configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub max_concurrent_uploads: usize,
    pub max_concurrent_publishes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
            max_concurrent_publishes: DEFAULT_MAX_CONCURRENT_PUBLISHES,
        }
    }
}

impl From<&UploadSettings> for PipelineConfig {
    fn from(settings: &UploadSettings) -> Self {
        Self {
            max_concurrent_uploads: settings.max_concurrent_uploads,
            max_concurrent_publishes: settings.max_concurrent_publishes,
        }
    }
}

impl PipelineConfig {
    /// `(upload_workers, publish_workers)` for `total_tasks`, each clamped to
    /// `1..=max`
    pub fn worker_counts(&self, total_tasks: usize) -> (usize, usize) {
        (
            total_tasks.min(self.max_concurrent_uploads).max(1),
            total_tasks.min(self.max_concurrent_publishes).max(1),
        )
    }
}

/// Identity of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadSession {
    pub session_id: Uuid,
    pub user_id: UserId,
    pub kind: UploadKind,
}

impl UploadSession {
    pub fn new(user_id: UserId, kind: UploadKind) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            kind,
        }
    }
}

/// Pipeline orchestrating storage and chain phases for one request
pub struct UploadPipeline {
    config: PipelineConfig,
    services: Services,
}

impl UploadPipeline {
    pub fn new(config: PipelineConfig, services: Services) -> Self {
        Self { config, services }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Upload and publish every track and stem
    ///
    /// # Returns
    /// * Published top-level tracks ordered by `track_index`, plus the list of
    ///   failed tasks (standalone mode may return partial success)
    ///
    /// # Errors
    /// * [`PipelineError::CollectionUpload`] if any collection member failed
    /// * [`PipelineError::NothingPublished`] if no top-level track published
    pub async fn run(
        &self,
        session: UploadSession,
        tracks: Vec<UploadTrack>,
    ) -> Result<UploadOutcome, PipelineError> {
        if tracks.is_empty() {
            return Err(PipelineError::NoTracks);
        }

        let span = tracing::info_span!(
            "upload_session",
            session_id = %session.session_id,
            kind = %session.kind
        );
        self.run_inner(session, tracks).instrument(span).await
    }

    async fn run_inner(
        &self,
        session: UploadSession,
        tracks: Vec<UploadTrack>,
    ) -> Result<UploadOutcome, PipelineError> {
        let is_collection = session.kind.is_collection();
        let plan = enumerate(tracks);
        let total = plan.total();
        let (upload_workers, publish_workers) = self.config.worker_counts(total);

        // Queues hold every task up front, so enqueueing never waits
        let (upload_tx, upload_rx) = mpsc::channel::<UploadTask>(total);
        let (publish_tx, publish_rx) = mpsc::channel::<PublishTask>(total);
        let (response_tx, mut response_rx) = mpsc::channel::<WorkerResult>(RESPONSE_BUFFER);
        let (progress_tx, progress_rx) = mpsc::unbounded_channel::<ProgressUpdate>();

        let dispatcher = tokio::spawn(dispatch_progress(
            progress_rx,
            self.services.progress.clone(),
            session.session_id,
        ));

        info!(
            tasks = total,
            tracks = plan.track_count(),
            upload_workers,
            publish_workers,
            "Spinning up workers"
        );

        let cancel = CancellationToken::new();
        let mut workers = JoinSet::new();
        let upload_queue = WorkQueue::new(upload_rx);
        let upload_ctx = UploadWorkerContext {
            user_id: session.user_id,
            storage: self.services.storage.clone(),
            progress: progress_tx.clone(),
            responses: response_tx.clone(),
            cancel: cancel.child_token(),
        };
        for worker_id in 0..upload_workers {
            workers.spawn(
                worker::upload_worker(worker_id, upload_queue.clone(), upload_ctx.clone())
                    .in_current_span(),
            );
        }

        let publish_queue = WorkQueue::new(publish_rx);
        let publish_ctx = PublishWorkerContext {
            user_id: session.user_id,
            chain: self.services.chain.clone(),
            responses: response_tx.clone(),
            cancel: cancel.child_token(),
        };
        for worker_id in 0..publish_workers {
            workers.spawn(
                worker::publish_worker(worker_id, publish_queue.clone(), publish_ctx.clone())
                    .in_current_span(),
            );
        }
        // Only workers hold senders now; `None` from the channel means they all stopped
        drop(upload_ctx);
        drop(publish_ctx);
        drop(response_tx);

        for item in plan.items() {
            if upload_tx.try_send(item.clone()).is_err() {
                error!(task = %item.key, "Upload queue rejected task");
            }
        }

        let mut coordinator = Coordinator::new(&plan, is_collection);
        let mut workers_exited = false;

        debug!("Waiting for workers");
        while !coordinator.is_finished() {
            let Some(result) = response_rx.recv().await else {
                workers_exited = true;
                break;
            };
            let effects = coordinator.handle(result);
            self.apply(&session, &plan, &coordinator, effects, &publish_tx, &progress_tx);
        }

        debug!("Spinning down workers");
        cancel.cancel();
        // Workers stop after their current call; results still in flight are
        // absorbed so late chain writes get compensated
        drop(upload_tx);
        drop(publish_tx);
        while let Some(result) = response_rx.recv().await {
            coordinator.absorb_late(result);
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed");
            }
        }
        drop(progress_tx);
        if let Err(e) = dispatcher.await {
            error!(error = %e, "Progress dispatcher failed");
        }

        let state = coordinator.into_state();
        self.cleanup(session, &plan, state, workers_exited).await
    }

    /// Carry out the effects of one coordinator transition
    fn apply(
        &self,
        session: &UploadSession,
        plan: &TaskPlan,
        coordinator: &Coordinator<'_>,
        effects: Effects,
        publish_tx: &mpsc::Sender<PublishTask>,
        progress_tx: &mpsc::UnboundedSender<ProgressUpdate>,
    ) {
        for task in effects.publish {
            debug!(task = %task.key, "Queueing publish");
            if publish_tx.try_send(task).is_err() {
                error!("Publish queue rejected task");
            }
        }

        for update in effects.progress {
            let _ = progress_tx.send(update);
        }

        for record in effects.published {
            let stem_of = plan
                .item(&record.key)
                .and_then(|item| item.metadata.stem_of.clone());
            let event = match (record.key.stem_index, stem_of) {
                (Some(_), stem_of) => UploadEvent::StemPublished {
                    session_id: session.session_id,
                    track_id: record.track_id,
                    parent_track_id: stem_of.as_ref().and_then(|s| s.parent_track_id),
                    category: stem_of.map(|s| s.category),
                },
                (None, _) => UploadEvent::TrackPublished {
                    session_id: session.session_id,
                    track_index: record.key.track_index,
                    track_id: record.track_id,
                    kind: session.kind,
                },
            };
            self.services.events.emit_lossy(event);
        }

        let counts = coordinator.counts();
        for record in effects.failures {
            self.report_failure(session, plan, &record, counts);
        }
    }

    fn report_failure(
        &self,
        session: &UploadSession,
        plan: &TaskPlan,
        record: &ErrorRecord,
        counts: ReportCounts,
    ) {
        let item = plan.item(&record.key);
        error!(
            task = %record.key,
            phase = %record.phase(),
            title = item.map(|i| i.metadata.title.as_str()).unwrap_or(""),
            "Task errored: {}",
            record.failure
        );

        self.services.reporter.report(ErrorReport {
            session_id: session.session_id,
            kind: session.kind,
            category: record.failure.category(),
            message: record.failure.to_string(),
            task: Some(TaskContext {
                track_index: record.key.track_index,
                stem_index: record.key.stem_index,
                track_id: record.track_id,
                phase: record.phase(),
                title: item.map(|i| i.metadata.title.clone()).unwrap_or_default(),
                file_name: item.map(|i| i.source.file_name()).unwrap_or_default(),
                file_size: item.map(|i| i.source.size).unwrap_or(0),
            }),
            counts,
        });

        self.services.events.emit_lossy(UploadEvent::TrackFailed {
            session_id: session.session_id,
            track_index: record.key.track_index,
            stem_index: record.key.stem_index,
            phase: record.phase().to_string(),
            message: record.failure.to_string(),
            kind: session.kind,
        });
    }

    /// Compensate orphans and decide the return value
    async fn cleanup(
        &self,
        session: UploadSession,
        plan: &TaskPlan,
        state: PipelineState,
        workers_exited: bool,
    ) -> Result<UploadOutcome, PipelineError> {
        let compensator = Compensator::new(self.services.chain.clone(), session.user_id);

        let stem_report = compensator.remove_orphaned_stems(plan, &state).await;

        if workers_exited {
            error!(
                published = state.published.len(),
                errored = state.errored.len(),
                "Workers stopped before all tasks settled"
            );
            compensator
                .remove_all_published(&state, &stem_report.deleted)
                .await;
            return Err(PipelineError::WorkersExited {
                errored: state.errored,
            });
        }

        if session.kind.is_collection() && !state.errored.is_empty() {
            compensator
                .remove_all_published(&state, &stem_report.deleted)
                .await;
            return Err(PipelineError::CollectionUpload {
                errored: state.errored,
            });
        }

        let mut published: Vec<PublishedTrack> = state
            .published
            .iter()
            .filter(|p| !p.key.is_stem())
            .map(|p| PublishedTrack {
                track_index: p.key.track_index,
                track_id: p.track_id,
            })
            .collect();
        published.sort_by_key(|p| p.track_index);
        let stems: Vec<TrackId> = state
            .published
            .iter()
            .filter(|p| p.key.is_stem())
            .map(|p| p.track_id)
            .collect();

        if published.is_empty() {
            return Err(PipelineError::NothingPublished {
                errored: state.errored,
            });
        }

        info!(
            published = published.len(),
            failed = state.errored.len(),
            "Finished track uploads"
        );
        self.services.events.emit_lossy(UploadEvent::UploadCompleted {
            session_id: session.session_id,
            count: published.len(),
            kind: session.kind,
            timestamp: chrono::Utc::now(),
        });

        Ok(UploadOutcome {
            published,
            stems,
            failed: state.errored,
        })
    }
}

/// Forward progress updates to the sink until every sender is dropped
async fn dispatch_progress(
    mut rx: mpsc::UnboundedReceiver<ProgressUpdate>,
    sink: Arc<dyn ProgressSink>,
    session_id: Uuid,
) {
    while let Some(update) = rx.recv().await {
        sink.update(session_id, update);
    }
}
