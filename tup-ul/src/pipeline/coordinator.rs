//! Response coordinator
//!
//! Single owner of all pipeline state. Every [`WorkerResult`] passes through
//! [`Coordinator::handle`], which applies the transition table below and
//! returns the [`Effects`] the driver must carry out (publish tasks to
//! enqueue, progress to stream, failures to report). Workers never see this
//! state, so no locking is needed.
//!
//! | Event                         | Condition                                   | Action                          |
//! |-------------------------------|---------------------------------------------|---------------------------------|
//! | Uploaded (stem)               |                                             | publish now                     |
//! | Uploaded (track)              | no pending stems, not a collection          | publish now                     |
//! | Uploaded (track)              | pending stems, or collection member         | hold metadata                   |
//! | Uploaded (last member)        | collection                                  | release every ready held member |
//! | Published (stem)              | last pending stem, parent held, gates open  | release parent                  |
//! | Error (any)                   | not already errored                         | record once, report             |
//! | Error (stem)                  |                                             | cascade one error to the parent |
//!
//! A parent is released only when both gates are open: all of its stems
//! published, and (in collection mode) every top-level member uploaded.

use super::enumerator::TaskPlan;
use super::worker::{PublishTask, WorkerResult};
use crate::error::{ErrorRecord, TaskFailure};
use crate::models::{TaskKey, TrackMetadata};
use crate::services::ReportCounts;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};
use tup_common::events::{ProgressKey, ProgressStatus, ProgressUpdate, TrackId};

/// Coordinator-visible state of one task
///
/// Storage and chain calls in flight are not observed directly: `Queued`
/// covers a running upload and `PublishQueued` a running publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    /// Uploaded, waiting on a readiness gate
    Held,
    PublishQueued,
    Published,
    /// Absorbing
    Errored,
}

/// A task that reached its permanent record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedRecord {
    pub key: TaskKey,
    pub track_id: TrackId,
}

/// Accumulated results, mutated only by the coordinator
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub uploaded: Vec<TaskKey>,
    pub published: Vec<PublishedRecord>,
    pub errored: Vec<ErrorRecord>,
    /// Entities that exist in the registry but belong to errored tasks
    pub orphaned: Vec<TrackId>,
}

/// Work the driver performs after a transition
#[derive(Debug, Default)]
pub struct Effects {
    pub publish: Vec<PublishTask>,
    pub progress: Vec<ProgressUpdate>,
    pub published: Vec<PublishedRecord>,
    /// Newly recorded failures, to be reported
    pub failures: Vec<ErrorRecord>,
}

pub struct Coordinator<'a> {
    plan: &'a TaskPlan,
    is_collection: bool,
    states: HashMap<TaskKey, TaskState>,
    pending_stem_count: HashMap<usize, usize>,
    pending_metadata: BTreeMap<usize, PublishTask>,
    uploaded_members: usize,
    collection_ready: bool,
    state: PipelineState,
}

impl<'a> Coordinator<'a> {
    pub fn new(plan: &'a TaskPlan, is_collection: bool) -> Self {
        let states = plan
            .items()
            .iter()
            .map(|item| (item.key, TaskState::Queued))
            .collect();

        Self {
            plan,
            is_collection,
            states,
            pending_stem_count: plan.pending_stems().clone(),
            pending_metadata: BTreeMap::new(),
            uploaded_members: 0,
            collection_ready: false,
            state: PipelineState::default(),
        }
    }

    /// Apply one worker result
    pub fn handle(&mut self, result: WorkerResult) -> Effects {
        let mut fx = Effects::default();
        match result {
            WorkerResult::Uploaded { key, metadata } => self.on_uploaded(key, metadata, &mut fx),
            WorkerResult::Published { key, track_id, .. } => {
                self.on_published(key, track_id, &mut fx)
            }
            WorkerResult::Error {
                key,
                track_id,
                phase,
                error,
            } => {
                let failure = TaskFailure::from_service(phase, &error);
                self.on_error(key, track_id, failure, &mut fx)
            }
        }
        fx
    }

    /// Whether the response loop should stop
    ///
    /// Every task settled, or a collection member failed.
    pub fn is_finished(&self) -> bool {
        let settled = self.state.published.len() + self.state.errored.len();
        settled >= self.plan.total() || (self.is_collection && !self.state.errored.is_empty())
    }

    /// Take a result that arrived after the loop stopped
    ///
    /// Nothing is released any more. A late publish is recorded as orphaned so
    /// cleanup deletes it.
    pub fn absorb_late(&mut self, result: WorkerResult) {
        match result {
            WorkerResult::Published { key, track_id, .. } => {
                warn!(task = %key, %track_id, "Published after the run stopped, marking orphaned");
                self.state.orphaned.push(track_id);
            }
            WorkerResult::Uploaded { key, .. } => {
                debug!(task = %key, "Dropping late upload result");
            }
            WorkerResult::Error { key, error, .. } => {
                debug!(task = %key, "Dropping late failure: {}", error);
            }
        }
    }

    pub fn task_state(&self, key: &TaskKey) -> Option<TaskState> {
        self.states.get(key).copied()
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn into_state(self) -> PipelineState {
        self.state
    }

    pub fn counts(&self) -> ReportCounts {
        ReportCounts {
            total: self.plan.total(),
            uploaded: self.state.uploaded.len(),
            published: self.state.published.len(),
            errored: self.state.errored.len(),
        }
    }

    fn state_of(&self, key: TaskKey) -> TaskState {
        self.states.get(&key).copied().unwrap_or(TaskState::Errored)
    }

    fn set(&mut self, key: TaskKey, state: TaskState) {
        self.states.insert(key, state);
    }

    // ------------------------------------------------------------------------

    fn on_uploaded(&mut self, key: TaskKey, metadata: TrackMetadata, fx: &mut Effects) {
        let current = self.state_of(key);
        if current != TaskState::Queued {
            debug!(task = %key, state = ?current, "Ignoring upload result");
            return;
        }

        debug!(task = %key, title = %metadata.title, "Uploaded");
        self.state.uploaded.push(key);
        let task = PublishTask {
            key,
            track_id: metadata.track_id,
            metadata,
        };

        if key.is_stem() {
            self.enqueue(task, fx);
            return;
        }

        self.uploaded_members += 1;
        self.hold(task);

        if self.is_collection
            && !self.collection_ready
            && self.uploaded_members == self.plan.track_count()
        {
            self.collection_ready = true;
            info!(members = self.uploaded_members, "All collection members uploaded");
            let ready: Vec<usize> = self
                .pending_metadata
                .keys()
                .copied()
                .filter(|&i| self.gates_open(i))
                .collect();
            for track_index in ready {
                self.release(track_index, fx);
            }
        } else if self.gates_open(key.track_index) {
            self.release(key.track_index, fx);
        } else {
            debug!(
                task = %key,
                pending_stems = self.pending_stem_count.get(&key.track_index).copied().unwrap_or(0),
                "Holding for readiness gate"
            );
        }
    }

    fn on_published(&mut self, key: TaskKey, track_id: TrackId, fx: &mut Effects) {
        match self.state_of(key) {
            TaskState::Published => {
                warn!(task = %key, %track_id, "Duplicate publish result ignored");
                return;
            }
            TaskState::Errored => {
                warn!(task = %key, %track_id, "Published after failure, marking orphaned");
                self.state.orphaned.push(track_id);
                return;
            }
            _ => {}
        }

        debug!(task = %key, %track_id, "Published");
        self.set(key, TaskState::Published);
        let record = PublishedRecord { key, track_id };
        self.state.published.push(record);
        fx.published.push(record);
        push_status(fx, key, ProgressStatus::Complete);

        if key.is_stem() {
            let parent_index = key.track_index;
            if let Some(count) = self.pending_stem_count.get_mut(&parent_index) {
                *count = count.saturating_sub(1);
            }
            if self.state_of(key.parent()) == TaskState::Held && self.gates_open(parent_index) {
                debug!(task = %key.parent(), "Last stem published, releasing parent");
                self.release(parent_index, fx);
            }
        }
    }

    fn on_error(
        &mut self,
        key: TaskKey,
        track_id: Option<TrackId>,
        failure: TaskFailure,
        fx: &mut Effects,
    ) {
        let mut track_id = track_id;
        match self.state_of(key) {
            TaskState::Errored => {
                debug!(task = %key, "Already errored, not recording again");
                return;
            }
            TaskState::Published => {
                if let Some(pos) = self.state.published.iter().position(|p| p.key == key) {
                    let demoted = self.state.published.remove(pos);
                    self.state.orphaned.push(demoted.track_id);
                    track_id = Some(demoted.track_id);
                }
            }
            TaskState::Held => {
                self.pending_metadata.remove(&key.track_index);
            }
            TaskState::Queued | TaskState::PublishQueued => {}
        }

        warn!(task = %key, phase = %failure.phase(), "Task failed: {}", failure);
        self.set(key, TaskState::Errored);
        let record = ErrorRecord {
            key,
            track_id,
            failure,
        };
        self.state.errored.push(record.clone());
        fx.failures.push(record.clone());
        push_status(fx, key, ProgressStatus::Error);

        if let Some(stem_index) = key.stem_index {
            let parent = key.parent();
            let parent_id = self
                .plan
                .item(&parent)
                .and_then(|item| item.metadata.track_id);
            self.on_error(
                parent,
                parent_id,
                TaskFailure::CascadedParent {
                    stem_index,
                    message: record.failure.to_string(),
                },
                fx,
            );
        }
    }

    // ------------------------------------------------------------------------

    fn gates_open(&self, track_index: usize) -> bool {
        let stems_done = self
            .pending_stem_count
            .get(&track_index)
            .map_or(true, |&n| n == 0);
        stems_done && (!self.is_collection || self.collection_ready)
    }

    fn hold(&mut self, task: PublishTask) {
        self.set(task.key, TaskState::Held);
        self.pending_metadata.insert(task.key.track_index, task);
    }

    fn release(&mut self, track_index: usize, fx: &mut Effects) {
        if let Some(task) = self.pending_metadata.remove(&track_index) {
            self.enqueue(task, fx);
        }
    }

    fn enqueue(&mut self, task: PublishTask, fx: &mut Effects) {
        self.set(task.key, TaskState::PublishQueued);
        fx.publish.push(task);
    }
}

fn push_status(fx: &mut Effects, key: TaskKey, status: ProgressStatus) {
    for progress_key in ProgressKey::ALL {
        fx.progress.push(ProgressUpdate::status(
            key.track_index,
            key.stem_index,
            progress_key,
            status,
        ));
    }
}
