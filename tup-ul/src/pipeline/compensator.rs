//! Best-effort compensation for orphaned registry entries
//!
//! Deletes run concurrently. A failed delete is logged as a
//! [`CompensationFailure`] and never raised.

use super::coordinator::PipelineState;
use super::enumerator::TaskPlan;
use crate::error::CompensationFailure;
use crate::models::RegistryEntry;
use crate::services::ChainClient;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tup_common::events::{TrackId, UserId};

/// Outcome of one compensation pass
#[derive(Debug, Default)]
pub struct CompensationReport {
    pub deleted: Vec<RegistryEntry>,
    pub failed: Vec<CompensationFailure>,
}

pub struct Compensator {
    chain: Arc<dyn ChainClient>,
    user_id: UserId,
}

impl Compensator {
    pub fn new(chain: Arc<dyn ChainClient>, user_id: UserId) -> Self {
        Self { chain, user_id }
    }

    /// Delete every entry, logging failures
    pub async fn delete_entries(&self, entries: Vec<RegistryEntry>) -> CompensationReport {
        let mut report = CompensationReport::default();
        if entries.is_empty() {
            return report;
        }

        let deletions = entries.into_iter().map(|entry| async move {
            let result = self.chain.delete_entry(self.user_id, entry).await;
            (entry, result)
        });

        for (entry, result) in join_all(deletions).await {
            match result {
                Ok(()) => {
                    debug!(%entry, "Deleted orphaned entry");
                    report.deleted.push(entry);
                }
                Err(source) => {
                    let failure = CompensationFailure { entry, source };
                    warn!("{}", failure);
                    report.failed.push(failure);
                }
            }
        }
        report
    }

    pub async fn delete_tracks(&self, ids: &[TrackId]) -> CompensationReport {
        self.delete_entries(ids.iter().copied().map(RegistryEntry::Track).collect())
            .await
    }

    /// Stem-sibling cleanup: published stems whose parent errored, plus
    /// anything the coordinator marked orphaned
    pub async fn remove_orphaned_stems(
        &self,
        plan: &TaskPlan,
        state: &PipelineState,
    ) -> CompensationReport {
        let ids = orphaned_stems(plan, state);
        if ids.is_empty() {
            return CompensationReport::default();
        }
        info!(count = ids.len(), "Cleaning up orphaned stems");
        self.delete_tracks(&ids).await
    }

    /// Collection-wide cleanup: every published entry not already removed
    pub async fn remove_all_published(
        &self,
        state: &PipelineState,
        already_deleted: &[RegistryEntry],
    ) -> CompensationReport {
        let skip: BTreeSet<&RegistryEntry> = already_deleted.iter().collect();
        let ids: Vec<TrackId> = state
            .published
            .iter()
            .map(|p| p.track_id)
            .chain(state.orphaned.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|id| !skip.contains(&RegistryEntry::Track(*id)))
            .collect();
        if ids.is_empty() {
            return CompensationReport::default();
        }
        info!(count = ids.len(), "Cleaning up orphaned collection tracks");
        self.delete_tracks(&ids).await
    }
}

/// Identifiers the stem-sibling trigger deletes
pub fn orphaned_stems(plan: &TaskPlan, state: &PipelineState) -> Vec<TrackId> {
    let errored_parents: BTreeSet<usize> = state
        .errored
        .iter()
        .filter(|r| !r.key.is_stem())
        .map(|r| r.key.track_index)
        .collect();

    let mut ids: BTreeSet<TrackId> = state.orphaned.iter().copied().collect();
    for parent in errored_parents {
        let stems: BTreeSet<_> = plan.stems_of(parent).collect();
        ids.extend(
            state
                .published
                .iter()
                .filter(|p| stems.contains(&p.key))
                .map(|p| p.track_id),
        );
    }
    ids.into_iter().collect()
}
