//! Collection finalizer
//!
//! Runs after every collection member published. Creates the playlist/album
//! record referencing the members in request order. If anything from id
//! allocation to confirmation fails, the allocated collection entry, every
//! member and every member's stems are deleted and the original error is
//! returned.

use super::compensator::Compensator;
use crate::error::{PipelineError, ServiceError};
use crate::models::{CollectionMetadata, RegistryEntry, UploadOutcome};
use crate::services::{ChainClient, ErrorReport, ErrorReporter, ReportCounts};
use std::sync::Arc;
use tracing::{error, info};
use tup_common::events::{CollectionId, TrackId, UploadKind, UserId};
use uuid::Uuid;

pub struct CollectionFinalizer {
    chain: Arc<dyn ChainClient>,
    reporter: Arc<dyn ErrorReporter>,
    compensator: Compensator,
    user_id: UserId,
    session_id: Uuid,
}

impl CollectionFinalizer {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        reporter: Arc<dyn ErrorReporter>,
        user_id: UserId,
        session_id: Uuid,
    ) -> Self {
        Self {
            compensator: Compensator::new(Arc::clone(&chain), user_id),
            chain,
            reporter,
            user_id,
            session_id,
        }
    }

    /// Create the collection from a fully published outcome
    pub async fn finalize(
        &self,
        metadata: &CollectionMetadata,
        is_album: bool,
        outcome: &UploadOutcome,
    ) -> Result<CollectionId, PipelineError> {
        let track_ids = outcome.track_ids();
        info!(
            tracks = track_ids.len(),
            is_album,
            name = %metadata.name,
            "Creating collection"
        );

        match self.create(metadata, is_album, &track_ids).await {
            Ok(collection_id) => {
                info!(%collection_id, "Collection created");
                Ok(collection_id)
            }
            Err((allocated, source)) => {
                error!(error = %source, "Collection creation failed, rolling back members");
                self.reporter.report(ErrorReport {
                    session_id: self.session_id,
                    kind: if is_album { UploadKind::Album } else { UploadKind::Playlist },
                    category: "CollectionCreateError",
                    message: source.to_string(),
                    task: None,
                    counts: ReportCounts {
                        total: track_ids.len(),
                        uploaded: track_ids.len(),
                        published: track_ids.len(),
                        errored: 0,
                    },
                });

                let mut entries: Vec<RegistryEntry> = allocated
                    .map(RegistryEntry::Collection)
                    .into_iter()
                    .collect();
                entries.extend(
                    track_ids
                        .iter()
                        .chain(outcome.stems.iter())
                        .copied()
                        .map(RegistryEntry::Track),
                );
                let report = self.compensator.delete_entries(entries).await;

                let deleted_tracks = report
                    .deleted
                    .iter()
                    .filter_map(|entry| match entry {
                        RegistryEntry::Track(id) => Some(*id),
                        RegistryEntry::Collection(_) => None,
                    })
                    .collect();

                Err(PipelineError::CollectionCreate {
                    source,
                    deleted_tracks,
                })
            }
        }
    }

    async fn create(
        &self,
        metadata: &CollectionMetadata,
        is_album: bool,
        track_ids: &[TrackId],
    ) -> Result<CollectionId, (Option<CollectionId>, ServiceError)> {
        let collection_id = self
            .chain
            .allocate_collection_id()
            .await
            .map_err(|e| (None, e))?;

        let receipt = self
            .chain
            .create_collection(self.user_id, collection_id, metadata, is_album, track_ids)
            .await
            .map_err(|e| (Some(collection_id), e))?;

        let confirmed = self
            .chain
            .confirm_transaction(&receipt)
            .await
            .map_err(|e| (Some(collection_id), e))?;
        if !confirmed {
            return Err((
                Some(collection_id),
                ServiceError::Unconfirmed {
                    entity_id: receipt.entity_id(),
                    block_number: receipt.block_number,
                },
            ));
        }
        Ok(collection_id)
    }
}
