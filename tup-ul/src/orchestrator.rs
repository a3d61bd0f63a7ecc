//! Upload entry points
//!
//! [`UploadOrchestrator`] turns an [`UploadRequest`] into a pipeline run:
//! standalone tracks go straight through the pipeline, playlists and albums get
//! their artwork stored first and a collection record created afterwards.

use crate::error::PipelineError;
use crate::models::{
    CollectionMetadata, CollectionOutcome, StemOf, TrackMetadata, UploadOutcome, UploadRequest,
    UploadResult, UploadTrack, UploadType,
};
use crate::pipeline::{CollectionFinalizer, PipelineConfig, UploadPipeline, UploadSession};
use crate::services::Services;
use futures::future::try_join_all;
use tracing::{info, instrument};
use tup_common::events::{UploadEvent, UploadKind, UserId};

pub struct UploadOrchestrator {
    services: Services,
    pipeline: UploadPipeline,
}

impl UploadOrchestrator {
    pub fn new(services: Services, config: PipelineConfig) -> Self {
        Self {
            pipeline: UploadPipeline::new(config, services.clone()),
            services,
        }
    }

    /// Dispatch a request by its upload type
    pub async fn upload(
        &self,
        user_id: UserId,
        request: UploadRequest,
    ) -> Result<UploadResult, PipelineError> {
        let UploadRequest {
            upload_type,
            tracks,
            collection,
        } = request;

        if tracks.is_empty() {
            return Err(PipelineError::NoTracks);
        }
        match upload_type {
            UploadType::Playlist | UploadType::Album => {
                let collection = collection.ok_or_else(|| {
                    PipelineError::InvalidRequest(format!(
                        "{} upload requires collection metadata",
                        upload_type.kind()
                    ))
                })?;
                let outcome = self
                    .upload_collection(user_id, tracks, collection, upload_type == UploadType::Album)
                    .await?;
                Ok(UploadResult::Collection(outcome))
            }
            UploadType::IndividualTrack | UploadType::IndividualTracks => {
                let outcome = self.upload_tracks(user_id, tracks).await?;
                Ok(UploadResult::Tracks(outcome))
            }
        }
    }

    /// Upload standalone tracks, keeping whichever publish
    #[instrument(skip(self, tracks), fields(count = tracks.len()))]
    pub async fn upload_tracks(
        &self,
        user_id: UserId,
        mut tracks: Vec<UploadTrack>,
    ) -> Result<UploadOutcome, PipelineError> {
        let session = UploadSession::new(user_id, UploadKind::Tracks);
        self.emit_started(&session, tracks.len());

        self.assign_track_ids(&mut tracks).await?;
        self.pipeline.run(session, tracks).await
    }

    /// Upload every member of a playlist/album, then create the collection
    ///
    /// All-or-nothing: any failure leaves no members behind.
    #[instrument(skip(self, tracks, collection), fields(count = tracks.len(), name = %collection.name))]
    pub async fn upload_collection(
        &self,
        user_id: UserId,
        mut tracks: Vec<UploadTrack>,
        mut collection: CollectionMetadata,
        is_album: bool,
    ) -> Result<CollectionOutcome, PipelineError> {
        let kind = if is_album {
            UploadKind::Album
        } else {
            UploadKind::Playlist
        };
        let session = UploadSession::new(user_id, kind);
        self.emit_started(&session, tracks.len());

        if let Some(artwork) = &collection.artwork {
            let cid = self
                .services
                .storage
                .upload_image(user_id, artwork)
                .await
                .map_err(PipelineError::CollectionArtwork)?;
            info!(%cid, "Stored collection artwork");
            collection.cover_art_cid = Some(cid);
        }

        for track in &mut tracks {
            combine_metadata(&mut track.metadata, &collection);
        }

        self.assign_track_ids(&mut tracks).await?;
        let outcome = self.pipeline.run(session, tracks).await?;

        let finalizer = CollectionFinalizer::new(
            self.services.chain.clone(),
            self.services.reporter.clone(),
            user_id,
            session.session_id,
        );
        let collection_id = finalizer.finalize(&collection, is_album, &outcome).await?;
        let track_ids = outcome.track_ids();

        self.services.events.emit_lossy(UploadEvent::CollectionCreated {
            session_id: session.session_id,
            collection_id,
            is_album,
            track_count: track_ids.len(),
        });

        Ok(CollectionOutcome {
            collection_id,
            is_album,
            track_ids,
        })
    }

    /// Reserve a permanent id for every track and stem, and link stems to
    /// their parent's id
    async fn assign_track_ids(&self, tracks: &mut [UploadTrack]) -> Result<(), PipelineError> {
        let needed: usize = tracks.iter().map(|t| 1 + t.stems.len()).sum();
        let chain = &self.services.chain;
        let mut ids = try_join_all((0..needed).map(|_| chain.generate_track_id()))
            .await
            .map_err(PipelineError::IdAllocation)?
            .into_iter();

        for track in tracks.iter_mut() {
            let parent_id = ids.next();
            track.metadata.track_id = parent_id;
            for stem in &mut track.stems {
                stem.metadata.track_id = ids.next();
                stem.metadata.stem_of = Some(StemOf {
                    parent_track_id: parent_id,
                    category: stem.category.clone(),
                });
            }
        }
        info!(count = needed, "Assigned track ids");
        Ok(())
    }

    fn emit_started(&self, session: &UploadSession, count: usize) {
        self.services.events.emit_lossy(UploadEvent::UploadStarted {
            session_id: session.session_id,
            kind: session.kind,
            count,
            timestamp: chrono::Utc::now(),
        });
    }
}

/// Fill gaps in a member's metadata from its collection
///
/// The track keeps anything it already has. Artwork, genre and mood fall back
/// to the collection's; release date and tags are taken only when absent.
pub fn combine_metadata(track: &mut TrackMetadata, collection: &CollectionMetadata) {
    if track.artwork.is_none() {
        track.artwork = collection.artwork.clone();
    }
    if track.genre.is_empty() {
        track.genre = collection.track_details.genre.clone().unwrap_or_default();
    }
    if track.mood.is_empty() {
        track.mood = collection.track_details.mood.clone().unwrap_or_default();
    }
    if track.release_date.is_none() {
        track.release_date = collection.release_date;
    }
    if track.tags.is_none() {
        track.tags = collection.track_details.tags.clone();
    }
}
