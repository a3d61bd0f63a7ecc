//! Playlist and album uploads
//!
//! Collections are all-or-nothing: any member failure, or a failed collection
//! write, leaves no member behind.

mod helpers;

use helpers::{collection, track, track_with_stems, ChainCall, MockChain, MockStorage, TestHarness};
use tup_common::events::{TrackId, UploadEvent, UserId};
use tup_ul::models::{RegistryEntry, SourceFile, UploadRequest, UploadResult, UploadType};
use tup_ul::PipelineError;

const USER: UserId = UserId(3);

fn no_collection_written(h: &TestHarness) -> bool {
    h.chain.collections_created().is_empty()
        && !h
            .chain
            .calls()
            .iter()
            .any(|c| matches!(c, ChainCall::AllocateCollection(_)))
}

#[tokio::test]
async fn test_album_created_in_track_order() {
    let h = TestHarness::new(
        MockStorage::new().delay("one", 40).delay("two", 20),
        MockChain::new().delay("one", 30),
    );
    let mut rx = h.events.subscribe();

    let outcome = h
        .orchestrator()
        .upload_collection(
            USER,
            vec![track("one"), track("two"), track("three")],
            collection("Debut"),
            true,
        )
        .await
        .unwrap();

    let ids = vec![TrackId(100), TrackId(101), TrackId(102)];
    assert!(outcome.is_album);
    assert_eq!(outcome.track_ids, ids);
    assert_eq!(h.chain.collections_created(), vec![(outcome.collection_id, ids)]);

    let mut created = false;
    while let Ok(event) = rx.try_recv() {
        if let UploadEvent::CollectionCreated {
            collection_id,
            track_count,
            is_album,
            ..
        } = event
        {
            assert_eq!(collection_id, outcome.collection_id);
            assert_eq!(track_count, 3);
            assert!(is_album);
            created = true;
        }
    }
    assert!(created);
}

#[tokio::test]
async fn test_members_publish_only_after_every_member_uploaded() {
    let h = TestHarness::new(MockStorage::new().delay("slow", 40), MockChain::new());

    h.orchestrator()
        .upload_collection(USER, vec![track("fast"), track("slow")], collection("Mix"), false)
        .await
        .unwrap();

    let calls = h.chain.calls();
    let last_upload = calls
        .iter()
        .rposition(|c| matches!(c, ChainCall::Uploaded(_)))
        .unwrap();
    let first_write = calls
        .iter()
        .position(|c| matches!(c, ChainCall::WriteStarted(_)))
        .unwrap();
    assert!(last_upload < first_write);
}

#[tokio::test]
async fn test_member_upload_failure_writes_nothing() {
    // "a" uploads and is held; "b" fails afterwards
    let h = TestHarness::new(
        MockStorage::new().delay("b", 30).fail_on("b"),
        MockChain::new(),
    );

    let err = h
        .orchestrator()
        .upload_collection(USER, vec![track("a"), track("b")], collection("Mix"), false)
        .await
        .unwrap_err();

    match err {
        PipelineError::CollectionUpload { errored } => assert_eq!(errored.len(), 1),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(h.chain.writes_started().is_empty());
    assert!(h.chain.deleted().is_empty());
    assert!(no_collection_written(&h));
    assert_eq!(h.reporter.categories(), vec!["UploadPhaseError"]);
}

#[tokio::test]
async fn test_publish_race_deletes_published_member() {
    // Both members released together; "a" publishes before "b" fails
    let h = TestHarness::new(
        MockStorage::new(),
        MockChain::new().delay("b", 30).fail_on("b"),
    );

    let err = h
        .orchestrator()
        .upload_collection(USER, vec![track("a"), track("b")], collection("Mix"), false)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::CollectionUpload { .. }));
    assert_eq!(err.errored().len(), 1);
    assert_eq!(h.chain.deleted(), vec![RegistryEntry::Track(TrackId(100))]);
    assert!(no_collection_written(&h));
}

#[tokio::test]
async fn test_collection_with_stems_lists_top_level_only() {
    let h = TestHarness::new(MockStorage::new(), MockChain::new());

    let outcome = h
        .orchestrator()
        .upload_collection(
            USER,
            vec![track_with_stems("lead", &["lead-bass"]), track("second")],
            collection("Stems EP"),
            true,
        )
        .await
        .unwrap();

    // lead 100, lead-bass 101, second 102
    assert_eq!(outcome.track_ids, vec![TrackId(100), TrackId(102)]);
}

#[tokio::test]
async fn test_stem_failure_in_collection_removes_everything() {
    let h = TestHarness::new(
        MockStorage::new(),
        MockChain::new().delay("lead-bass", 30).fail_on("lead-bass"),
    );

    let err = h
        .orchestrator()
        .upload_collection(
            USER,
            vec![track_with_stems("lead", &["lead-bass"]), track("second")],
            collection("Stems EP"),
            true,
        )
        .await
        .unwrap_err();

    // Stem failure plus cascaded parent; loop stops at the first
    assert!(matches!(err, PipelineError::CollectionUpload { .. }));
    assert!(err.errored().iter().any(|r| r.failure.is_cascaded()));
    assert_eq!(h.chain.deleted(), vec![RegistryEntry::Track(TrackId(102))]);
    assert!(no_collection_written(&h));
}

#[tokio::test]
async fn test_create_failure_rolls_back_members() {
    let h = TestHarness::new(MockStorage::new(), MockChain::new().fail_create());

    let err = h
        .orchestrator()
        .upload_collection(
            USER,
            vec![track_with_stems("a", &["a-stem"]), track("b")],
            collection("Mix"),
            false,
        )
        .await
        .unwrap_err();

    // a 100, a-stem 101, b 102
    let mut deleted_tracks = match err {
        PipelineError::CollectionCreate { deleted_tracks, .. } => deleted_tracks,
        other => panic!("unexpected error: {:?}", other),
    };
    deleted_tracks.sort();
    assert_eq!(deleted_tracks, vec![TrackId(100), TrackId(101), TrackId(102)]);

    let deleted = h.chain.deleted();
    for (title, id) in h.chain.writes_completed() {
        assert!(
            deleted.contains(&RegistryEntry::Track(id)),
            "{} ({}) left behind after rollback",
            title,
            id
        );
    }
    assert!(deleted
        .iter()
        .any(|e| matches!(e, RegistryEntry::Collection(_))));

    // Reported before compensation starts
    assert_eq!(h.reporter.categories(), vec!["CollectionCreateError"]);
    let report = h
        .chain
        .position(&ChainCall::Reported("CollectionCreateError"))
        .unwrap();
    let first_delete = h
        .chain
        .calls()
        .iter()
        .position(|c| matches!(c, ChainCall::Delete(_)))
        .unwrap();
    assert!(report < first_delete);
}

#[tokio::test]
async fn test_stem_published_after_member_failure_is_deleted() {
    // The stem write is still in flight when "b" fails
    let h = TestHarness::new(
        MockStorage::new().delay("b", 30).fail_on("b"),
        MockChain::new().delay("a-stem", 60),
    );

    let err = h
        .orchestrator()
        .upload_collection(
            USER,
            vec![track_with_stems("a", &["a-stem"]), track("b")],
            collection("Mix"),
            false,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::CollectionUpload { .. }));
    let written = h.chain.writes_completed();
    assert_eq!(written, vec![("a-stem".to_string(), TrackId(101))]);
    assert_eq!(h.chain.deleted(), vec![RegistryEntry::Track(TrackId(101))]);
    assert!(no_collection_written(&h));
}

#[tokio::test]
async fn test_artwork_failure_stops_before_tracks() {
    let h = TestHarness::new(MockStorage::new().fail_images(), MockChain::new());
    let mut metadata = collection("Covered");
    metadata.artwork = Some(SourceFile::new("cover.jpg", 50));

    let err = h
        .orchestrator()
        .upload_collection(USER, vec![track("a")], metadata, false)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::CollectionArtwork(_)));
    assert!(h.storage.uploads().is_empty());
    assert!(h.chain.calls().is_empty());
}

#[tokio::test]
async fn test_artwork_stored_once_for_collection() {
    let h = TestHarness::new(MockStorage::new(), MockChain::new());
    let mut metadata = collection("Covered");
    metadata.artwork = Some(SourceFile::new("cover.jpg", 50));

    h.orchestrator()
        .upload_collection(USER, vec![track("a"), track("b")], metadata, true)
        .await
        .unwrap();

    assert_eq!(h.storage.images(), vec!["img-cover.jpg"]);
}

#[tokio::test]
async fn test_collection_request_requires_metadata() {
    let h = TestHarness::new(MockStorage::new(), MockChain::new());

    let err = h
        .orchestrator()
        .upload(
            USER,
            UploadRequest {
                upload_type: UploadType::Playlist,
                tracks: vec![track("a")],
                collection: None,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::InvalidRequest(_)));
    assert!(h.storage.uploads().is_empty());
}

#[tokio::test]
async fn test_upload_dispatches_playlist() {
    let h = TestHarness::new(MockStorage::new(), MockChain::new());

    let result = h
        .orchestrator()
        .upload(
            USER,
            UploadRequest {
                upload_type: UploadType::Playlist,
                tracks: vec![track("a")],
                collection: Some(collection("Solo")),
            },
        )
        .await
        .unwrap();

    match result {
        UploadResult::Collection(outcome) => {
            assert!(!outcome.is_album);
            assert_eq!(outcome.track_ids, vec![TrackId(100)]);
        }
        other => panic!("unexpected result: {:?}", other),
    }
}
