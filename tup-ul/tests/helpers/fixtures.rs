//! Request builders and a wired-up harness

use super::mocks::{MockChain, MockStorage, RecordingProgress, RecordingReporter};
use std::sync::Arc;
use tup_common::events::EventBus;
use tup_ul::models::{CollectionMetadata, SourceFile, TrackMetadata, UploadStem, UploadTrack};
use tup_ul::services::{ChainClient, StorageClient};
use tup_ul::{PipelineConfig, Services, UploadOrchestrator, UploadPipeline};

pub fn track(title: &str) -> UploadTrack {
    UploadTrack {
        file: SourceFile::new(format!("{}.wav", title), 1000),
        metadata: TrackMetadata {
            title: title.to_string(),
            ..Default::default()
        },
        stems: vec![],
    }
}

pub fn stem(title: &str, category: &str) -> UploadStem {
    UploadStem {
        file: SourceFile::new(format!("{}.wav", title), 200),
        metadata: TrackMetadata {
            title: title.to_string(),
            ..Default::default()
        },
        category: category.to_string(),
    }
}

pub fn track_with_stems(title: &str, stems: &[&str]) -> UploadTrack {
    let mut t = track(title);
    t.stems = stems.iter().map(|s| stem(s, "bass")).collect();
    t
}

pub fn collection(name: &str) -> CollectionMetadata {
    CollectionMetadata {
        name: name.to_string(),
        ..Default::default()
    }
}

/// Services with default sinks over arbitrary collaborators
pub fn test_services(storage: Arc<dyn StorageClient>, chain: Arc<dyn ChainClient>) -> Services {
    Services::new(storage, chain, EventBus::new(1024))
}

/// Mocks plus recording sinks, shared with the code under test
pub struct TestHarness {
    pub storage: Arc<MockStorage>,
    pub chain: Arc<MockChain>,
    pub progress: Arc<RecordingProgress>,
    pub reporter: Arc<RecordingReporter>,
    pub events: EventBus,
}

impl TestHarness {
    pub fn new(storage: MockStorage, chain: MockChain) -> Self {
        let chain = Arc::new(chain);
        storage.attach_timeline(chain.clone());
        Self {
            storage: Arc::new(storage),
            reporter: Arc::new(RecordingReporter::with_timeline(chain.clone())),
            chain,
            progress: Arc::new(RecordingProgress::default()),
            events: EventBus::new(1024),
        }
    }

    pub fn services(&self) -> Services {
        Services::new(self.storage.clone(), self.chain.clone(), self.events.clone())
            .with_progress(self.progress.clone())
            .with_reporter(self.reporter.clone())
    }

    pub fn orchestrator(&self) -> UploadOrchestrator {
        self.orchestrator_with(PipelineConfig::default())
    }

    pub fn orchestrator_with(&self, config: PipelineConfig) -> UploadOrchestrator {
        UploadOrchestrator::new(self.services(), config)
    }

    pub fn pipeline(&self, config: PipelineConfig) -> UploadPipeline {
        UploadPipeline::new(config, self.services())
    }
}
