//! Content-addressed local storage
//!
//! Files are streamed in chunks into `<root>/tmp`, hashed with SHA-256 on the
//! way, then renamed to `<root>/content/<digest>`. The hex digest doubles as
//! the provisional storage identifier.

use crate::error::ServiceError;
use crate::models::{SourceFile, TrackMetadata};
use crate::services::{ProgressCallback, StorageClient, StorageProgress};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;
use tup_common::events::{ProgressKey, UserId};
use uuid::Uuid;

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

pub struct LocalStorage {
    root: PathBuf,
    chunk_size: usize,
}

impl LocalStorage {
    /// Open (creating if needed) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, ServiceError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("content")).await?;
        tokio::fs::create_dir_all(root.join("tmp")).await?;
        Ok(Self {
            root,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Path of stored content by identifier
    pub fn content_path(&self, cid: &str) -> PathBuf {
        self.root.join("content").join(cid)
    }

    async fn store(
        &self,
        file: &SourceFile,
        key: Option<ProgressKey>,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<String, ServiceError> {
        let mut source = tokio::fs::File::open(&file.path)
            .await
            .map_err(|e| ServiceError::Storage(format!("cannot read {}: {}", file.path.display(), e)))?;
        let total = source.metadata().await?.len();

        let tmp_path = self.root.join("tmp").join(Uuid::new_v4().to_string());
        let result = self
            .copy_hashed(&mut source, &tmp_path, total, key, on_progress)
            .await;

        let cid = match result {
            Ok(cid) => cid,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(e);
            }
        };

        tokio::fs::rename(&tmp_path, self.content_path(&cid)).await?;
        debug!(file = %file.path.display(), %cid, bytes = total, "Stored file");
        Ok(cid)
    }

    async fn copy_hashed(
        &self,
        source: &mut tokio::fs::File,
        tmp_path: &Path,
        total: u64,
        key: Option<ProgressKey>,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<String, ServiceError> {
        let mut dest = tokio::fs::File::create(tmp_path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.chunk_size];
        let mut loaded = 0u64;

        let report = |loaded: u64, transcode: Option<f64>| {
            if let (Some(key), Some(cb)) = (key, on_progress) {
                cb(StorageProgress {
                    key,
                    loaded: Some(loaded),
                    total: Some(total),
                    transcode,
                });
            }
        };

        report(0, None);
        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            dest.write_all(&buf[..n]).await?;
            loaded += n as u64;
            if loaded < total {
                report(loaded, None);
            }
        }
        dest.flush().await?;

        // Nothing is transcoded locally; audio reports it as done
        let transcode = (key == Some(ProgressKey::Audio)).then_some(1.0);
        report(loaded, transcode);

        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[async_trait]
impl StorageClient for LocalStorage {
    async fn upload_files(
        &self,
        _user_id: UserId,
        audio: &SourceFile,
        cover_art: Option<&SourceFile>,
        metadata: &TrackMetadata,
        on_progress: ProgressCallback,
    ) -> Result<TrackMetadata, ServiceError> {
        let mut updated = metadata.clone();
        updated.track_cid = Some(
            self.store(audio, Some(ProgressKey::Audio), Some(&on_progress))
                .await?,
        );
        if let Some(art) = cover_art {
            updated.cover_art_cid = Some(self.store(art, Some(ProgressKey::Art), Some(&on_progress)).await?);
        }
        Ok(updated)
    }

    async fn upload_image(&self, _user_id: UserId, image: &SourceFile) -> Result<String, ServiceError> {
        self.store(image, None, None).await
    }
}
