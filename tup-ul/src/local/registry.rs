//! In-process registry standing in for the chain
//!
//! Every accepted write advances a block counter; a receipt confirms while the
//! entry it names still exists at that block.

use crate::error::ServiceError;
use crate::models::{CollectionMetadata, RegistryEntry, TrackMetadata};
use crate::services::{ChainClient, ChainReceipt};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use tup_common::events::{CollectionId, TrackId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub track_id: TrackId,
    pub owner: UserId,
    pub block_number: u64,
    pub metadata: TrackMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub collection_id: CollectionId,
    pub owner: UserId,
    pub block_number: u64,
    pub is_album: bool,
    pub name: String,
    pub cover_art_cid: Option<String>,
    pub track_ids: Vec<TrackId>,
}

/// Full registry contents, as persisted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub block_number: u64,
    pub next_track_id: u64,
    pub next_collection_id: u64,
    pub tracks: BTreeMap<TrackId, TrackRecord>,
    pub collections: BTreeMap<CollectionId, CollectionRecord>,
}

#[derive(Debug, Default)]
pub struct LocalRegistry {
    state: Mutex<RegistrySnapshot>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a persisted registry, or start empty if `path` does not exist
    pub async fn load(path: &Path) -> Result<Self, ServiceError> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(Self::new());
        }
        let bytes = tokio::fs::read(path).await?;
        let snapshot: RegistrySnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| ServiceError::Chain(format!("corrupt registry {}: {}", path.display(), e)))?;
        info!(
            path = %path.display(),
            tracks = snapshot.tracks.len(),
            collections = snapshot.collections.len(),
            "Loaded registry"
        );
        Ok(Self {
            state: Mutex::new(snapshot),
        })
    }

    /// Write the registry as JSON (temp file + rename)
    pub async fn persist(&self, path: &Path) -> Result<(), ServiceError> {
        let json = serde_json::to_vec_pretty(&self.snapshot()?)
            .map_err(|e| ServiceError::Chain(format!("failed to serialize registry: {}", e)))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub fn snapshot(&self) -> Result<RegistrySnapshot, ServiceError> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, RegistrySnapshot>, ServiceError> {
        self.state
            .lock()
            .map_err(|_| ServiceError::Chain("registry lock poisoned".to_string()))
    }
}

/// Deterministic pseudo block hash
fn block_hash(block_number: u64, entry: RegistryEntry) -> String {
    let mut hasher = Sha256::new();
    hasher.update(block_number.to_be_bytes());
    hasher.update(entry.to_string().as_bytes());
    format!("0x{:x}", hasher.finalize())
}

fn receipt(entry: RegistryEntry, block_number: u64) -> ChainReceipt {
    ChainReceipt {
        entry,
        block_hash: block_hash(block_number, entry),
        block_number,
    }
}

#[async_trait]
impl ChainClient for LocalRegistry {
    async fn generate_track_id(&self) -> Result<TrackId, ServiceError> {
        let mut state = self.lock()?;
        state.next_track_id += 1;
        Ok(TrackId(state.next_track_id))
    }

    async fn write_to_chain(
        &self,
        user_id: UserId,
        preset_id: Option<TrackId>,
        metadata: &TrackMetadata,
    ) -> Result<ChainReceipt, ServiceError> {
        let mut state = self.lock()?;
        let track_id = match preset_id {
            Some(id) => id,
            None => {
                state.next_track_id += 1;
                TrackId(state.next_track_id)
            }
        };
        if state.tracks.contains_key(&track_id) {
            return Err(ServiceError::Chain(format!("track {} already exists", track_id)));
        }

        state.block_number += 1;
        let block_number = state.block_number;
        state.tracks.insert(
            track_id,
            TrackRecord {
                track_id,
                owner: user_id,
                block_number,
                metadata: metadata.clone(),
            },
        );
        debug!(%track_id, block_number, title = %metadata.title, "Wrote track");
        Ok(receipt(RegistryEntry::Track(track_id), block_number))
    }

    async fn confirm_transaction(&self, receipt: &ChainReceipt) -> Result<bool, ServiceError> {
        let state = self.lock()?;
        let written_at = match receipt.entry {
            RegistryEntry::Track(id) => state.tracks.get(&id).map(|t| t.block_number),
            RegistryEntry::Collection(id) => state.collections.get(&id).map(|c| c.block_number),
        };
        Ok(receipt.block_number <= state.block_number && written_at == Some(receipt.block_number))
    }

    async fn delete_entry(&self, user_id: UserId, entry: RegistryEntry) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        let owner = match entry {
            RegistryEntry::Track(id) => state.tracks.get(&id).map(|t| t.owner),
            RegistryEntry::Collection(id) => state.collections.get(&id).map(|c| c.owner),
        };
        match owner {
            None => return Err(ServiceError::NotFound(entry.to_string())),
            Some(owner) if owner != user_id => {
                return Err(ServiceError::Chain(format!("{} is not owned by user {}", entry, user_id)))
            }
            Some(_) => {}
        }

        match entry {
            RegistryEntry::Track(id) => {
                state.tracks.remove(&id);
            }
            RegistryEntry::Collection(id) => {
                state.collections.remove(&id);
            }
        }
        state.block_number += 1;
        debug!(%entry, "Deleted entry");
        Ok(())
    }

    async fn allocate_collection_id(&self) -> Result<CollectionId, ServiceError> {
        let mut state = self.lock()?;
        loop {
            state.next_collection_id += 1;
            let id = CollectionId(state.next_collection_id);
            if !state.collections.contains_key(&id) {
                return Ok(id);
            }
        }
    }

    async fn create_collection(
        &self,
        user_id: UserId,
        collection_id: CollectionId,
        metadata: &CollectionMetadata,
        is_album: bool,
        track_ids: &[TrackId],
    ) -> Result<ChainReceipt, ServiceError> {
        let mut state = self.lock()?;
        if state.collections.contains_key(&collection_id) {
            return Err(ServiceError::Chain(format!(
                "collection {} already exists",
                collection_id
            )));
        }
        if let Some(missing) = track_ids.iter().find(|id| !state.tracks.contains_key(*id)) {
            return Err(ServiceError::NotFound(format!("track {}", missing)));
        }

        state.block_number += 1;
        let block_number = state.block_number;
        state.collections.insert(
            collection_id,
            CollectionRecord {
                collection_id,
                owner: user_id,
                block_number,
                is_album,
                name: metadata.name.clone(),
                cover_art_cid: metadata.cover_art_cid.clone(),
                track_ids: track_ids.to_vec(),
            },
        );
        debug!(%collection_id, block_number, tracks = track_ids.len(), "Created collection");
        Ok(receipt(RegistryEntry::Collection(collection_id), block_number))
    }
}
