//! Filesystem-backed collaborators
//!
//! Lets the pipeline run end to end without a storage node or chain:
//! [`LocalStorage`] keeps content-addressed copies under a store directory,
//! [`LocalRegistry`] is an in-process registry that can be persisted as JSON.

mod registry;
mod storage;

pub use registry::{CollectionRecord, LocalRegistry, RegistrySnapshot, TrackRecord};
pub use storage::LocalStorage;
