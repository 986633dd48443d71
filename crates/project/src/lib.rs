//! On-disk formats: the autosave record and the collaboration snapshot.

mod autosave;
mod snapshot;
mod store;

pub use autosave::{AUTOSAVE_VERSION, AutosaveRecord, CellRecord, INHERIT};
pub use snapshot::{
    SNAPSHOT_VERSION, SampleDescriptor, Scene, SceneLayer, Snapshot, SnapshotCell,
    SnapshotMetadata,
};
pub use store::{AutosaveStore, FileAutosaveStore, MemoryAutosaveStore};

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] rmp_serde::encode::Error),

    #[error("Deserialization error: {0}")]
    Deserialize(#[from] rmp_serde::decode::Error),

    #[error("Unsupported format version {found} (newest known is {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
}
