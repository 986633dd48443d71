use serde::{Deserialize, Serialize};

use crate::ProjectError;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Portable pattern shared between collaborators. Cells name samples by
/// stable id so the receiver can map them onto its own slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u32,
    pub metadata: SnapshotMetadata,
    pub scenes: Vec<Scene>,
    pub samples: Vec<SampleDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub author: String,
    pub bpm: u32,
    #[serde(default)]
    pub key: Option<String>,
    pub time_signature: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl Default for SnapshotMetadata {
    fn default() -> Self {
        Self {
            author: String::new(),
            bpm: 120,
            key: None,
            time_signature: "4/4".into(),
            created_at: 0,
        }
    }
}

fn one_pass() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub name: String,
    pub layers: Vec<SceneLayer>,
    /// Song-mode passes before the next scene.
    #[serde(default = "one_pass")]
    pub loops: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneLayer {
    pub label: String,
    /// `rows[row][column]`; `None` is an empty cell.
    pub rows: Vec<Vec<Option<SnapshotCell>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCell {
    pub sample_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleDescriptor {
    pub id: String,
    pub name: String,
    pub url: String,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String, ProjectError> {
        Ok(serde_json::to_string(self)?)
    }

    /// MessagePack with field names, so optional fields may be omitted.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProjectError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Accepts either encoding: JSON first, then MessagePack.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProjectError> {
        let snapshot: Self = serde_json::from_slice(bytes)
            .or_else(|_| rmp_serde::from_slice(bytes).map_err(ProjectError::from))?;
        snapshot.check_version()?;
        Ok(snapshot)
    }

    fn check_version(&self) -> Result<(), ProjectError> {
        if self.version > SNAPSHOT_VERSION {
            return Err(ProjectError::UnsupportedVersion {
                found: self.version,
                supported: SNAPSHOT_VERSION,
            });
        }
        Ok(())
    }
}
