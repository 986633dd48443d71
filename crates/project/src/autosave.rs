use serde::{Deserialize, Serialize};

pub const AUTOSAVE_VERSION: u32 = 1;

/// Stored in place of a volume or pitch that follows the sample default.
pub const INHERIT: f32 = -1.0;

fn inherit() -> f32 {
    INHERIT
}

fn unity() -> f32 {
    1.0
}

/// One grid cell as written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub slot: Option<usize>,
    #[serde(default = "inherit")]
    pub volume: f32,
    #[serde(default = "inherit")]
    pub pitch: f32,
}

impl Default for CellRecord {
    fn default() -> Self {
        Self {
            slot: None,
            volume: INHERIT,
            pitch: INHERIT,
        }
    }
}

impl CellRecord {
    /// Any negative value reads as "inherit".
    pub fn volume_override(&self) -> Option<f32> {
        (self.volume >= 0.0).then_some(self.volume)
    }

    pub fn pitch_override(&self) -> Option<f32> {
        (self.pitch >= 0.0).then_some(self.pitch)
    }
}

/// Everything needed to rebuild a session after a restart.
///
/// `layer_grids[layer]` is flattened as `step * grid_columns + column` where
/// `grid_columns` counts the columns of one layer and `grid_rows` the total
/// steps across all sections. Slot arrays are indexed by slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutosaveRecord {
    pub version: u32,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub bpm: u32,
    pub grid_columns: usize,
    pub grid_rows: usize,
    pub current_layer_index: usize,
    pub active_bank: usize,
    pub file_paths: Vec<Option<String>>,
    pub file_names: Vec<Option<String>>,
    pub slot_loaded: Vec<bool>,
    pub layer_grids: Vec<Vec<CellRecord>>,
    pub layer_order: Vec<usize>,
    pub layer_labels: Vec<String>,
    #[serde(default)]
    pub section_steps: Vec<usize>,
    #[serde(default)]
    pub section_labels: Vec<String>,
    /// Song-mode passes per section; missing entries mean 1.
    #[serde(default)]
    pub section_loops: Vec<u32>,
    #[serde(default = "unity")]
    pub master_volume: f32,
    #[serde(default)]
    pub slot_volumes: Vec<f32>,
    #[serde(default)]
    pub slot_pitches: Vec<f32>,
    #[serde(default)]
    pub sample_ids: Vec<Option<String>>,
}
