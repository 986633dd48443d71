use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "layerseq";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub columns_per_layer: usize,
    pub layers: usize,
    pub section_steps: usize,
    pub sections: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            columns_per_layer: 4,
            layers: 1,
            section_steps: 16,
            sections: 1,
        }
    }
}

/// Timer periods in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub ui_poll_ms: u64,
    pub autosave_debounce_ms: u64,
    pub autosave_min_interval_ms: u64,
    pub autosave_periodic_ms: u64,
    pub double_tap_ms: u64,
    pub auto_scroll_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            ui_poll_ms: 50,
            autosave_debounce_ms: 3000,
            autosave_min_interval_ms: 5000,
            autosave_periodic_ms: 30_000,
            double_tap_ms: 300,
            auto_scroll_ms: 12,
        }
    }
}

impl Timings {
    pub fn ui_poll(&self) -> Duration {
        Duration::from_millis(self.ui_poll_ms)
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    pub fn autosave_min_interval(&self) -> Duration {
        Duration::from_millis(self.autosave_min_interval_ms)
    }

    pub fn autosave_periodic(&self) -> Duration {
        Duration::from_millis(self.autosave_periodic_ms)
    }

    pub fn double_tap(&self) -> Duration {
        Duration::from_millis(self.double_tap_ms)
    }

    pub fn auto_scroll(&self) -> Duration {
        Duration::from_millis(self.auto_scroll_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub grid: GridConfig,
    pub sample_slots: usize,
    pub bpm: u32,
    pub undo_limit: usize,
    pub assets_root: PathBuf,
    pub autosave_path: PathBuf,
    pub timings: Timings,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        Self {
            grid: GridConfig::default(),
            sample_slots: 26,
            bpm: seq_transport::DEFAULT_BPM,
            undo_limit: 100,
            assets_root: data_dir.join("assets"),
            autosave_path: data_dir.join("autosave.json"),
            timings: Timings::default(),
        }
    }
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR).join("config.toml"))
    }

    /// Defaults when the file is missing or unreadable.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|err| {
                log::warn!("ignoring invalid config {}: {err}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) {
        let Some(path) = Self::config_path() else {
            return;
        };
        self.save_to(&path);
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        if let Ok(contents) = toml::to_string_pretty(self) {
            let _ = fs::write(path, contents);
        }
    }
}
