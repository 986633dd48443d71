use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};

use crate::{AUTOSAVE_VERSION, AutosaveRecord, ProjectError};

/// Where autosave records live. A missing record is `Ok(None)`, not an error.
pub trait AutosaveStore {
    fn load(&self) -> Result<Option<AutosaveRecord>, ProjectError>;
    fn save(&mut self, record: &AutosaveRecord) -> Result<(), ProjectError>;
    fn clear(&mut self) -> Result<(), ProjectError>;
}

#[derive(Debug, Clone)]
pub struct FileAutosaveStore {
    path: PathBuf,
}

impl FileAutosaveStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn load_record_data(path: &Path) -> Result<AutosaveRecord, ProjectError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    // Try JSON first, fall back to MessagePack
    serde_json::from_reader(reader).or_else(|_| {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        rmp_serde::decode::from_read(reader).map_err(ProjectError::from)
    })
}

impl AutosaveStore for FileAutosaveStore {
    fn load(&self) -> Result<Option<AutosaveRecord>, ProjectError> {
        let record = match load_record_data(&self.path) {
            Ok(record) => record,
            Err(ProjectError::Io(err)) if err.kind() == ErrorKind::NotFound => {
                log::debug!("no autosave at {}", self.path.display());
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        if record.version > AUTOSAVE_VERSION {
            return Err(ProjectError::UnsupportedVersion {
                found: record.version,
                supported: AUTOSAVE_VERSION,
            });
        }
        Ok(Some(record))
    }

    /// Writes to a sibling temp file and renames it over the record.
    fn save(&mut self, record: &AutosaveRecord) -> Result<(), ProjectError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("tmp");
        let file = File::create(&tmp)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, record)?;
        fs::rename(&tmp, &self.path)?;

        log::debug!("autosaved to {}", self.path.display());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), ProjectError> {
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}

/// Keeps the last record in memory; for hosts without a writable disk.
#[derive(Debug, Clone, Default)]
pub struct MemoryAutosaveStore {
    record: Option<AutosaveRecord>,
    saves: usize,
}

impl MemoryAutosaveStore {
    pub fn saves(&self) -> usize {
        self.saves
    }

    pub fn record(&self) -> Option<&AutosaveRecord> {
        self.record.as_ref()
    }
}

impl AutosaveStore for MemoryAutosaveStore {
    fn load(&self) -> Result<Option<AutosaveRecord>, ProjectError> {
        Ok(self.record.clone())
    }

    fn save(&mut self, record: &AutosaveRecord) -> Result<(), ProjectError> {
        self.record = Some(record.clone());
        self.saves += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), ProjectError> {
        self.record = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CellRecord;
    use tempfile::tempdir;

    fn record() -> AutosaveRecord {
        AutosaveRecord {
            version: AUTOSAVE_VERSION,
            timestamp: 42,
            bpm: 100,
            grid_columns: 4,
            grid_rows: 4,
            current_layer_index: 0,
            active_bank: 0,
            file_paths: vec![Some("/samples/kick.wav".into())],
            file_names: vec![Some("kick".into())],
            slot_loaded: vec![true],
            layer_grids: vec![vec![CellRecord::default(); 16]],
            layer_order: vec![0],
            layer_labels: vec!["A".into()],
            section_steps: vec![4],
            section_labels: vec!["Intro".into()],
            section_loops: vec![1],
            slot_volumes: vec![0.9],
            slot_pitches: vec![1.0],
            sample_ids: vec![None],
            master_volume: 1.0,
        }
    }

    #[test]
    fn test_missing_file_is_no_prior_state() {
        let dir = tempdir().expect("tempdir");
        let store = FileAutosaveStore::new(dir.path().join("autosave.json"));
        assert!(store.load().expect("load").is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().expect("tempdir");
        let mut store = FileAutosaveStore::new(dir.path().join("nested/autosave.json"));

        store.save(&record()).expect("save");
        let loaded = store.load().expect("load").expect("record present");
        assert_eq!(loaded, record());
        assert!(!dir.path().join("nested/autosave.tmp").exists());
    }

    #[test]
    fn test_load_falls_back_to_msgpack() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("autosave.bin");
        let bytes = rmp_serde::encode::to_vec(&record()).expect("encode");
        fs::write(&path, bytes).expect("write");

        let store = FileAutosaveStore::new(&path);
        assert_eq!(store.load().expect("load"), Some(record()));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("autosave.json");
        fs::write(&path, "{ not json").expect("write");

        let store = FileAutosaveStore::new(&path);
        assert!(store.load().is_err());
    }

    #[test]
    fn test_future_version_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let mut store = FileAutosaveStore::new(dir.path().join("autosave.json"));
        let mut newer = record();
        newer.version = AUTOSAVE_VERSION + 1;
        store.save(&newer).expect("save");

        assert!(matches!(
            store.load(),
            Err(ProjectError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_clear_removes_record() {
        let dir = tempdir().expect("tempdir");
        let mut store = FileAutosaveStore::new(dir.path().join("autosave.json"));
        store.clear().expect("clear missing");
        store.save(&record()).expect("save");
        store.clear().expect("clear");
        assert!(store.load().expect("load").is_none());
    }

    #[test]
    fn test_memory_store_counts_saves() {
        let mut store = MemoryAutosaveStore::default();
        store.save(&record()).expect("save");
        store.save(&record()).expect("save");
        assert_eq!(store.saves(), 2);
        assert_eq!(store.load().expect("load"), Some(record()));
    }
}
