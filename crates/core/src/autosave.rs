//! When to write the autosave record, and conversion between the live session
//! and that record.

use std::path::Path;
use std::time::{Duration, Instant};

use seq_engine::NativeEngine;
use seq_project::{AUTOSAVE_VERSION, AutosaveRecord, CellRecord};
use seq_transport::MAX_SECTION_LOOPS;

use crate::bridge::NativeSyncBridge;
use crate::cell::Cell;
use crate::error::Result;
use crate::grid::{
    GridState, GridStore, Layer, Section, check_dimensions, layer_label, section_label,
};
use crate::sample_bank::{SampleBank, SampleSource};
use crate::timer::{Debounce, Interval};

/// Debounced saving with a minimum spacing between writes, plus a periodic
/// save that fires even while edits keep restarting the debounce.
#[derive(Debug, Clone)]
pub struct AutosavePolicy {
    debounce: Debounce,
    periodic: Interval,
    min_interval: Duration,
    dirty: bool,
    last_save: Option<Instant>,
}

impl AutosavePolicy {
    pub fn new(debounce: Duration, min_interval: Duration, periodic: Duration) -> Self {
        Self {
            debounce: Debounce::new(debounce),
            periodic: Interval::new(periodic),
            min_interval,
            dirty: false,
            last_save: None,
        }
    }

    /// Arm the periodic timer.
    pub fn start(&mut self, now: Instant) {
        self.periodic.start(now);
    }

    pub fn stop(&mut self) {
        self.periodic.cancel();
        self.debounce.cancel();
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self, now: Instant) {
        self.dirty = true;
        self.debounce.trigger(now);
    }

    /// Returns `true` when a save is due now.
    pub fn poll(&mut self, now: Instant) -> bool {
        let debounced = self.debounce.poll(now);
        let periodic = self.periodic.poll(now);
        if !self.dirty {
            return false;
        }
        if periodic {
            return true;
        }
        if !debounced {
            return false;
        }
        match self.last_save {
            Some(last) if now < last + self.min_interval => {
                self.debounce.rearm_at(last + self.min_interval);
                false
            }
            _ => true,
        }
    }

    pub fn saved(&mut self, now: Instant) {
        self.dirty = false;
        self.last_save = Some(now);
        self.debounce.cancel();
    }
}

pub fn capture_record<E: NativeEngine>(
    grid: &GridStore<E>,
    bank: &SampleBank,
    bpm: u32,
    master_volume: f32,
    timestamp: u64,
) -> AutosaveRecord {
    let slots = bank.slots();
    AutosaveRecord {
        version: AUTOSAVE_VERSION,
        timestamp,
        bpm,
        grid_columns: grid.columns_per_layer(),
        grid_rows: grid.total_steps(),
        current_layer_index: grid.active_layer(),
        active_bank: bank.active_bank(),
        file_paths: slots
            .iter()
            .map(|slot| slot.source.as_ref().map(SampleSource::to_record_string))
            .collect(),
        file_names: slots
            .iter()
            .map(|slot| slot.is_assigned().then(|| slot.name()))
            .collect(),
        slot_loaded: slots.iter().map(|slot| slot.loaded).collect(),
        layer_grids: grid
            .layers()
            .iter()
            .map(|layer| layer.cells.iter().copied().map(CellRecord::from).collect())
            .collect(),
        layer_order: grid.layer_order().to_vec(),
        layer_labels: grid.layers().iter().map(|layer| layer.label.clone()).collect(),
        section_steps: grid.sections().iter().map(|section| section.steps).collect(),
        section_labels: grid
            .sections()
            .iter()
            .map(|section| section.label.clone())
            .collect(),
        section_loops: grid.sections().iter().map(|section| section.loops).collect(),
        master_volume,
        slot_volumes: slots.iter().map(|slot| slot.default_volume).collect(),
        slot_pitches: slots.iter().map(|slot| slot.default_pitch).collect(),
        sample_ids: slots.iter().map(|slot| slot.sample_id.clone()).collect(),
    }
}

/// Rebuild grid state from a record. Short layer grids are padded with empty
/// cells; section lengths that do not add up to `grid_rows` collapse into a
/// single section. Dimensions beyond the engine's limits reject the record.
pub fn grid_state_from_record(record: &AutosaveRecord) -> Result<GridState> {
    let columns_per_layer = record.grid_columns;
    let total_steps = record.grid_rows;
    let layer_count = record.layer_grids.len().max(1);
    check_dimensions(columns_per_layer, layer_count, total_steps)?;

    let sections_fit = record
        .section_steps
        .iter()
        .try_fold(0usize, |sum, &steps| sum.checked_add(steps))
        == Some(total_steps);
    let sections: Vec<Section> = if !record.section_steps.is_empty() && sections_fit {
        record
            .section_steps
            .iter()
            .enumerate()
            .map(|(index, &steps)| Section {
                steps,
                label: record
                    .section_labels
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| section_label(index)),
                loops: record
                    .section_loops
                    .get(index)
                    .map_or(1, |&loops| loops.clamp(1, MAX_SECTION_LOOPS)),
            })
            .collect()
    } else {
        vec![Section::new(
            total_steps,
            record
                .section_labels
                .first()
                .cloned()
                .unwrap_or_else(|| section_label(0)),
        )]
    };

    let layers = (0..layer_count)
        .map(|index| {
            let mut cells: Vec<Cell> = record
                .layer_grids
                .get(index)
                .map(|grid| grid.iter().copied().map(Cell::from).collect())
                .unwrap_or_default();
            cells.resize(total_steps * columns_per_layer, Cell::EMPTY);
            Layer {
                label: record
                    .layer_labels
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| layer_label(index)),
                cells,
            }
        })
        .collect();

    let mut order = record.layer_order.clone();
    order.sort_unstable();
    let layer_order = if order.iter().copied().eq(0..layer_count) {
        record.layer_order.clone()
    } else {
        (0..layer_count).collect()
    };

    let state = GridState {
        columns_per_layer,
        layers,
        sections,
        layer_order,
        active_layer: record.current_layer_index.min(layer_count - 1),
        active_section: 0,
    };
    state.validate()?;
    Ok(state)
}

/// Reassign slots from a record and reload the ones that were loaded. A file
/// that can no longer be loaded leaves its slot assigned but unloaded. Returns
/// the number of slots loaded.
pub fn restore_bank<E: NativeEngine>(
    record: &AutosaveRecord,
    bank: &mut SampleBank,
    bridge: &mut NativeSyncBridge<E>,
    assets_root: &Path,
) -> usize {
    bank.set_active_bank(record.active_bank);
    if record.file_paths.len() > bank.len() {
        log::warn!(
            "autosave names {} slots, only {} available",
            record.file_paths.len(),
            bank.len()
        );
    }

    let mut loaded = 0;
    for (index, path) in record.file_paths.iter().enumerate().take(bank.len()) {
        if bank.clear(index).is_err() {
            continue;
        }
        let Some(path) = path else {
            continue;
        };
        let source = SampleSource::from_record_string(path);
        let name = record.file_names.get(index).cloned().flatten();
        let id = record.sample_ids.get(index).cloned().flatten();
        if bank.assign(index, source.clone(), name, id).is_err() {
            continue;
        }

        let volume = record.slot_volumes.get(index).copied().unwrap_or(1.0);
        let pitch = record.slot_pitches.get(index).copied().unwrap_or(1.0);
        let volume = bank.set_default_volume(index, volume).unwrap_or(1.0);
        let pitch = bank.set_default_pitch(index, pitch).unwrap_or(1.0);

        if record.slot_loaded.get(index).copied().unwrap_or(true) {
            match bridge.load_sample(index, &source.resolve(assets_root)) {
                Ok(()) => {
                    let _ = bank.set_loaded(index, true);
                    loaded += 1;
                }
                Err(err) => log::warn!("slot {index}: {path} could not be reloaded: {err}"),
            }
        }
        bridge.set_slot_defaults(index, volume, pitch);
    }
    loaded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Override;
    use crate::error::Error;
    use crate::testing::{Call, RecordingEngine};

    const MS: Duration = Duration::from_millis(1);

    fn policy() -> AutosavePolicy {
        AutosavePolicy::new(3000 * MS, 5000 * MS, 30_000 * MS)
    }

    fn grid() -> GridStore<RecordingEngine> {
        GridStore::new(
            NativeSyncBridge::new(RecordingEngine::default()),
            GridState::empty(4, 2, 4, 2),
        )
        .expect("grid")
    }

    #[test]
    fn test_debounce_saves_after_quiet_period() {
        let t0 = Instant::now();
        let mut policy = policy();
        policy.start(t0);
        policy.mark_dirty(t0);
        policy.mark_dirty(t0 + 2000 * MS);
        assert!(!policy.poll(t0 + 4000 * MS));
        assert!(policy.poll(t0 + 5000 * MS));
        policy.saved(t0 + 5000 * MS);
        assert!(!policy.is_dirty());
    }

    #[test]
    fn test_min_interval_rearms_debounce() {
        let t0 = Instant::now();
        let mut policy = policy();
        policy.saved(t0);
        policy.mark_dirty(t0);
        assert!(!policy.poll(t0 + 3000 * MS));
        assert!(!policy.poll(t0 + 4999 * MS));
        assert!(policy.poll(t0 + 5000 * MS));
    }

    #[test]
    fn test_periodic_save_beats_continuous_editing() {
        let t0 = Instant::now();
        let mut policy = policy();
        policy.start(t0);
        let mut saved = false;
        for second in 0..31u32 {
            let now = t0 + MS * (second * 1000);
            policy.mark_dirty(now);
            saved |= policy.poll(now);
        }
        assert!(saved);
    }

    #[test]
    fn test_clean_session_never_saves() {
        let t0 = Instant::now();
        let mut policy = policy();
        policy.start(t0);
        assert!(!policy.poll(t0 + 60_000 * MS));
    }

    #[test]
    fn test_record_round_trip_keeps_overrides() {
        let mut grid = grid();
        grid.set_cell(5, 6, 2, Override::Explicit(0.5), Override::Inherited)
            .expect("set");
        grid.set_section_label(1, "Chorus").expect("label");
        grid.set_section_loops(1, 4).expect("loops");
        let mut bank = SampleBank::new(4);
        bank.assign(2, SampleSource::Asset("kits/clap.wav".into()), None, Some("clap".into()))
            .expect("assign");

        let record = capture_record(&grid, &bank, 140, 0.8, 42);
        assert_eq!(record.grid_rows, 8);
        assert_eq!(record.layer_grids[1][5 * 4 + 2].volume, 0.5);
        assert_eq!(record.layer_grids[1][5 * 4 + 2].pitch, seq_project::INHERIT);
        assert_eq!(record.file_paths[2].as_deref(), Some("asset:kits/clap.wav"));
        assert_eq!(record.section_loops, vec![1, 4]);
        assert_eq!(record.master_volume, 0.8);

        let state = grid_state_from_record(&record).expect("state");
        assert_eq!(&state, grid.state());
    }

    #[test]
    fn test_mismatched_sections_collapse() {
        let grid = grid();
        let mut record = capture_record(&grid, &SampleBank::new(1), 120, 1.0, 0);
        record.section_steps = vec![4, 5];
        record.layer_grids[0].truncate(3);

        let state = grid_state_from_record(&record).expect("state");
        assert_eq!(state.sections.len(), 1);
        assert_eq!(state.sections[0].steps, 8);
        assert_eq!(state.layers[0].cells.len(), 32);
    }

    #[test]
    fn test_oversized_record_is_rejected_before_allocating() {
        let grid = grid();
        let mut record = capture_record(&grid, &SampleBank::new(1), 120, 1.0, 0);
        record.grid_rows = usize::MAX / 2;
        record.section_steps = Vec::new();
        assert!(matches!(
            grid_state_from_record(&record),
            Err(Error::StructuralLimit(_))
        ));

        let mut record = capture_record(&grid, &SampleBank::new(1), 120, 1.0, 0);
        record.grid_columns = usize::MAX;
        assert!(grid_state_from_record(&record).is_err());

        let mut record = capture_record(&grid, &SampleBank::new(1), 120, 1.0, 0);
        record.section_steps = vec![usize::MAX, 9];
        let state = grid_state_from_record(&record).expect("collapsed");
        assert_eq!(state.sections.len(), 1);
    }

    #[test]
    fn test_missing_files_restore_unloaded() {
        let grid = grid();
        let mut bank = SampleBank::new(3);
        bank.assign(1, SampleSource::File("/gone/kick.wav".into()), None, None)
            .expect("assign");
        bank.set_loaded(1, true).expect("loaded");
        let record = capture_record(&grid, &bank, 120, 1.0, 0);

        let mut restored = SampleBank::new(3);
        let mut bridge = NativeSyncBridge::new(RecordingEngine::with_missing_files());
        let loaded = restore_bank(&record, &mut restored, &mut bridge, Path::new("/assets"));

        assert_eq!(loaded, 0);
        let slot = restored.slot(1).expect("slot");
        assert!(slot.is_assigned());
        assert!(!slot.loaded);
        assert_eq!(
            bridge.engine().count(|call| matches!(call, Call::Load { slot: 1, .. })),
            1
        );
    }
}
