use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use seq_engine::NativeEngine;
use seq_project::{AutosaveRecord, AutosaveStore, Snapshot, SnapshotMetadata};

use crate::address::CellAddress;
use crate::autosave::{AutosavePolicy, capture_record, grid_state_from_record, restore_bank};
use crate::bridge::NativeSyncBridge;
use crate::cell::{Cell, Override};
use crate::clipboard::Clipboard;
use crate::config::Config;
use crate::error::Result;
use crate::grid::{GridState, GridStore};
use crate::playback::{PlayMode, PlaybackController, PlaybackState};
use crate::sample_bank::{SampleBank, SampleSource};
use crate::selection::{GridPos, Scope, SelectionEngine, SelectionState};
use crate::snapshot::{apply_assignments, export_snapshot, import_snapshot};
use crate::undo::History;

/// What one [`Session::tick`] did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Published only when the engine step changed.
    pub step: Option<i32>,
    pub selection_changed: bool,
    /// Present when an autosave was attempted.
    pub autosave: Option<Result<()>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub loaded: usize,
    pub unplaced: Vec<String>,
}

fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// The control side of the sequencer. Calls come from one thread; timers
/// advance through [`Session::tick`].
pub struct Session<E: NativeEngine, S: AutosaveStore> {
    grid: GridStore<E>,
    bank: SampleBank,
    selection: SelectionEngine,
    clipboard: Clipboard,
    playback: PlaybackController,
    autosave: AutosavePolicy,
    store: S,
    history: History<GridState>,
    assets_root: PathBuf,
    recording: Option<PathBuf>,
}

impl<E: NativeEngine, S: AutosaveStore> Session<E, S> {
    pub fn new(engine: E, store: S, config: &Config, now: Instant) -> Result<Self> {
        let mut bridge = NativeSyncBridge::new(engine);
        if !bridge.is_initialized() {
            bridge.initialize()?;
        }

        let grid = GridStore::new(
            bridge,
            GridState::empty(
                config.grid.columns_per_layer,
                config.grid.layers,
                config.grid.section_steps,
                config.grid.sections,
            ),
        )?;
        let timings = &config.timings;
        let mut autosave = AutosavePolicy::new(
            timings.autosave_debounce(),
            timings.autosave_min_interval(),
            timings.autosave_periodic(),
        );
        autosave.start(now);

        Ok(Self {
            grid,
            bank: SampleBank::new(config.sample_slots),
            selection: SelectionEngine::new(timings.double_tap(), timings.auto_scroll()),
            clipboard: Clipboard::new(),
            playback: PlaybackController::new(config.bpm, timings.ui_poll()),
            autosave,
            store,
            history: History::new(config.undo_limit),
            assets_root: config.assets_root.clone(),
            recording: None,
        })
    }

    pub fn grid(&self) -> &GridStore<E> {
        &self.grid
    }

    pub fn bank(&self) -> &SampleBank {
        &self.bank
    }

    pub fn selection(&self) -> &SelectionEngine {
        &self.selection
    }

    pub fn selection_mut(&mut self) -> &mut SelectionEngine {
        &mut self.selection
    }

    pub fn clipboard(&self) -> &Clipboard {
        &self.clipboard
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn engine(&self) -> &E {
        self.grid.bridge().engine()
    }

    pub fn engine_mut(&mut self) -> &mut E {
        self.grid.bridge_mut().engine_mut()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback.state()
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_playing()
    }

    pub fn current_step(&self) -> i32 {
        self.playback.current_step()
    }

    pub fn column_playing(&self) -> &[Option<usize>] {
        self.playback.column_playing()
    }

    pub fn is_dirty(&self) -> bool {
        self.autosave.is_dirty()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn scope(&self) -> Scope {
        Scope {
            layer: self.grid.active_layer(),
            section: self.grid.active_section(),
        }
    }

    /// Apply a grid edit; on success it becomes undoable and marks the
    /// session dirty.
    fn edit<T>(&mut self, now: Instant, op: impl FnOnce(&mut GridStore<E>) -> Result<T>) -> Result<T> {
        let before = self.grid.state().clone();
        let value = op(&mut self.grid)?;
        self.commit(before, now);
        Ok(value)
    }

    fn commit(&mut self, before: GridState, now: Instant) {
        self.history.record(before);
        self.autosave.mark_dirty(now);
    }

    /// Like [`Session::edit`], for edits that move cells around. Selection
    /// positions no longer mean the same cells, and a playing engine needs
    /// the new region.
    fn restructure<T>(
        &mut self,
        now: Instant,
        op: impl FnOnce(&mut GridStore<E>) -> Result<T>,
    ) -> Result<T> {
        let value = self.edit(now, op)?;
        self.selection.clear();
        self.playback.refresh_region(&mut self.grid)?;
        Ok(value)
    }

    pub fn get_cell(&self, address: CellAddress) -> Result<Cell> {
        self.grid.cell_at(address)
    }

    pub fn set_cell(
        &mut self,
        address: CellAddress,
        sample_slot: usize,
        volume: Override,
        pitch: Override,
        now: Instant,
    ) -> Result<()> {
        self.bank.check(sample_slot)?;
        self.edit(now, |grid| grid.set_cell_at(address, sample_slot, volume, pitch))
    }

    pub fn clear_cell(&mut self, address: CellAddress, now: Instant) -> Result<()> {
        self.edit(now, |grid| {
            let at = grid.absolute(address)?;
            grid.clear_cell(at.step, at.column)
        })
    }

    pub fn set_cell_volume(&mut self, address: CellAddress, volume: Override, now: Instant) -> Result<bool> {
        self.edit(now, |grid| {
            let at = grid.absolute(address)?;
            grid.set_cell_volume(at.step, at.column, volume)
        })
    }

    pub fn set_cell_pitch(&mut self, address: CellAddress, pitch: Override, now: Instant) -> Result<bool> {
        self.edit(now, |grid| {
            let at = grid.absolute(address)?;
            grid.set_cell_pitch(at.step, at.column, pitch)
        })
    }

    pub fn clear_all(&mut self, now: Instant) {
        let before = self.grid.state().clone();
        self.grid.clear_all();
        self.commit(before, now);
    }

    pub fn add_layer(&mut self, now: Instant) -> Result<usize> {
        self.edit(now, GridStore::add_layer)
    }

    pub fn remove_layer(&mut self, layer: usize, now: Instant) -> Result<()> {
        self.restructure(now, |grid| grid.remove_layer(layer))
    }

    pub fn resize_section(&mut self, section: usize, steps: usize, now: Instant) -> Result<()> {
        self.restructure(now, |grid| grid.resize_section(section, steps))
    }

    pub fn insert_step(&mut self, section: usize, row: usize, now: Instant) -> Result<()> {
        self.restructure(now, |grid| grid.insert_step(section, row))
    }

    pub fn delete_step(&mut self, section: usize, row: usize, now: Instant) -> Result<()> {
        self.restructure(now, |grid| grid.delete_step(section, row))
    }

    pub fn append_section(&mut self, copy_from: Option<usize>, now: Instant) -> Result<usize> {
        self.restructure(now, |grid| grid.append_section(copy_from))
    }

    pub fn delete_section(&mut self, section: usize, now: Instant) -> Result<()> {
        self.restructure(now, |grid| grid.delete_section(section))
    }

    pub fn set_layer_label(&mut self, layer: usize, label: &str, now: Instant) -> Result<()> {
        self.edit(now, |grid| grid.set_layer_label(layer, label))
    }

    pub fn set_section_label(&mut self, section: usize, label: &str, now: Instant) -> Result<()> {
        self.edit(now, |grid| grid.set_section_label(section, label))
    }

    /// Song-mode passes through the section before the next one plays.
    pub fn set_section_loops(&mut self, section: usize, loops: u32, now: Instant) -> Result<()> {
        self.edit(now, |grid| grid.set_section_loops(section, loops))?;
        self.playback.refresh_region(&mut self.grid)
    }

    pub fn set_active_layer(&mut self, layer: usize) -> Result<()> {
        self.grid.set_active_layer(layer)?;
        self.selection.clear();
        Ok(())
    }

    pub fn bring_layer_to_front(&mut self, layer: usize) -> Result<()> {
        self.grid.bring_layer_to_front(layer)
    }

    pub fn set_active_section(&mut self, section: usize) -> Result<()> {
        self.grid.set_active_section(section)?;
        self.selection.clear();
        if self.playback.mode() == PlayMode::LoopSection {
            self.playback.refresh_region(&mut self.grid)?;
        }
        Ok(())
    }

    pub fn undo(&mut self, now: Instant) -> Result<bool> {
        let current = self.grid.state().clone();
        let Some(previous) = self.history.undo(current) else {
            return Ok(false);
        };
        self.grid.restore(previous)?;
        self.after_history(now)?;
        Ok(true)
    }

    pub fn redo(&mut self, now: Instant) -> Result<bool> {
        let current = self.grid.state().clone();
        let Some(next) = self.history.redo(current) else {
            return Ok(false);
        };
        self.grid.restore(next)?;
        self.after_history(now)?;
        Ok(true)
    }

    fn after_history(&mut self, now: Instant) -> Result<()> {
        self.selection.clear();
        self.autosave.mark_dirty(now);
        self.playback.refresh_region(&mut self.grid)
    }

    pub fn selection_state(&self) -> SelectionState {
        self.selection.state()
    }

    pub fn tap(&mut self, pos: GridPos, now: Instant) {
        self.selection.tap(pos, now);
    }

    pub fn drag_start(&mut self, pos: GridPos) {
        self.selection.drag_start(pos);
    }

    pub fn drag_update(&mut self, pos: GridPos) {
        self.selection.drag_update(pos);
    }

    /// Pointer position in viewport pixels during a drag.
    pub fn drag_pointer(&mut self, x: f32, y: f32, now: Instant) {
        let rows = self
            .grid
            .sections()
            .get(self.grid.active_section())
            .map_or(0, |section| section.steps);
        let columns = self.grid.columns_per_layer();
        self.selection.drag_pointer(x, y, now, rows, columns);
    }

    pub fn drag_end(&mut self) {
        self.selection.drag_end();
    }

    pub fn copy(&mut self) -> usize {
        let scope = self.scope();
        self.clipboard.copy(&self.selection, &self.grid, scope)
    }

    pub fn paste(&mut self, now: Instant) -> usize {
        let scope = self.scope();
        let before = self.grid.state().clone();
        let written = self.clipboard.paste(&self.selection, &mut self.grid, scope);
        if written > 0 {
            self.commit(before, now);
        }
        written
    }

    pub fn delete_selected(&mut self, now: Instant) -> usize {
        let scope = self.scope();
        let before = self.grid.state().clone();
        let cleared = self.selection.delete_selected(&mut self.grid, scope);
        if cleared > 0 {
            self.commit(before, now);
        }
        cleared
    }

    pub fn assign_selected(&mut self, sample_slot: usize, now: Instant) -> Result<usize> {
        self.bank.check(sample_slot)?;
        let scope = self.scope();
        let before = self.grid.state().clone();
        let written = self
            .selection
            .assign_sample(&mut self.grid, scope, sample_slot)?;
        if written > 0 {
            self.commit(before, now);
        }
        Ok(written)
    }

    pub fn set_selected_volume(&mut self, volume: Override, now: Instant) -> usize {
        let scope = self.scope();
        let before = self.grid.state().clone();
        let changed = self.selection.set_volume(&mut self.grid, scope, volume);
        if changed > 0 {
            self.commit(before, now);
        }
        changed
    }

    pub fn set_selected_pitch(&mut self, pitch: Override, now: Instant) -> usize {
        let scope = self.scope();
        let before = self.grid.state().clone();
        let changed = self.selection.set_pitch(&mut self.grid, scope, pitch);
        if changed > 0 {
            self.commit(before, now);
        }
        changed
    }

    /// Load a file into a slot. On failure the slot keeps what it had.
    pub fn load_sample(&mut self, slot: usize, path: &Path, now: Instant) -> Result<()> {
        self.bank.check(slot)?;
        let source = SampleSource::classify(path, &self.assets_root);
        self.grid
            .bridge_mut()
            .load_sample(slot, &source.resolve(&self.assets_root))?;

        self.bank.assign(slot, source, None, None)?;
        self.bank.set_loaded(slot, true)?;
        self.grid.bridge_mut().set_slot_defaults(
            slot,
            self.bank.default_volume(slot),
            self.bank.default_pitch(slot),
        );
        self.autosave.mark_dirty(now);
        log::info!("loaded {} into slot {slot}", path.display());
        Ok(())
    }

    /// Cells that refer to the slot keep their reference.
    pub fn clear_sample(&mut self, slot: usize, now: Instant) -> Result<()> {
        self.bank.check(slot)?;
        self.grid.bridge_mut().unload_sample(slot);
        self.bank.clear(slot)?;
        self.autosave.mark_dirty(now);
        Ok(())
    }

    pub fn set_sample_volume(&mut self, slot: usize, volume: f32, now: Instant) -> Result<f32> {
        let volume = self.bank.set_default_volume(slot, volume)?;
        self.push_slot_defaults(slot, now);
        Ok(volume)
    }

    pub fn set_sample_pitch(&mut self, slot: usize, pitch: f32, now: Instant) -> Result<f32> {
        let pitch = self.bank.set_default_pitch(slot, pitch)?;
        self.push_slot_defaults(slot, now);
        Ok(pitch)
    }

    pub fn shift_sample_pitch(&mut self, slot: usize, semitones: i32, now: Instant) -> Result<f32> {
        let pitch = self.bank.shift_pitch(slot, semitones)?;
        self.push_slot_defaults(slot, now);
        Ok(pitch)
    }

    fn push_slot_defaults(&mut self, slot: usize, now: Instant) {
        let volume = self.bank.default_volume(slot);
        let pitch = self.bank.default_pitch(slot);
        self.grid.bridge_mut().set_slot_defaults(slot, volume, pitch);
        self.autosave.mark_dirty(now);
    }

    pub fn play_slot(&mut self, slot: usize) -> Result<()> {
        self.bank.check(slot)?;
        self.grid.bridge_mut().play_slot(slot)?;
        self.bank.set_playing(slot, true)
    }

    pub fn stop_slot(&mut self, slot: usize) -> Result<()> {
        self.bank.check(slot)?;
        self.grid.bridge_mut().stop_slot(slot);
        self.bank.set_playing(slot, false)
    }

    pub fn stop_all_sounds(&mut self) {
        self.grid.bridge_mut().stop_all_sounds();
        self.bank.stop_all();
    }

    /// Returns `false` when already playing.
    pub fn play(&mut self, now: Instant) -> Result<bool> {
        self.playback.start(&mut self.grid, now)
    }

    pub fn stop(&mut self) {
        self.playback.stop(&mut self.grid);
    }

    pub fn set_tempo(&mut self, bpm: u32, now: Instant) -> u32 {
        let bpm = self.playback.set_tempo(&mut self.grid, bpm);
        self.autosave.mark_dirty(now);
        bpm
    }

    pub fn master_volume(&self) -> f32 {
        self.playback.master_volume()
    }

    /// Returns the clamped volume.
    pub fn set_master_volume(&mut self, volume: f32, now: Instant) -> f32 {
        let volume = self.playback.set_master_volume(&mut self.grid, volume);
        self.autosave.mark_dirty(now);
        volume
    }

    pub fn play_mode(&self) -> PlayMode {
        self.playback.mode()
    }

    pub fn set_play_mode(&mut self, mode: PlayMode) -> Result<()> {
        self.playback.set_mode(&mut self.grid, mode)
    }

    pub fn start_recording(&mut self, path: &Path) -> Result<()> {
        self.grid.bridge_mut().start_recording(path)?;
        self.recording = Some(path.to_path_buf());
        log::info!("recording output to {}", path.display());
        Ok(())
    }

    /// Returns the finished file, if a recording was running.
    pub fn stop_recording(&mut self) -> Result<Option<PathBuf>> {
        if self.recording.is_none() {
            return Ok(None);
        }
        self.grid.bridge_mut().stop_recording()?;
        Ok(self.recording.take())
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn export_snapshot(&self, metadata: SnapshotMetadata) -> Snapshot {
        let metadata = SnapshotMetadata {
            bpm: self.playback.bpm(),
            ..metadata
        };
        export_snapshot(&self.grid, &self.bank, metadata)
    }

    /// Replace the grid with a snapshot's scenes. Undoable, though newly
    /// assigned slots stay assigned.
    pub fn import_snapshot(&mut self, snapshot: &Snapshot, now: Instant) -> Result<ImportReport> {
        let plan = import_snapshot(snapshot, &self.bank)?;
        let state = plan.state.clone();
        self.restructure(now, |grid| grid.restore(state))?;
        let loaded = apply_assignments(
            &plan,
            &mut self.bank,
            self.grid.bridge_mut(),
            &self.assets_root,
        );
        self.set_tempo(plan.bpm, now);
        Ok(ImportReport {
            loaded,
            unplaced: plan.unplaced,
        })
    }

    pub fn autosave_record(&self) -> AutosaveRecord {
        capture_record(
            &self.grid,
            &self.bank,
            self.playback.bpm(),
            self.playback.master_volume(),
            timestamp_ms(),
        )
    }

    /// Load the stored record, if any. Returns whether one was applied.
    pub fn restore(&mut self) -> Result<bool> {
        let Some(record) = self.store.load()? else {
            return Ok(false);
        };
        let state = grid_state_from_record(&record)?;
        if self.playback.is_playing() {
            self.playback.stop(&mut self.grid);
        }

        let loaded = restore_bank(
            &record,
            &mut self.bank,
            self.grid.bridge_mut(),
            &self.assets_root,
        );
        self.grid.restore(state)?;
        self.playback.set_tempo(&mut self.grid, record.bpm);
        self.playback
            .set_master_volume(&mut self.grid, record.master_volume);
        self.history.clear();
        self.selection.clear();
        log::info!(
            "restored autosave: {} layers, {} steps, {loaded} samples loaded",
            self.grid.layer_count(),
            self.grid.total_steps()
        );
        Ok(true)
    }

    pub fn save_now(&mut self, now: Instant) -> Result<()> {
        let record = self.autosave_record();
        self.store.save(&record)?;
        self.autosave.saved(now);
        log::debug!("autosaved");
        Ok(())
    }

    /// Save pending changes immediately, e.g. on shutdown.
    pub fn flush(&mut self, now: Instant) -> Result<()> {
        if self.autosave.is_dirty() {
            self.save_now(now)?;
        }
        Ok(())
    }

    /// Advance every timer to `now`.
    pub fn tick(&mut self, now: Instant) -> TickReport {
        let step = self.playback.poll(&mut self.grid, now);
        let selection_changed = self.selection.tick(now);

        let autosave = self.autosave.poll(now).then(|| {
            let result = self.save_now(now);
            if let Err(err) = &result {
                log::error!("autosave failed: {err}");
            }
            result
        });

        TickReport {
            step,
            selection_changed,
            autosave,
        }
    }
}
