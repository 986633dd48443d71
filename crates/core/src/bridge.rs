use std::ops::Range;
use std::path::Path;

use seq_engine::NativeEngine;
use seq_transport::SectionSpan;

use crate::address::AbsoluteAddress;
use crate::cell::Cell;
use crate::error::Result;

/// The single gateway to the engine. Every grid mutation is mirrored through
/// here; the engine is treated as a write-mostly replica.
pub struct NativeSyncBridge<E: NativeEngine> {
    engine: E,
}

impl<E: NativeEngine> NativeSyncBridge<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Host-specific access, e.g. rendering an offline engine.
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn into_inner(self) -> E {
        self.engine
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.engine.initialize()?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.is_initialized()
    }

    pub fn configure_columns(&mut self, total: usize) {
        self.engine.configure_columns(total);
    }

    /// Overrides follow the slot; they are only sent when explicit.
    pub fn set_grid_cell(&mut self, at: AbsoluteAddress, slot: usize, cell: &Cell) {
        self.engine.set_grid_cell(at.step, at.column, slot);
        if cell.volume.is_explicit() || cell.pitch.is_explicit() {
            self.engine
                .set_cell_settings(at.step, at.column, cell.volume.value(), cell.pitch.value());
        }
    }

    pub fn clear_grid_cell(&mut self, at: AbsoluteAddress) {
        self.engine.clear_grid_cell(at.step, at.column);
    }

    pub fn clear_all_grid_cells(&mut self) {
        self.engine.clear_all_grid_cells();
    }

    /// Mirror whatever `cell` now holds.
    pub fn mirror_cell(&mut self, at: AbsoluteAddress, cell: &Cell) {
        match cell.sample_slot {
            Some(slot) => self.set_grid_cell(at, slot, cell),
            None => self.clear_grid_cell(at),
        }
    }

    /// Clear the engine table, reconfigure its columns and re-emit every
    /// non-empty cell. `cells` must come in absolute-address order. Returns
    /// the number of cells emitted.
    pub fn full_resync<I>(&mut self, total_columns: usize, cells: I) -> usize
    where
        I: IntoIterator<Item = (AbsoluteAddress, Cell)>,
    {
        self.engine.clear_all_grid_cells();
        self.engine.configure_columns(total_columns);

        let mut emitted = 0;
        for (at, cell) in cells {
            if let Some(slot) = cell.sample_slot {
                self.set_grid_cell(at, slot, &cell);
                emitted += 1;
            }
        }
        log::debug!("full resync: {emitted} cells across {total_columns} columns");
        emitted
    }

    /// Plays the whole pattern when `steps` starts at 0, otherwise loops the region.
    pub fn start_sequencer(&mut self, bpm: u32, steps: Range<usize>) -> Result<()> {
        if steps.start == 0 {
            self.engine.start_sequencer(bpm, steps.end)?;
        } else {
            self.engine.start_sequencer_range(bpm, steps)?;
        }
        Ok(())
    }

    /// Re-point a running sequencer without moving its playhead.
    pub fn set_region(&mut self, steps: Range<usize>) -> Result<()> {
        self.engine.set_sequencer_region(steps)?;
        Ok(())
    }

    pub fn stop_sequencer(&mut self) {
        self.engine.stop_sequencer();
    }

    pub fn set_song_mode(&mut self, song: bool) {
        self.engine.set_song_mode(song);
    }

    pub fn configure_sections(&mut self, sections: &[SectionSpan]) {
        self.engine.configure_sections(sections);
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.engine.set_master_volume(volume);
    }

    pub fn read_current_section(&self) -> Option<(usize, u32)> {
        self.engine.current_section()
    }

    pub fn set_tempo(&mut self, bpm: u32) {
        self.engine.set_sequencer_bpm(bpm);
    }

    pub fn read_current_step(&mut self) -> i32 {
        self.engine.maintain();
        self.engine.current_step()
    }

    pub fn is_engine_playing(&self) -> bool {
        self.engine.is_sequencer_playing()
    }

    pub fn load_sample(&mut self, slot: usize, path: &Path) -> Result<()> {
        self.engine.load_sound_to_slot(slot, path, true)?;
        Ok(())
    }

    pub fn unload_sample(&mut self, slot: usize) {
        self.engine.unload_slot(slot);
    }

    pub fn set_slot_defaults(&mut self, slot: usize, volume: f32, pitch: f32) {
        self.engine.set_slot_defaults(slot, volume, pitch);
    }

    pub fn play_slot(&mut self, slot: usize) -> Result<()> {
        self.engine.play_slot(slot)?;
        Ok(())
    }

    pub fn stop_slot(&mut self, slot: usize) {
        self.engine.stop_slot(slot);
    }

    pub fn stop_all_sounds(&mut self) {
        self.engine.stop_all_sounds();
    }

    pub fn start_recording(&mut self, path: &Path) -> Result<()> {
        self.engine.start_output_recording(path)?;
        Ok(())
    }

    pub fn stop_recording(&mut self) -> Result<()> {
        self.engine.stop_output_recording()?;
        Ok(())
    }
}
