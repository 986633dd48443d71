use std::ops::Range;
use std::path::{Path, PathBuf};

use seq_engine::{EngineError, NativeEngine};
use seq_transport::SectionSpan;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Initialize,
    Load { slot: usize, path: PathBuf },
    Unload(usize),
    SlotDefaults { slot: usize, volume: f32, pitch: f32 },
    PlaySlot(usize),
    StopSlot(usize),
    StopAll,
    ConfigureColumns(usize),
    SetGridCell { step: usize, column: usize, slot: usize },
    SetCellSettings {
        step: usize,
        column: usize,
        volume: Option<f32>,
        pitch: Option<f32>,
    },
    ClearGridCell { step: usize, column: usize },
    ClearAll,
    Start { bpm: u32, steps: Range<usize> },
    SetRegion(Range<usize>),
    Stop,
    SetBpm(u32),
    SongMode(bool),
    Sections(Vec<SectionSpan>),
    MasterVolume(f32),
    StartRecording(PathBuf),
    StopRecording,
}

/// Engine double that records every call and never touches audio.
#[derive(Debug)]
pub struct RecordingEngine {
    calls: Vec<Call>,
    initialized: bool,
    playing: bool,
    step: i32,
    section: Option<(usize, u32)>,
    missing_files: bool,
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            initialized: true,
            playing: false,
            step: -1,
            section: None,
            missing_files: false,
        }
    }
}

impl RecordingEngine {
    pub fn uninitialized() -> Self {
        Self {
            initialized: false,
            ..Self::default()
        }
    }

    /// Every load fails as if the file were gone.
    pub fn with_missing_files() -> Self {
        Self {
            missing_files: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }

    pub fn set_step(&mut self, step: i32) {
        self.step = step;
    }

    pub fn set_section(&mut self, section: Option<(usize, u32)>) {
        self.section = section;
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|call| matches(call)).count()
    }
}

impl NativeEngine for RecordingEngine {
    fn initialize(&mut self) -> Result<(), EngineError> {
        self.calls.push(Call::Initialize);
        self.initialized = true;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn load_sound_to_slot(
        &mut self,
        slot: usize,
        path: &Path,
        _load_to_memory: bool,
    ) -> Result<(), EngineError> {
        self.calls.push(Call::Load {
            slot,
            path: path.to_path_buf(),
        });
        if self.missing_files {
            return Err(EngineError::Io(std::io::Error::from(
                std::io::ErrorKind::NotFound,
            )));
        }
        Ok(())
    }

    fn unload_slot(&mut self, slot: usize) {
        self.calls.push(Call::Unload(slot));
    }

    fn set_slot_defaults(&mut self, slot: usize, volume: f32, pitch: f32) {
        self.calls.push(Call::SlotDefaults {
            slot,
            volume,
            pitch,
        });
    }

    fn play_slot(&mut self, slot: usize) -> Result<(), EngineError> {
        self.calls.push(Call::PlaySlot(slot));
        Ok(())
    }

    fn stop_slot(&mut self, slot: usize) {
        self.calls.push(Call::StopSlot(slot));
    }

    fn stop_all_sounds(&mut self) {
        self.calls.push(Call::StopAll);
    }

    fn configure_columns(&mut self, columns: usize) {
        self.calls.push(Call::ConfigureColumns(columns));
    }

    fn set_grid_cell(&mut self, step: usize, column: usize, slot: usize) {
        self.calls.push(Call::SetGridCell { step, column, slot });
    }

    fn set_cell_settings(
        &mut self,
        step: usize,
        column: usize,
        volume: Option<f32>,
        pitch: Option<f32>,
    ) {
        self.calls.push(Call::SetCellSettings {
            step,
            column,
            volume,
            pitch,
        });
    }

    fn clear_grid_cell(&mut self, step: usize, column: usize) {
        self.calls.push(Call::ClearGridCell { step, column });
    }

    fn clear_all_grid_cells(&mut self) {
        self.calls.push(Call::ClearAll);
    }

    fn start_sequencer_range(
        &mut self,
        bpm: u32,
        steps: Range<usize>,
    ) -> Result<(), EngineError> {
        if !self.initialized {
            return Err(EngineError::NotInitialized);
        }
        self.calls.push(Call::Start { bpm, steps });
        self.playing = true;
        Ok(())
    }

    fn set_sequencer_region(&mut self, steps: Range<usize>) -> Result<(), EngineError> {
        if !self.initialized {
            return Err(EngineError::NotInitialized);
        }
        self.calls.push(Call::SetRegion(steps));
        Ok(())
    }

    fn stop_sequencer(&mut self) {
        self.calls.push(Call::Stop);
        self.playing = false;
        self.step = -1;
        self.section = None;
    }

    fn set_sequencer_bpm(&mut self, bpm: u32) {
        self.calls.push(Call::SetBpm(bpm));
    }

    fn set_song_mode(&mut self, song: bool) {
        self.calls.push(Call::SongMode(song));
    }

    fn configure_sections(&mut self, sections: &[SectionSpan]) {
        self.calls.push(Call::Sections(sections.to_vec()));
    }

    fn set_master_volume(&mut self, volume: f32) {
        self.calls.push(Call::MasterVolume(volume));
    }

    fn current_step(&self) -> i32 {
        self.step
    }

    fn current_section(&self) -> Option<(usize, u32)> {
        self.section
    }

    fn is_sequencer_playing(&self) -> bool {
        self.playing
    }

    fn start_output_recording(&mut self, path: &Path) -> Result<(), EngineError> {
        self.calls.push(Call::StartRecording(path.to_path_buf()));
        Ok(())
    }

    fn stop_output_recording(&mut self) -> Result<(), EngineError> {
        self.calls.push(Call::StopRecording);
        Ok(())
    }
}
