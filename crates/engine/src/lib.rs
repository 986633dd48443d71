//! Sample playback engine: a step table, sample slots and one voice per column,
//! driven either by a cpal output stream or rendered offline.

use std::collections::VecDeque;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use basedrop::{Collector, Shared};
use seq_transport::{
    Command, MAX_SAMPLE_SLOTS, MAX_SECTIONS, MAX_STEPS, SampleBuffer, SectionSpan, clamp_bpm,
    clamp_master_volume, clamp_pitch,
};

mod offline;
mod recorder;
mod sequencer;
mod stream;
mod voice;

pub use offline::{OfflineBackend, OfflineConfig};
pub use sequencer::{EngineState, Sequencer};
pub use stream::{CpalBackend, CpalConfig};

use recorder::Recorder;

pub type CpalEngine = Engine<CpalBackend>;
pub type OfflineEngine = Engine<OfflineBackend>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine is not initialized")]
    NotInitialized,
    #[error("sample slot {0} is out of range")]
    SlotOutOfRange(usize),
    #[error("sample slot {0} has no sample loaded")]
    SlotNotLoaded(usize),
    #[error("failed to load {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid pattern range {start}..{end}")]
    InvalidPattern { start: usize, end: usize },
    #[error("output recording is already active")]
    RecordingActive,
    #[error("output recording is not active")]
    NotRecording,
    #[error("audio backend error: {0}")]
    Backend(#[from] anyhow::Error),
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The command surface the sequencer core drives.
///
/// Fallible operations return `Result`; fire-and-forget edits are dropped when
/// the engine is not initialized.
pub trait NativeEngine {
    fn initialize(&mut self) -> Result<(), EngineError>;
    fn is_initialized(&self) -> bool;

    /// `load_to_memory` asks for the whole file to be decoded up front.
    fn load_sound_to_slot(
        &mut self,
        slot: usize,
        path: &Path,
        load_to_memory: bool,
    ) -> Result<(), EngineError>;
    fn unload_slot(&mut self, slot: usize);
    fn set_slot_defaults(&mut self, slot: usize, volume: f32, pitch: f32);
    fn play_slot(&mut self, slot: usize) -> Result<(), EngineError>;
    fn stop_slot(&mut self, slot: usize);
    fn stop_all_sounds(&mut self);

    fn configure_columns(&mut self, columns: usize);
    fn set_grid_cell(&mut self, step: usize, column: usize, slot: usize);
    /// `None` means "follow the slot default".
    fn set_cell_settings(
        &mut self,
        step: usize,
        column: usize,
        volume: Option<f32>,
        pitch: Option<f32>,
    );
    fn clear_grid_cell(&mut self, step: usize, column: usize);
    fn clear_all_grid_cells(&mut self);

    /// Play steps in `steps`, looping back to its start.
    fn start_sequencer_range(&mut self, bpm: u32, steps: Range<usize>)
    -> Result<(), EngineError>;

    fn start_sequencer(&mut self, bpm: u32, pattern_length: usize) -> Result<(), EngineError> {
        self.start_sequencer_range(bpm, 0..pattern_length)
    }

    /// Move the loop region without restarting. The playhead keeps its
    /// position unless it falls outside `steps`.
    fn set_sequencer_region(&mut self, steps: Range<usize>) -> Result<(), EngineError>;

    fn stop_sequencer(&mut self);
    fn set_sequencer_bpm(&mut self, bpm: u32);
    /// Song mode walks `configure_sections` with their repeat counts; loop
    /// mode cycles the region.
    fn set_song_mode(&mut self, song: bool);
    fn configure_sections(&mut self, sections: &[SectionSpan]);
    /// 0.0 ..= 1.0, applied to the whole mix.
    fn set_master_volume(&mut self, volume: f32);
    /// `-1` while stopped.
    fn current_step(&self) -> i32;
    /// Section of the current step and its pass number.
    fn current_section(&self) -> Option<(usize, u32)>;
    fn is_sequencer_playing(&self) -> bool;

    /// Flush deferred commands and reclaim released sample memory.
    fn maintain(&mut self) {}

    fn start_output_recording(&mut self, path: &Path) -> Result<(), EngineError>;
    fn stop_output_recording(&mut self) -> Result<(), EngineError>;
}

/// Where commands go once the control side has validated them.
pub trait Backend: Sized {
    type Config;

    fn open(config: &Self::Config, state: Arc<EngineState>) -> Result<Self, EngineError>;
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
    /// Hands the command back when the audio side cannot take it yet.
    fn send(&mut self, command: Command) -> Result<(), Command>;
    fn send_slot(&mut self, slot: usize, buffer: Option<Shared<SampleBuffer>>);
    fn attach_tap(&mut self, tap: rtrb::Producer<f32>);
}

#[derive(Debug, Clone, Copy, Default)]
struct SlotInfo {
    loaded: bool,
    bytes: usize,
}

/// Control-side engine: validation, sample loading, recording and a backlog
/// for commands the audio ring could not accept.
pub struct Engine<B: Backend> {
    config: B::Config,
    backend: Option<B>,
    state: Arc<EngineState>,
    collector: Collector,
    slots: Vec<SlotInfo>,
    backlog: VecDeque<Command>,
    assets_root: PathBuf,
    recorder: Option<Recorder>,
}

impl<B: Backend> Engine<B> {
    pub fn new(config: B::Config, assets_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            backend: None,
            state: Arc::new(EngineState::default()),
            collector: Collector::new(),
            slots: vec![SlotInfo::default(); MAX_SAMPLE_SLOTS],
            backlog: VecDeque::new(),
            assets_root: assets_root.into(),
            recorder: None,
        }
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.backend.as_ref().map(Backend::sample_rate)
    }

    pub fn is_slot_loaded(&self, slot: usize) -> bool {
        self.slots.get(slot).is_some_and(|info| info.loaded)
    }

    /// Bytes of decoded audio currently held by loaded slots.
    pub fn memory_usage(&self) -> usize {
        self.slots.iter().map(|info| info.bytes).sum()
    }

    /// Install already-decoded audio in a slot, resampled to the output rate.
    pub fn load_buffer(&mut self, slot: usize, buffer: SampleBuffer) -> Result<(), EngineError> {
        check_slot(slot)?;
        let backend = self.backend.as_mut().ok_or(EngineError::NotInitialized)?;
        let buffer = buffer.resample(backend.sample_rate())?;
        let bytes = buffer.byte_len();

        backend.send_slot(slot, Some(Shared::new(&self.collector.handle(), buffer)));
        self.slots[slot] = SlotInfo {
            loaded: true,
            bytes,
        };
        self.collector.collect();
        Ok(())
    }

    fn send(&mut self, command: Command) {
        let Some(backend) = self.backend.as_mut() else {
            log::debug!("engine not initialized, dropping {command:?}");
            return;
        };

        flush_backlog(backend, &mut self.backlog);
        if !self.backlog.is_empty() {
            self.backlog.push_back(command);
            return;
        }
        if let Err(command) = backend.send(command) {
            log::debug!("command ring full, deferring");
            self.backlog.push_back(command);
        }
    }
}

/// Commands keep their order: nothing new is sent while older ones wait.
fn flush_backlog<B: Backend>(backend: &mut B, backlog: &mut VecDeque<Command>) {
    while let Some(pending) = backlog.pop_front() {
        if let Err(pending) = backend.send(pending) {
            backlog.push_front(pending);
            break;
        }
    }
}

fn check_slot(slot: usize) -> Result<(), EngineError> {
    if slot < MAX_SAMPLE_SLOTS {
        Ok(())
    } else {
        Err(EngineError::SlotOutOfRange(slot))
    }
}

impl<B: Backend> NativeEngine for Engine<B> {
    fn initialize(&mut self) -> Result<(), EngineError> {
        if self.backend.is_some() {
            return Ok(());
        }
        let backend = B::open(&self.config, Arc::clone(&self.state))?;
        log::info!(
            "engine initialized: {} Hz, {} channels",
            backend.sample_rate(),
            backend.channels()
        );
        self.backend = Some(backend);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.backend.is_some()
    }

    fn load_sound_to_slot(
        &mut self,
        slot: usize,
        path: &Path,
        load_to_memory: bool,
    ) -> Result<(), EngineError> {
        check_slot(slot)?;
        if self.backend.is_none() {
            return Err(EngineError::NotInitialized);
        }
        if !load_to_memory {
            log::debug!("streaming not supported, decoding {} fully", path.display());
        }

        let buffer = seq_decode::decode_file(path, &self.assets_root).map_err(|source| {
            EngineError::Load {
                path: path.to_path_buf(),
                source,
            }
        })?;
        self.load_buffer(slot, buffer)?;
        log::info!("loaded {} into slot {slot}", path.display());
        Ok(())
    }

    fn unload_slot(&mut self, slot: usize) {
        if slot >= MAX_SAMPLE_SLOTS {
            return;
        }
        if let Some(backend) = self.backend.as_mut() {
            backend.send_slot(slot, None);
        }
        self.slots[slot] = SlotInfo::default();
        self.collector.collect();
    }

    fn set_slot_defaults(&mut self, slot: usize, volume: f32, pitch: f32) {
        if slot >= MAX_SAMPLE_SLOTS {
            return;
        }
        self.send(Command::SetSlotDefaults {
            slot,
            volume: volume.max(0.0),
            pitch: clamp_pitch(pitch),
        });
    }

    fn play_slot(&mut self, slot: usize) -> Result<(), EngineError> {
        check_slot(slot)?;
        if self.backend.is_none() {
            return Err(EngineError::NotInitialized);
        }
        if !self.is_slot_loaded(slot) {
            return Err(EngineError::SlotNotLoaded(slot));
        }
        self.send(Command::PlaySlot(slot));
        Ok(())
    }

    fn stop_slot(&mut self, slot: usize) {
        self.send(Command::StopSlot(slot));
    }

    fn stop_all_sounds(&mut self) {
        self.send(Command::StopAll);
    }

    fn configure_columns(&mut self, columns: usize) {
        self.send(Command::ConfigureColumns(columns));
    }

    fn set_grid_cell(&mut self, step: usize, column: usize, slot: usize) {
        self.send(Command::SetCell { step, column, slot });
    }

    fn set_cell_settings(
        &mut self,
        step: usize,
        column: usize,
        volume: Option<f32>,
        pitch: Option<f32>,
    ) {
        self.send(Command::SetCellSettings {
            step,
            column,
            volume,
            pitch,
        });
    }

    fn clear_grid_cell(&mut self, step: usize, column: usize) {
        self.send(Command::ClearCell { step, column });
    }

    fn clear_all_grid_cells(&mut self) {
        self.send(Command::ClearAll);
    }

    fn start_sequencer_range(
        &mut self,
        bpm: u32,
        steps: Range<usize>,
    ) -> Result<(), EngineError> {
        if self.backend.is_none() {
            return Err(EngineError::NotInitialized);
        }
        if steps.is_empty() || steps.end > MAX_STEPS {
            return Err(EngineError::InvalidPattern {
                start: steps.start,
                end: steps.end,
            });
        }
        self.send(Command::Start {
            bpm: clamp_bpm(bpm),
            steps,
        });
        self.state.set_playing(true);
        Ok(())
    }

    fn set_sequencer_region(&mut self, steps: Range<usize>) -> Result<(), EngineError> {
        if self.backend.is_none() {
            return Err(EngineError::NotInitialized);
        }
        if steps.is_empty() || steps.end > MAX_STEPS {
            return Err(EngineError::InvalidPattern {
                start: steps.start,
                end: steps.end,
            });
        }
        self.send(Command::SetRegion(steps));
        Ok(())
    }

    fn stop_sequencer(&mut self) {
        self.send(Command::Stop);
        self.state.set_playing(false);
        self.state.set_step(-1);
    }

    fn set_sequencer_bpm(&mut self, bpm: u32) {
        self.send(Command::SetBpm(clamp_bpm(bpm)));
    }

    fn set_song_mode(&mut self, song: bool) {
        self.send(Command::SetSongMode(song));
    }

    fn configure_sections(&mut self, sections: &[SectionSpan]) {
        let sections = &sections[..sections.len().min(MAX_SECTIONS)];
        for (section, span) in sections.iter().enumerate() {
            self.send(Command::SetSection {
                section,
                span: span.clone(),
            });
        }
        self.send(Command::SetSectionCount(sections.len()));
    }

    fn set_master_volume(&mut self, volume: f32) {
        self.send(Command::SetMasterVolume(clamp_master_volume(volume)));
    }

    fn current_step(&self) -> i32 {
        self.state.current_step()
    }

    fn current_section(&self) -> Option<(usize, u32)> {
        self.state.current_section()
    }

    fn is_sequencer_playing(&self) -> bool {
        self.state.is_playing()
    }

    fn maintain(&mut self) {
        if let Some(backend) = self.backend.as_mut() {
            flush_backlog(backend, &mut self.backlog);
        }
        self.collector.collect();
    }

    fn start_output_recording(&mut self, path: &Path) -> Result<(), EngineError> {
        if self.recorder.is_some() {
            return Err(EngineError::RecordingActive);
        }
        let backend = self.backend.as_mut().ok_or(EngineError::NotInitialized)?;
        let (recorder, tap) = Recorder::start(path, backend.sample_rate(), backend.channels())?;
        backend.attach_tap(tap);
        self.recorder = Some(recorder);
        Ok(())
    }

    fn stop_output_recording(&mut self) -> Result<(), EngineError> {
        let recorder = self.recorder.take().ok_or(EngineError::NotRecording)?;
        self.send(Command::StopRecording);
        recorder.finish()?;
        Ok(())
    }
}
