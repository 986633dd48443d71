use std::ops::Range;
use std::time::{Duration, Instant};

use seq_engine::NativeEngine;
use seq_transport::{DEFAULT_BPM, SectionSpan, clamp_bpm, clamp_master_volume};

use crate::error::Result;
use crate::grid::GridStore;
use crate::timer::Interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayMode {
    /// The whole timeline, every section in order.
    #[default]
    Song,
    /// Loop the active section.
    LoopSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackState {
    pub bpm: u32,
    /// -1 while stopped.
    pub current_step: i32,
    pub is_playing: bool,
    /// Song-mode section and the pass through it, when the engine reports one.
    pub current_section: Option<(usize, u32)>,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            bpm: DEFAULT_BPM,
            current_step: -1,
            is_playing: false,
            current_section: None,
        }
    }
}

/// Stopped/playing state machine. The engine owns the step clock; this side
/// polls it at UI rate and publishes changes.
pub struct PlaybackController {
    state: PlaybackState,
    mode: PlayMode,
    poll: Interval,
    /// Slot each engine column last triggered, for highlighting.
    column_playing: Vec<Option<usize>>,
    /// Region and section table the engine was last given.
    region: Option<Range<usize>>,
    spans: Vec<SectionSpan>,
    master_volume: f32,
    /// A stop happened that the poll has not published yet.
    pending_reset: bool,
}

impl PlaybackController {
    pub fn new(bpm: u32, poll_period: Duration) -> Self {
        Self {
            state: PlaybackState {
                bpm: clamp_bpm(bpm),
                ..PlaybackState::default()
            },
            mode: PlayMode::Song,
            poll: Interval::new(poll_period),
            column_playing: Vec::new(),
            region: None,
            spans: Vec::new(),
            master_volume: 1.0,
            pending_reset: false,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn bpm(&self) -> u32 {
        self.state.bpm
    }

    pub fn current_step(&self) -> i32 {
        self.state.current_step
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing
    }

    pub fn mode(&self) -> PlayMode {
        self.mode
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    pub fn column_playing(&self) -> &[Option<usize>] {
        &self.column_playing
    }

    pub fn next_poll(&self) -> Option<Instant> {
        self.poll.deadline()
    }

    pub fn pattern_range<E: NativeEngine>(&self, grid: &GridStore<E>) -> Range<usize> {
        match self.mode {
            PlayMode::Song => 0..grid.total_steps(),
            PlayMode::LoopSection => grid
                .section_range(grid.active_section())
                .unwrap_or(0..grid.total_steps()),
        }
    }

    /// Returns `false` without touching the engine when already playing.
    pub fn start<E: NativeEngine>(&mut self, grid: &mut GridStore<E>, now: Instant) -> Result<bool> {
        if self.state.is_playing {
            return Ok(false);
        }

        grid.full_resync();
        let range = self.pattern_range(grid);
        let spans = grid.section_spans();
        let bridge = grid.bridge_mut();
        bridge.set_song_mode(self.mode == PlayMode::Song);
        bridge.configure_sections(&spans);
        bridge.start_sequencer(self.state.bpm, range.clone())?;

        self.state.is_playing = true;
        self.state.current_step = -1;
        self.state.current_section = None;
        self.region = Some(range.clone());
        self.spans = spans;
        self.pending_reset = false;
        self.column_playing = vec![None; grid.total_columns()];
        self.poll.start(now);
        log::info!("playback started at {} bpm over steps {range:?}", self.state.bpm);
        Ok(true)
    }

    pub fn stop<E: NativeEngine>(&mut self, grid: &mut GridStore<E>) {
        self.poll.cancel();
        grid.bridge_mut().stop_sequencer();
        if self.state.is_playing {
            log::info!("playback stopped");
            self.pending_reset = true;
        }
        self.state.is_playing = false;
        self.state.current_step = -1;
        self.state.current_section = None;
        self.region = None;
        self.column_playing.clear();
    }

    /// Returns the clamped tempo.
    pub fn set_tempo<E: NativeEngine>(&mut self, grid: &mut GridStore<E>, bpm: u32) -> u32 {
        let bpm = clamp_bpm(bpm);
        if self.state.is_playing {
            grid.bridge_mut().set_tempo(bpm);
        }
        self.state.bpm = bpm;
        bpm
    }

    /// Returns the clamped volume. Forwarded whether or not playing.
    pub fn set_master_volume<E: NativeEngine>(&mut self, grid: &mut GridStore<E>, volume: f32) -> f32 {
        let volume = clamp_master_volume(volume);
        grid.bridge_mut().set_master_volume(volume);
        self.master_volume = volume;
        volume
    }

    /// While playing, re-point the engine at the current region, e.g. after
    /// the mode or active section changed.
    pub fn set_mode<E: NativeEngine>(&mut self, grid: &mut GridStore<E>, mode: PlayMode) -> Result<()> {
        self.mode = mode;
        if self.state.is_playing {
            grid.bridge_mut().set_song_mode(mode == PlayMode::Song);
        }
        self.refresh_region(grid)
    }

    /// Send the engine whatever changed in the region or section table. The
    /// playhead keeps running; the engine only moves it when it falls outside
    /// the new region.
    pub fn refresh_region<E: NativeEngine>(&mut self, grid: &mut GridStore<E>) -> Result<()> {
        if !self.state.is_playing {
            return Ok(());
        }
        let spans = grid.section_spans();
        if spans != self.spans {
            grid.bridge_mut().configure_sections(&spans);
            self.spans = spans;
        }
        let range = self.pattern_range(grid);
        if self.region.as_ref() != Some(&range) {
            grid.bridge_mut().set_region(range.clone())?;
            log::debug!("playback region moved to {range:?}");
            self.region = Some(range);
        }
        self.column_playing.resize(grid.total_columns(), None);
        Ok(())
    }

    /// Read the engine step when the UI poll is due. Returns the step only
    /// when it differs from the last one published. The first poll after a
    /// stop returns -1 once.
    pub fn poll<E: NativeEngine>(&mut self, grid: &mut GridStore<E>, now: Instant) -> Option<i32> {
        if std::mem::take(&mut self.pending_reset) {
            return Some(-1);
        }
        if !self.poll.poll(now) {
            return None;
        }
        let step = grid.bridge_mut().read_current_step();
        if step == self.state.current_step {
            return None;
        }
        self.state.current_step = step;
        self.state.current_section = grid.bridge().read_current_section();

        if let Ok(step) = usize::try_from(step) {
            self.column_playing.resize(grid.total_columns(), None);
            for (column, playing) in self.column_playing.iter_mut().enumerate() {
                if let Ok(cell) = grid.get_cell(step, column)
                    && let Some(slot) = cell.sample_slot
                {
                    *playing = Some(slot);
                }
            }
        }
        Some(step)
    }
}
