use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use basedrop::Shared;
use seq_transport::{
    Command, MAX_COLUMNS, MAX_SAMPLE_SLOTS, MAX_SECTIONS, MAX_STEPS, SectionSpan, clamp_bpm,
    clamp_master_volume, clamp_pitch, frames_per_step,
};

use crate::voice::Voice;

const PREVIEW_VOICES: usize = 8;

/// Playhead published by the audio thread, readable from anywhere.
#[derive(Debug)]
pub struct EngineState {
    current_step: AtomicI32,
    current_section: AtomicI32,
    current_loop: AtomicU32,
    playing: AtomicBool,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            current_step: AtomicI32::new(-1),
            current_section: AtomicI32::new(-1),
            current_loop: AtomicU32::new(0),
            playing: AtomicBool::new(false),
        }
    }
}

impl EngineState {
    pub fn current_step(&self) -> i32 {
        self.current_step.load(Ordering::Acquire)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Section of the current step and how many times it has repeated so
    /// far; `None` while stopped.
    pub fn current_section(&self) -> Option<(usize, u32)> {
        let section = usize::try_from(self.current_section.load(Ordering::Acquire)).ok()?;
        Some((section, self.current_loop.load(Ordering::Acquire)))
    }

    pub(crate) fn set_step(&self, step: i32) {
        self.current_step.store(step, Ordering::Release);
    }

    pub(crate) fn set_section(&self, section: Option<(usize, u32)>) {
        match section {
            Some((section, repeat)) => {
                self.current_loop.store(repeat, Ordering::Release);
                self.current_section.store(section as i32, Ordering::Release);
            }
            None => {
                self.current_section.store(-1, Ordering::Release);
                self.current_loop.store(0, Ordering::Release);
            }
        }
    }

    pub(crate) fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TableCell {
    slot: Option<usize>,
    volume: Option<f32>,
    pitch: Option<f32>,
}

#[derive(Debug, Clone, Copy)]
struct SlotDefaults {
    volume: f32,
    pitch: f32,
}

impl Default for SlotDefaults {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pitch: 1.0,
        }
    }
}

/// The audio-thread half of the engine.
///
/// Everything is allocated in [`Sequencer::new`] so the render path never
/// touches the allocator. Sample memory arrives as [`Shared`] handles and is
/// released through the basedrop collector on the control side.
pub struct Sequencer {
    sample_rate: u32,
    channels: usize,
    state: Arc<EngineState>,
    table: Vec<TableCell>,
    columns: usize,
    slots: Vec<Option<Shared<seq_transport::SampleBuffer>>>,
    slot_defaults: Vec<SlotDefaults>,
    column_voices: Vec<Voice>,
    preview_voices: Vec<Voice>,
    playing: bool,
    bpm: u32,
    region: Range<usize>,
    next_step: usize,
    frames_until_step: f64,
    song_mode: bool,
    sections: Vec<SectionSpan>,
    section_count: usize,
    /// Section `next_step` belongs to, and the pass through it.
    current_section: usize,
    current_loop: u32,
    master_volume: f32,
    tap: Option<rtrb::Producer<f32>>,
}

impl Sequencer {
    pub fn new(sample_rate: u32, channels: usize, state: Arc<EngineState>) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            state,
            table: vec![TableCell::default(); MAX_STEPS * MAX_COLUMNS],
            columns: 0,
            slots: (0..MAX_SAMPLE_SLOTS).map(|_| None).collect(),
            slot_defaults: vec![SlotDefaults::default(); MAX_SAMPLE_SLOTS],
            column_voices: (0..MAX_COLUMNS).map(|_| Voice::default()).collect(),
            preview_voices: (0..PREVIEW_VOICES).map(|_| Voice::default()).collect(),
            playing: false,
            bpm: seq_transport::DEFAULT_BPM,
            region: 0..0,
            next_step: 0,
            frames_until_step: 0.0,
            song_mode: false,
            sections: vec![SectionSpan::default(); MAX_SECTIONS],
            section_count: 0,
            current_section: 0,
            current_loop: 0,
            master_volume: 1.0,
            tap: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    fn cell_mut(&mut self, step: usize, column: usize) -> Option<&mut TableCell> {
        if step >= MAX_STEPS || column >= MAX_COLUMNS {
            return None;
        }
        self.table.get_mut(step * MAX_COLUMNS + column)
    }

    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::ConfigureColumns(columns) => {
                let columns = columns.min(MAX_COLUMNS);
                for voice in &mut self.column_voices[columns..] {
                    voice.stop();
                }
                self.columns = columns;
            }
            Command::SetCell { step, column, slot } => {
                if slot >= MAX_SAMPLE_SLOTS {
                    return;
                }
                if let Some(cell) = self.cell_mut(step, column) {
                    *cell = TableCell {
                        slot: Some(slot),
                        ..TableCell::default()
                    };
                }
            }
            Command::SetCellSettings {
                step,
                column,
                volume,
                pitch,
            } => {
                if let Some(cell) = self.cell_mut(step, column) {
                    cell.volume = volume.map(|v| v.max(0.0));
                    cell.pitch = pitch.map(clamp_pitch);
                }
            }
            Command::ClearCell { step, column } => {
                if let Some(cell) = self.cell_mut(step, column) {
                    *cell = TableCell::default();
                }
            }
            Command::ClearAll => self.table.fill(TableCell::default()),
            Command::Start { bpm, steps } => self.start(bpm, steps),
            Command::SetRegion(steps) => self.set_region(steps),
            Command::Stop => self.stop(),
            Command::SetBpm(bpm) => self.bpm = clamp_bpm(bpm),
            Command::SetSongMode(song) => {
                self.song_mode = song;
                self.sync_section();
            }
            Command::SetSection { section, span } => {
                if let Some(slot) = self.sections.get_mut(section) {
                    *slot = span;
                }
            }
            Command::SetSectionCount(count) => {
                self.section_count = count.min(MAX_SECTIONS);
                self.sync_section();
            }
            Command::SetMasterVolume(volume) => self.master_volume = clamp_master_volume(volume),
            Command::SetSlotDefaults {
                slot,
                volume,
                pitch,
            } => {
                if let Some(defaults) = self.slot_defaults.get_mut(slot) {
                    defaults.volume = volume.max(0.0);
                    defaults.pitch = clamp_pitch(pitch);
                }
            }
            Command::PlaySlot(slot) => self.preview(slot),
            Command::StopSlot(slot) => {
                for voice in self.voices_mut() {
                    if voice.slot() == Some(slot) {
                        voice.stop();
                    }
                }
            }
            Command::StopAll => {
                for voice in self.voices_mut() {
                    voice.stop();
                }
            }
            Command::StopRecording => self.tap = None,
        }
    }

    /// Install or release a slot's sample. Voices still playing the old buffer
    /// are stopped.
    pub fn set_slot(&mut self, slot: usize, buffer: Option<Shared<seq_transport::SampleBuffer>>) {
        if slot >= MAX_SAMPLE_SLOTS {
            return;
        }
        for voice in self.voices_mut() {
            if voice.slot() == Some(slot) {
                voice.stop();
            }
        }
        self.slots[slot] = buffer;
    }

    pub fn attach_tap(&mut self, tap: rtrb::Producer<f32>) {
        self.tap = Some(tap);
    }

    fn voices_mut(&mut self) -> impl Iterator<Item = &mut Voice> {
        self.column_voices
            .iter_mut()
            .chain(self.preview_voices.iter_mut())
    }

    fn start(&mut self, bpm: u32, steps: Range<usize>) {
        let end = steps.end.min(MAX_STEPS);
        if steps.start >= end {
            return;
        }
        self.bpm = clamp_bpm(bpm);
        self.region = steps.start..end;
        self.next_step = steps.start;
        self.frames_until_step = 0.0;
        self.current_loop = 0;
        self.sync_section();
        self.playing = true;
        self.state.set_playing(true);
    }

    fn set_region(&mut self, steps: Range<usize>) {
        let end = steps.end.min(MAX_STEPS);
        if steps.start >= end {
            return;
        }
        self.region = steps.start..end;
        if !self.region.contains(&self.next_step) {
            self.next_step = self.region.start;
        }
        self.sync_section();
    }

    fn stop(&mut self) {
        self.playing = false;
        for voice in &mut self.column_voices {
            voice.stop();
        }
        self.state.set_playing(false);
        self.state.set_step(-1);
        self.state.set_section(None);
    }

    fn song_sections(&self) -> &[SectionSpan] {
        &self.sections[..self.section_count]
    }

    fn section_of(&self, step: usize) -> Option<usize> {
        self.song_sections()
            .iter()
            .position(|span| span.steps.contains(&step))
    }

    /// Point the section cursor at the section holding `next_step`. A pass
    /// count survives when the section stays the same.
    fn sync_section(&mut self) {
        match self.section_of(self.next_step) {
            Some(section) => {
                if section != self.current_section {
                    self.current_section = section;
                    self.current_loop = 0;
                }
                let loops = self.sections[section].loops.max(1);
                self.current_loop = self.current_loop.min(loops - 1);
            }
            None if self.song_mode && self.section_count > 0 => {
                self.current_section = 0;
                self.current_loop = 0;
                self.next_step = self.sections[0].steps.start;
            }
            None => {
                self.current_section = 0;
                self.current_loop = 0;
            }
        }
    }

    /// Step to play after `step`. Song mode repeats each section `loops`
    /// times before moving on and wraps after the last one; otherwise the
    /// region loops.
    fn following_step(&mut self, step: usize) -> usize {
        if self.song_mode
            && let Some(span) = self.song_sections().get(self.current_section).cloned()
        {
            if step + 1 < span.steps.end {
                return step + 1;
            }
            self.current_loop += 1;
            if self.current_loop < span.loops.max(1) {
                return span.steps.start;
            }
            self.current_loop = 0;
            self.current_section = (self.current_section + 1) % self.section_count;
            return self.sections[self.current_section].steps.start;
        }

        let next = if step + 1 >= self.region.end {
            self.region.start
        } else {
            step + 1
        };
        if let Some(section) = self.section_of(next) {
            self.current_section = section;
        }
        self.current_loop = 0;
        next
    }

    fn preview(&mut self, slot: usize) {
        let Some(buffer) = self.slots.get(slot).and_then(Option::clone) else {
            return;
        };
        let defaults = self.slot_defaults[slot];
        // reuse an idle voice, otherwise steal the first
        let index = self
            .preview_voices
            .iter()
            .position(|voice| !voice.is_active())
            .unwrap_or(0);
        self.preview_voices[index].trigger(
            slot,
            buffer,
            defaults.volume,
            defaults.pitch,
            self.sample_rate,
        );
    }

    fn trigger_step(&mut self, step: usize) {
        let base = step * MAX_COLUMNS;
        for column in 0..self.columns {
            let cell = self.table[base + column];
            let Some(slot) = cell.slot else {
                continue;
            };
            let Some(buffer) = self.slots[slot].clone() else {
                continue;
            };
            let defaults = self.slot_defaults[slot];
            self.column_voices[column].trigger(
                slot,
                buffer,
                cell.volume.unwrap_or(defaults.volume),
                cell.pitch.unwrap_or(defaults.pitch),
                self.sample_rate,
            );
        }
    }

    fn advance_clock(&mut self) {
        if !self.playing {
            return;
        }
        if self.frames_until_step <= 0.0 {
            let step = self.next_step;
            self.trigger_step(step);
            self.state.set_section(
                (self.section_count > 0).then_some((self.current_section, self.current_loop)),
            );
            self.state.set_step(step as i32);
            self.next_step = self.following_step(step);
            self.frames_until_step += frames_per_step(self.bpm, self.sample_rate);
        }
        self.frames_until_step -= 1.0;
    }

    /// Produce one stereo frame and feed the recording tap.
    #[inline]
    pub fn next_frame(&mut self) -> (f32, f32) {
        self.advance_clock();

        let mut left = 0.0;
        let mut right = 0.0;
        for voice in self.voices_mut() {
            let (l, r) = voice.next_frame();
            left += l;
            right += r;
        }
        left *= self.master_volume;
        right *= self.master_volume;

        if let Some(tap) = self.tap.as_mut() {
            // a full ring drops samples rather than blocking the callback
            match self.channels {
                1 => {
                    let _ = tap.push((left + right) * 0.5);
                }
                channels => {
                    let _ = tap.push(left);
                    let _ = tap.push(right);
                    for _ in 2..channels {
                        let _ = tap.push(0.0);
                    }
                }
            }
        }

        (left, right)
    }

    /// Fill an interleaved buffer of `self.channels()` channels.
    pub fn render(&mut self, out: &mut [f32]) {
        let channels = self.channels;
        for frame in out.chunks_mut(channels) {
            let (left, right) = self.next_frame();
            write_frame(frame, left, right);
        }
    }
}

/// Mono gets the average, extra channels stay silent.
#[inline]
pub(crate) fn write_frame(frame: &mut [f32], left: f32, right: f32) {
    match frame {
        [mono] => *mono = (left + right) * 0.5,
        [l, r, rest @ ..] => {
            *l = left;
            *r = right;
            rest.fill(0.0);
        }
        [] => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Collector;
    use seq_transport::SampleBuffer;

    const RATE: u32 = 48_000;

    fn sequencer() -> (Sequencer, Arc<EngineState>) {
        let state = Arc::new(EngineState::default());
        (Sequencer::new(RATE, 2, Arc::clone(&state)), state)
    }

    fn impulse(collector: &Collector) -> Shared<SampleBuffer> {
        let mut samples = vec![0.0; 64];
        samples[0] = 1.0;
        Shared::new(&collector.handle(), SampleBuffer::new(samples, RATE, 1))
    }

    fn step_frames(bpm: u32) -> usize {
        frames_per_step(bpm, RATE) as usize
    }

    #[test]
    fn test_start_publishes_first_step() {
        let (mut seq, state) = sequencer();
        seq.handle_command(Command::ConfigureColumns(4));
        seq.handle_command(Command::Start {
            bpm: 120,
            steps: 0..16,
        });
        assert!(state.is_playing());
        assert_eq!(state.current_step(), -1);

        let mut out = vec![0.0; 2 * 8];
        seq.render(&mut out);
        assert_eq!(state.current_step(), 0);
    }

    #[test]
    fn test_clock_wraps_inside_region() {
        let (mut seq, state) = sequencer();
        seq.handle_command(Command::Start {
            bpm: 120,
            steps: 4..6,
        });

        let mut out = vec![0.0; 2 * step_frames(120)];
        seq.render(&mut out);
        assert_eq!(state.current_step(), 4);
        seq.render(&mut out);
        assert_eq!(state.current_step(), 5);
        seq.render(&mut out);
        assert_eq!(state.current_step(), 4);
    }

    fn configure_sections(seq: &mut Sequencer, spans: &[(Range<usize>, u32)]) {
        for (section, (steps, loops)) in spans.iter().enumerate() {
            seq.handle_command(Command::SetSection {
                section,
                span: SectionSpan {
                    steps: steps.clone(),
                    loops: *loops,
                },
            });
        }
        seq.handle_command(Command::SetSectionCount(spans.len()));
    }

    /// Steps published over `count` whole steps.
    fn walk(seq: &mut Sequencer, state: &EngineState, count: usize) -> Vec<i32> {
        let mut out = vec![0.0; 2 * step_frames(120)];
        (0..count)
            .map(|_| {
                seq.render(&mut out);
                state.current_step()
            })
            .collect()
    }

    #[test]
    fn test_set_region_keeps_playhead() {
        let (mut seq, state) = sequencer();
        seq.handle_command(Command::Start {
            bpm: 120,
            steps: 0..16,
        });
        assert_eq!(walk(&mut seq, &state, 6), vec![0, 1, 2, 3, 4, 5]);

        seq.handle_command(Command::SetRegion(0..8));
        assert_eq!(walk(&mut seq, &state, 4), vec![6, 7, 0, 1]);
    }

    #[test]
    fn test_set_region_moves_playhead_outside_it() {
        let (mut seq, state) = sequencer();
        seq.handle_command(Command::Start {
            bpm: 120,
            steps: 0..16,
        });
        walk(&mut seq, &state, 10);

        seq.handle_command(Command::SetRegion(4..8));
        assert_eq!(walk(&mut seq, &state, 3), vec![4, 5, 6]);
    }

    #[test]
    fn test_song_mode_repeats_sections() {
        let (mut seq, state) = sequencer();
        seq.handle_command(Command::SetSongMode(true));
        configure_sections(&mut seq, &[(0..2, 2), (2..4, 1)]);
        seq.handle_command(Command::Start {
            bpm: 120,
            steps: 0..4,
        });

        let mut out = vec![0.0; 2 * step_frames(120)];
        let mut seen = Vec::new();
        for _ in 0..8 {
            seq.render(&mut out);
            seen.push((state.current_step(), state.current_section()));
        }
        assert_eq!(
            seen,
            vec![
                (0, Some((0, 0))),
                (1, Some((0, 0))),
                (0, Some((0, 1))),
                (1, Some((0, 1))),
                (2, Some((1, 0))),
                (3, Some((1, 0))),
                (0, Some((0, 0))),
                (1, Some((0, 0))),
            ]
        );
    }

    #[test]
    fn test_loop_mode_ignores_section_loops() {
        let (mut seq, state) = sequencer();
        configure_sections(&mut seq, &[(0..2, 3), (2..4, 1)]);
        seq.handle_command(Command::Start {
            bpm: 120,
            steps: 0..4,
        });
        assert_eq!(walk(&mut seq, &state, 5), vec![0, 1, 2, 3, 0]);
    }

    #[test]
    fn test_master_volume_scales_mix() {
        let collector = Collector::new();
        let (mut seq, _) = sequencer();
        seq.set_slot(0, Some(impulse(&collector)));
        seq.handle_command(Command::SetMasterVolume(0.5));
        seq.handle_command(Command::PlaySlot(0));

        let mut out = vec![0.0; 2];
        seq.render(&mut out);
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn test_stop_resets_step() {
        let (mut seq, state) = sequencer();
        seq.handle_command(Command::Start {
            bpm: 200,
            steps: 0..8,
        });
        let mut out = vec![0.0; 64];
        seq.render(&mut out);
        seq.handle_command(Command::Stop);
        assert!(!state.is_playing());
        assert_eq!(state.current_step(), -1);
        assert_eq!(state.current_section(), None);
    }

    #[test]
    fn test_cell_triggers_slot_with_override_gain() {
        let collector = Collector::new();
        let (mut seq, _) = sequencer();
        seq.set_slot(2, Some(impulse(&collector)));
        seq.handle_command(Command::ConfigureColumns(1));
        seq.handle_command(Command::SetCell {
            step: 0,
            column: 0,
            slot: 2,
        });
        seq.handle_command(Command::SetCellSettings {
            step: 0,
            column: 0,
            volume: Some(0.5),
            pitch: None,
        });
        seq.handle_command(Command::Start {
            bpm: 120,
            steps: 0..4,
        });

        let mut out = vec![0.0; 4];
        seq.render(&mut out);
        assert_eq!(&out[..2], &[0.5, 0.5]);
        assert_eq!(&out[2..], &[0.0, 0.0]);
    }

    #[test]
    fn test_slot_default_applies_without_override() {
        let collector = Collector::new();
        let (mut seq, _) = sequencer();
        seq.set_slot(0, Some(impulse(&collector)));
        seq.handle_command(Command::SetSlotDefaults {
            slot: 0,
            volume: 0.25,
            pitch: 1.0,
        });
        seq.handle_command(Command::ConfigureColumns(1));
        seq.handle_command(Command::SetCell {
            step: 0,
            column: 0,
            slot: 0,
        });
        seq.handle_command(Command::Start {
            bpm: 120,
            steps: 0..1,
        });

        let mut out = vec![0.0; 2];
        seq.render(&mut out);
        assert_eq!(out, vec![0.25, 0.25]);
    }

    #[test]
    fn test_columns_beyond_configured_are_silent() {
        let collector = Collector::new();
        let (mut seq, _) = sequencer();
        seq.set_slot(0, Some(impulse(&collector)));
        seq.handle_command(Command::ConfigureColumns(1));
        seq.handle_command(Command::SetCell {
            step: 0,
            column: 3,
            slot: 0,
        });
        seq.handle_command(Command::Start {
            bpm: 120,
            steps: 0..1,
        });

        let mut out = vec![0.0; 2];
        seq.render(&mut out);
        assert_eq!(out, vec![0.0, 0.0]);
    }

    #[test]
    fn test_clear_all_empties_table() {
        let collector = Collector::new();
        let (mut seq, _) = sequencer();
        seq.set_slot(0, Some(impulse(&collector)));
        seq.handle_command(Command::ConfigureColumns(1));
        seq.handle_command(Command::SetCell {
            step: 0,
            column: 0,
            slot: 0,
        });
        seq.handle_command(Command::ClearAll);
        seq.handle_command(Command::Start {
            bpm: 120,
            steps: 0..1,
        });

        let mut out = vec![0.0; 2];
        seq.render(&mut out);
        assert_eq!(out, vec![0.0, 0.0]);
    }

    #[test]
    fn test_preview_plays_while_stopped() {
        let collector = Collector::new();
        let (mut seq, state) = sequencer();
        seq.set_slot(1, Some(impulse(&collector)));
        seq.handle_command(Command::PlaySlot(1));

        let mut out = vec![0.0; 2];
        seq.render(&mut out);
        assert_eq!(out, vec![1.0, 1.0]);
        assert!(!state.is_playing());
    }

    #[test]
    fn test_tap_receives_rendered_frames() {
        let collector = Collector::new();
        let (mut seq, _) = sequencer();
        let (tap, mut rx) = rtrb::RingBuffer::new(16);
        seq.attach_tap(tap);
        seq.set_slot(0, Some(impulse(&collector)));
        seq.handle_command(Command::PlaySlot(0));

        let mut out = vec![0.0; 4];
        seq.render(&mut out);
        assert_eq!(rx.slots(), 4);
        assert_eq!(rx.pop(), Ok(1.0));

        seq.handle_command(Command::StopRecording);
        assert!(rx.is_abandoned());
    }

    #[test]
    fn test_write_frame_mono_averages() {
        let mut frame = [0.0];
        write_frame(&mut frame, 1.0, 0.0);
        assert_eq!(frame, [0.5]);
    }
}
