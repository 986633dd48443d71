//! Types shared between the control side and the realtime engine.

use std::ops::Range;
use std::sync::Arc;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Rows of the engine's pattern table.
pub const MAX_STEPS: usize = 2048;
/// Columns of the engine's pattern table (all layers flattened side by side).
pub const MAX_COLUMNS: usize = 64;
/// Highest slot count any sample bank may use.
pub const MAX_SAMPLE_SLOTS: usize = 1024;
pub const MAX_SECTIONS: usize = 64;
/// Most times song mode repeats one section before moving on.
pub const MAX_SECTION_LOOPS: u32 = 16;

pub const MIN_BPM: u32 = 60;
pub const MAX_BPM: u32 = 300;
pub const DEFAULT_BPM: u32 = 120;

/// One step is a sixteenth note.
pub const STEPS_PER_BEAT: u32 = 4;

pub const MIN_PITCH: f32 = 0.03125;
pub const MAX_PITCH: f32 = 32.0;

pub fn clamp_bpm(bpm: u32) -> u32 {
    bpm.clamp(MIN_BPM, MAX_BPM)
}

pub fn clamp_pitch(pitch: f32) -> f32 {
    pitch.clamp(MIN_PITCH, MAX_PITCH)
}

pub fn clamp_master_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        return 1.0;
    }
    volume.clamp(0.0, 1.0)
}

/// One section of the timeline as the sequencer walks it in song mode.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SectionSpan {
    pub steps: Range<usize>,
    /// Times the section plays before song mode moves on; at least 1.
    pub loops: u32,
}

/// Number of output frames one step lasts at `bpm`.
pub fn frames_per_step(bpm: u32, sample_rate: u32) -> f64 {
    let seconds_per_beat = 60.0 / bpm.max(1) as f64;
    seconds_per_beat / STEPS_PER_BEAT as f64 * sample_rate as f64
}

/// Messages from the control side to the audio callback.
///
/// Sample buffers travel on their own ring, so nothing here owns heap memory.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ConfigureColumns(usize),
    /// Replaces the cell; its overrides go back to the slot defaults.
    SetCell {
        step: usize,
        column: usize,
        slot: usize,
    },
    /// `None` means the cell follows the slot default.
    SetCellSettings {
        step: usize,
        column: usize,
        volume: Option<f32>,
        pitch: Option<f32>,
    },
    ClearCell {
        step: usize,
        column: usize,
    },
    ClearAll,
    Start {
        bpm: u32,
        steps: Range<usize>,
    },
    /// Move the region of a running sequencer. The playhead carries on and
    /// only jumps to the region start when it falls outside.
    SetRegion(Range<usize>),
    Stop,
    SetBpm(u32),
    SetSongMode(bool),
    /// Section layout for song mode. Takes effect with the next
    /// [`Command::SetSectionCount`].
    SetSection {
        section: usize,
        span: SectionSpan,
    },
    SetSectionCount(usize),
    SetMasterVolume(f32),
    SetSlotDefaults {
        slot: usize,
        volume: f32,
        pitch: f32,
    },
    PlaySlot(usize),
    StopSlot(usize),
    StopAll,
    StopRecording,
}

/// Decoded, immutable sample data. Cloning only bumps a reference count.
#[derive(Clone)]
pub struct SampleBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl SampleBuffer {
    /// # Panics
    ///
    /// Panics if `channels` is 0 or `samples.len()` is not a multiple of it.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        assert!(channels > 0, "channels must be greater than 0");
        assert_eq!(
            samples.len() % channels as usize,
            0,
            "samples.len() must be divisible by channels"
        );
        Self {
            samples: Arc::from(samples),
            sample_rate,
            channels,
        }
    }

    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Stereo view of frame `index`; mono is duplicated, extra channels are ignored.
    #[inline]
    pub fn stereo_frame(&self, index: usize) -> (f32, f32) {
        let channels = self.channels as usize;
        let base = index * channels;
        match self.samples.get(base..base + channels) {
            Some([mono]) => (*mono, *mono),
            Some([left, right, ..]) => (*left, *right),
            _ => (0.0, 0.0),
        }
    }

    /// Rough memory footprint, reported by the engine for loaded slots.
    pub fn byte_len(&self) -> usize {
        self.samples.len() * std::mem::size_of::<f32>()
    }

    pub fn resample(&self, target_sample_rate: u32) -> anyhow::Result<Self> {
        if self.sample_rate == target_sample_rate || self.is_empty() {
            return Ok(Self {
                sample_rate: target_sample_rate,
                ..self.clone()
            });
        }
        resample_buffer(self, target_sample_rate)
    }
}

impl std::fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("frames", &self.frames())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .finish()
    }
}

fn resample_buffer(buffer: &SampleBuffer, target_sample_rate: u32) -> anyhow::Result<SampleBuffer> {
    let channels = buffer.channels as usize;
    let input_frames = buffer.frames();
    let ratio = target_sample_rate as f64 / buffer.sample_rate as f64;

    let mut planar = vec![Vec::with_capacity(input_frames); channels];
    for frame in buffer.samples().chunks_exact(channels) {
        for (ch, sample) in frame.iter().enumerate() {
            planar[ch].push(*sample);
        }
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, input_frames, channels)?;
    let output = resampler.process(&planar, None)?;

    let output_frames = output.first().map_or(0, Vec::len);
    let mut interleaved = Vec::with_capacity(output_frames * channels);
    for frame_idx in 0..output_frames {
        for channel in &output {
            interleaved.push(channel[frame_idx]);
        }
    }

    Ok(SampleBuffer::new(
        interleaved,
        target_sample_rate,
        buffer.channels,
    ))
}
