use basedrop::Shared;
use seq_transport::SampleBuffer;

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

/// One playing sample. Column voices retrigger in place; nothing here allocates.
#[derive(Default)]
pub(crate) struct Voice {
    buffer: Option<Shared<SampleBuffer>>,
    slot: usize,
    pos: f64,
    rate: f64,
    gain: f32,
}

impl Voice {
    pub fn trigger(
        &mut self,
        slot: usize,
        buffer: Shared<SampleBuffer>,
        gain: f32,
        pitch: f32,
        output_rate: u32,
    ) {
        // resampled on load, but offline buffers may keep their own rate
        let rate_ratio = buffer.sample_rate() as f64 / output_rate.max(1) as f64;
        self.slot = slot;
        self.pos = 0.0;
        self.rate = pitch as f64 * rate_ratio;
        self.gain = gain;
        self.buffer = Some(buffer);
    }

    pub fn stop(&mut self) {
        self.buffer = None;
    }

    pub fn is_active(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn slot(&self) -> Option<usize> {
        self.buffer.as_ref().map(|_| self.slot)
    }

    /// Advance by one output frame and return its stereo contribution.
    #[inline]
    pub fn next_frame(&mut self) -> (f32, f32) {
        let Some(buffer) = self.buffer.as_ref() else {
            return (0.0, 0.0);
        };

        let frames = buffer.frames();
        let index = self.pos as usize;
        if index >= frames {
            self.buffer = None;
            return (0.0, 0.0);
        }

        let frac = (self.pos - index as f64) as f32;
        let (l0, r0) = buffer.stereo_frame(index);
        let (l1, r1) = if index + 1 < frames {
            buffer.stereo_frame(index + 1)
        } else {
            (l0, r0)
        };
        self.pos += self.rate;

        (
            lerp(l0, l1, frac) * self.gain,
            lerp(r0, r1, frac) * self.gain,
        )
    }
}
