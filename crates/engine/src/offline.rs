use std::sync::Arc;

use basedrop::Shared;
use seq_transport::{Command, SampleBuffer};

use crate::{Backend, Engine, EngineError, EngineState, Sequencer};

#[derive(Debug, Clone, Copy)]
pub struct OfflineConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

/// Runs the sequencer in the caller's thread; audio is produced on demand by
/// [`Engine::render`].
pub struct OfflineBackend {
    sequencer: Sequencer,
    channels: u16,
}

impl Backend for OfflineBackend {
    type Config = OfflineConfig;

    fn open(config: &Self::Config, state: Arc<EngineState>) -> Result<Self, EngineError> {
        Ok(Self {
            sequencer: Sequencer::new(config.sample_rate, config.channels as usize, state),
            channels: config.channels.max(1),
        })
    }

    fn sample_rate(&self) -> u32 {
        self.sequencer.sample_rate()
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn send(&mut self, command: Command) -> Result<(), Command> {
        self.sequencer.handle_command(command);
        Ok(())
    }

    fn send_slot(&mut self, slot: usize, buffer: Option<Shared<SampleBuffer>>) {
        self.sequencer.set_slot(slot, buffer);
    }

    fn attach_tap(&mut self, tap: rtrb::Producer<f32>) {
        self.sequencer.attach_tap(tap);
    }
}

impl Engine<OfflineBackend> {
    pub fn offline(config: OfflineConfig) -> Self {
        Self::new(config, "")
    }

    /// Render `frames` interleaved frames. Silence until initialized.
    pub fn render(&mut self, frames: usize) -> Vec<f32> {
        let channels = self.config.channels.max(1) as usize;
        let mut out = vec![0.0; frames * channels];
        if let Some(backend) = self.backend.as_mut() {
            backend.sequencer.render(&mut out);
        }
        out
    }
}
