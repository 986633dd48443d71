use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};

use basedrop::Shared;
use cpal::{
    FromSample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use seq_transport::{Command, SampleBuffer};

use crate::{Backend, EngineError, EngineState, Sequencer};

const COMMAND_CAPACITY: usize = 8192;
const SLOT_CAPACITY: usize = 256;

type SlotUpdate = (usize, Option<Shared<SampleBuffer>>);

#[derive(Debug, Clone, Default)]
pub struct CpalConfig {
    /// Frames per callback; the device default when `None`.
    pub buffer_size: Option<u32>,
}

/// Output through the default cpal device. The stream lives on its own thread
/// (cpal streams cannot move between threads); the sequencer runs inside its
/// callback and is fed through lock-free rings.
pub struct CpalBackend {
    commands: rtrb::Producer<Command>,
    slots: rtrb::Producer<SlotUpdate>,
    taps: rtrb::Producer<rtrb::Producer<f32>>,
    sample_rate: u32,
    channels: u16,
    shutdown: Option<mpsc::Sender<()>>,
    audio_thread: Option<JoinHandle<()>>,
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        // closing the channel releases the stream
        self.shutdown.take();
        if let Some(handle) = self.audio_thread.take()
            && handle.join().is_err()
        {
            log::error!("audio thread panicked");
        }
    }
}

struct Rings {
    commands: rtrb::Consumer<Command>,
    slots: rtrb::Consumer<SlotUpdate>,
    taps: rtrb::Consumer<rtrb::Producer<f32>>,
}

/// Opens the default device and starts playing. Runs on the audio thread.
fn open_stream(
    config: &CpalConfig,
    state: Arc<EngineState>,
    rings: Rings,
) -> anyhow::Result<(cpal::Stream, u32, u16)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow::anyhow!("no output device found"))?;

    let supported = device.default_output_config()?;
    let sample_format = supported.sample_format();
    let mut stream_config: cpal::StreamConfig = supported.into();
    if let Some(frames) = config.buffer_size {
        stream_config.buffer_size = cpal::BufferSize::Fixed(frames);
    }

    let sample_rate = stream_config.sample_rate.0;
    let channels = stream_config.channels;
    let sequencer = Sequencer::new(sample_rate, channels as usize, state);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, sequencer, rings)?,
        sample_format => anyhow::bail!("unsupported sample format '{sample_format}'"),
    };
    stream.play()?;

    Ok((stream, sample_rate, channels))
}

impl Backend for CpalBackend {
    type Config = CpalConfig;

    fn open(config: &Self::Config, state: Arc<EngineState>) -> Result<Self, EngineError> {
        let (command_tx, command_rx) = rtrb::RingBuffer::<Command>::new(COMMAND_CAPACITY);
        let (slot_tx, slot_rx) = rtrb::RingBuffer::<SlotUpdate>::new(SLOT_CAPACITY);
        let (tap_tx, tap_rx) = rtrb::RingBuffer::<rtrb::Producer<f32>>::new(2);
        let rings = Rings {
            commands: command_rx,
            slots: slot_rx,
            taps: tap_rx,
        };

        let (ready_tx, ready_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let config = config.clone();

        let audio_thread = thread::Builder::new()
            .name("seq-audio".into())
            .spawn(move || match open_stream(&config, state, rings) {
                Ok((stream, sample_rate, channels)) => {
                    let _ = ready_tx.send(Ok((sample_rate, channels)));
                    // park until the backend is dropped
                    let _ = shutdown_rx.recv();
                    drop(stream);
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })?;

        let (sample_rate, channels) = ready_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("audio thread exited during startup"))??;

        Ok(Self {
            commands: command_tx,
            slots: slot_tx,
            taps: tap_tx,
            sample_rate,
            channels,
            shutdown: Some(shutdown_tx),
            audio_thread: Some(audio_thread),
        })
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn send(&mut self, command: Command) -> Result<(), Command> {
        self.commands.push(command).map_err(|err| match err {
            rtrb::PushError::Full(command) => command,
        })
    }

    fn send_slot(&mut self, slot: usize, buffer: Option<Shared<SampleBuffer>>) {
        if self.slots.push((slot, buffer)).is_err() {
            log::warn!("slot ring full, dropping update for slot {slot}");
        }
    }

    fn attach_tap(&mut self, tap: rtrb::Producer<f32>) {
        if self.taps.push(tap).is_err() {
            log::warn!("tap ring full, recording will be silent");
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut sequencer: Sequencer,
    mut rings: Rings,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let output_channels = config.channels as usize;

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            while let Ok((slot, buffer)) = rings.slots.pop() {
                sequencer.set_slot(slot, buffer);
            }
            while let Ok(tap) = rings.taps.pop() {
                sequencer.attach_tap(tap);
            }
            while let Ok(command) = rings.commands.pop() {
                sequencer.handle_command(command);
            }

            for frame in data.chunks_mut(output_channels) {
                let (left, right) = sequencer.next_frame();
                match frame {
                    [mono] => *mono = T::from_sample((left + right) * 0.5),
                    [l, r, rest @ ..] => {
                        *l = T::from_sample(left);
                        *r = T::from_sample(right);
                        for sample in rest {
                            *sample = T::from_sample(0.0);
                        }
                    }
                    [] => {}
                }
            }
        },
        |err| log::error!("stream error: {err}"),
        None,
    )?;

    Ok(stream)
}
