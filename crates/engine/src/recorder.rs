use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::EngineError;

const DRAIN_INTERVAL: Duration = Duration::from_millis(10);
const ABANDON_GRACE: Duration = Duration::from_millis(250);

/// Writes everything the audio thread pushes into its tap to a float WAV file.
pub(crate) struct Recorder {
    path: PathBuf,
    stop: Arc<AtomicBool>,
    worker: JoinHandle<Result<u64, EngineError>>,
}

impl Recorder {
    /// Creates the file up front so path errors surface before the tap is attached.
    pub fn start(
        path: &Path,
        sample_rate: u32,
        channels: u16,
    ) -> Result<(Self, rtrb::Producer<f32>), EngineError> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;

        // two seconds of headroom
        let capacity = sample_rate as usize * channels as usize * 2;
        let (tap, mut rx) = rtrb::RingBuffer::<f32>::new(capacity);

        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let worker = thread::Builder::new()
            .name("seq-recorder".into())
            .spawn(move || {
                let mut written = 0u64;
                loop {
                    let finished = rx.is_abandoned() || worker_stop.load(Ordering::Acquire);
                    while let Ok(sample) = rx.pop() {
                        writer.write_sample(sample)?;
                        written += 1;
                    }
                    if finished {
                        break;
                    }
                    thread::sleep(DRAIN_INTERVAL);
                }
                writer.finalize()?;
                Ok(written)
            })?;

        log::info!("recording output to {}", path.display());
        Ok((
            Self {
                path: path.to_path_buf(),
                stop,
                worker,
            },
            tap,
        ))
    }

    /// Wait for the audio thread to drop its tap, then finalize the file.
    /// Returns the number of samples written.
    pub fn finish(self) -> Result<u64, EngineError> {
        let deadline = Instant::now() + ABANDON_GRACE;
        while !self.worker.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        self.stop.store(true, Ordering::Release);

        let written = self
            .worker
            .join()
            .map_err(|_| EngineError::Backend(anyhow::anyhow!("recorder thread panicked")))??;
        log::info!("wrote {written} samples to {}", self.path.display());
        Ok(written)
    }
}
