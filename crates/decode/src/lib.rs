use std::fs::File;
use std::path::{Path, PathBuf};

use seq_transport::SampleBuffer;
use symphonia::core::audio::SampleBuffer as DecodedBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Resolve a sample reference to a file on disk.
/// Accepts paths that exist as given, or paths relative to the bundled assets root
/// (e.g. `kits/808/kick.wav` under `<assets_root>/kits/808/kick.wav`).
pub fn resolve_sample_path(path: &Path, assets_root: &Path) -> Option<PathBuf> {
    if path.exists() {
        return Some(path.to_path_buf());
    }

    let with_root = assets_root.join(path);
    if with_root.exists() {
        return Some(with_root);
    }

    None
}

/// Strip the assets root prefix from a path if present, so bundled samples are
/// stored as asset identifiers rather than machine-specific paths.
pub fn strip_assets_root(path: &Path, assets_root: &Path) -> Option<PathBuf> {
    path.strip_prefix(assets_root).ok().map(Path::to_path_buf)
}

pub fn decode_file(path: &Path, assets_root: &Path) -> anyhow::Result<SampleBuffer> {
    let resolved = resolve_sample_path(path, assets_root)
        .ok_or_else(|| anyhow::anyhow!("sample not found: {}", path.display()))?;
    decode_file_direct(&resolved)
}

pub fn decode_file_direct(path: &Path) -> anyhow::Result<SampleBuffer> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow::anyhow!("no default track"))?;

    let sample_rate = track.codec_params.sample_rate.unwrap_or(48_000);
    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2) as u16;
    let track_id = track.id;

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(reason)) => {
                log::warn!("skipping corrupt packet in {}: {reason}", path.display());
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let spec = *decoded.spec();
        let capacity = decoded.capacity() as u64;

        let mut buf = DecodedBuffer::<f32>::new(capacity, spec);
        buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buf.samples());
    }

    log::debug!(
        "decoded {} ({} samples, {} Hz, {} ch)",
        path.display(),
        samples.len(),
        sample_rate,
        channels
    );

    Ok(SampleBuffer::new(samples, sample_rate, channels))
}
