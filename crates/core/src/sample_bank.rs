use std::path::{Path, PathBuf};

use seq_transport::{MAX_SAMPLE_SLOTS, clamp_pitch};

use crate::error::{Error, Result};

const ASSET_PREFIX: &str = "asset:";

/// Where a slot's audio comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleSource {
    /// A file chosen by the user.
    File(PathBuf),
    /// A bundled sample, relative to the assets root.
    Asset(PathBuf),
}

impl SampleSource {
    /// Files under the assets root are stored as assets so the reference
    /// survives moving the install.
    pub fn classify(path: &Path, assets_root: &Path) -> Self {
        match seq_decode::strip_assets_root(path, assets_root) {
            Some(relative) => SampleSource::Asset(relative),
            None => SampleSource::File(path.to_path_buf()),
        }
    }

    pub fn resolve(&self, assets_root: &Path) -> PathBuf {
        match self {
            SampleSource::File(path) => path.clone(),
            SampleSource::Asset(relative) => assets_root.join(relative),
        }
    }

    pub fn to_record_string(&self) -> String {
        match self {
            SampleSource::File(path) => path.display().to_string(),
            SampleSource::Asset(relative) => format!("{ASSET_PREFIX}{}", relative.display()),
        }
    }

    pub fn from_record_string(value: &str) -> Self {
        match value.strip_prefix(ASSET_PREFIX) {
            Some(relative) => SampleSource::Asset(PathBuf::from(relative)),
            None => SampleSource::File(PathBuf::from(value)),
        }
    }

    /// File stem, used when a slot has no display name.
    pub fn stem(&self) -> Option<String> {
        let path = match self {
            SampleSource::File(path) | SampleSource::Asset(path) => path,
        };
        path.file_stem().map(|stem| stem.to_string_lossy().into_owned())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleSlot {
    pub index: usize,
    pub source: Option<SampleSource>,
    pub sample_id: Option<String>,
    pub display_name: Option<String>,
    pub loaded: bool,
    pub default_volume: f32,
    pub default_pitch: f32,
    pub playing: bool,
}

impl SampleSlot {
    fn empty(index: usize) -> Self {
        Self {
            index,
            source: None,
            sample_id: None,
            display_name: None,
            loaded: false,
            default_volume: 1.0,
            default_pitch: 1.0,
            playing: false,
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.source.is_some()
    }

    /// Stable id used in snapshots.
    pub fn stable_id(&self) -> String {
        self.sample_id
            .clone()
            .unwrap_or_else(|| format!("slot-{}", self.index))
    }

    pub fn name(&self) -> String {
        self.display_name
            .clone()
            .or_else(|| self.source.as_ref().and_then(SampleSource::stem))
            .unwrap_or_else(|| format!("Slot {}", self.index + 1))
    }
}

/// The fixed pool of sample slots cells point into.
#[derive(Debug, Clone)]
pub struct SampleBank {
    slots: Vec<SampleSlot>,
    active_bank: usize,
}

impl SampleBank {
    pub fn new(count: usize) -> Self {
        let count = count.clamp(1, MAX_SAMPLE_SLOTS);
        Self {
            slots: (0..count).map(SampleSlot::empty).collect(),
            active_bank: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[SampleSlot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Option<&SampleSlot> {
        self.slots.get(index)
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut SampleSlot> {
        self.slots.get_mut(index).ok_or(Error::InvalidSlot(index))
    }

    pub fn check(&self, index: usize) -> Result<()> {
        self.slot(index).map(|_| ()).ok_or(Error::InvalidSlot(index))
    }

    pub fn active_bank(&self) -> usize {
        self.active_bank
    }

    pub fn set_active_bank(&mut self, bank: usize) {
        self.active_bank = bank;
    }

    pub fn default_volume(&self, index: usize) -> f32 {
        self.slot(index).map_or(1.0, |slot| slot.default_volume)
    }

    pub fn default_pitch(&self, index: usize) -> f32 {
        self.slot(index).map_or(1.0, |slot| slot.default_pitch)
    }

    pub fn find_by_sample_id(&self, id: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.stable_id() == id && slot.is_assigned())
    }

    pub fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(|slot| !slot.is_assigned())
    }

    /// Point a slot at a new source. Defaults reset; the slot is not loaded
    /// until [`SampleBank::set_loaded`] says so.
    pub fn assign(
        &mut self,
        index: usize,
        source: SampleSource,
        display_name: Option<String>,
        sample_id: Option<String>,
    ) -> Result<()> {
        let slot = self.slot_mut(index)?;
        *slot = SampleSlot {
            source: Some(source),
            display_name,
            sample_id,
            ..SampleSlot::empty(index)
        };
        Ok(())
    }

    pub fn set_loaded(&mut self, index: usize, loaded: bool) -> Result<()> {
        self.slot_mut(index)?.loaded = loaded;
        Ok(())
    }

    pub fn clear(&mut self, index: usize) -> Result<()> {
        *self.slot_mut(index)? = SampleSlot::empty(index);
        Ok(())
    }

    /// Returns the stored value, clamped to 0.0..=1.0.
    pub fn set_default_volume(&mut self, index: usize, volume: f32) -> Result<f32> {
        let slot = self.slot_mut(index)?;
        slot.default_volume = volume.clamp(0.0, 1.0);
        Ok(slot.default_volume)
    }

    pub fn set_default_pitch(&mut self, index: usize, pitch: f32) -> Result<f32> {
        let slot = self.slot_mut(index)?;
        slot.default_pitch = clamp_pitch(pitch);
        Ok(slot.default_pitch)
    }

    /// Multiplies the default pitch by `2^(semitones / 12)`.
    pub fn shift_pitch(&mut self, index: usize, semitones: i32) -> Result<f32> {
        let current = self.slot_mut(index)?.default_pitch;
        self.set_default_pitch(index, current * semitone_ratio(semitones))
    }

    pub fn set_playing(&mut self, index: usize, playing: bool) -> Result<()> {
        self.slot_mut(index)?.playing = playing;
        Ok(())
    }

    pub fn stop_all(&mut self) {
        for slot in &mut self.slots {
            slot.playing = false;
        }
    }
}

pub fn semitone_ratio(semitones: i32) -> f32 {
    2f32.powf(semitones as f32 / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_under_assets_root() {
        let root = Path::new("/opt/seq/assets");
        let source = SampleSource::classify(Path::new("/opt/seq/assets/kits/kick.wav"), root);
        assert_eq!(source, SampleSource::Asset(PathBuf::from("kits/kick.wav")));
        assert_eq!(source.to_record_string(), "asset:kits/kick.wav");
        assert_eq!(
            SampleSource::from_record_string("asset:kits/kick.wav"),
            source
        );
        assert_eq!(
            source.resolve(Path::new("/other/root")),
            PathBuf::from("/other/root/kits/kick.wav")
        );
    }

    #[test]
    fn test_assign_resets_defaults() {
        let mut bank = SampleBank::new(4);
        bank.set_default_volume(1, 0.2).expect("volume");
        bank.assign(1, SampleSource::File("/tmp/snare.wav".into()), None, None)
            .expect("assign");

        let slot = bank.slot(1).expect("slot");
        assert_eq!(slot.default_volume, 1.0);
        assert!(!slot.loaded);
        assert_eq!(slot.name(), "snare");
        assert_eq!(bank.first_free(), Some(0));
    }

    #[test]
    fn test_invalid_slot_is_rejected() {
        let mut bank = SampleBank::new(2);
        assert!(matches!(bank.set_loaded(2, true), Err(Error::InvalidSlot(2))));
        assert_eq!(bank.default_volume(9), 1.0);
    }

    #[test]
    fn test_semitone_shift_compounds_and_clamps() {
        let mut bank = SampleBank::new(1);
        let up = bank.shift_pitch(0, 12).expect("shift");
        assert!((up - 2.0).abs() < 1e-5);
        let back = bank.shift_pitch(0, -12).expect("shift");
        assert!((back - 1.0).abs() < 1e-5);

        let floor = bank.shift_pitch(0, -120).expect("shift");
        assert_eq!(floor, seq_transport::MIN_PITCH);
    }

    #[test]
    fn test_volume_clamped_to_unit_range() {
        let mut bank = SampleBank::new(1);
        assert_eq!(bank.set_default_volume(0, 1.5).expect("volume"), 1.0);
        assert_eq!(bank.set_default_volume(0, -0.5).expect("volume"), 0.0);
    }

    #[test]
    fn test_find_by_sample_id_ignores_free_slots() {
        let mut bank = SampleBank::new(3);
        assert_eq!(bank.find_by_sample_id("slot-0"), None);
        bank.assign(
            2,
            SampleSource::Asset("kits/hat.wav".into()),
            Some("Hat".into()),
            Some("hat-01".into()),
        )
        .expect("assign");
        assert_eq!(bank.find_by_sample_id("hat-01"), Some(2));
    }
}
