use seq_project::{CellRecord, INHERIT};

/// A per-cell volume or pitch: either the slot default or a value of its own.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Override {
    #[default]
    Inherited,
    Explicit(f32),
}

impl Override {
    pub fn resolve(self, default: f32) -> f32 {
        match self {
            Override::Inherited => default,
            Override::Explicit(value) => value,
        }
    }

    pub fn is_explicit(self) -> bool {
        matches!(self, Override::Explicit(_))
    }

    pub fn value(self) -> Option<f32> {
        match self {
            Override::Inherited => None,
            Override::Explicit(value) => Some(value),
        }
    }

    /// Negative values are the on-disk "inherit" marker.
    pub fn from_sentinel(value: f32) -> Self {
        if value < 0.0 {
            Override::Inherited
        } else {
            Override::Explicit(value)
        }
    }

    pub fn to_sentinel(self) -> f32 {
        self.value().unwrap_or(INHERIT)
    }
}

impl From<Option<f32>> for Override {
    fn from(value: Option<f32>) -> Self {
        value.map_or(Override::Inherited, Override::Explicit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Cell {
    pub sample_slot: Option<usize>,
    pub volume: Override,
    pub pitch: Override,
}

impl Cell {
    pub const EMPTY: Cell = Cell {
        sample_slot: None,
        volume: Override::Inherited,
        pitch: Override::Inherited,
    };

    pub fn with_sample(slot: usize) -> Self {
        Self {
            sample_slot: Some(slot),
            ..Self::EMPTY
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sample_slot.is_none()
    }

    /// Overrides are only meaningful on a cell that holds a sample.
    pub fn has_volume_override(&self) -> bool {
        !self.is_empty() && self.volume.is_explicit()
    }

    pub fn has_pitch_override(&self) -> bool {
        !self.is_empty() && self.pitch.is_explicit()
    }
}

impl From<Cell> for CellRecord {
    fn from(cell: Cell) -> Self {
        CellRecord {
            slot: cell.sample_slot,
            volume: cell.volume.to_sentinel(),
            pitch: cell.pitch.to_sentinel(),
        }
    }
}

impl From<CellRecord> for Cell {
    fn from(record: CellRecord) -> Self {
        match record.slot {
            Some(slot) => Cell {
                sample_slot: Some(slot),
                volume: Override::from_sentinel(record.volume),
                pitch: Override::from_sentinel(record.pitch),
            },
            None => Cell::EMPTY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_reads_as_inherited() {
        let cell = Cell::from(CellRecord {
            slot: Some(3),
            volume: -1.0,
            pitch: 2.0,
        });
        assert_eq!(cell.volume, Override::Inherited);
        assert_eq!(cell.pitch, Override::Explicit(2.0));
        assert_eq!(cell.volume.resolve(0.7), 0.7);
        assert!(!cell.has_volume_override());
        assert!(cell.has_pitch_override());
    }

    #[test]
    fn test_explicit_value_equal_to_default_stays_explicit() {
        let cell = Cell {
            volume: Override::Explicit(0.7),
            ..Cell::with_sample(0)
        };
        assert_eq!(cell.volume.resolve(0.7), 0.7);
        assert!(cell.has_volume_override());

        let record = CellRecord::from(cell);
        assert_eq!(record.volume, 0.7);
        assert_eq!(record.pitch, INHERIT);
    }

    #[test]
    fn test_empty_record_drops_stale_overrides() {
        let cell = Cell::from(CellRecord {
            slot: None,
            volume: 0.5,
            pitch: 0.5,
        });
        assert_eq!(cell, Cell::EMPTY);
    }
}
