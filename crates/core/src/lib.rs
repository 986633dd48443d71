pub mod address;
pub mod autosave;
pub mod bridge;
pub mod cell;
pub mod clipboard;
pub mod config;
pub mod error;
pub mod grid;
pub mod playback;
pub mod poll;
pub mod sample_bank;
pub mod selection;
pub mod session;
pub mod snapshot;
pub mod timer;
pub mod undo;

#[cfg(test)]
mod testing;

pub use address::{AbsoluteAddress, CellAddress, Topology};
pub use autosave::AutosavePolicy;
pub use bridge::NativeSyncBridge;
pub use cell::{Cell, Override};
pub use clipboard::Clipboard;
pub use config::{Config, GridConfig, Timings};
pub use error::{Error, Result};
pub use grid::{GridState, GridStore, Layer, MIN_SECTION_STEPS, Section};
pub use playback::{PlayMode, PlaybackController, PlaybackState};
pub use poll::{PollHandle, SessionEvent, spawn_poll_loop};
pub use sample_bank::{SampleBank, SampleSlot, SampleSource};
pub use selection::{GridPos, Scope, SelectionEngine, SelectionState, Viewport};
pub use session::{ImportReport, Session, TickReport};

pub use seq_engine::{CpalConfig, CpalEngine, EngineError, NativeEngine, OfflineConfig, OfflineEngine};
pub use seq_project::{
    AutosaveRecord, AutosaveStore, FileAutosaveStore, MemoryAutosaveStore, ProjectError,
    Snapshot, SnapshotMetadata,
};
pub use seq_transport::{MAX_BPM, MAX_SECTION_LOOPS, MIN_BPM, SectionSpan};
