use seq_engine::EngineError;
use seq_project::ProjectError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cell ({step}, {column}) is outside the grid")]
    OutOfBounds { step: usize, column: usize },

    #[error("row {row}, column {column} of layer {layer} in section {section} is outside the grid")]
    AddressOutOfBounds {
        layer: usize,
        section: usize,
        row: usize,
        column: usize,
    },

    #[error("sample slot {0} does not exist")]
    InvalidSlot(usize),

    #[error("structural limit: {0}")]
    StructuralLimit(&'static str),

    #[error("native engine failure: {0}")]
    NativeEngineFailure(#[from] EngineError),

    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] ProjectError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
