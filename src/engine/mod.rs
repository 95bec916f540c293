//! Command execution: the driver owning the [`World`](crate::world::World)
//! and the collaborator state (reader, model writer, score writer).

pub mod command;
mod driver;
mod validate;

pub use command::Command;
pub use driver::Engine;
pub use validate::Validator;

use crate::io::DataError;

/// Engine-level failures. All are fatal to the current script: the engine
/// has no silent recovery. Convergence signals (undo, learning-rate
/// reduction) are not errors; they surface in log records.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("configuration error: {}", .0.join("; "))]
    Config(Vec<String>),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed command: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Structural(String),
}
