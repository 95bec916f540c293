//! Input/output collaborators: LIBSVM reading, model files, score files.

pub mod libsvm;
pub mod model;
pub mod scores;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use libsvm::{
    read_data_files, DataReaderConfig, DataSetFiles, FeatureSpecConfig,
    ReadDataSetConfig, ReadModelConfig,
};
pub use model::{build_model_weights, read_model_weights, write_model_file};
pub use scores::{build_data_score, write_scores_file};

/// On-disk encoding: pretty-printed JSON or a self-delimited JSON-lines
/// record stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Text,
    Serialized,
}

/// Errors from reading training data or model files. All are fatal: the
/// engine makes no attempt to skip bad rows.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("empty data row")]
    EmptyRow,
    #[error("label must be +1 or -1, got {0:?}")]
    BadLabel(String),
    #[error("malformed token {0:?}, expected name:value")]
    MalformedToken(String),
    #[error("continuous feature values are unsupported: {0:?}")]
    ContinuousValue(String),
    #[error("bad user id in {0:?}")]
    BadUserId(String),
    #[error("duplicate user id feature in one row")]
    DuplicateUserId,
    #[error("{path}: malformed model file: {message}")]
    ModelParse { path: PathBuf, message: String },
}
