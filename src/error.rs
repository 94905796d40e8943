//! Library error type.

use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by feature extraction, training and checkpointing.
#[derive(Debug, Error)]
pub enum RelError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{path}:{line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("invalid model config: {0}")]
    Config(String),
    #[error("invalid marginals: {0}")]
    Marginals(String),
    #[error("no labeled examples left for training")]
    EmptyTrainingSet,
    #[error("symbol {0:?} not in table")]
    UnknownSymbol(String),
    #[error("svd failed: {0}")]
    Svd(String),
    #[error("model has not been trained or loaded")]
    NotTrained,
    #[error("shape mismatch: {0}")]
    Shape(String),
    #[error(transparent)]
    Linfa(#[from] linfa::Error),
}

impl RelError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = RelError> = std::result::Result<T, E>;
