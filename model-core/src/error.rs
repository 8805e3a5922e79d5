//! Error handling

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sequence must contain exactly {expected} values, got {got}")]
    InvalidSequence { expected: usize, got: usize },

    #[error("sequence contains a non-finite value")]
    NonFiniteInput,

    #[error("graph op `{0}` is not supported by the compact runtime")]
    UnsupportedOp(String),

    #[error("model artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("corrupt artifact: {0}")]
    CorruptArtifact(String),

    #[error("unsupported artifact version {0}")]
    UnsupportedVersion(u16),

    #[error("tensor `{tensor}` has shape {got:?}, expected {expected:?}")]
    ShapeMismatch {
        tensor: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("artifact is missing tensor `{0}`")]
    MissingTensor(String),

    #[error("training diverged at epoch {epoch} (non-finite loss)")]
    Diverged { epoch: usize },
}
