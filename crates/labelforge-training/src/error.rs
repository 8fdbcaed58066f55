use labelforge_core::ConfigIssue;
use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    /// The job configuration was rejected before anything was launched.
    #[error("invalid training configuration: {0}")]
    Config(#[from] ConfigIssue),

    #[error("unsupported config file format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
