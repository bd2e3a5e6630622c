use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BokslArcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse configuration {path}: {reason}")]
    ConfigParse { path: PathBuf, reason: String },

    #[error("Another archive operation is still running")]
    SessionBusy,

    #[error("No archive is open")]
    SessionNotOpen,

    #[error("Archive is read-only: {path}")]
    ReadOnlyArchive { path: PathBuf },

    #[error("Batch already started; actions can no longer be appended")]
    BatchRunning,
}

pub type Result<T> = std::result::Result<T, BokslArcError>;
