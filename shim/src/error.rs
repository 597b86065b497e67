use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShimError {
    #[error("failed to spawn {}: {reason}", runtime.display())]
    SpawnFailed { runtime: PathBuf, reason: String },

    #[error("guest input is closed (broken pipe)")]
    BrokenPipe,

    #[error("guest process is not running")]
    NotRunning,

    #[error("invalid bind mount: {0}")]
    InvalidBind(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShimError {
    pub(crate) fn spawn(runtime: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ShimError::SpawnFailed {
            runtime: runtime.into(),
            reason: reason.into(),
        }
    }
}
