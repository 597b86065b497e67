use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("display surface unavailable: {0}")]
    SurfaceUnavailable(String),

    #[error("display io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to forward input: {0}")]
    Forward(String),

    #[error("unknown pointer action: {0}")]
    UnknownAction(String),
}

impl DisplayError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DisplayError::Io {
            path: path.into(),
            source,
        }
    }
}
