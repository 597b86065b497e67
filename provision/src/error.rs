use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("no source could provide artifact: {0}")]
    ProvisioningFailed(String),

    #[error("download of {url} failed: {reason}")]
    DownloadFailed {
        url: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("failed to write {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("integrity check failed for {name}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ProvisionError {
    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProvisionError::WriteFailed {
            path: path.into(),
            source,
        }
    }

    /// HTTP status of a failed download, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProvisionError::DownloadFailed { status, .. } => *status,
            _ => None,
        }
    }
}
