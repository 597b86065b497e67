use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("extraction failed at {}: {source}", path.display())]
    ExtractionIOError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArchiveError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArchiveError::ExtractionIOError {
            path: path.into(),
            source,
        }
    }
}
