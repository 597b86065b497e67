use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Where the compositor reads guest pixels from.
pub trait FrameSource: Send + 'static {
    /// The latest buffer, or `None` if the guest display has not produced one yet.
    fn latest(&mut self) -> std::io::Result<Option<Vec<u8>>>;
}

/// A pixel file the guest display stack rewrites in place.
#[derive(Debug, Clone)]
pub struct FileFrameSource {
    path: PathBuf,
}

impl FileFrameSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for FileFrameSource {
    fn latest(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(buf) if buf.is_empty() => Ok(None),
            Ok(buf) => Ok(Some(buf)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// A buffer pushed directly by the host. Only the most recent push is kept.
#[derive(Debug, Clone, Default)]
pub struct MemoryFrameSource {
    slot: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryFrameSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any buffer not yet consumed.
    pub fn push(&self, buf: Vec<u8>) {
        match self.slot.lock() {
            Ok(mut slot) => *slot = Some(buf),
            Err(poisoned) => *poisoned.into_inner() = Some(buf),
        }
    }
}

impl FrameSource for MemoryFrameSource {
    fn latest(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let taken = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        Ok(taken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_not_ready() {
        let dir = TempDir::new().unwrap();
        let mut source = FileFrameSource::new(dir.path().join("fb0"));
        assert!(source.latest().unwrap().is_none());

        std::fs::write(source.path(), b"").unwrap();
        assert!(source.latest().unwrap().is_none());

        std::fs::write(source.path(), [1, 2, 3, 4]).unwrap();
        assert_eq!(source.latest().unwrap(), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_memory_source_keeps_latest_only() {
        let source = MemoryFrameSource::new();
        let mut reader = source.clone();

        source.push(vec![1]);
        source.push(vec![2]);
        assert_eq!(reader.latest().unwrap(), Some(vec![2]));
        assert_eq!(reader.latest().unwrap(), None);
    }
}
