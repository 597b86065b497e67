use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Read-only store of artifacts shipped alongside the application.
#[derive(Debug, Clone)]
pub struct AssetStore {
    root: PathBuf,
}

impl AssetStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves an asset name below the root. Names escaping the root resolve to `None`.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let mut path = self.root.clone();
        for component in Path::new(name).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(path)
    }

    /// Opens an asset for streaming, or `None` if it is not bundled.
    pub async fn open(&self, name: &str) -> io::Result<Option<fs::File>> {
        let Some(path) = self.resolve(name) else {
            return Ok(None);
        };

        match fs::File::open(&path).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Lists entry names in an asset directory, sorted. A missing directory lists as empty.
    pub async fn list(&self, dir: &str) -> io::Result<Vec<String>> {
        let Some(path) = self.resolve(dir) else {
            return Ok(Vec::new());
        };

        let mut entries = match fs::read_dir(&path).await {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();

        Ok(names)
    }
}
