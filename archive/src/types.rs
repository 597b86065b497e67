use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
    HardLink,
    /// Device nodes, FIFOs and anything else an unprivileged process cannot create.
    Unsupported(String),
}

/// One archive record, as read from its header.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub link_target: Option<PathBuf>,
    pub mode: u32,
    pub size: u64,
}

impl ArchiveEntry {
    pub fn is_executable(&self) -> bool {
        self.mode & 0o111 != 0
    }
}

/// An entry that was skipped instead of failing the extraction.
#[derive(Debug, Clone)]
pub struct ExtractionWarning {
    pub path: PathBuf,
    pub reason: String,
}

impl std::fmt::Display for ExtractionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub entries: u64,
    pub directories: u64,
    pub files: u64,
    pub symlinks: u64,
    pub hardlinks: u64,
    pub bytes: u64,
    pub warnings: Vec<ExtractionWarning>,
}

impl std::fmt::Display for ExtractionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} entries ({} dirs, {} files, {} symlinks, {} hardlinks, {} bytes), {} warnings",
            self.entries,
            self.directories,
            self.files,
            self.symlinks,
            self.hardlinks,
            self.bytes,
            self.warnings.len()
        )
    }
}
