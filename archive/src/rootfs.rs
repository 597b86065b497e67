//! Helpers for the extracted guest root filesystem.

use crate::error::ArchiveError;
use crate::types::ExtractionResult;
use std::io;
use std::path::Path;
use tokio::fs;

/// Sentinel written into the rootfs once an extraction ran to completion.
pub const EXTRACTED_MARKER: &str = ".vphone-extracted";

/// Whether `rootfs` holds a completed extraction. A directory that merely has
/// content (for example after a crash mid-extraction) does not count.
pub fn is_extracted(rootfs: &Path) -> bool {
    rootfs.join(EXTRACTED_MARKER).is_file()
}

pub(crate) fn write_marker(rootfs: &Path, result: &ExtractionResult) -> Result<(), ArchiveError> {
    let path = rootfs.join(EXTRACTED_MARKER);
    std::fs::write(&path, format!("{}\n", result)).map_err(|e| ArchiveError::io(&path, e))
}

pub(crate) fn clear_marker(rootfs: &Path) -> Result<(), ArchiveError> {
    let path = rootfs.join(EXTRACTED_MARKER);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ArchiveError::io(&path, e)),
    }
}

/// Ensures the directories the sandbox binds over and the guest display writes into exist.
pub async fn ensure_essential_dirs(rootfs: &Path) -> Result<(), ArchiveError> {
    let essential_dirs = ["dev", "proc", "sys", "tmp", "root"];

    for dir in essential_dirs {
        let path = rootfs.join(dir);
        if !path.exists() {
            fs::create_dir_all(&path)
                .await
                .map_err(|e| ArchiveError::io(&path, e))?;
        }
    }

    Ok(())
}
