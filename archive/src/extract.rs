use crate::error::ArchiveError;
use crate::rootfs;
use crate::types::*;
use flate2::read::GzDecoder;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Entry, EntryType};

/// Unpacks a gzip-compressed tar file into `destination`.
///
/// Blocks for the whole extraction; async callers should go through [`extract_async`].
pub fn extract(archive_path: &Path, destination: &Path) -> Result<ExtractionResult, ArchiveError> {
    let file = File::open(archive_path).map_err(|e| ArchiveError::io(archive_path, e))?;
    tracing::info!(archive = ?archive_path, destination = ?destination, "Extracting archive");
    extract_from(GzDecoder::new(BufReader::new(file)), destination)
}

pub async fn extract_async(
    archive_path: PathBuf,
    destination: PathBuf,
) -> Result<ExtractionResult, ArchiveError> {
    let join_path = destination.clone();
    tokio::task::spawn_blocking(move || extract(&archive_path, &destination))
        .await
        .map_err(|e| ArchiveError::io(join_path, io::Error::other(e)))?
}

/// Unpacks an already-decompressed tar stream, entry by entry in stored order.
///
/// I/O failures on directories and regular files abort the extraction. Links that
/// cannot be created, and entry kinds an unprivileged process cannot create, are
/// recorded as warnings and skipped. The completion marker is written last.
pub fn extract_from<R: Read>(reader: R, destination: &Path) -> Result<ExtractionResult, ArchiveError> {
    fs::create_dir_all(destination).map_err(|e| ArchiveError::io(destination, e))?;
    rootfs::clear_marker(destination)?;

    let mut archive = Archive::new(reader);
    let mut result = ExtractionResult::default();

    let entries = archive
        .entries()
        .map_err(|e| ArchiveError::CorruptArchive(format!("failed to read tar entries: {}", e)))?;

    for entry in entries {
        let mut entry = entry
            .map_err(|e| ArchiveError::CorruptArchive(format!("failed to read tar entry: {}", e)))?;

        if entry.header().entry_type() == EntryType::XGlobalHeader {
            continue;
        }

        let record = read_record(&entry)?;
        let Some(relative) = normalize_entry_path(&record.path) else {
            tracing::warn!("Skipping entry outside destination: {:?}", record.path);
            result.warnings.push(ExtractionWarning {
                path: record.path.clone(),
                reason: "path escapes destination".to_string(),
            });
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let follow_last = record.kind == EntryKind::Directory;
        let Some(full_path) = resolve_in_root(destination, &relative, follow_last) else {
            tracing::warn!("Skipping entry behind a symlink loop: {:?}", relative);
            result.warnings.push(ExtractionWarning {
                path: relative.clone(),
                reason: "too many levels of symbolic links".to_string(),
            });
            continue;
        };
        if full_path == destination && !follow_last {
            result.warnings.push(ExtractionWarning {
                path: relative.clone(),
                reason: "resolves to the destination root".to_string(),
            });
            continue;
        }
        result.entries += 1;

        match &record.kind {
            EntryKind::Directory => {
                fs::create_dir_all(&full_path).map_err(|e| ArchiveError::io(&full_path, e))?;
                result.directories += 1;
            }
            EntryKind::File => {
                ensure_parent(&full_path)?;
                let written = unpack_file(&mut entry, &full_path, record.mode)?;
                if written < record.size {
                    return Err(ArchiveError::CorruptArchive(format!(
                        "{:?} truncated: {} of {} bytes",
                        relative, written, record.size
                    )));
                }
                result.files += 1;
                result.bytes += written;
            }
            EntryKind::Symlink => {
                ensure_parent(&full_path)?;
                let target = record.link_target.clone().unwrap_or_default();
                match create_symlink(&full_path, &target) {
                    Ok(()) => result.symlinks += 1,
                    Err(e) => {
                        tracing::warn!(
                            "Failed to create symlink {:?} -> {:?}: {}",
                            relative,
                            target,
                            e
                        );
                        result.warnings.push(ExtractionWarning {
                            path: relative.clone(),
                            reason: format!("symlink to {} failed: {}", target.display(), e),
                        });
                    }
                }
            }
            EntryKind::HardLink => {
                ensure_parent(&full_path)?;
                let target = record
                    .link_target
                    .as_deref()
                    .and_then(normalize_entry_path)
                    .and_then(|t| resolve_in_root(destination, &t, true));

                match target.as_deref().map(|t| create_hardlink(&full_path, t)) {
                    Some(Ok(())) => result.hardlinks += 1,
                    Some(Err(e)) => {
                        tracing::warn!("Failed to create hardlink {:?}: {}", relative, e);
                        result.warnings.push(ExtractionWarning {
                            path: relative.clone(),
                            reason: format!("hardlink failed: {}", e),
                        });
                    }
                    None => result.warnings.push(ExtractionWarning {
                        path: relative.clone(),
                        reason: "hardlink target escapes destination".to_string(),
                    }),
                }
            }
            EntryKind::Unsupported(kind) => {
                tracing::debug!("Skipping {} entry: {:?}", kind, relative);
                result.warnings.push(ExtractionWarning {
                    path: relative.clone(),
                    reason: format!("{} entries are not supported", kind),
                });
            }
        }
    }

    rootfs::write_marker(destination, &result)?;

    tracing::info!(destination = ?destination, "Extraction complete: {}", result);
    Ok(result)
}

fn read_record<R: Read>(entry: &Entry<'_, R>) -> Result<ArchiveEntry, ArchiveError> {
    let header = entry.header();
    let path = entry
        .path()
        .map_err(|e| ArchiveError::CorruptArchive(format!("failed to get entry path: {}", e)))?
        .into_owned();

    let kind = match header.entry_type() {
        EntryType::Directory => EntryKind::Directory,
        EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => EntryKind::File,
        EntryType::Symlink => EntryKind::Symlink,
        EntryType::Link => EntryKind::HardLink,
        EntryType::Char => EntryKind::Unsupported("character device".to_string()),
        EntryType::Block => EntryKind::Unsupported("block device".to_string()),
        EntryType::Fifo => EntryKind::Unsupported("fifo".to_string()),
        other => EntryKind::Unsupported(format!("{:?}", other)),
    };

    let link_target = if matches!(kind, EntryKind::Symlink | EntryKind::HardLink) {
        entry
            .link_name()
            .map_err(|e| ArchiveError::CorruptArchive(format!("failed to read link name: {}", e)))?
            .map(|p| p.into_owned())
    } else {
        None
    };

    Ok(ArchiveEntry {
        path,
        kind,
        link_target,
        mode: header.mode().unwrap_or(0o644),
        size: entry.size(),
    })
}

/// Strips root and `.` components; `None` if `..` would climb above the root.
fn normalize_entry_path(path: &Path) -> Option<PathBuf> {
    let mut components = Vec::new();
    for comp in path.components() {
        match comp {
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
            Component::ParentDir => {
                components.pop()?;
            }
            Component::Normal(c) => components.push(c.to_os_string()),
        }
    }
    Some(components.into_iter().collect())
}

/// Maps a normalized entry path onto the host below `destination`, following
/// symlinks already extracted the way the guest would see them: absolute targets
/// restart at the rootfs root and `..` stops there. The last component is only
/// followed when `follow_last` is set. `None` when the links loop.
fn resolve_in_root(destination: &Path, relative: &Path, follow_last: bool) -> Option<PathBuf> {
    const MAX_LINK_HOPS: usize = 40;

    let mut resolved: Vec<OsString> = Vec::new();
    let mut hops = 0;

    let mut parts: VecDeque<OsString> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(p) => Some(p.to_os_string()),
            _ => None,
        })
        .collect();

    while let Some(part) = parts.pop_front() {
        if part == ".." {
            resolved.pop();
            continue;
        }

        let mut candidate = destination.to_path_buf();
        candidate.extend(&resolved);
        candidate.push(&part);

        let is_last = parts.is_empty();
        let is_link = fs::symlink_metadata(&candidate)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);

        if is_link && (!is_last || follow_last) {
            hops += 1;
            if hops > MAX_LINK_HOPS {
                return None;
            }
            let target = fs::read_link(&candidate).ok()?;
            if target.has_root() {
                resolved.clear();
            }
            for comp in target.components().rev() {
                match comp {
                    Component::Normal(p) => parts.push_front(p.to_os_string()),
                    Component::ParentDir => parts.push_front(OsString::from("..")),
                    _ => {}
                }
            }
            continue;
        }

        resolved.push(part);
    }

    let mut path = destination.to_path_buf();
    path.extend(resolved);
    Some(path)
}

fn ensure_parent(path: &Path) -> Result<(), ArchiveError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ArchiveError::io(parent, e))?;
    }
    Ok(())
}

/// Removes a non-directory already at `path` so the new entry replaces it
/// instead of writing through a stale symlink.
fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(m) if m.is_dir() => Ok(()),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn unpack_file<R: Read>(entry: &mut R, path: &Path, mode: u32) -> Result<u64, ArchiveError> {
    remove_existing(path).map_err(|e| ArchiveError::io(path, e))?;
    let mut file = File::create(path).map_err(|e| ArchiveError::io(path, e))?;

    let mut buf = vec![0u8; 64 * 1024];
    let mut written = 0u64;
    loop {
        let n = match entry.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(ArchiveError::CorruptArchive(format!(
                    "failed to read data for {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        file.write_all(&buf[..n])
            .map_err(|e| ArchiveError::io(path, e))?;
        written += n as u64;
    }

    // Owner keeps read/write so a later re-extraction can replace the file;
    // execute bits are carried over as recorded.
    let permissions = fs::Permissions::from_mode((mode & 0o7777) | 0o600);
    fs::set_permissions(path, permissions).map_err(|e| ArchiveError::io(path, e))?;

    Ok(written)
}

#[cfg(unix)]
fn create_symlink(path: &Path, target: &Path) -> io::Result<()> {
    remove_existing(path)?;
    std::os::unix::fs::symlink(target, path)
}

#[cfg(not(unix))]
fn create_symlink(_path: &Path, _target: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}

fn create_hardlink(path: &Path, target: &Path) -> io::Result<()> {
    remove_existing(path)?;
    match fs::hard_link(target, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::debug!("Hardlink {:?} failed ({}), copying instead", path, e);
            fs::copy(target, path).map(|_| ())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tar::{Builder, Header};
    use tempfile::TempDir;

    fn header(kind: EntryType, mode: u32, size: u64) -> Header {
        let mut header = Header::new_gnu();
        header.set_entry_type(kind);
        header.set_mode(mode);
        header.set_size(size);
        header
    }

    fn build_archive(build: impl FnOnce(&mut Builder<GzEncoder<Vec<u8>>>)) -> Vec<u8> {
        let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        build(&mut builder);
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn fixture_archive() -> Vec<u8> {
        build_archive(|b| {
            let mut dir = header(EntryType::Directory, 0o755, 0);
            b.append_data(&mut dir, "dir/", io::empty()).unwrap();

            let content = b"#!/bin/sh\necho hi\n";
            let mut bin = header(EntryType::Regular, 0o755, content.len() as u64);
            b.append_data(&mut bin, "dir/bin", &content[..]).unwrap();

            let mut link = header(EntryType::Symlink, 0o777, 0);
            b.append_link(&mut link, "dir/link", "bin").unwrap();

            let data = b"plain";
            let mut plain = header(EntryType::Regular, 0o644, data.len() as u64);
            b.append_data(&mut plain, "dir/sub/plain.txt", &data[..]).unwrap();
        })
    }

    #[test]
    fn test_extract_preserves_dirs_exec_bits_and_symlinks() {
        let dest = TempDir::new().unwrap();
        let archive = fixture_archive();

        let result = extract_from(GzDecoder::new(&archive[..]), dest.path()).unwrap();

        assert_eq!(result.directories, 1);
        assert_eq!(result.files, 2);

        assert!(dest.path().join("dir").is_dir());

        let bin = dest.path().join("dir/bin");
        let mode = fs::metadata(&bin).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0, "executable bit must survive extraction");

        // Parent directory is created even when the archive has no entry for it.
        let plain = dest.path().join("dir/sub/plain.txt");
        assert_eq!(fs::read(&plain).unwrap(), b"plain");
        let mode = fs::metadata(&plain).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0);

        let link = dest.path().join("dir/link");
        if result.symlinks == 1 {
            assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("bin"));
            assert!(result.warnings.is_empty());
        } else {
            assert_eq!(result.warnings.len(), 1);
            assert_eq!(result.warnings[0].path, PathBuf::from("dir/link"));
        }

        assert!(rootfs::is_extracted(dest.path()));
    }

    #[test]
    fn test_reextract_replaces_existing_entries() {
        let dest = TempDir::new().unwrap();
        let archive = fixture_archive();

        extract_from(GzDecoder::new(&archive[..]), dest.path()).unwrap();
        fs::write(dest.path().join("dir/bin"), b"stale").unwrap();

        let result = extract_from(GzDecoder::new(&archive[..]), dest.path()).unwrap();
        assert_eq!(result.files, 2);
        assert_eq!(
            fs::read(dest.path().join("dir/bin")).unwrap(),
            b"#!/bin/sh\necho hi\n"
        );
    }

    #[test]
    fn test_truncated_archive_is_corrupt() {
        let dest = TempDir::new().unwrap();

        // Incompressible content so the truncation lands inside the file data.
        let mut state = 0x2545_f491_u32;
        let content: Vec<u8> = (0..256 * 1024)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();
        let archive = build_archive(|b| {
            let mut file = header(EntryType::Regular, 0o644, content.len() as u64);
            b.append_data(&mut file, "big.bin", &content[..]).unwrap();
        });
        let truncated = &archive[..archive.len() / 2];

        let err = extract_from(GzDecoder::new(truncated), dest.path()).unwrap_err();
        assert!(matches!(err, ArchiveError::CorruptArchive(_)), "got {:?}", err);
        assert!(!rootfs::is_extracted(dest.path()));
    }

    #[test]
    fn test_parent_dir_entries_cannot_escape() {
        let dest = TempDir::new().unwrap();
        let inner = dest.path().join("inner");

        let archive = build_archive(|b| {
            let data = b"x";
            let mut file = header(EntryType::Regular, 0o644, 1);
            // `append_data` refuses `..`, so write the name into the header directly.
            file.as_gnu_mut().unwrap().name[..9].copy_from_slice(b"../escape");
            file.set_cksum();
            b.append(&file, &data[..]).unwrap();
        });

        let result = extract_from(GzDecoder::new(&archive[..]), &inner).unwrap();
        assert_eq!(result.files, 0);
        assert_eq!(result.warnings.len(), 1);
        assert!(!dest.path().join("escape").exists());
    }

    #[test]
    fn test_entries_behind_absolute_symlink_stay_in_destination() {
        let outside = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();

        let archive = build_archive(|b| {
            let mut link = header(EntryType::Symlink, 0o777, 0);
            b.append_link(&mut link, "lib64", outside.path()).unwrap();

            let data = b"payload";
            let mut file = header(EntryType::Regular, 0o644, data.len() as u64);
            b.append_data(&mut file, "lib64/evil.so", &data[..]).unwrap();

            let mut hard = header(EntryType::Link, 0o644, 0);
            b.append_link(&mut hard, "hard.so", "lib64/evil.so").unwrap();

            let mut dir = header(EntryType::Directory, 0o755, 0);
            b.append_data(&mut dir, "lib64/sub/", io::empty()).unwrap();
        });

        let result = extract_from(GzDecoder::new(&archive[..]), dest.path()).unwrap();

        assert!(!outside.path().join("evil.so").exists());
        assert!(!outside.path().join("sub").exists());

        if result.symlinks == 1 {
            // Absolute targets are taken relative to the rootfs, as the guest sees them.
            let inside = dest
                .path()
                .join(outside.path().strip_prefix("/").unwrap());
            assert_eq!(fs::read(inside.join("evil.so")).unwrap(), b"payload");
            assert!(inside.join("sub").is_dir());
            assert_eq!(fs::read(dest.path().join("hard.so")).unwrap(), b"payload");
            assert_eq!(result.hardlinks, 1);
        }
    }

    #[test]
    fn test_relative_symlink_cannot_climb_out_of_destination() {
        let dest = TempDir::new().unwrap();
        let rootfs = dest.path().join("rootfs");

        let archive = build_archive(|b| {
            let mut link = header(EntryType::Symlink, 0o777, 0);
            b.append_link(&mut link, "up", "../../..").unwrap();

            let data = b"x";
            let mut file = header(EntryType::Regular, 0o644, 1);
            b.append_data(&mut file, "up/escaped", &data[..]).unwrap();
        });

        let result = extract_from(GzDecoder::new(&archive[..]), &rootfs).unwrap();

        assert!(!dest.path().join("escaped").exists());
        if result.symlinks == 1 {
            assert!(rootfs.join("escaped").is_file());
        }
    }

    #[test]
    fn test_symlink_loop_is_skipped_with_warning() {
        let dest = TempDir::new().unwrap();

        let archive = build_archive(|b| {
            let mut a = header(EntryType::Symlink, 0o777, 0);
            b.append_link(&mut a, "a", "b").unwrap();
            let mut c = header(EntryType::Symlink, 0o777, 0);
            b.append_link(&mut c, "b", "a").unwrap();

            let mut file = header(EntryType::Regular, 0o644, 1);
            b.append_data(&mut file, "a/file", &b"x"[..]).unwrap();
        });

        let result = extract_from(GzDecoder::new(&archive[..]), dest.path()).unwrap();
        if result.symlinks == 2 {
            assert_eq!(result.files, 0);
            assert_eq!(result.warnings.len(), 1);
            assert_eq!(result.warnings[0].path, PathBuf::from("a/file"));
        }
    }

    #[test]
    fn test_hardlinks_and_special_entries() {
        let dest = TempDir::new().unwrap();

        let archive = build_archive(|b| {
            let data = b"shared";
            let mut file = header(EntryType::Regular, 0o755, data.len() as u64);
            b.append_data(&mut file, "bin/busybox", &data[..]).unwrap();

            let mut hard = header(EntryType::Link, 0o755, 0);
            b.append_link(&mut hard, "bin/sh", "bin/busybox").unwrap();

            let mut dangling = header(EntryType::Link, 0o644, 0);
            b.append_link(&mut dangling, "bin/gone", "bin/missing").unwrap();

            let mut fifo = header(EntryType::Fifo, 0o644, 0);
            b.append_data(&mut fifo, "run/pipe", io::empty()).unwrap();

            let mut null = header(EntryType::Char, 0o666, 0);
            b.append_data(&mut null, "dev/null", io::empty()).unwrap();
        });

        let result = extract_from(GzDecoder::new(&archive[..]), dest.path()).unwrap();

        assert_eq!(result.files, 1);
        assert_eq!(result.hardlinks, 1);
        assert_eq!(fs::read(dest.path().join("bin/sh")).unwrap(), b"shared");

        let reasons: Vec<(PathBuf, &str)> = result
            .warnings
            .iter()
            .map(|w| (w.path.clone(), w.reason.as_str()))
            .collect();
        assert_eq!(reasons.len(), 3, "warnings: {:?}", reasons);
        assert_eq!(reasons[0].0, PathBuf::from("bin/gone"));
        assert!(reasons[0].1.starts_with("hardlink failed"));
        assert_eq!(reasons[1], (PathBuf::from("run/pipe"), "fifo entries are not supported"));
        assert_eq!(
            reasons[2],
            (PathBuf::from("dev/null"), "character device entries are not supported")
        );

        assert!(!dest.path().join("run/pipe").exists());
        assert!(!dest.path().join("dev/null").exists());
        assert!(rootfs::is_extracted(dest.path()));
    }

    #[test]
    fn test_extract_from_file_path() {
        let dir = TempDir::new().unwrap();
        let archive_path = dir.path().join("rootfs.tar.gz");
        fs::write(&archive_path, fixture_archive()).unwrap();

        let dest = dir.path().join("rootfs");
        let result = extract(&archive_path, &dest).unwrap();
        assert_eq!(result.entries, 4);
        assert!(dest.join("dir/bin").is_file());
    }

    #[test]
    fn test_missing_archive_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = extract(&dir.path().join("missing.tar.gz"), &dir.path().join("rootfs"))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::ExtractionIOError { .. }));
    }
}
