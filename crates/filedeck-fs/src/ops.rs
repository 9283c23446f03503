//! Blocking file operations, all confined by a [`PathGuard`].
//!
//! Callers on an async runtime run these through `spawn_blocking`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use filedeck_core::{EntryKind, FileEntry, FsError};
use serde::Serialize;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::guard::PathGuard;
use crate::mime;

/// Directory names skipped by [`FileOperationService::project_stats`].
const SKIPPED_DIRS: &[&str] = &["node_modules", "__pycache__"];

/// Result of a move or copy.
#[derive(Clone, Debug)]
pub struct Transfer {
    /// Resolved source path.
    pub source: PathBuf,
    /// Snapshot of the destination after the operation.
    pub entry: FileEntry,
}

/// Aggregate statistics for the root tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ProjectStats {
    /// Regular files counted.
    pub total_files: u64,
    /// Directories counted (the root excluded).
    pub total_directories: u64,
    /// Sum of file sizes in bytes.
    pub total_size: u64,
    /// `total_size` in MiB, rounded to two decimals.
    pub total_size_mb: f64,
}

/// File operations on a confined tree.
#[derive(Clone, Debug)]
pub struct FileOperationService {
    guard: PathGuard,
}

impl FileOperationService {
    /// Wrap a guard.
    pub fn new(guard: PathGuard) -> Self {
        Self { guard }
    }

    /// The guard every operation resolves through.
    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    /// List the immediate children of a directory.
    ///
    /// Directories sort first, then names case-insensitively. Entries whose
    /// metadata cannot be read are skipped.
    #[instrument(skip(self))]
    pub fn list(&self, path: &str) -> Result<Vec<FileEntry>, FsError> {
        let dir = self.guard.resolve(path)?;
        let meta = fs::metadata(&dir).map_err(|e| FsError::from_io(&dir, e))?;
        if !meta.is_dir() {
            return Err(FsError::NotADirectory { path: dir });
        }

        let reader = fs::read_dir(&dir).map_err(|e| FsError::from_io(&dir, e))?;
        let mut entries: Vec<FileEntry> = reader
            .filter_map(|item| {
                let item = item.ok()?;
                let child = item.path();
                match fs::metadata(&child) {
                    Ok(meta) => Some(self.describe(&child, &meta)),
                    Err(e) => {
                        debug!(path = %child.display(), error = %e, "skipping unreadable entry");
                        None
                    }
                }
            })
            .collect();

        entries.sort_by(|a, b| {
            b.is_directory()
                .cmp(&a.is_directory())
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        Ok(entries)
    }

    /// Snapshot one entry.
    pub fn stat(&self, path: &str) -> Result<FileEntry, FsError> {
        let resolved = self.guard.resolve(path)?;
        self.entry_at(&resolved)
    }

    /// Create a directory, including missing parents.
    #[instrument(skip(self))]
    pub fn create_directory(&self, path: &str) -> Result<FileEntry, FsError> {
        let target = self.guard.resolve(path)?;
        if exists(&target) {
            return Err(FsError::AlreadyExists { path: target });
        }
        fs::create_dir_all(&target).map_err(|e| FsError::from_io(&target, e))?;
        info!(path = %target.display(), "directory created");
        self.entry_at(&target)
    }

    /// Delete a file, or a directory recursively.
    ///
    /// Returns a snapshot taken just before removal.
    #[instrument(skip(self))]
    pub fn delete(&self, path: &str) -> Result<FileEntry, FsError> {
        let target = self.guard.resolve(path)?;
        self.deny_root(path, &target)?;
        let meta = fs::symlink_metadata(&target).map_err(|e| FsError::from_io(&target, e))?;
        let entry = self.describe(&target, &meta);

        let removed = if meta.is_dir() {
            fs::remove_dir_all(&target)
        } else {
            fs::remove_file(&target)
        };
        removed.map_err(|e| FsError::from_io(&target, e))?;
        info!(path = %target.display(), kind = ?entry.kind, "deleted");
        Ok(entry)
    }

    /// Move or rename `source` to `destination`.
    ///
    /// Falls back to copy-then-delete when the rename crosses filesystems.
    #[instrument(skip(self))]
    pub fn move_entry(&self, source: &str, destination: &str) -> Result<Transfer, FsError> {
        let (from, to) = self.transfer_paths(source, destination)?;

        match fs::rename(&from, &to) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                debug!(from = %from.display(), to = %to.display(), "cross-device move, copying");
                copy_recursive(&from, &to)?;
                let removed = if from.is_dir() {
                    fs::remove_dir_all(&from)
                } else {
                    fs::remove_file(&from)
                };
                removed.map_err(|e| FsError::from_io(&from, e))?;
            }
            Err(e) => return Err(FsError::from_io(&to, e)),
        }

        info!(from = %from.display(), to = %to.display(), "moved");
        let entry = self.entry_at(&to)?;
        Ok(Transfer {
            source: from,
            entry,
        })
    }

    /// Copy a file, or a directory recursively.
    #[instrument(skip(self))]
    pub fn copy_entry(&self, source: &str, destination: &str) -> Result<Transfer, FsError> {
        let (from, to) = self.transfer_paths(source, destination)?;
        if from.is_dir() && to.starts_with(&from) {
            return Err(FsError::Io {
                path: to,
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "cannot copy a directory into itself",
                ),
            });
        }

        copy_recursive(&from, &to)?;
        info!(from = %from.display(), to = %to.display(), "copied");
        let entry = self.entry_at(&to)?;
        Ok(Transfer {
            source: from,
            entry,
        })
    }

    /// Count files, directories and bytes under the root.
    ///
    /// Hidden entries, `node_modules` and `__pycache__` are skipped.
    /// Unreadable entries are ignored.
    #[instrument(skip(self))]
    pub fn project_stats(&self) -> ProjectStats {
        let mut stats = ProjectStats::default();
        let walker = WalkDir::new(self.guard.root())
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped(e.file_name().to_str()));

        for entry in walker.filter_map(Result::ok) {
            if entry.depth() == 0 {
                continue;
            }
            let file_type = entry.file_type();
            if file_type.is_dir() {
                stats.total_directories += 1;
            } else if file_type.is_file() {
                stats.total_files += 1;
                stats.total_size += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let mb = stats.total_size as f64 / (1024.0 * 1024.0);
        stats.total_size_mb = (mb * 100.0).round() / 100.0;
        stats
    }

    fn transfer_paths(&self, source: &str, destination: &str) -> Result<(PathBuf, PathBuf), FsError> {
        let from = self.guard.resolve(source)?;
        let to = self.guard.resolve(destination)?;
        self.deny_root(source, &from)?;
        if !exists(&from) {
            return Err(FsError::NotFound { path: from });
        }
        if exists(&to) {
            return Err(FsError::AlreadyExists { path: to });
        }
        Ok((from, to))
    }

    fn deny_root(&self, requested: &str, resolved: &Path) -> Result<(), FsError> {
        if self.guard.is_root(resolved) {
            return Err(FsError::AccessDenied {
                path: requested.to_string(),
            });
        }
        Ok(())
    }

    fn entry_at(&self, path: &Path) -> Result<FileEntry, FsError> {
        let meta = fs::metadata(path).map_err(|e| FsError::from_io(path, e))?;
        Ok(self.describe(path, &meta))
    }

    fn describe(&self, path: &Path, meta: &fs::Metadata) -> FileEntry {
        let kind = if meta.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let modified: DateTime<Utc> = meta.modified().map(DateTime::from).unwrap_or_else(|_| Utc::now());

        FileEntry {
            name,
            path: path.display().to_string(),
            relative_path: self.guard.relative(path),
            kind,
            size: if kind.is_directory() { 0 } else { meta.len() },
            modified,
            permissions: permissions(meta),
            mime_type: if kind.is_directory() {
                None
            } else {
                mime::guess(path).map(str::to_string)
            },
        }
    }
}

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn is_skipped(name: Option<&str>) -> bool {
    name.is_none_or(|n| n.starts_with('.') || SKIPPED_DIRS.contains(&n))
}

#[cfg(unix)]
fn permissions(meta: &fs::Metadata) -> Option<String> {
    use std::os::unix::fs::PermissionsExt;
    Some(format!("{:03o}", meta.permissions().mode() & 0o777))
}

#[cfg(not(unix))]
fn permissions(_meta: &fs::Metadata) -> Option<String> {
    None
}

fn copy_recursive(from: &Path, to: &Path) -> Result<(), FsError> {
    let meta = fs::symlink_metadata(from).map_err(|e| FsError::from_io(from, e))?;
    if !meta.is_dir() {
        let _ = fs::copy(from, to).map_err(|e| FsError::from_io(to, e))?;
        return Ok(());
    }

    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(from).to_path_buf();
            FsError::from_io(&path, io::Error::other(e.to_string()))
        })?;
        let rel = entry.path().strip_prefix(from).unwrap_or(Path::new(""));
        let target = to.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| FsError::from_io(&target, e))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            let _ = fs::copy(entry.path(), &target).map_err(|e| FsError::from_io(&target, e))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<(), FsError> {
    let dest = fs::read_link(link).map_err(|e| FsError::from_io(link, e))?;
    std::os::unix::fs::symlink(dest, target).map_err(|e| FsError::from_io(target, e))
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, _target: &Path) -> Result<(), FsError> {
    debug!(path = %link.display(), "skipping symlink during copy");
    Ok(())
}
