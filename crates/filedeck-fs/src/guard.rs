//! Root confinement for client-supplied paths.
//!
//! Every path a client sends passes through [`PathGuard::resolve`] before any
//! filesystem call. Resolution walks the path component by component and
//! canonicalizes every prefix that exists, so symlinks are followed the way
//! the OS would follow them even after a `..`. Components that do not exist
//! yet are kept lexically. The result must stay under the canonical root.

use std::io;
use std::path::{Component, Path, PathBuf};

use filedeck_core::FsError;
use tracing::warn;

/// Confines paths to a canonical root directory.
#[derive(Clone, Debug)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// Build a guard for `root`, which must be an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, FsError> {
        let root = root.as_ref();
        let canonical = std::fs::canonicalize(root).map_err(|e| FsError::from_io(root, e))?;
        if !canonical.is_dir() {
            return Err(FsError::NotADirectory { path: canonical });
        }
        Ok(Self { root: canonical })
    }

    /// The canonical root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a requested path to an absolute path under the root.
    ///
    /// Relative paths are taken relative to the root; an empty string is the
    /// root itself. Anything that lands outside the root is
    /// [`FsError::AccessDenied`].
    pub fn resolve(&self, requested: &str) -> Result<PathBuf, FsError> {
        let candidate = if requested.is_empty() {
            self.root.clone()
        } else {
            let requested_path = Path::new(requested);
            if requested_path.is_absolute() {
                requested_path.to_path_buf()
            } else {
                self.root.join(requested_path)
            }
        };

        let resolved = resolve_lenient(&candidate).map_err(|e| FsError::from_io(&candidate, e))?;

        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            warn!(requested, resolved = %resolved.display(), "path escapes root");
            Err(FsError::AccessDenied {
                path: requested.to_string(),
            })
        }
    }

    /// Whether `path` is the root itself.
    pub fn is_root(&self, path: &Path) -> bool {
        path == self.root
    }

    /// `path` relative to the root, with `/` separators (`""` for the root).
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default()
    }
}

/// Walk an absolute `path` one component at a time, canonicalizing after
/// every step while the walked prefix exists.
///
/// A `..` is applied to the canonical prefix, so a missing component followed
/// by `..` cannot hide a symlink that comes after it. Once a component is
/// missing, later components are appended lexically until a `..` climbs back
/// into existing territory. A dangling symlink is replaced by its target.
fn resolve_lenient(path: &Path) -> io::Result<PathBuf> {
    walk(path, 0)
}

/// Symlink hops allowed while following dangling links.
const MAX_LINK_HOPS: usize = 40;

fn walk(path: &Path, hops: usize) -> io::Result<PathBuf> {
    let mut current = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                current.push(component);
            }
            Component::ParentDir => {
                let _ = current.pop();
            }
            Component::CurDir => continue,
        }

        match std::fs::canonicalize(&current) {
            Ok(canonical) => current = canonical,
            Err(e) if is_missing(&e) => {
                if std::fs::symlink_metadata(&current).is_ok_and(|m| m.file_type().is_symlink()) {
                    current = follow_dangling(&current, hops + 1)?;
                }
            }
            Err(e) => return Err(e),
        }
    }

    if current.as_os_str().is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "path has no resolvable prefix",
        ));
    }
    Ok(current)
}

/// Resolve the target of a symlink whose target does not exist.
fn follow_dangling(link: &Path, hops: usize) -> io::Result<PathBuf> {
    if hops > MAX_LINK_HOPS {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "too many levels of symbolic links",
        ));
    }
    let target = std::fs::read_link(link)?;
    let absolute = match link.parent() {
        Some(parent) if target.is_relative() => parent.join(target),
        _ => target,
    };
    walk(&absolute, hops)
}

fn is_missing(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}
