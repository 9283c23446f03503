//! Entry snapshots and change events shared by the filesystem layer and the
//! WebSocket protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether an entry is a regular file or a directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file (symlinks are reported as their target kind).
    File,
    /// Directory.
    Directory,
}

impl EntryKind {
    /// `true` for [`EntryKind::Directory`].
    pub fn is_directory(self) -> bool {
        matches!(self, Self::Directory)
    }
}

/// Metadata snapshot of one filesystem entry.
///
/// Produced fresh on every listing or operation; never cached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Final path component.
    pub name: String,
    /// Absolute path, confined to the configured root.
    pub path: String,
    /// Path relative to the configured root (`""` for the root itself).
    pub relative_path: String,
    /// File or directory.
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Size in bytes (`0` for directories).
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// Unix permission bits as a 3-digit octal string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    /// MIME type guessed from the extension (files only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl FileEntry {
    /// Convenience accessor mirroring the wire `is_directory` flag.
    pub fn is_directory(&self) -> bool {
        self.kind.is_directory()
    }
}

/// Kind of change reported to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Entry appeared.
    Created,
    /// File contents or metadata changed. Never emitted for directories.
    Modified,
    /// Entry disappeared.
    Deleted,
    /// Entry renamed; `previous_path` holds the old location.
    Moved,
}

impl ChangeKind {
    /// Lowercase label, also used as a metrics label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Moved => "moved",
        }
    }
}

/// A normalized filesystem change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// What happened.
    #[serde(rename = "change_type")]
    pub kind: ChangeKind,
    /// Affected path (the destination for moves).
    pub path: String,
    /// Whether the affected entry is a directory.
    pub is_directory: bool,
    /// Source path; set only for [`ChangeKind::Moved`].
    #[serde(
        rename = "old_path",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub previous_path: Option<String>,
    /// When the change was observed or performed.
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    fn new(kind: ChangeKind, path: impl Into<String>, is_directory: bool) -> Self {
        Self {
            kind,
            path: path.into(),
            is_directory,
            previous_path: None,
            timestamp: Utc::now(),
        }
    }

    /// A `created` event.
    pub fn created(path: impl Into<String>, is_directory: bool) -> Self {
        Self::new(ChangeKind::Created, path, is_directory)
    }

    /// A `modified` event for a file.
    pub fn modified(path: impl Into<String>) -> Self {
        Self::new(ChangeKind::Modified, path, false)
    }

    /// A `deleted` event.
    pub fn deleted(path: impl Into<String>, is_directory: bool) -> Self {
        Self::new(ChangeKind::Deleted, path, is_directory)
    }

    /// A `moved` event from `previous` to `path`.
    pub fn moved(
        previous: impl Into<String>,
        path: impl Into<String>,
        is_directory: bool,
    ) -> Self {
        Self {
            previous_path: Some(previous.into()),
            ..Self::new(ChangeKind::Moved, path, is_directory)
        }
    }
}
