//! Observed filesystem versions.
//!
//! A [`FilesystemVersion`] is the engine's view of one ZFS snapshot or
//! bookmark. Versions are created by ZFS and only ever observed here; the
//! guid is the stable identity that survives renames and travels with the
//! data through send streams, so "same version" always means "same guid".

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a version is a snapshot or a bookmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionKind {
    /// A point-in-time read-only dataset; can carry holds and supply send
    /// stream data.
    Snapshot,
    /// A lightweight reference to a snapshot's transaction group; cannot be
    /// held and cannot supply data.
    Bookmark,
}

impl VersionKind {
    /// The character separating dataset path from version name (`@` or `#`).
    pub fn delimiter(self) -> char {
        match self {
            Self::Snapshot => '@',
            Self::Bookmark => '#',
        }
    }
}

impl fmt::Display for VersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Snapshot => f.write_str("snapshot"),
            Self::Bookmark => f.write_str("bookmark"),
        }
    }
}

/// A snapshot or bookmark of a ZFS dataset, as reported by the ZFS layer.
///
/// The name excludes the dataset path and the `@`/`#` delimiter. Two
/// versions denote the same underlying data iff their guids match, even
/// when one is a snapshot and the other a bookmark of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemVersion {
    /// Snapshot or bookmark.
    pub kind: VersionKind,
    /// Version name without dataset path or delimiter.
    pub name: String,
    /// Globally unique identifier assigned by ZFS.
    pub guid: u64,
    /// Transaction group in which the version was created.
    pub create_txg: u64,
    /// Creation timestamp.
    pub creation: DateTime<Utc>,
}

impl FilesystemVersion {
    /// Returns true for snapshots.
    pub fn is_snapshot(&self) -> bool {
        self.kind == VersionKind::Snapshot
    }

    /// Returns true for bookmarks.
    pub fn is_bookmark(&self) -> bool {
        self.kind == VersionKind::Bookmark
    }

    /// The version path relative to its dataset, e.g. `@daily-2024-01-01`.
    pub fn relative_path(&self) -> String {
        format!("{}{}", self.kind.delimiter(), self.name)
    }

    /// The absolute version path, e.g. `pool/data@daily-2024-01-01`.
    pub fn full_path(&self, filesystem: &str) -> String {
        format!("{}{}{}", filesystem, self.kind.delimiter(), self.name)
    }

    /// Whether `self` and `other` reference the same underlying data.
    ///
    /// Identity is the guid alone: a bookmark and the snapshot it was
    /// created from compare equal.
    pub fn same_identity(&self, other: &FilesystemVersion) -> bool {
        self.guid == other.guid
    }
}

impl fmt::Display for FilesystemVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.delimiter(), self.name)
    }
}
