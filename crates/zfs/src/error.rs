//! Error taxonomy for ZFS operations.
//!
//! Callers branch on three distinguished conditions:
//! - [`ZfsError::BookmarkCloningNotSupported`] — the pool cannot bookmark a
//!   bookmark; step protection downgrades instead of failing
//! - [`ZfsError::DatasetDoesNotExist`] — tells "not yet received" apart from
//!   "truly missing", and makes destroys idempotent
//! - [`ZfsError::Cancelled`] — cooperative cancellation observed; returned
//!   unwrapped, no compensation attempted

use snafu::Snafu;

/// Result type for ZFS operations.
pub type Result<T, E = ZfsError> = std::result::Result<T, E>;

/// Error produced by the ZFS capability.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum ZfsError {
    /// The named dataset, snapshot, or bookmark does not exist.
    #[snafu(display("dataset does not exist: {path}"))]
    DatasetDoesNotExist {
        /// Full path of the missing object (`fs`, `fs@snap`, or `fs#bm`).
        path: String,
    },

    /// Bookmarking a bookmark was requested on a pool without the
    /// bookmark-cloning feature.
    #[snafu(display("bookmark cloning is not supported by this pool"))]
    BookmarkCloningNotSupported,

    /// A snapshot destroy was blocked by one or more holds.
    #[snafu(display("cannot destroy {path}: dataset is busy"))]
    DatasetBusy {
        /// Full path of the held snapshot.
        path: String,
    },

    /// The hold tag violates ZFS tag validation.
    #[snafu(display("invalid hold tag {tag:?}: {reason}"))]
    InvalidHoldTag {
        /// The rejected tag.
        tag: String,
        /// The violated constraint.
        reason: String,
    },

    /// A snapshot or bookmark name violates ZFS name validation.
    #[snafu(display("invalid name {name:?}: {reason}"))]
    InvalidName {
        /// The rejected name.
        name: String,
        /// The violated constraint.
        reason: String,
    },

    /// A bookmark with the requested name exists but points at different
    /// data.
    #[snafu(display("bookmark {path} exists with guid {existing_guid}, requested guid {requested_guid}"))]
    BookmarkExists {
        /// Full path of the conflicting bookmark.
        path: String,
        /// Guid of the existing bookmark.
        existing_guid: u64,
        /// Guid that was requested.
        requested_guid: u64,
    },

    /// The operation was asked something only valid for the other version
    /// kind (e.g. hold a bookmark).
    #[snafu(display("operation requires a {expected}, got {path}"))]
    WrongVersionKind {
        /// The kind the operation requires.
        expected: &'static str,
        /// Full path of the offending version.
        path: String,
    },

    /// The caller's cancellation token fired.
    #[snafu(display("operation cancelled"))]
    Cancelled,

    /// Transient ZFS failure (IO, permissions).
    #[snafu(display("zfs: {message}"))]
    Transient {
        /// Description from the ZFS layer.
        message: String,
    },
}

impl ZfsError {
    /// Whether this error means the target object is already gone.
    ///
    /// Destroy and release paths treat this as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ZfsError::DatasetDoesNotExist { .. })
    }
}
