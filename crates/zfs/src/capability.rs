//! The ZFS capability trait.
//!
//! Everything the replication core needs from ZFS, behind one async seam.
//! Every operation takes a [`CancellationToken`]; an operation that observes
//! cancellation finishes its in-flight call and returns
//! [`ZfsError::Cancelled`] without compensating. Idempotence contracts
//! ("already held is success") are part of the trait so that retrying
//! callers need no state of their own.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use zrepl_types::FilesystemVersion;

use crate::error::Result;

/// Which version kinds a [`Zfs::list_filesystem_versions`] call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListVersionOptions {
    /// Include snapshots.
    pub snapshots: bool,
    /// Include bookmarks.
    pub bookmarks: bool,
}

impl ListVersionOptions {
    /// Snapshots and bookmarks.
    pub fn all() -> Self {
        Self { snapshots: true, bookmarks: true }
    }

    /// Snapshots only.
    pub fn snapshots_only() -> Self {
        Self { snapshots: true, bookmarks: false }
    }

    /// Bookmarks only.
    pub fn bookmarks_only() -> Self {
        Self { snapshots: false, bookmarks: true }
    }
}

/// Mount state of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mountpoint {
    /// Whether the dataset is currently mounted.
    pub mounted: bool,
    /// The mountpoint path.
    pub path: String,
}

/// The ZFS operations the replication core consumes.
///
/// Implementations must uphold the idempotence contracts documented per
/// method; the core's retry and garbage-collection logic depends on them.
#[async_trait]
pub trait Zfs: Send + Sync {
    /// Lists all filesystems on the host.
    async fn list_filesystems(&self, ctx: &CancellationToken) -> Result<Vec<String>>;

    /// Places a hold named `tag` on `snapshot`.
    ///
    /// Idempotent: holding a snapshot already held by this tag is success.
    ///
    /// # Errors
    ///
    /// [`ZfsError::WrongVersionKind`] if `snapshot` is a bookmark,
    /// [`ZfsError::InvalidHoldTag`] if the tag fails validation,
    /// [`ZfsError::DatasetDoesNotExist`] if the snapshot is gone.
    ///
    /// [`ZfsError::WrongVersionKind`]: crate::error::ZfsError::WrongVersionKind
    /// [`ZfsError::InvalidHoldTag`]: crate::error::ZfsError::InvalidHoldTag
    /// [`ZfsError::DatasetDoesNotExist`]: crate::error::ZfsError::DatasetDoesNotExist
    async fn hold(
        &self,
        ctx: &CancellationToken,
        filesystem: &str,
        snapshot: &FilesystemVersion,
        tag: &str,
    ) -> Result<()>;

    /// Releases the hold named `tag` from the snapshot named `snapshot`.
    ///
    /// Idempotent: releasing a tag that is not held, or a snapshot that no
    /// longer exists, is success.
    async fn release(
        &self,
        ctx: &CancellationToken,
        filesystem: &str,
        snapshot: &str,
        tag: &str,
    ) -> Result<()>;

    /// Creates bookmark `name` on `filesystem` pointing at `version`.
    ///
    /// Idempotent: if a bookmark with this name already exists and points at
    /// the same guid, it is returned as-is.
    ///
    /// # Errors
    ///
    /// [`ZfsError::BookmarkCloningNotSupported`] if `version` is itself a
    /// bookmark and the pool lacks the bookmark-cloning feature;
    /// [`ZfsError::BookmarkExists`] if the name is taken by a bookmark of
    /// different data.
    ///
    /// [`ZfsError::BookmarkCloningNotSupported`]: crate::error::ZfsError::BookmarkCloningNotSupported
    /// [`ZfsError::BookmarkExists`]: crate::error::ZfsError::BookmarkExists
    async fn bookmark(
        &self,
        ctx: &CancellationToken,
        filesystem: &str,
        version: &FilesystemVersion,
        name: &str,
    ) -> Result<FilesystemVersion>;

    /// Destroys the bookmark named `bookmark` on `filesystem`.
    ///
    /// # Errors
    ///
    /// [`ZfsError::DatasetDoesNotExist`] if the bookmark is already gone;
    /// callers treating destroys as idempotent check
    /// [`ZfsError::is_not_found`].
    ///
    /// [`ZfsError::DatasetDoesNotExist`]: crate::error::ZfsError::DatasetDoesNotExist
    /// [`ZfsError::is_not_found`]: crate::error::ZfsError::is_not_found
    async fn destroy_bookmark(
        &self,
        ctx: &CancellationToken,
        filesystem: &str,
        bookmark: &str,
    ) -> Result<()>;

    /// Destroys the snapshot named `snapshot` on `filesystem`.
    ///
    /// # Errors
    ///
    /// [`ZfsError::DatasetBusy`] if any hold pins the snapshot;
    /// [`ZfsError::DatasetDoesNotExist`] if it is already gone.
    ///
    /// [`ZfsError::DatasetBusy`]: crate::error::ZfsError::DatasetBusy
    /// [`ZfsError::DatasetDoesNotExist`]: crate::error::ZfsError::DatasetDoesNotExist
    async fn destroy_snapshot(
        &self,
        ctx: &CancellationToken,
        filesystem: &str,
        snapshot: &str,
    ) -> Result<()>;

    /// Lists versions of `filesystem`, ordered by creation transaction group.
    async fn list_filesystem_versions(
        &self,
        ctx: &CancellationToken,
        filesystem: &str,
        options: ListVersionOptions,
    ) -> Result<Vec<FilesystemVersion>>;

    /// Lists the hold tags on the snapshot named `snapshot`.
    async fn list_holds(
        &self,
        ctx: &CancellationToken,
        filesystem: &str,
        snapshot: &str,
    ) -> Result<Vec<String>>;

    /// Looks up a single version by full path (`fs@name` or `fs#name`).
    async fn get_filesystem_version(
        &self,
        ctx: &CancellationToken,
        path: &str,
    ) -> Result<FilesystemVersion>;

    /// Returns the mount state of `filesystem`.
    async fn get_mountpoint(&self, ctx: &CancellationToken, filesystem: &str)
        -> Result<Mountpoint>;
}
