//! In-memory ZFS implementation.
//!
//! Backs the test suite with a faithful model of the semantics the core
//! depends on: guid assignment, hold-blocked destroys, idempotent holds and
//! bookmarks, and the bookmark-cloning feature toggle. Lives beside the
//! trait the way an in-memory storage engine lives beside a file-backed
//! one, so integration tests exercise the real core against a real
//! capability instead of hand-written stubs.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use zrepl_types::{FilesystemVersion, VersionKind};

use crate::capability::{ListVersionOptions, Mountpoint, Zfs};
use crate::error::{Result, ZfsError};
use crate::validation::{valid_hold_tag, valid_version_name};

/// A snapshot and the holds pinning it.
#[derive(Debug, Clone)]
struct SnapshotState {
    version: FilesystemVersion,
    holds: BTreeSet<String>,
}

/// One dataset: its snapshots, bookmarks, and mount state.
#[derive(Debug, Clone, Default)]
struct Dataset {
    snapshots: BTreeMap<String, SnapshotState>,
    bookmarks: BTreeMap<String, FilesystemVersion>,
    mountpoint: String,
    mounted: bool,
}

#[derive(Debug)]
struct Inner {
    datasets: BTreeMap<String, Dataset>,
    next_guid: u64,
    next_txg: u64,
    bookmark_cloning_supported: bool,
}

/// In-memory ZFS.
///
/// Guids start at a large odd seed so tests never confuse them with txgs
/// or list indices. All trait methods honor cancellation before touching
/// state.
#[derive(Debug)]
pub struct MemoryZfs {
    inner: Mutex<Inner>,
}

impl Default for MemoryZfs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryZfs {
    /// Creates an empty pool with bookmark cloning enabled.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                datasets: BTreeMap::new(),
                next_guid: 0xD1AB10_0001,
                next_txg: 1,
                bookmark_cloning_supported: true,
            }),
        }
    }

    /// Toggles the pool's bookmark-cloning feature.
    pub fn set_bookmark_cloning_supported(&self, supported: bool) {
        self.inner.lock().bookmark_cloning_supported = supported;
    }

    /// Creates a dataset, mounted under `/mnt/<fs>`.
    ///
    /// Test setup surface; not part of the [`Zfs`] capability.
    pub fn create_filesystem(&self, fs: &str) {
        let mut inner = self.inner.lock();
        inner.datasets.entry(fs.to_string()).or_insert_with(|| Dataset {
            mountpoint: format!("/mnt/{fs}"),
            mounted: true,
            ..Dataset::default()
        });
    }

    /// Takes a snapshot of `fs`, assigning a fresh guid and txg.
    ///
    /// # Panics
    ///
    /// Panics if the dataset does not exist or the snapshot name is taken;
    /// fixture misuse, not a runtime condition.
    pub fn snapshot(&self, fs: &str, name: &str) -> FilesystemVersion {
        let mut inner = self.inner.lock();
        let guid = inner.next_guid;
        let txg = inner.next_txg;
        inner.next_guid += 1;
        inner.next_txg += 1;
        let dataset = inner
            .datasets
            .get_mut(fs)
            .unwrap_or_else(|| panic!("snapshot fixture: no such dataset {fs:?}"));
        assert!(
            !dataset.snapshots.contains_key(name),
            "snapshot fixture: {fs}@{name} already exists"
        );
        let version = FilesystemVersion {
            kind: VersionKind::Snapshot,
            name: name.to_string(),
            guid,
            create_txg: txg,
            creation: Utc::now(),
        };
        dataset
            .snapshots
            .insert(name.to_string(), SnapshotState { version: version.clone(), holds: BTreeSet::new() });
        version
    }

    /// Materializes a received snapshot on `fs`: same guid as the sender's
    /// version, fresh local txg.
    ///
    /// Test setup surface standing in for the receive side of a send
    /// stream, which is outside this capability.
    ///
    /// # Panics
    ///
    /// Panics if the dataset does not exist or the snapshot name is taken.
    pub fn receive_snapshot(&self, fs: &str, name: &str, sent: &FilesystemVersion) -> FilesystemVersion {
        let mut inner = self.inner.lock();
        let txg = inner.next_txg;
        inner.next_txg += 1;
        let dataset = inner
            .datasets
            .get_mut(fs)
            .unwrap_or_else(|| panic!("receive fixture: no such dataset {fs:?}"));
        assert!(
            !dataset.snapshots.contains_key(name),
            "receive fixture: {fs}@{name} already exists"
        );
        let version = FilesystemVersion {
            kind: VersionKind::Snapshot,
            name: name.to_string(),
            guid: sent.guid,
            create_txg: txg,
            creation: Utc::now(),
        };
        dataset
            .snapshots
            .insert(name.to_string(), SnapshotState { version: version.clone(), holds: BTreeSet::new() });
        version
    }

    /// Creates a bookmark of `fs@snapshot` named `name`, bypassing the
    /// capability's validation.
    ///
    /// Test setup surface for planting foreign bookmarks.
    ///
    /// # Panics
    ///
    /// Panics if the dataset or snapshot does not exist.
    pub fn raw_bookmark(&self, fs: &str, snapshot: &str, name: &str) -> FilesystemVersion {
        let mut inner = self.inner.lock();
        let dataset = inner
            .datasets
            .get_mut(fs)
            .unwrap_or_else(|| panic!("bookmark fixture: no such dataset {fs:?}"));
        let source = dataset
            .snapshots
            .get(snapshot)
            .unwrap_or_else(|| panic!("bookmark fixture: no such snapshot {fs}@{snapshot}"))
            .version
            .clone();
        let version = FilesystemVersion {
            kind: VersionKind::Bookmark,
            name: name.to_string(),
            guid: source.guid,
            create_txg: source.create_txg,
            creation: Utc::now(),
        };
        dataset.bookmarks.insert(name.to_string(), version.clone());
        version
    }

    fn check_cancelled(ctx: &CancellationToken) -> Result<()> {
        if ctx.is_cancelled() {
            return Err(ZfsError::Cancelled);
        }
        Ok(())
    }
}

#[async_trait]
impl Zfs for MemoryZfs {
    async fn list_filesystems(&self, ctx: &CancellationToken) -> Result<Vec<String>> {
        Self::check_cancelled(ctx)?;
        Ok(self.inner.lock().datasets.keys().cloned().collect())
    }

    async fn hold(
        &self,
        ctx: &CancellationToken,
        filesystem: &str,
        snapshot: &FilesystemVersion,
        tag: &str,
    ) -> Result<()> {
        Self::check_cancelled(ctx)?;
        if !snapshot.is_snapshot() {
            return Err(ZfsError::WrongVersionKind {
                expected: "snapshot",
                path: snapshot.full_path(filesystem),
            });
        }
        valid_hold_tag(tag)?;
        let mut inner = self.inner.lock();
        let state = inner
            .datasets
            .get_mut(filesystem)
            .and_then(|d| d.snapshots.get_mut(&snapshot.name))
            .filter(|s| s.version.guid == snapshot.guid)
            .ok_or_else(|| ZfsError::DatasetDoesNotExist { path: snapshot.full_path(filesystem) })?;
        state.holds.insert(tag.to_string());
        Ok(())
    }

    async fn release(
        &self,
        ctx: &CancellationToken,
        filesystem: &str,
        snapshot: &str,
        tag: &str,
    ) -> Result<()> {
        Self::check_cancelled(ctx)?;
        let mut inner = self.inner.lock();
        if let Some(state) =
            inner.datasets.get_mut(filesystem).and_then(|d| d.snapshots.get_mut(snapshot))
        {
            state.holds.remove(tag);
        }
        // not held, or snapshot already gone: success
        Ok(())
    }

    async fn bookmark(
        &self,
        ctx: &CancellationToken,
        filesystem: &str,
        version: &FilesystemVersion,
        name: &str,
    ) -> Result<FilesystemVersion> {
        Self::check_cancelled(ctx)?;
        valid_version_name(filesystem, name)?;
        let mut inner = self.inner.lock();
        if version.is_bookmark() && !inner.bookmark_cloning_supported {
            return Err(ZfsError::BookmarkCloningNotSupported);
        }
        let dataset = inner
            .datasets
            .get_mut(filesystem)
            .ok_or_else(|| ZfsError::DatasetDoesNotExist { path: filesystem.to_string() })?;

        if let Some(existing) = dataset.bookmarks.get(name) {
            if existing.guid == version.guid {
                return Ok(existing.clone());
            }
            return Err(ZfsError::BookmarkExists {
                path: format!("{filesystem}#{name}"),
                existing_guid: existing.guid,
                requested_guid: version.guid,
            });
        }

        let source = match version.kind {
            VersionKind::Snapshot => dataset
                .snapshots
                .get(&version.name)
                .map(|s| s.version.clone())
                .filter(|v| v.guid == version.guid),
            VersionKind::Bookmark => {
                dataset.bookmarks.get(&version.name).cloned().filter(|v| v.guid == version.guid)
            },
        }
        .ok_or_else(|| ZfsError::DatasetDoesNotExist { path: version.full_path(filesystem) })?;

        let created = FilesystemVersion {
            kind: VersionKind::Bookmark,
            name: name.to_string(),
            guid: source.guid,
            create_txg: source.create_txg,
            creation: Utc::now(),
        };
        dataset.bookmarks.insert(name.to_string(), created.clone());
        Ok(created)
    }

    async fn destroy_bookmark(
        &self,
        ctx: &CancellationToken,
        filesystem: &str,
        bookmark: &str,
    ) -> Result<()> {
        Self::check_cancelled(ctx)?;
        let mut inner = self.inner.lock();
        let dataset = inner
            .datasets
            .get_mut(filesystem)
            .ok_or_else(|| ZfsError::DatasetDoesNotExist { path: filesystem.to_string() })?;
        if dataset.bookmarks.remove(bookmark).is_none() {
            return Err(ZfsError::DatasetDoesNotExist { path: format!("{filesystem}#{bookmark}") });
        }
        Ok(())
    }

    async fn destroy_snapshot(
        &self,
        ctx: &CancellationToken,
        filesystem: &str,
        snapshot: &str,
    ) -> Result<()> {
        Self::check_cancelled(ctx)?;
        let mut inner = self.inner.lock();
        let dataset = inner
            .datasets
            .get_mut(filesystem)
            .ok_or_else(|| ZfsError::DatasetDoesNotExist { path: filesystem.to_string() })?;
        let path = format!("{filesystem}@{snapshot}");
        let state = dataset
            .snapshots
            .get(snapshot)
            .ok_or_else(|| ZfsError::DatasetDoesNotExist { path: path.clone() })?;
        if !state.holds.is_empty() {
            return Err(ZfsError::DatasetBusy { path });
        }
        dataset.snapshots.remove(snapshot);
        Ok(())
    }

    async fn list_filesystem_versions(
        &self,
        ctx: &CancellationToken,
        filesystem: &str,
        options: ListVersionOptions,
    ) -> Result<Vec<FilesystemVersion>> {
        Self::check_cancelled(ctx)?;
        let inner = self.inner.lock();
        let dataset = inner
            .datasets
            .get(filesystem)
            .ok_or_else(|| ZfsError::DatasetDoesNotExist { path: filesystem.to_string() })?;
        let mut versions = Vec::new();
        if options.snapshots {
            versions.extend(dataset.snapshots.values().map(|s| s.version.clone()));
        }
        if options.bookmarks {
            versions.extend(dataset.bookmarks.values().cloned());
        }
        versions.sort_by_key(|v| v.create_txg);
        Ok(versions)
    }

    async fn list_holds(
        &self,
        ctx: &CancellationToken,
        filesystem: &str,
        snapshot: &str,
    ) -> Result<Vec<String>> {
        Self::check_cancelled(ctx)?;
        let inner = self.inner.lock();
        let state = inner
            .datasets
            .get(filesystem)
            .and_then(|d| d.snapshots.get(snapshot))
            .ok_or_else(|| ZfsError::DatasetDoesNotExist {
                path: format!("{filesystem}@{snapshot}"),
            })?;
        Ok(state.holds.iter().cloned().collect())
    }

    async fn get_filesystem_version(
        &self,
        ctx: &CancellationToken,
        path: &str,
    ) -> Result<FilesystemVersion> {
        Self::check_cancelled(ctx)?;
        let (fs, kind, name) = match (path.split_once('@'), path.split_once('#')) {
            (Some((fs, name)), None) => (fs, VersionKind::Snapshot, name),
            (None, Some((fs, name))) => (fs, VersionKind::Bookmark, name),
            _ => {
                return Err(ZfsError::InvalidName {
                    name: path.to_string(),
                    reason: "expected exactly one of '@' or '#'".to_string(),
                })
            },
        };
        let inner = self.inner.lock();
        let dataset = inner
            .datasets
            .get(fs)
            .ok_or_else(|| ZfsError::DatasetDoesNotExist { path: fs.to_string() })?;
        let found = match kind {
            VersionKind::Snapshot => dataset.snapshots.get(name).map(|s| s.version.clone()),
            VersionKind::Bookmark => dataset.bookmarks.get(name).cloned(),
        };
        found.ok_or_else(|| ZfsError::DatasetDoesNotExist { path: path.to_string() })
    }

    async fn get_mountpoint(
        &self,
        ctx: &CancellationToken,
        filesystem: &str,
    ) -> Result<Mountpoint> {
        Self::check_cancelled(ctx)?;
        let inner = self.inner.lock();
        let dataset = inner
            .datasets
            .get(filesystem)
            .ok_or_else(|| ZfsError::DatasetDoesNotExist { path: filesystem.to_string() })?;
        Ok(Mountpoint { mounted: dataset.mounted, path: dataset.mountpoint.clone() })
    }
}
