//! Replication cursor and last-received hold.
//!
//! The cursor is a per-(filesystem, job) bookmark recording the most
//! recently successfully replicated snapshot; it re-establishes an
//! incremental baseline after the common snapshot is pruned. The
//! last-received hold is its receiver-side counterpart, pinning the most
//! recent fully received snapshot.
//!
//! Both move with create-then-destroy semantics: the new marker is created
//! first, then prior markers of the same (filesystem, job) with a
//! different guid are destroyed. A crash between the two steps leaves two
//! markers — tolerable, collected on the next attempt — never zero, which
//! would lose resumability.

use snafu::{ResultExt, Snafu};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use zrepl_types::{FilesystemVersion, JobID};
use zrepl_zfs::{Zfs, ZfsError};

use crate::abstraction::{Abstraction, AbstractionKind, AbstractionKindSet};
use crate::gc::StaleDestroy;
use crate::list::list_abstractions_on_filesystem;
use crate::names::{self, NameError};

/// Error produced by cursor and hold operations.
#[derive(Debug, Snafu)]
pub enum CursorError {
    /// Deriving the marker name or tag failed.
    #[snafu(display("derive cursor marker name: {source}"))]
    CursorName {
        /// The underlying codec failure.
        source: NameError,
    },

    /// ZFS refused the marker operation.
    #[snafu(display("cursor: {source}"))]
    CursorZfs {
        /// The underlying ZFS failure.
        source: ZfsError,
    },
}

/// Result type for cursor operations.
pub type Result<T, E = CursorError> = std::result::Result<T, E>;

/// Idempotently creates the replication cursor for `target`.
///
/// # Errors
///
/// Surfaces name derivation and ZFS failures.
///
/// # Panics
///
/// Panics if `target` is not a snapshot; cursors record replicated
/// snapshots, never bookmarks.
pub async fn create_replication_cursor(
    ctx: &CancellationToken,
    zfs: &dyn Zfs,
    filesystem: &str,
    target: &FilesystemVersion,
    job: &JobID,
) -> Result<Abstraction> {
    assert!(
        target.is_snapshot(),
        "replication cursor target must be a snapshot, got {}",
        target.full_path(filesystem)
    );
    let name = names::replication_cursor_bookmark_name(filesystem, target.guid, job)
        .context(CursorNameSnafu)?;
    let bookmark = zfs.bookmark(ctx, filesystem, target, &name).await.context(CursorZfsSnafu)?;
    Ok(Abstraction::ReplicationCursor {
        filesystem: filesystem.to_string(),
        version: bookmark,
        job_id: job.clone(),
    })
}

/// Idempotently creates the tentative replication cursor for `target`.
///
/// Placed before a step commits; promoted to (rewritten as) a real cursor
/// on success and collected by GC otherwise. Exists only to give crash
/// recovery an unambiguous resume point.
///
/// # Errors
///
/// Surfaces name derivation and ZFS failures.
pub async fn create_tentative_replication_cursor(
    ctx: &CancellationToken,
    zfs: &dyn Zfs,
    filesystem: &str,
    target: &FilesystemVersion,
    job: &JobID,
) -> Result<Abstraction> {
    assert!(
        target.is_snapshot(),
        "tentative cursor target must be a snapshot, got {}",
        target.full_path(filesystem)
    );
    let name = names::tentative_cursor_bookmark_name(filesystem, target.guid, job)
        .context(CursorNameSnafu)?;
    let bookmark = zfs.bookmark(ctx, filesystem, target, &name).await.context(CursorZfsSnafu)?;
    Ok(Abstraction::TentativeReplicationCursor {
        filesystem: filesystem.to_string(),
        version: bookmark,
        job_id: job.clone(),
    })
}

/// Idempotently places the last-received hold on `target`.
///
/// # Errors
///
/// Surfaces tag derivation and ZFS failures.
///
/// # Panics
///
/// Panics if `target` is not a snapshot; holds cannot pin bookmarks.
pub async fn create_last_received_hold(
    ctx: &CancellationToken,
    zfs: &dyn Zfs,
    filesystem: &str,
    target: &FilesystemVersion,
    job: &JobID,
) -> Result<Abstraction> {
    assert!(
        target.is_snapshot(),
        "last-received hold target must be a snapshot, got {}",
        target.full_path(filesystem)
    );
    let tag = names::last_received_hold_tag(job).context(CursorNameSnafu)?;
    zfs.hold(ctx, filesystem, target, &tag).await.context(CursorZfsSnafu)?;
    Ok(Abstraction::LastReceivedHold {
        filesystem: filesystem.to_string(),
        version: target.clone(),
        job_id: job.clone(),
        tag,
    })
}

/// Moves the replication cursor to `target`: create new, then destroy
/// every prior cursor of this (filesystem, job) with a different guid.
///
/// Destroy failures are collected, not fatal — a surviving stale cursor is
/// outside every future live set and gets collected eventually.
///
/// # Errors
///
/// Fails only if creating the new cursor (or enumerating the old ones)
/// fails; the cursor invariant is then unchanged.
pub async fn move_replication_cursor(
    ctx: &CancellationToken,
    zfs: &dyn Zfs,
    filesystem: &str,
    target: &FilesystemVersion,
    job: &JobID,
) -> Result<(Abstraction, Vec<StaleDestroy>)> {
    let cursor = create_replication_cursor(ctx, zfs, filesystem, target, job).await?;
    let stale = destroy_prior(ctx, zfs, filesystem, job, AbstractionKind::ReplicationCursor, target.guid)
        .await?;
    Ok((cursor, stale))
}

/// Moves the last-received hold to `target`: hold new, then release the
/// hold from every other snapshot where this (filesystem, job) still
/// holds one.
///
/// # Errors
///
/// Fails only if placing the new hold (or enumerating the old ones) fails.
pub async fn move_last_received_hold(
    ctx: &CancellationToken,
    zfs: &dyn Zfs,
    filesystem: &str,
    target: &FilesystemVersion,
    job: &JobID,
) -> Result<(Abstraction, Vec<StaleDestroy>)> {
    let hold = create_last_received_hold(ctx, zfs, filesystem, target, job).await?;
    let stale =
        destroy_prior(ctx, zfs, filesystem, job, AbstractionKind::LastReceivedHold, target.guid)
            .await?;
    Ok((hold, stale))
}

/// Destroys this job's markers of `kind` on `filesystem` whose guid is not
/// `keep_guid`.
async fn destroy_prior(
    ctx: &CancellationToken,
    zfs: &dyn Zfs,
    filesystem: &str,
    job: &JobID,
    kind: AbstractionKind,
    keep_guid: u64,
) -> Result<Vec<StaleDestroy>> {
    let owned =
        list_abstractions_on_filesystem(ctx, zfs, filesystem, &AbstractionKindSet::single(kind))
            .await
            .context(CursorZfsSnafu)?;

    let mut destroyed = Vec::new();
    for abstraction in owned {
        if abstraction.job_id() != job || abstraction.version().guid == keep_guid {
            continue;
        }
        let result = abstraction.destroy(ctx, zfs).await;
        match &result {
            Ok(()) => debug!(marker = %abstraction, "destroyed prior marker after move"),
            Err(e) => warn!(
                marker = %abstraction,
                error = %e,
                "failed to destroy prior marker after move, leaving for collection"
            ),
        }
        destroyed.push(StaleDestroy { abstraction, result });
    }
    Ok(destroyed)
}
