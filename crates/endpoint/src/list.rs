//! Enumeration of durable markers.
//!
//! [`list_abstractions`] scans the datasets selected by a query for every
//! marker this engine understands, classifies them through the extractors,
//! and filters by owning job and kind set. Per-filesystem problems
//! (permissions, a dataset destroyed mid-scan) are downgraded into a side
//! channel so one broken dataset does not hide the others; cancellation
//! and filter-resolution failures are fatal.

use std::num::NonZeroUsize;
use std::sync::Arc;

use snafu::Snafu;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use zrepl_types::{FilesystemFilter, JobID, VersionKind};
use zrepl_zfs::{ListVersionOptions, Zfs, ZfsError};

use crate::abstraction::{
    abstraction_from_bookmark, abstraction_from_hold, Abstraction, AbstractionKindSet,
};
use crate::semaphore::Semaphore;

/// What to enumerate.
#[derive(Debug, Clone)]
pub struct ListQuery {
    /// Datasets to scan.
    pub filesystems: FilesystemFilter,
    /// If set, only markers owned by this job.
    pub job_id: Option<JobID>,
    /// Marker kinds of interest.
    pub kinds: AbstractionKindSet,
    /// Upper bound on datasets scanned concurrently.
    pub concurrency: NonZeroUsize,
}

/// A non-fatal, per-dataset listing failure.
///
/// Callers decide whether to tolerate these; the remaining datasets'
/// results are unaffected.
#[derive(Debug)]
pub struct PerFilesystemError {
    /// The dataset that could not be scanned.
    pub filesystem: String,
    /// What went wrong.
    pub source: ZfsError,
}

impl std::fmt::Display for PerFilesystemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "list {}: {}", self.filesystem, self.source)
    }
}

/// Fatal listing failure.
#[derive(Debug, Snafu)]
pub enum ListError {
    /// Resolving the filesystem filter against the host failed.
    #[snafu(display("resolve filesystem filter: {source}"))]
    ResolveFilter {
        /// The underlying ZFS failure.
        source: ZfsError,
    },

    /// The caller's cancellation token fired.
    #[snafu(display("listing cancelled"))]
    Cancelled,

    /// A listing task panicked or was aborted.
    #[snafu(display("listing task failed: {message}"))]
    TaskFailed {
        /// Join error description.
        message: String,
    },
}

/// Result type for listing operations.
pub type Result<T, E = ListError> = std::result::Result<T, E>;

/// Enumerates all markers matching `query`.
///
/// Fans out across datasets bounded by `query.concurrency`; results are
/// aggregated in filesystem-name order regardless of completion order,
/// and within one dataset in creation-txg order.
///
/// # Errors
///
/// Fatal errors are filter resolution failures and cancellation. Everything
/// per-dataset lands in the second tuple element.
pub async fn list_abstractions(
    ctx: &CancellationToken,
    zfs: &Arc<dyn Zfs>,
    query: &ListQuery,
) -> Result<(Vec<Abstraction>, Vec<PerFilesystemError>)> {
    let mut filesystems = match &query.filesystems {
        FilesystemFilter::Single(fs) => vec![fs.clone()],
        filter @ FilesystemFilter::Set(_) => {
            let all = zfs.list_filesystems(ctx).await.map_err(|source| match source {
                ZfsError::Cancelled => ListError::Cancelled,
                source => ListError::ResolveFilter { source },
            })?;
            all.into_iter().filter(|fs| filter.matches(fs)).collect()
        },
    };
    filesystems.sort();

    let semaphore = Semaphore::new(query.concurrency);
    let mut tasks = Vec::with_capacity(filesystems.len());
    for fs in filesystems {
        let ctx = ctx.clone();
        let zfs = Arc::clone(zfs);
        let kinds = query.kinds.clone();
        let semaphore = semaphore.clone();
        tasks.push((
            fs.clone(),
            tokio::spawn(async move {
                let _permit = semaphore.acquire(&ctx).await.map_err(|_| ZfsError::Cancelled)?;
                list_abstractions_on_filesystem(&ctx, zfs.as_ref(), &fs, &kinds).await
            }),
        ));
    }

    let mut results = Vec::new();
    let mut per_fs_errors = Vec::new();
    for (fs, task) in tasks {
        match task.await {
            Ok(Ok(abstractions)) => results.extend(abstractions),
            Ok(Err(ZfsError::Cancelled)) => return Err(ListError::Cancelled),
            Ok(Err(source)) => {
                warn!(filesystem = %fs, error = %source, "skipping dataset in abstraction listing");
                per_fs_errors.push(PerFilesystemError { filesystem: fs, source });
            },
            Err(join_error) => {
                return Err(ListError::TaskFailed { message: join_error.to_string() })
            },
        }
    }

    if let Some(job) = &query.job_id {
        results.retain(|a| a.job_id() == job);
    }
    Ok((results, per_fs_errors))
}

/// Scans one dataset for markers of the requested kinds.
///
/// Bookmarks and snapshot holds are enumerated as needed by `kinds`, run
/// through the extractors, and foreign objects dropped. Results are in
/// creation-txg order.
///
/// # Errors
///
/// Surfaces ZFS failures for the caller to downgrade or propagate.
pub async fn list_abstractions_on_filesystem(
    ctx: &CancellationToken,
    zfs: &dyn Zfs,
    filesystem: &str,
    kinds: &AbstractionKindSet,
) -> std::result::Result<Vec<Abstraction>, ZfsError> {
    let options = ListVersionOptions {
        snapshots: kinds.wants_holds(),
        bookmarks: kinds.wants_bookmarks(),
    };
    let mut out = Vec::new();
    if !options.snapshots && !options.bookmarks {
        return Ok(out);
    }

    let versions = zfs.list_filesystem_versions(ctx, filesystem, options).await?;
    for version in versions {
        match version.kind {
            VersionKind::Bookmark => {
                if let Some(a) = abstraction_from_bookmark(filesystem, &version) {
                    if kinds.contains(a.kind()) {
                        out.push(a);
                    }
                }
            },
            VersionKind::Snapshot => {
                for tag in zfs.list_holds(ctx, filesystem, &version.name).await? {
                    if let Some(a) = abstraction_from_hold(filesystem, &version, &tag) {
                        if kinds.contains(a.kind()) {
                            out.push(a);
                        }
                    }
                }
            },
        }
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use zrepl_zfs::MemoryZfs;

    use super::*;
    use crate::abstraction::AbstractionKind;
    use crate::names;

    fn ctx() -> CancellationToken {
        CancellationToken::new()
    }

    fn concurrency(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    async fn seeded_pool() -> (Arc<dyn Zfs>, Arc<MemoryZfs>) {
        let zfs = Arc::new(MemoryZfs::new());
        let sjid = JobID::must("sender-job");
        let ojid = JobID::must("other-job");
        for fs in ["pool/a", "pool/b"] {
            zfs.create_filesystem(fs);
            let snap = zfs.snapshot(fs, "1");
            // one marker of each ownership per dataset, plus a foreign bookmark
            let cursor = names::replication_cursor_bookmark_name(fs, snap.guid, &sjid).unwrap();
            zfs.bookmark(&ctx(), fs, &snap, &cursor).await.unwrap();
            let other = names::replication_cursor_bookmark_name(fs, snap.guid, &ojid).unwrap();
            zfs.bookmark(&ctx(), fs, &snap, &other).await.unwrap();
            zfs.raw_bookmark(fs, "1", "manual");
            zfs.hold(&ctx(), fs, &snap, &names::step_hold_tag(&sjid).unwrap()).await.unwrap();
            zfs.hold(&ctx(), fs, &snap, "unrelated-hold").await.unwrap();
        }
        (Arc::clone(&zfs) as Arc<dyn Zfs>, zfs)
    }

    #[tokio::test]
    async fn lists_only_our_markers() {
        let (zfs, _mem) = seeded_pool().await;
        let query = ListQuery {
            filesystems: FilesystemFilter::single("pool/a"),
            job_id: None,
            kinds: AbstractionKindSet::all(),
            concurrency: concurrency(1),
        };
        let (abstractions, errors) = list_abstractions(&ctx(), &zfs, &query).await.unwrap();
        assert!(errors.is_empty());
        // two cursors (two jobs) + one step hold; foreign bookmark and
        // unrelated hold ignored
        assert_eq!(abstractions.len(), 3);
        assert!(abstractions.iter().all(|a| a.filesystem() == "pool/a"));
    }

    #[tokio::test]
    async fn filters_by_job_and_kind() {
        let (zfs, _mem) = seeded_pool().await;
        let query = ListQuery {
            filesystems: FilesystemFilter::single("pool/a"),
            job_id: Some(JobID::must("sender-job")),
            kinds: AbstractionKindSet::single(AbstractionKind::ReplicationCursor),
            concurrency: concurrency(1),
        };
        let (abstractions, errors) = list_abstractions(&ctx(), &zfs, &query).await.unwrap();
        assert!(errors.is_empty());
        assert_eq!(abstractions.len(), 1);
        assert_eq!(abstractions[0].kind(), AbstractionKind::ReplicationCursor);
        assert_eq!(abstractions[0].job_id(), &JobID::must("sender-job"));
    }

    #[tokio::test]
    async fn fan_out_aggregates_in_filesystem_name_order() {
        let (zfs, _mem) = seeded_pool().await;
        for concurrency_limit in [1, 2, 8] {
            let query = ListQuery {
                filesystems: FilesystemFilter::set(["pool/b", "pool/a"]),
                job_id: Some(JobID::must("sender-job")),
                kinds: AbstractionKindSet::all(),
                concurrency: concurrency(concurrency_limit),
            };
            let (abstractions, errors) = list_abstractions(&ctx(), &zfs, &query).await.unwrap();
            assert!(errors.is_empty());
            let filesystems: Vec<&str> =
                abstractions.iter().map(|a| a.filesystem()).collect();
            let mut sorted = filesystems.clone();
            sorted.sort_unstable();
            assert_eq!(filesystems, sorted, "concurrency={concurrency_limit}");
            assert_eq!(abstractions.len(), 4);
        }
    }

    #[tokio::test]
    async fn missing_dataset_is_a_per_filesystem_error() {
        let (zfs, _mem) = seeded_pool().await;
        let query = ListQuery {
            filesystems: FilesystemFilter::single("pool/missing"),
            job_id: None,
            kinds: AbstractionKindSet::all(),
            concurrency: concurrency(1),
        };
        let (abstractions, errors) = list_abstractions(&ctx(), &zfs, &query).await.unwrap();
        assert!(abstractions.is_empty());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].filesystem, "pool/missing");
        assert!(errors[0].source.is_not_found());
    }

    #[tokio::test]
    async fn empty_kind_set_lists_nothing() {
        let (zfs, _mem) = seeded_pool().await;
        let query = ListQuery {
            filesystems: FilesystemFilter::single("pool/a"),
            job_id: None,
            kinds: AbstractionKindSet::empty(),
            concurrency: concurrency(1),
        };
        let (abstractions, errors) = list_abstractions(&ctx(), &zfs, &query).await.unwrap();
        assert!(abstractions.is_empty());
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn cancellation_is_fatal() {
        let (zfs, _mem) = seeded_pool().await;
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let query = ListQuery {
            filesystems: FilesystemFilter::single("pool/a"),
            job_id: None,
            kinds: AbstractionKindSet::all(),
            concurrency: concurrency(1),
        };
        let err = list_abstractions(&cancelled, &zfs, &query).await.unwrap_err();
        assert!(matches!(err, ListError::Cancelled));
    }
}
