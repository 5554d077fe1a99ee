//! Step-protection strategies.
//!
//! Before each send step the outer engine calls [`pre_send`] with the
//! configured [`StepProtectionStrategyKind`]; the returned abstractions are
//! the markers that keep the step's `from` and `to` versions alive while
//! the stream is in flight. All strategies are idempotent on retry:
//! replaying `pre_send` with the same arguments reuses the existing markers
//! and never fails because they already exist.

use snafu::{ResultExt, Snafu};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use zrepl_types::{FilesystemVersion, JobID, StepProtectionStrategyKind};
use zrepl_zfs::{Zfs, ZfsError};

use crate::abstraction::Abstraction;
use crate::names::{self, NameError};

/// The `(from, to)` pair of one send step.
///
/// `from` is absent for full sends. `to` is always a snapshot; `from` may
/// be a bookmark when the common snapshot has already been pruned.
#[derive(Debug, Clone)]
pub struct SendArgs {
    /// Dataset being sent.
    pub filesystem: String,
    /// Incremental source, if any.
    pub from: Option<FilesystemVersion>,
    /// Step target.
    pub to: FilesystemVersion,
}

/// Error produced while materializing step protection.
#[derive(Debug, Snafu)]
pub enum StepError {
    /// Deriving a marker name or tag failed; configuration-level problem.
    #[snafu(display("derive step marker name: {source}"))]
    MarkerName {
        /// The underlying codec failure.
        source: NameError,
    },

    /// ZFS refused a marker operation.
    #[snafu(display("step protection: {source}"))]
    StepZfs {
        /// The underlying ZFS failure.
        source: ZfsError,
    },
}

/// Result type for step-protection operations.
pub type Result<T, E = StepError> = std::result::Result<T, E>;

/// Materializes the markers protecting the step described by `args`.
///
/// - `none`: creates nothing; returns the empty list.
/// - `bookmarks`: step bookmark on `from` (if present) and on `to`. A pool
///   that cannot bookmark a bookmark downgrades the `from` marker to
///   nothing (logged; the engine will not destroy the `from` bookmark
///   while the step is active). The same condition on `to` fails the step:
///   `to` is always a snapshot, so the error there means the caller broke
///   the contract.
/// - `holds`: snapshot hold on `from` and `to`; a bookmark `from` falls
///   back to the step-bookmark protection for that version only.
///
/// # Errors
///
/// Surfaces marker-name derivation failures and ZFS errors other than the
/// tolerated bookmark-cloning downgrade.
pub async fn pre_send(
    ctx: &CancellationToken,
    zfs: &dyn Zfs,
    strategy: StepProtectionStrategyKind,
    job: &JobID,
    args: &SendArgs,
) -> Result<Vec<Abstraction>> {
    match strategy {
        StepProtectionStrategyKind::None => Ok(Vec::new()),
        StepProtectionStrategyKind::Bookmarks => pre_send_bookmarks(ctx, zfs, job, args).await,
        StepProtectionStrategyKind::Holds => pre_send_holds(ctx, zfs, job, args).await,
    }
}

async fn pre_send_bookmarks(
    ctx: &CancellationToken,
    zfs: &dyn Zfs,
    job: &JobID,
    args: &SendArgs,
) -> Result<Vec<Abstraction>> {
    let mut keep = Vec::new();
    if let Some(from) = &args.from {
        match bookmark_step(ctx, zfs, &args.filesystem, from, job).await {
            Ok(marker) => keep.push(marker),
            Err(StepError::StepZfs { source: ZfsError::BookmarkCloningNotSupported }) => {
                info!(
                    strategy = %StepProtectionStrategyKind::Bookmarks,
                    bookmark = %from.full_path(&args.filesystem),
                    "bookmark cloning is not supported, speculating that the incremental \
                     source will not be destroyed until the step is done"
                );
            },
            Err(e) => return Err(e),
        }
    }
    keep.push(bookmark_step(ctx, zfs, &args.filesystem, &args.to, job).await?);
    Ok(keep)
}

async fn pre_send_holds(
    ctx: &CancellationToken,
    zfs: &dyn Zfs,
    job: &JobID,
    args: &SendArgs,
) -> Result<Vec<Abstraction>> {
    let mut keep = Vec::new();
    if let Some(from) = &args.from {
        if from.is_bookmark() {
            debug!(
                strategy = %StepProtectionStrategyKind::Holds,
                from = %from.full_path(&args.filesystem),
                "cannot hold a bookmark, falling back to a step bookmark"
            );
            match bookmark_step(ctx, zfs, &args.filesystem, from, job).await {
                Ok(marker) => keep.push(marker),
                Err(StepError::StepZfs { source: ZfsError::BookmarkCloningNotSupported }) => {
                    info!(
                        strategy = %StepProtectionStrategyKind::Holds,
                        bookmark = %from.full_path(&args.filesystem),
                        "bookmark cloning is not supported, speculating that the incremental \
                         source will not be destroyed until the step is done"
                    );
                },
                Err(e) => return Err(e),
            }
        } else {
            keep.push(hold_step(ctx, zfs, &args.filesystem, from, job).await?);
        }
    }
    keep.push(hold_step(ctx, zfs, &args.filesystem, &args.to, job).await?);
    Ok(keep)
}

/// Idempotently holds `version` with this job's step hold tag.
///
/// # Errors
///
/// Surfaces tag derivation and ZFS failures.
///
/// # Panics
///
/// Panics if `version` is not a snapshot; holds cannot pin bookmarks, and
/// callers route those through [`bookmark_step`].
pub async fn hold_step(
    ctx: &CancellationToken,
    zfs: &dyn Zfs,
    filesystem: &str,
    version: &FilesystemVersion,
    job: &JobID,
) -> Result<Abstraction> {
    assert!(
        version.is_snapshot(),
        "hold_step requires a snapshot, got {}",
        version.full_path(filesystem)
    );
    let tag = names::step_hold_tag(job).context(MarkerNameSnafu)?;
    zfs.hold(ctx, filesystem, version, &tag).await.context(StepZfsSnafu)?;
    Ok(Abstraction::StepHold {
        filesystem: filesystem.to_string(),
        version: version.clone(),
        job_id: job.clone(),
        tag,
    })
}

/// Idempotently creates this job's step bookmark for `version`.
///
/// # Errors
///
/// Returns the distinguished [`ZfsError::BookmarkCloningNotSupported`]
/// (wrapped in [`StepError::StepZfs`]) when `version` is a bookmark on a
/// pool without the feature; callers decide whether to tolerate it.
pub async fn bookmark_step(
    ctx: &CancellationToken,
    zfs: &dyn Zfs,
    filesystem: &str,
    version: &FilesystemVersion,
    job: &JobID,
) -> Result<Abstraction> {
    let name = names::step_bookmark_name(filesystem, version.guid, job).context(MarkerNameSnafu)?;
    let bookmark = zfs.bookmark(ctx, filesystem, version, &name).await.context(StepZfsSnafu)?;
    Ok(Abstraction::StepBookmark {
        filesystem: filesystem.to_string(),
        version: bookmark,
        job_id: job.clone(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use zrepl_zfs::{ListVersionOptions, MemoryZfs};

    use super::*;
    use crate::abstraction::AbstractionKind;

    const FS: &str = "pool/sender";

    fn ctx() -> CancellationToken {
        CancellationToken::new()
    }

    fn job() -> JobID {
        JobID::must("sender-job")
    }

    struct Fixture {
        zfs: MemoryZfs,
        snap1: FilesystemVersion,
        snap2: FilesystemVersion,
    }

    fn fixture() -> Fixture {
        let zfs = MemoryZfs::new();
        zfs.create_filesystem(FS);
        let snap1 = zfs.snapshot(FS, "1");
        let snap2 = zfs.snapshot(FS, "2");
        Fixture { zfs, snap1, snap2 }
    }

    fn incremental(f: &Fixture) -> SendArgs {
        SendArgs { filesystem: FS.to_string(), from: Some(f.snap1.clone()), to: f.snap2.clone() }
    }

    #[tokio::test]
    async fn none_strategy_creates_nothing() {
        let f = fixture();
        let keep =
            pre_send(&ctx(), &f.zfs, StepProtectionStrategyKind::None, &job(), &incremental(&f))
                .await
                .unwrap();
        assert!(keep.is_empty());
        let bms =
            f.zfs.list_filesystem_versions(&ctx(), FS, ListVersionOptions::bookmarks_only()).await.unwrap();
        assert!(bms.is_empty());
        assert!(f.zfs.list_holds(&ctx(), FS, "2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn holds_strategy_pins_both_endpoints() {
        let f = fixture();
        let keep =
            pre_send(&ctx(), &f.zfs, StepProtectionStrategyKind::Holds, &job(), &incremental(&f))
                .await
                .unwrap();
        assert_eq!(keep.len(), 2);
        assert!(keep.iter().all(|a| a.kind() == AbstractionKind::StepHold));
        for snap in ["1", "2"] {
            let err = f.zfs.destroy_snapshot(&ctx(), FS, snap).await.unwrap_err();
            assert!(err.to_string().contains("dataset is busy"), "@{snap} must be pinned");
        }
    }

    #[tokio::test]
    async fn full_send_protects_only_to() {
        let f = fixture();
        let args = SendArgs { filesystem: FS.to_string(), from: None, to: f.snap2.clone() };
        let keep =
            pre_send(&ctx(), &f.zfs, StepProtectionStrategyKind::Holds, &job(), &args).await.unwrap();
        assert_eq!(keep.len(), 1);
        assert_eq!(keep[0].version().guid, f.snap2.guid);
        assert!(f.zfs.list_holds(&ctx(), FS, "1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bookmarks_strategy_bookmarks_both_endpoints() {
        let f = fixture();
        let keep = pre_send(
            &ctx(),
            &f.zfs,
            StepProtectionStrategyKind::Bookmarks,
            &job(),
            &incremental(&f),
        )
        .await
        .unwrap();
        assert_eq!(keep.len(), 2);
        assert!(keep.iter().all(|a| a.kind() == AbstractionKind::StepBookmark));
        let guids: Vec<u64> = keep.iter().map(|a| a.version().guid).collect();
        assert!(guids.contains(&f.snap1.guid) && guids.contains(&f.snap2.guid));
        // bookmarks do not pin snapshots against destruction
        f.zfs.destroy_snapshot(&ctx(), FS, "1").await.unwrap();
    }

    #[tokio::test]
    async fn holds_strategy_falls_back_to_bookmark_for_bookmark_from() {
        let f = fixture();
        let from_bm = f.zfs.raw_bookmark(FS, "1", "base");
        let args =
            SendArgs { filesystem: FS.to_string(), from: Some(from_bm), to: f.snap2.clone() };
        let keep =
            pre_send(&ctx(), &f.zfs, StepProtectionStrategyKind::Holds, &job(), &args).await.unwrap();
        assert_eq!(keep.len(), 2);
        assert_eq!(keep[0].kind(), AbstractionKind::StepBookmark);
        assert_eq!(keep[0].version().guid, f.snap1.guid);
        assert_eq!(keep[1].kind(), AbstractionKind::StepHold);
        assert_eq!(keep[1].version().guid, f.snap2.guid);
    }

    #[tokio::test]
    async fn bookmark_cloning_unsupported_downgrades_from_marker() {
        for strategy in [StepProtectionStrategyKind::Bookmarks, StepProtectionStrategyKind::Holds] {
            let f = fixture();
            f.zfs.set_bookmark_cloning_supported(false);
            let from_bm = f.zfs.raw_bookmark(FS, "1", "base");
            let args =
                SendArgs { filesystem: FS.to_string(), from: Some(from_bm), to: f.snap2.clone() };
            let keep = pre_send(&ctx(), &f.zfs, strategy, &job(), &args).await.unwrap();
            // the step proceeds with the `to` marker only
            assert_eq!(keep.len(), 1, "strategy {strategy}");
            assert_eq!(keep[0].version().guid, f.snap2.guid);
        }
    }

    #[tokio::test]
    async fn bookmark_cloning_unsupported_on_to_fails_the_step() {
        let f = fixture();
        f.zfs.set_bookmark_cloning_supported(false);
        let to_bm = f.zfs.raw_bookmark(FS, "2", "target");
        let args = SendArgs { filesystem: FS.to_string(), from: None, to: to_bm };
        let err = pre_send(&ctx(), &f.zfs, StepProtectionStrategyKind::Bookmarks, &job(), &args)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StepError::StepZfs { source: ZfsError::BookmarkCloningNotSupported }
        ));
    }

    #[tokio::test]
    async fn pre_send_is_idempotent() {
        for strategy in [StepProtectionStrategyKind::Holds, StepProtectionStrategyKind::Bookmarks] {
            let f = fixture();
            let args = incremental(&f);
            let first = pre_send(&ctx(), &f.zfs, strategy, &job(), &args).await.unwrap();
            let second = pre_send(&ctx(), &f.zfs, strategy, &job(), &args).await.unwrap();
            assert_eq!(first.len(), second.len(), "strategy {strategy}");
            for (a, b) in first.iter().zip(second.iter()) {
                assert!(a.equals(b), "strategy {strategy}: {a} != {b}");
            }
            // no duplicate markers materialized
            let bms = f
                .zfs
                .list_filesystem_versions(&ctx(), FS, ListVersionOptions::bookmarks_only())
                .await
                .unwrap();
            let holds = f.zfs.list_holds(&ctx(), FS, "2").await.unwrap();
            match strategy {
                StepProtectionStrategyKind::Holds => {
                    assert_eq!(holds.len(), 1);
                    assert!(bms.is_empty());
                },
                StepProtectionStrategyKind::Bookmarks => {
                    assert_eq!(bms.len(), 2);
                    assert!(holds.is_empty());
                },
                StepProtectionStrategyKind::None => unreachable!(),
            }
        }
    }

    #[tokio::test]
    #[should_panic(expected = "hold_step requires a snapshot")]
    async fn hold_step_panics_on_bookmark() {
        let f = fixture();
        let bm = f.zfs.raw_bookmark(FS, "1", "b");
        let _ = hold_step(&ctx(), &f.zfs, FS, &bm, &job()).await;
    }
}
