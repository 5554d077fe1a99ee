//! The sending endpoint.
//!
//! Thin façade the outer engine drives: [`Sender::pre_send`] before each
//! send step materializes the step's protection markers and the tentative
//! cursor, [`Sender::after_step`] advances the replication cursor (on
//! success) and collects everything this job no longer needs. Per-
//! filesystem serialization of these calls is the outer engine's
//! responsibility; the sender only assumes it.

use std::sync::Arc;

use snafu::{ResultExt, Snafu};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use zrepl_types::{ConfigError, JobID, SenderConfig};
use zrepl_zfs::{Zfs, ZfsError};

use crate::abstraction::Abstraction;
use crate::cache::SendAbstractionsCache;
use crate::cursor::{
    create_replication_cursor, create_tentative_replication_cursor, CursorError,
};
use crate::gc::{destroy_stale_abstractions, StaleDestroy};
use crate::names;
use crate::step::{pre_send, SendArgs, StepError};

/// Error produced by sender operations.
#[derive(Debug, Snafu)]
pub enum SenderError {
    /// The step's filesystem is outside this sender's filter.
    #[snafu(display("filesystem {filesystem:?} is not covered by this sender's filter"))]
    FilesystemNotAllowed {
        /// The rejected dataset.
        filesystem: String,
    },

    /// Materializing step protection failed.
    #[snafu(display("{source}"))]
    Protection {
        /// The underlying step-protection failure.
        source: StepError,
    },

    /// A cursor operation failed.
    #[snafu(display("{source}"))]
    Cursor {
        /// The underlying cursor failure.
        source: CursorError,
    },

    /// Enumerating this job's markers for collection failed.
    #[snafu(display("collect stale abstractions: {source}"))]
    Collect {
        /// The underlying listing failure.
        source: ZfsError,
    },
}

/// What [`Sender::after_step`] did.
#[derive(Debug)]
pub struct StepCleanup {
    /// The advanced replication cursor, when the step completed.
    pub cursor: Option<Abstraction>,
    /// Stale markers destroyed (or attempted; failures are non-fatal and
    /// retried on the next attempt).
    pub collected: Vec<StaleDestroy>,
}

/// The sending endpoint of one replication job.
pub struct Sender {
    config: SenderConfig,
    zfs: Arc<dyn Zfs>,
    cache: SendAbstractionsCache,
}

impl Sender {
    /// Constructs the sender, validating that the configured job id can be
    /// embedded in every marker this sender will create.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MarkerName`] if the derived step hold tag
    /// fails ZFS validation; the job refuses to start.
    pub fn new(config: SenderConfig, zfs: Arc<dyn Zfs>) -> Result<Self, ConfigError> {
        names::step_hold_tag(&config.job_id)
            .map_err(|e| ConfigError::MarkerName { message: e.to_string() })?;
        Ok(Self { config, zfs, cache: SendAbstractionsCache::new() })
    }

    /// This sender's job identity.
    pub fn job_id(&self) -> &JobID {
        &self.config.job_id
    }

    /// The sender's marker cache; exposed so callers can invalidate after
    /// out-of-band dataset mutations.
    pub fn cache(&self) -> &SendAbstractionsCache {
        &self.cache
    }

    /// The markers that keep the in-flight step alive: the configured
    /// protection strategy's markers plus the tentative replication cursor
    /// on `to`.
    async fn step_markers(
        &self,
        ctx: &CancellationToken,
        args: &SendArgs,
    ) -> Result<Vec<Abstraction>, SenderError> {
        let mut keep =
            pre_send(ctx, self.zfs.as_ref(), self.config.step_protection, &self.config.job_id, args)
                .await
                .context(ProtectionSnafu)?;
        keep.push(
            create_tentative_replication_cursor(
                ctx,
                self.zfs.as_ref(),
                &args.filesystem,
                &args.to,
                &self.config.job_id,
            )
            .await
            .context(CursorSnafu)?,
        );
        for marker in &keep {
            self.cache.record(marker);
        }
        Ok(keep)
    }

    /// Materializes protection for the step described by `args`.
    ///
    /// Idempotent: a retry of the same step reuses the existing markers.
    /// Returns the keep set for this attempt.
    ///
    /// # Errors
    ///
    /// Surfaces filter violations, marker-name derivation failures, and
    /// ZFS errors other than the tolerated bookmark-cloning downgrade.
    pub async fn pre_send(
        &self,
        ctx: &CancellationToken,
        args: &SendArgs,
    ) -> Result<Vec<Abstraction>, SenderError> {
        if !self.config.filesystems.matches(&args.filesystem) {
            return Err(SenderError::FilesystemNotAllowed { filesystem: args.filesystem.clone() });
        }
        let keep = self.step_markers(ctx, args).await?;
        debug!(
            filesystem = %args.filesystem,
            step_to = %args.to,
            markers = keep.len(),
            "step protection in place"
        );
        Ok(keep)
    }

    /// Finishes a replication attempt for the step described by `args`.
    ///
    /// On a completed step the replication cursor advances to `args.to`
    /// and the live set is that cursor alone; on an incomplete step the
    /// live set is the step's own markers (recomputed idempotently), so
    /// the next attempt can resume. Everything else this job owns on the
    /// filesystem — per the cached view — is destroyed; the cursor move
    /// is realized as create-new (here) then destroy-old (by the
    /// collector), so a crash in between leaves two cursors, never zero.
    ///
    /// # Errors
    ///
    /// Fails if creating the cursor or listing the markers fails;
    /// individual destroy failures are reported in
    /// [`StepCleanup::collected`] instead.
    pub async fn after_step(
        &self,
        ctx: &CancellationToken,
        args: &SendArgs,
        completed: bool,
    ) -> Result<StepCleanup, SenderError> {
        if !self.config.filesystems.matches(&args.filesystem) {
            return Err(SenderError::FilesystemNotAllowed { filesystem: args.filesystem.clone() });
        }

        let (cursor, live) = if completed {
            let cursor = create_replication_cursor(
                ctx,
                self.zfs.as_ref(),
                &args.filesystem,
                &args.to,
                &self.config.job_id,
            )
            .await
            .context(CursorSnafu)?;
            self.cache.record(&cursor);
            (Some(cursor.clone()), vec![cursor])
        } else {
            (None, self.step_markers(ctx, args).await?)
        };

        let collected = destroy_stale_abstractions(
            ctx,
            self.zfs.as_ref(),
            &self.cache,
            &args.filesystem,
            &self.config.job_id,
            &live,
        )
        .await
        .context(CollectSnafu)?;

        Ok(StepCleanup { cursor, collected })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use zrepl_types::{FilesystemFilter, StepProtectionStrategyKind};
    use zrepl_zfs::MemoryZfs;

    use super::*;
    use crate::abstraction::{AbstractionKind, AbstractionKindSet};
    use crate::list::list_abstractions_on_filesystem;

    const FS: &str = "pool/sender";

    fn ctx() -> CancellationToken {
        CancellationToken::new()
    }

    fn sender(zfs: &Arc<MemoryZfs>, strategy: StepProtectionStrategyKind) -> Sender {
        let config = SenderConfig::builder()
            .filesystems(FilesystemFilter::single(FS))
            .encrypt(false)
            .job_id(JobID::must("sender-job"))
            .step_protection(strategy)
            .build();
        Sender::new(config, Arc::clone(zfs) as Arc<dyn Zfs>).unwrap()
    }

    async fn owned_markers(zfs: &MemoryZfs, job: &JobID) -> Vec<Abstraction> {
        list_abstractions_on_filesystem(&ctx(), zfs, FS, &AbstractionKindSet::all())
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.job_id() == job)
            .collect()
    }

    #[tokio::test]
    async fn pre_send_places_strategy_markers_and_tentative_cursor() {
        let zfs = Arc::new(MemoryZfs::new());
        zfs.create_filesystem(FS);
        let snap1 = zfs.snapshot(FS, "1");
        let snap2 = zfs.snapshot(FS, "2");
        let sender = sender(&zfs, StepProtectionStrategyKind::Holds);

        let args =
            SendArgs { filesystem: FS.to_string(), from: Some(snap1), to: snap2.clone() };
        let keep = sender.pre_send(&ctx(), &args).await.unwrap();
        assert_eq!(keep.len(), 3);
        assert_eq!(
            keep.iter().filter(|a| a.kind() == AbstractionKind::StepHold).count(),
            2
        );
        assert_eq!(
            keep.iter()
                .filter(|a| a.kind() == AbstractionKind::TentativeReplicationCursor)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn pre_send_rejects_filesystem_outside_filter() {
        let zfs = Arc::new(MemoryZfs::new());
        zfs.create_filesystem(FS);
        zfs.create_filesystem("pool/other");
        let snap = zfs.snapshot("pool/other", "1");
        let sender = sender(&zfs, StepProtectionStrategyKind::Holds);

        let args = SendArgs { filesystem: "pool/other".to_string(), from: None, to: snap };
        let err = sender.pre_send(&ctx(), &args).await.unwrap_err();
        assert!(matches!(err, SenderError::FilesystemNotAllowed { .. }));
    }

    #[tokio::test]
    async fn completed_step_leaves_only_the_cursor() {
        let zfs = Arc::new(MemoryZfs::new());
        zfs.create_filesystem(FS);
        let snap1 = zfs.snapshot(FS, "1");
        let snap2 = zfs.snapshot(FS, "2");
        let sender = sender(&zfs, StepProtectionStrategyKind::Holds);
        let job = sender.job_id().clone();

        let args =
            SendArgs { filesystem: FS.to_string(), from: Some(snap1), to: snap2.clone() };
        sender.pre_send(&ctx(), &args).await.unwrap();
        let cleanup = sender.after_step(&ctx(), &args, true).await.unwrap();

        let cursor = cleanup.cursor.expect("completed step advances the cursor");
        assert_eq!(cursor.version().guid, snap2.guid);
        assert!(cleanup.collected.iter().all(StaleDestroy::succeeded));

        let remaining = owned_markers(&zfs, &job).await;
        assert_eq!(remaining.len(), 1, "markers left: {remaining:?}");
        assert_eq!(remaining[0].kind(), AbstractionKind::ReplicationCursor);
        // both snapshots are prunable again
        zfs.destroy_snapshot(&ctx(), FS, "1").await.unwrap();
        zfs.destroy_snapshot(&ctx(), FS, "2").await.unwrap();
    }

    #[tokio::test]
    async fn incomplete_step_keeps_its_own_markers() {
        let zfs = Arc::new(MemoryZfs::new());
        zfs.create_filesystem(FS);
        let snap1 = zfs.snapshot(FS, "1");
        let snap2 = zfs.snapshot(FS, "2");
        let sender = sender(&zfs, StepProtectionStrategyKind::Holds);
        let job = sender.job_id().clone();

        let args =
            SendArgs { filesystem: FS.to_string(), from: Some(snap1.clone()), to: snap2.clone() };
        sender.pre_send(&ctx(), &args).await.unwrap();
        let cleanup = sender.after_step(&ctx(), &args, false).await.unwrap();
        assert!(cleanup.cursor.is_none());

        // the in-flight step's markers survive: @2 stays pinned for resume
        let err = zfs.destroy_snapshot(&ctx(), FS, "2").await.unwrap_err();
        assert!(err.to_string().contains("dataset is busy"));
        let remaining = owned_markers(&zfs, &job).await;
        assert_eq!(remaining.len(), 3);
    }

    #[tokio::test]
    async fn strategy_change_between_attempts_collects_old_strategy_markers() {
        let zfs = Arc::new(MemoryZfs::new());
        zfs.create_filesystem(FS);
        let snap1 = zfs.snapshot(FS, "1");
        let snap2 = zfs.snapshot(FS, "2");
        let job = JobID::must("sender-job");

        // first attempt under holds fails mid-step
        let holds_sender = sender(&zfs, StepProtectionStrategyKind::Holds);
        let args =
            SendArgs { filesystem: FS.to_string(), from: Some(snap1.clone()), to: snap2.clone() };
        holds_sender.pre_send(&ctx(), &args).await.unwrap();
        holds_sender.after_step(&ctx(), &args, false).await.unwrap();

        // reconfigured job retries under bookmarks and completes
        let bookmarks_sender = sender(&zfs, StepProtectionStrategyKind::Bookmarks);
        bookmarks_sender.pre_send(&ctx(), &args).await.unwrap();
        bookmarks_sender.after_step(&ctx(), &args, true).await.unwrap();

        let remaining = owned_markers(&zfs, &job).await;
        assert_eq!(remaining.len(), 1, "markers left: {remaining:?}");
        assert_eq!(remaining[0].kind(), AbstractionKind::ReplicationCursor);
        assert_eq!(remaining[0].version().guid, snap2.guid);
        // no step holds survive the downgrade
        assert!(zfs.list_holds(&ctx(), FS, "1").await.unwrap().is_empty());
        assert!(zfs.list_holds(&ctx(), FS, "2").await.unwrap().is_empty());
    }

    #[test]
    fn construction_validates_marker_names() {
        // a job id at the validation boundary still yields a valid hold tag
        let config = SenderConfig::builder()
            .filesystems(FilesystemFilter::single(FS))
            .encrypt(false)
            .job_id(JobID::must(&"j".repeat(64)))
            .step_protection(StepProtectionStrategyKind::Holds)
            .build();
        let zfs = Arc::new(MemoryZfs::new()) as Arc<dyn Zfs>;
        assert!(Sender::new(config, zfs).is_ok());
    }
}
