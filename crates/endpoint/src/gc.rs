//! Stale-marker collection.
//!
//! Runs at the end of every replication attempt: everything this job owns
//! on the filesystem that is not in the attempt's live set gets destroyed.
//! Markers of other jobs are never touched — the global marker population
//! is a disjoint union over (job, filesystem) pairs and cross-job
//! collection is forbidden. Per-destroy failures are collected and
//! reported, never fatal: a marker that survives one pass is outside the
//! next attempt's live set too and will be collected then.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use zrepl_types::JobID;
use zrepl_zfs::{Zfs, ZfsError};

use crate::abstraction::{Abstraction, AbstractionKindSet};
use crate::cache::SendAbstractionsCache;

/// Outcome of one attempted stale-marker destroy.
#[derive(Debug)]
pub struct StaleDestroy {
    /// The marker that was destroyed (or failed to be).
    pub abstraction: Abstraction,
    /// `Err` if the destroy failed; the marker is picked up again on the
    /// next attempt.
    pub result: Result<(), ZfsError>,
}

impl StaleDestroy {
    /// Whether the destroy succeeded.
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Destroys every marker `job` owns on `filesystem` outside `live`.
///
/// The current marker population is read through `cache`, and each
/// successful destroy is removed from the cached entry. Markers the cache
/// does not know about (created behind the engine's back, entry not
/// invalidated since) are consequently not collected on this pass; they
/// are picked up once the entry is invalidated or dropped — bounded
/// residue, never unbounded growth. Membership in the live set is decided
/// by [`Abstraction::equals`], i.e. structural identity, not pointer
/// identity.
///
/// # Errors
///
/// Only the initial listing can fail (and cancellation). Individual
/// destroy failures land in the returned vector and are logged at warn.
pub async fn destroy_stale_abstractions(
    ctx: &CancellationToken,
    zfs: &dyn Zfs,
    cache: &SendAbstractionsCache,
    filesystem: &str,
    job: &JobID,
    live: &[Abstraction],
) -> Result<Vec<StaleDestroy>, ZfsError> {
    let owned = cache
        .get_filtered(ctx, zfs, filesystem, Some(job), &AbstractionKindSet::all())
        .await?;

    let mut destroyed = Vec::new();
    for abstraction in owned {
        debug_assert_eq!(abstraction.job_id(), job, "listing filter must scope to the job");
        if live.iter().any(|l| l.equals(&abstraction)) {
            continue;
        }
        if ctx.is_cancelled() {
            return Err(ZfsError::Cancelled);
        }
        let result = abstraction.destroy(ctx, zfs).await;
        match &result {
            Ok(()) => {
                debug!(marker = %abstraction, "destroyed stale abstraction");
                cache.remove(&abstraction);
            },
            Err(e) => warn!(
                marker = %abstraction,
                error = %e,
                "failed to destroy stale abstraction, will retry on next attempt"
            ),
        }
        destroyed.push(StaleDestroy { abstraction, result });
    }
    Ok(destroyed)
}
