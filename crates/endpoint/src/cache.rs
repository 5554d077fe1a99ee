//! Per-filesystem memoization of known markers.
//!
//! Listing a dataset's markers costs one version enumeration plus one hold
//! enumeration per snapshot; the sender consults that set before and after
//! every step. The cache memoizes it per filesystem. Mutations routed
//! through the endpoints keep the entry current ([`SendAbstractionsCache::record`] /
//! [`SendAbstractionsCache::remove`]); mutations made behind the engine's
//! back stay invisible until an explicit
//! [`SendAbstractionsCache::invalidate`]. The collector consequently
//! tolerates bounded residue on uninvalidated entries — a marker the cache
//! does not know about is simply not collected until the entry is dropped.
//!
//! The cache is an optimization only: the engine stays correct if every
//! read misses. Owned value, injected via the sender; no process-global
//! state, so tests spin up isolated instances.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use zrepl_types::JobID;
use zrepl_zfs::{Zfs, ZfsError};

use crate::abstraction::{Abstraction, AbstractionKindSet};
use crate::list::list_abstractions_on_filesystem;

#[derive(Debug, Default)]
struct FsEntry {
    /// Bumped on every invalidation; a read-through only stores its result
    /// if no invalidation happened while it was listing.
    generation: u64,
    cached: Option<Vec<Abstraction>>,
}

/// Memoized marker lists, one entry per filesystem.
#[derive(Debug, Default)]
pub struct SendAbstractionsCache {
    entries: Mutex<HashMap<String, FsEntry>>,
}

impl SendAbstractionsCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the cached entry for `filesystem`.
    ///
    /// A read-through that is concurrently listing the same filesystem will
    /// observe the invalidation and not store its (possibly stale) result.
    pub fn invalidate(&self, filesystem: &str) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(filesystem.to_string()).or_default();
        entry.generation += 1;
        entry.cached = None;
        debug!(filesystem, "invalidated send abstractions cache");
    }

    /// Records a marker the engine just created.
    ///
    /// Updates the cached entry, if one is populated, so the engine's own
    /// mutations are immediately visible without a relist. A no-op on a
    /// cold entry: the next read-through lists everything anyway.
    pub fn record(&self, abstraction: &Abstraction) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(abstraction.filesystem()) {
            if let Some(cached) = &mut entry.cached {
                if !cached.iter().any(|a| a.equals(abstraction)) {
                    cached.push(abstraction.clone());
                }
            }
        }
    }

    /// Removes a marker the engine just destroyed from the cached entry.
    pub fn remove(&self, abstraction: &Abstraction) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(abstraction.filesystem()) {
            if let Some(cached) = &mut entry.cached {
                cached.retain(|a| !a.equals(abstraction));
            }
        }
    }

    /// Returns all markers on `filesystem`, reading through on miss.
    ///
    /// The underlying list always covers every kind and every job; filters
    /// are applied to the cached view by [`Self::get_filtered`].
    ///
    /// # Errors
    ///
    /// Surfaces the listing failure on miss; a hit cannot fail.
    pub async fn get(
        &self,
        ctx: &CancellationToken,
        zfs: &dyn Zfs,
        filesystem: &str,
    ) -> Result<Vec<Abstraction>, ZfsError> {
        let generation = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(filesystem.to_string()).or_default();
            if let Some(cached) = &entry.cached {
                return Ok(cached.clone());
            }
            entry.generation
        };

        let listed =
            list_abstractions_on_filesystem(ctx, zfs, filesystem, &AbstractionKindSet::all())
                .await?;

        let mut entries = self.entries.lock();
        let entry = entries.entry(filesystem.to_string()).or_default();
        if entry.generation == generation {
            entry.cached = Some(listed.clone());
        } else {
            debug!(
                filesystem,
                "cache entry invalidated during read-through, returning uncached result"
            );
        }
        Ok(listed)
    }

    /// Like [`Self::get`], filtered to `job` and `kinds`.
    ///
    /// # Errors
    ///
    /// Surfaces the listing failure on miss.
    pub async fn get_filtered(
        &self,
        ctx: &CancellationToken,
        zfs: &dyn Zfs,
        filesystem: &str,
        job: Option<&JobID>,
        kinds: &AbstractionKindSet,
    ) -> Result<Vec<Abstraction>, ZfsError> {
        let all = self.get(ctx, zfs, filesystem).await?;
        Ok(all
            .into_iter()
            .filter(|a| kinds.contains(a.kind()))
            .filter(|a| job.is_none_or(|j| a.job_id() == j))
            .collect())
    }
}
