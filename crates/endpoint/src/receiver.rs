//! The receiving endpoint.
//!
//! Counterpart of [`Sender`](crate::sender::Sender): after each fully
//! received snapshot, [`Receiver::receive_complete`] moves the
//! last-received hold so the newest received snapshot stays pinned while
//! prior ones become prunable. The hold only moves when the receiver is
//! configured with `update_last_received_hold`.

use std::sync::Arc;

use snafu::{ResultExt, Snafu};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use zrepl_types::{ConfigError, JobID, ReceiverConfig};
use zrepl_zfs::{Zfs, ZfsError};

use crate::abstraction::Abstraction;
use crate::cursor::{move_last_received_hold, CursorError};
use crate::gc::StaleDestroy;
use crate::names;

/// Error produced by receiver operations.
#[derive(Debug, Snafu)]
pub enum ReceiverError {
    /// Looking up the received snapshot failed.
    #[snafu(display("lookup received version: {source}"))]
    Lookup {
        /// The underlying ZFS failure.
        source: ZfsError,
    },

    /// Moving the last-received hold failed.
    #[snafu(display("{source}"))]
    Hold {
        /// The underlying cursor failure.
        source: CursorError,
    },
}

/// The receiving endpoint of one replication job.
pub struct Receiver {
    config: ReceiverConfig,
    zfs: Arc<dyn Zfs>,
}

impl Receiver {
    /// Constructs the receiver, validating the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the root filesystem is empty or the
    /// job id cannot be embedded in the last-received hold tag.
    pub fn new(config: ReceiverConfig, zfs: Arc<dyn Zfs>) -> Result<Self, ConfigError> {
        config.validate()?;
        names::last_received_hold_tag(&config.job_id)
            .map_err(|e| ConfigError::MarkerName { message: e.to_string() })?;
        Ok(Self { config, zfs })
    }

    /// This receiver's job identity.
    pub fn job_id(&self) -> &JobID {
        &self.config.job_id
    }

    /// The receive-side dataset for a sender-side dataset.
    pub fn receive_filesystem(&self, sender_filesystem: &str) -> String {
        format!("{}/{}", self.config.root_filesystem, sender_filesystem)
    }

    /// Whether the version at `relative_path` (e.g. `@2`) exists on
    /// `filesystem`.
    ///
    /// Distinguishes "not yet received" from an actual lookup failure via
    /// the capability's distinguished does-not-exist error.
    ///
    /// # Errors
    ///
    /// Surfaces failures other than does-not-exist.
    pub async fn version_exists(
        &self,
        ctx: &CancellationToken,
        filesystem: &str,
        relative_path: &str,
    ) -> Result<bool, ZfsError> {
        match self.zfs.get_filesystem_version(ctx, &format!("{filesystem}{relative_path}")).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Records the completion of a receive: pins `snapshot` with the
    /// last-received hold and releases the hold from prior snapshots.
    ///
    /// No-op returning `None` when `update_last_received_hold` is off.
    ///
    /// # Errors
    ///
    /// Surfaces snapshot lookup and hold placement failures; failures
    /// releasing prior holds are reported in the returned vector.
    pub async fn receive_complete(
        &self,
        ctx: &CancellationToken,
        filesystem: &str,
        snapshot: &str,
    ) -> Result<Option<(Abstraction, Vec<StaleDestroy>)>, ReceiverError> {
        if !self.config.update_last_received_hold {
            debug!(filesystem, snapshot, "last-received hold updates disabled, skipping");
            return Ok(None);
        }
        let version = self
            .zfs
            .get_filesystem_version(ctx, &format!("{filesystem}@{snapshot}"))
            .await
            .context(LookupSnafu)?;
        let (hold, stale) = move_last_received_hold(
            ctx,
            self.zfs.as_ref(),
            filesystem,
            &version,
            &self.config.job_id,
        )
        .await
        .context(HoldSnafu)?;
        Ok(Some((hold, stale)))
    }
}
