//! The durable marker model.
//!
//! An [`Abstraction`] is one marker this engine owns on a ZFS object: a
//! hold or a bookmark whose name embeds the owning job and, for bookmarks,
//! the pinned snapshot's guid. The extractors classify raw ZFS objects back
//! into abstractions; anything that does not parse, or whose embedded guid
//! disagrees with the live object, is foreign — never extended, never
//! destroyed by this engine.

use std::collections::BTreeSet;
use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use zrepl_types::{FilesystemVersion, JobID};
use zrepl_zfs::{Zfs, ZfsError};

use crate::names;

/// The marker kinds the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AbstractionKind {
    /// Snapshot hold pinning a step endpoint.
    StepHold,
    /// Bookmark pinning a step endpoint (weaker than a hold; cannot block
    /// snapshot destruction, but preserves incremental source data).
    StepBookmark,
    /// Bookmark recording the most recently replicated snapshot.
    ReplicationCursor,
    /// Short-lived cursor placed before a step commits.
    TentativeReplicationCursor,
    /// Receiver-side hold pinning the most recently received snapshot.
    LastReceivedHold,
}

impl AbstractionKind {
    /// All kinds, in a fixed order.
    pub const ALL: [AbstractionKind; 5] = [
        AbstractionKind::StepHold,
        AbstractionKind::StepBookmark,
        AbstractionKind::ReplicationCursor,
        AbstractionKind::TentativeReplicationCursor,
        AbstractionKind::LastReceivedHold,
    ];

    /// Whether this kind is realized as a snapshot hold.
    pub fn is_hold(self) -> bool {
        matches!(self, Self::StepHold | Self::LastReceivedHold)
    }

    /// Whether this kind is realized as a bookmark.
    pub fn is_bookmark(self) -> bool {
        !self.is_hold()
    }

    /// Stable label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StepHold => "step-hold",
            Self::StepBookmark => "step-bookmark",
            Self::ReplicationCursor => "replication-cursor-bookmark-v2",
            Self::TentativeReplicationCursor => "tentative-replication-cursor-bookmark",
            Self::LastReceivedHold => "last-received-hold",
        }
    }
}

impl fmt::Display for AbstractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of [`AbstractionKind`]s, as used by list queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbstractionKindSet(BTreeSet<AbstractionKind>);

impl AbstractionKindSet {
    /// The empty set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every kind.
    pub fn all() -> Self {
        Self(AbstractionKind::ALL.into_iter().collect())
    }

    /// Exactly one kind.
    pub fn single(kind: AbstractionKind) -> Self {
        Self(std::iter::once(kind).collect())
    }

    /// Whether `kind` is in the set.
    pub fn contains(&self, kind: AbstractionKind) -> bool {
        self.0.contains(&kind)
    }

    /// Adds `kind` to the set.
    pub fn insert(&mut self, kind: AbstractionKind) {
        self.0.insert(kind);
    }

    /// Whether any bookmark-realized kind is in the set.
    pub fn wants_bookmarks(&self) -> bool {
        self.0.iter().any(|k| k.is_bookmark())
    }

    /// Whether any hold-realized kind is in the set.
    pub fn wants_holds(&self) -> bool {
        self.0.iter().any(|k| k.is_hold())
    }
}

impl FromIterator<AbstractionKind> for AbstractionKindSet {
    fn from_iter<I: IntoIterator<Item = AbstractionKind>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A durable marker owned by exactly one `(job, filesystem)` pair.
///
/// Holds a filesystem name, not a handle to any in-memory filesystem
/// aggregate: abstractions outlive those.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Abstraction {
    /// Snapshot hold placed by the step-protection `holds` strategy.
    StepHold {
        /// Dataset the held snapshot belongs to.
        filesystem: String,
        /// The held snapshot.
        version: FilesystemVersion,
        /// Owning job.
        job_id: JobID,
        /// The hold tag, as placed.
        tag: String,
    },
    /// Bookmark placed by the step-protection `bookmarks` strategy (or as
    /// the hold strategy's fallback for bookmark sources).
    StepBookmark {
        /// Dataset the bookmark belongs to.
        filesystem: String,
        /// The step bookmark itself.
        version: FilesystemVersion,
        /// Owning job.
        job_id: JobID,
    },
    /// The per-(filesystem, job) replication cursor.
    ReplicationCursor {
        /// Dataset the cursor belongs to.
        filesystem: String,
        /// The cursor bookmark itself.
        version: FilesystemVersion,
        /// Owning job.
        job_id: JobID,
    },
    /// Pre-commit cursor, promoted to a replication cursor on step success.
    TentativeReplicationCursor {
        /// Dataset the cursor belongs to.
        filesystem: String,
        /// The tentative cursor bookmark itself.
        version: FilesystemVersion,
        /// Owning job.
        job_id: JobID,
    },
    /// Receiver-side hold on the most recently received snapshot.
    LastReceivedHold {
        /// Dataset the held snapshot belongs to.
        filesystem: String,
        /// The held snapshot.
        version: FilesystemVersion,
        /// Owning job.
        job_id: JobID,
        /// The hold tag, as placed.
        tag: String,
    },
}

impl Abstraction {
    /// This marker's kind.
    pub fn kind(&self) -> AbstractionKind {
        match self {
            Self::StepHold { .. } => AbstractionKind::StepHold,
            Self::StepBookmark { .. } => AbstractionKind::StepBookmark,
            Self::ReplicationCursor { .. } => AbstractionKind::ReplicationCursor,
            Self::TentativeReplicationCursor { .. } => AbstractionKind::TentativeReplicationCursor,
            Self::LastReceivedHold { .. } => AbstractionKind::LastReceivedHold,
        }
    }

    /// The dataset this marker lives on.
    pub fn filesystem(&self) -> &str {
        match self {
            Self::StepHold { filesystem, .. }
            | Self::StepBookmark { filesystem, .. }
            | Self::ReplicationCursor { filesystem, .. }
            | Self::TentativeReplicationCursor { filesystem, .. }
            | Self::LastReceivedHold { filesystem, .. } => filesystem,
        }
    }

    /// The version this marker pins or is realized as.
    pub fn version(&self) -> &FilesystemVersion {
        match self {
            Self::StepHold { version, .. }
            | Self::StepBookmark { version, .. }
            | Self::ReplicationCursor { version, .. }
            | Self::TentativeReplicationCursor { version, .. }
            | Self::LastReceivedHold { version, .. } => version,
        }
    }

    /// The owning job.
    pub fn job_id(&self) -> &JobID {
        match self {
            Self::StepHold { job_id, .. }
            | Self::StepBookmark { job_id, .. }
            | Self::ReplicationCursor { job_id, .. }
            | Self::TentativeReplicationCursor { job_id, .. }
            | Self::LastReceivedHold { job_id, .. } => job_id,
        }
    }

    /// The hold tag, for hold-realized markers.
    pub fn hold_tag(&self) -> Option<&str> {
        match self {
            Self::StepHold { tag, .. } | Self::LastReceivedHold { tag, .. } => Some(tag),
            _ => None,
        }
    }

    /// Creation txg of the underlying version; listing results sort by it.
    pub fn create_txg(&self) -> u64 {
        self.version().create_txg
    }

    /// Structural equality over (kind, filesystem, version identity, job,
    /// tag).
    ///
    /// Version identity is the guid, so an abstraction observed before and
    /// after an unrelated property change still compares equal.
    pub fn equals(&self, other: &Abstraction) -> bool {
        self.kind() == other.kind()
            && self.filesystem() == other.filesystem()
            && self.version().same_identity(other.version())
            && self.job_id() == other.job_id()
            && self.hold_tag() == other.hold_tag()
    }

    /// Removes this marker from ZFS.
    ///
    /// Idempotent: a marker that is already gone is success. For holds the
    /// hold tag is released; for bookmarks the bookmark is destroyed.
    ///
    /// # Errors
    ///
    /// Surfaces transient ZFS failures and cancellation; never invents
    /// success for an error that could mean the target is still pinned.
    pub async fn destroy(&self, ctx: &CancellationToken, zfs: &dyn Zfs) -> Result<(), ZfsError> {
        match self {
            Self::StepHold { filesystem, version, tag, .. }
            | Self::LastReceivedHold { filesystem, version, tag, .. } => {
                zfs.release(ctx, filesystem, &version.name, tag).await
            },
            Self::StepBookmark { filesystem, version, .. }
            | Self::ReplicationCursor { filesystem, version, .. }
            | Self::TentativeReplicationCursor { filesystem, version, .. } => {
                match zfs.destroy_bookmark(ctx, filesystem, &version.name).await {
                    Err(e) if e.is_not_found() => Ok(()),
                    other => other,
                }
            },
        }
    }
}

impl fmt::Display for Abstraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {}{} (job {})",
            self.kind(),
            self.filesystem(),
            self.version(),
            self.job_id()
        )
    }
}

/// Classifies a bookmark as one of our bookmark-realized markers.
///
/// Returns `None` for foreign bookmarks: names that do not parse, or whose
/// embedded guid disagrees with the live object (tampered or recycled
/// name). Never fails; the codec's error signal is absorbed here.
///
/// # Panics
///
/// Panics if `version` is not a bookmark; callers route snapshots to
/// [`abstraction_from_hold`].
pub fn abstraction_from_bookmark(
    filesystem: &str,
    version: &FilesystemVersion,
) -> Option<Abstraction> {
    assert!(version.is_bookmark(), "bookmark extractor applied to {}", version.full_path(filesystem));

    let path = version.full_path(filesystem);
    let candidates: [(AbstractionKind, fn(&str) -> names::Result<(u64, JobID)>); 3] = [
        (AbstractionKind::StepBookmark, names::parse_step_bookmark_name),
        (AbstractionKind::ReplicationCursor, names::parse_replication_cursor_bookmark_name),
        (AbstractionKind::TentativeReplicationCursor, names::parse_tentative_cursor_bookmark_name),
    ];
    for (kind, parse) in candidates {
        let Ok((guid, job_id)) = parse(&path) else { continue };
        if guid != version.guid {
            debug!(
                bookmark = %path,
                embedded_guid = guid,
                actual_guid = version.guid,
                "bookmark name embeds a different guid than the live object, treating as foreign"
            );
            return None;
        }
        let filesystem = filesystem.to_string();
        let version = version.clone();
        return Some(match kind {
            AbstractionKind::StepBookmark => Abstraction::StepBookmark { filesystem, version, job_id },
            AbstractionKind::ReplicationCursor => {
                Abstraction::ReplicationCursor { filesystem, version, job_id }
            },
            AbstractionKind::TentativeReplicationCursor => {
                Abstraction::TentativeReplicationCursor { filesystem, version, job_id }
            },
            _ => unreachable!("candidate list contains bookmark kinds only"),
        });
    }
    None
}

/// Classifies a hold tag on a snapshot as one of our hold-realized markers.
///
/// Returns `None` for foreign tags. Never fails.
///
/// # Panics
///
/// Panics if `snapshot` is not a snapshot.
pub fn abstraction_from_hold(
    filesystem: &str,
    snapshot: &FilesystemVersion,
    tag: &str,
) -> Option<Abstraction> {
    assert!(snapshot.is_snapshot(), "hold extractor applied to {}", snapshot.full_path(filesystem));

    if let Ok(job_id) = names::parse_step_hold_tag(tag) {
        return Some(Abstraction::StepHold {
            filesystem: filesystem.to_string(),
            version: snapshot.clone(),
            job_id,
            tag: tag.to_string(),
        });
    }
    if let Ok(job_id) = names::parse_last_received_hold_tag(tag) {
        return Some(Abstraction::LastReceivedHold {
            filesystem: filesystem.to_string(),
            version: snapshot.clone(),
            job_id,
            tag: tag.to_string(),
        });
    }
    None
}
