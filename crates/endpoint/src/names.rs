//! Naming codec for durable markers.
//!
//! Every marker the engine places on ZFS embeds the owning job's identity,
//! and bookmark-based markers additionally embed the target snapshot's guid:
//!
//! - step hold tag: `zrepl_STEP_J_<jobid>`
//! - last-received hold tag: `zrepl_last_received_J_<jobid>`
//! - bookmark names: `<prefix>_G_<guid:016x>_J_<jobid>` with prefix
//!   `zrepl_STEP`, `zrepl_CURSOR`, or `zrepl_CURSORTENTATIVE`
//!
//! Encoding validates the result against ZFS limits, so a job id that would
//! produce an over-long or otherwise invalid marker is rejected before any
//! ZFS call. Parsing is the exact inverse: `parse(encode(x)) == x`, and a
//! parse error definitively means "this object is not one of ours" —
//! extractors rely on that to classify foreign objects without failing.

use snafu::{ResultExt, Snafu};

use zrepl_types::jobid::{InvalidJobId, JobID};
use zrepl_zfs::{valid_hold_tag, valid_version_name, ZfsError};

/// Prefix of step bookmark names.
pub const STEP_BOOKMARK_PREFIX: &str = "zrepl_STEP";

/// Prefix of replication cursor bookmark names.
pub const REPLICATION_CURSOR_PREFIX: &str = "zrepl_CURSOR";

/// Prefix of tentative replication cursor bookmark names.
pub const TENTATIVE_CURSOR_PREFIX: &str = "zrepl_CURSORTENTATIVE";

const STEP_HOLD_TAG_PREFIX: &str = "zrepl_STEP_J_";
const LAST_RECEIVED_HOLD_TAG_PREFIX: &str = "zrepl_last_received_J_";

/// Error produced by the naming codec.
///
/// On the parse side, any variant means "not one of our markers"; callers
/// distinguishing foreign objects need no further inspection. On the encode
/// side, a variant is a configuration error surfaced at construction.
#[derive(Debug, Snafu)]
pub enum NameError {
    /// The path does not contain a bookmark delimiter.
    #[snafu(display("{path:?} is not a bookmark path"))]
    NotABookmarkPath {
        /// The offending path.
        path: String,
    },

    /// The name does not start with the expected marker prefix.
    #[snafu(display("{name:?} does not carry prefix {prefix:?}"))]
    WrongPrefix {
        /// The offending name.
        name: String,
        /// The expected prefix.
        prefix: &'static str,
    },

    /// The name carries the prefix but not the `_G_<guid>_J_<jobid>` layout.
    #[snafu(display("{name:?} does not match the <prefix>_G_<guid>_J_<jobid> layout"))]
    Malformed {
        /// The offending name.
        name: String,
    },

    /// The guid field is not 16 hex digits.
    #[snafu(display("{name:?} carries unparseable guid field {field:?}"))]
    Guid {
        /// The offending name.
        name: String,
        /// The guid field as found.
        field: String,
    },

    /// The job id field does not validate.
    #[snafu(display("invalid job id field: {source}"))]
    JobIdField {
        /// The underlying validation failure.
        source: InvalidJobId,
    },

    /// The encoded marker violates ZFS validation.
    #[snafu(display("encoded marker is not valid for zfs: {source}"))]
    ZfsLimit {
        /// The underlying validation failure.
        source: ZfsError,
    },
}

/// Result type for codec operations.
pub type Result<T, E = NameError> = std::result::Result<T, E>;

/// The hold tag pinning a step's snapshots for `job`.
///
/// # Errors
///
/// Returns [`NameError::ZfsLimit`] if the tag fails hold-tag validation.
pub fn step_hold_tag(job: &JobID) -> Result<String> {
    let tag = format!("{STEP_HOLD_TAG_PREFIX}{job}");
    valid_hold_tag(&tag).context(ZfsLimitSnafu)?;
    Ok(tag)
}

/// Recovers the owning job from a step hold tag.
///
/// # Errors
///
/// Any error means the tag is not a step hold tag of this engine.
pub fn parse_step_hold_tag(tag: &str) -> Result<JobID> {
    let raw = tag
        .strip_prefix(STEP_HOLD_TAG_PREFIX)
        .ok_or_else(|| NameError::WrongPrefix { name: tag.to_string(), prefix: STEP_HOLD_TAG_PREFIX })?;
    JobID::new(raw).context(JobIdFieldSnafu)
}

/// The hold tag pinning the receiver's most recently received snapshot.
///
/// # Errors
///
/// Returns [`NameError::ZfsLimit`] if the tag fails hold-tag validation.
pub fn last_received_hold_tag(job: &JobID) -> Result<String> {
    let tag = format!("{LAST_RECEIVED_HOLD_TAG_PREFIX}{job}");
    valid_hold_tag(&tag).context(ZfsLimitSnafu)?;
    Ok(tag)
}

/// Recovers the owning job from a last-received hold tag.
///
/// # Errors
///
/// Any error means the tag is not a last-received hold tag of this engine.
pub fn parse_last_received_hold_tag(tag: &str) -> Result<JobID> {
    let raw = tag.strip_prefix(LAST_RECEIVED_HOLD_TAG_PREFIX).ok_or_else(|| {
        NameError::WrongPrefix { name: tag.to_string(), prefix: LAST_RECEIVED_HOLD_TAG_PREFIX }
    })?;
    JobID::new(raw).context(JobIdFieldSnafu)
}

/// The step bookmark name for `(filesystem, guid, job)`.
///
/// # Errors
///
/// Returns [`NameError::ZfsLimit`] if the full bookmark path exceeds ZFS
/// name limits.
pub fn step_bookmark_name(filesystem: &str, guid: u64, job: &JobID) -> Result<String> {
    make_job_and_guid_bookmark_name(STEP_BOOKMARK_PREFIX, filesystem, guid, job)
}

/// Parses a full step bookmark path into `(guid, job)`.
///
/// # Errors
///
/// Any error means the bookmark is not a step bookmark of this engine.
pub fn parse_step_bookmark_name(path: &str) -> Result<(u64, JobID)> {
    parse_job_and_guid_bookmark_name(path, STEP_BOOKMARK_PREFIX)
}

/// The replication cursor bookmark name for `(filesystem, guid, job)`.
///
/// # Errors
///
/// Returns [`NameError::ZfsLimit`] if the full bookmark path exceeds ZFS
/// name limits.
pub fn replication_cursor_bookmark_name(
    filesystem: &str,
    guid: u64,
    job: &JobID,
) -> Result<String> {
    make_job_and_guid_bookmark_name(REPLICATION_CURSOR_PREFIX, filesystem, guid, job)
}

/// Parses a full replication cursor bookmark path into `(guid, job)`.
///
/// # Errors
///
/// Any error means the bookmark is not a replication cursor of this engine.
pub fn parse_replication_cursor_bookmark_name(path: &str) -> Result<(u64, JobID)> {
    parse_job_and_guid_bookmark_name(path, REPLICATION_CURSOR_PREFIX)
}

/// The tentative replication cursor bookmark name for
/// `(filesystem, guid, job)`.
///
/// # Errors
///
/// Returns [`NameError::ZfsLimit`] if the full bookmark path exceeds ZFS
/// name limits.
pub fn tentative_cursor_bookmark_name(filesystem: &str, guid: u64, job: &JobID) -> Result<String> {
    make_job_and_guid_bookmark_name(TENTATIVE_CURSOR_PREFIX, filesystem, guid, job)
}

/// Parses a full tentative cursor bookmark path into `(guid, job)`.
///
/// # Errors
///
/// Any error means the bookmark is not a tentative cursor of this engine.
pub fn parse_tentative_cursor_bookmark_name(path: &str) -> Result<(u64, JobID)> {
    parse_job_and_guid_bookmark_name(path, TENTATIVE_CURSOR_PREFIX)
}

/// The shared `<prefix>_G_<guid:016x>_J_<jobid>` encoder used by every
/// bookmark kind.
fn make_job_and_guid_bookmark_name(
    prefix: &'static str,
    filesystem: &str,
    guid: u64,
    job: &JobID,
) -> Result<String> {
    let name = format!("{prefix}_G_{guid:016x}_J_{job}");
    valid_version_name(filesystem, &name).context(ZfsLimitSnafu)?;
    Ok(name)
}

/// The shared decoder: takes the full bookmark path (`fs#name`), strips the
/// dataset, and recovers `(guid, job)`.
fn parse_job_and_guid_bookmark_name(path: &str, prefix: &'static str) -> Result<(u64, JobID)> {
    let (_, name) = path
        .split_once('#')
        .ok_or_else(|| NameError::NotABookmarkPath { path: path.to_string() })?;
    let rest = name
        .strip_prefix(prefix)
        .and_then(|r| r.strip_prefix("_G_"))
        .ok_or_else(|| NameError::WrongPrefix { name: name.to_string(), prefix })?;
    // slice with get(): a foreign name may put a multi-byte character at
    // the split point
    let (guid_field, rest) = match (rest.get(..16), rest.get(16..)) {
        (Some(guid_field), Some(rest)) => (guid_field, rest),
        _ => return Err(NameError::Malformed { name: name.to_string() }),
    };
    let guid = u64::from_str_radix(guid_field, 16).map_err(|_| NameError::Guid {
        name: name.to_string(),
        field: guid_field.to_string(),
    })?;
    // The guid field is fixed-width, so lowercase is what we emit; reject
    // anything else to keep parse(encode(x)) == x an exact inverse.
    if guid_field.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(NameError::Guid { name: name.to_string(), field: guid_field.to_string() });
    }
    let raw_job = rest
        .strip_prefix("_J_")
        .ok_or_else(|| NameError::Malformed { name: name.to_string() })?;
    let job = JobID::new(raw_job).context(JobIdFieldSnafu)?;
    Ok((guid, job))
}
