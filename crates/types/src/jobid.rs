//! Validated replication job identity.
//!
//! A [`JobID`] names one configured replication job. It is embedded verbatim
//! in every hold tag and bookmark name the engine creates, which is how
//! concurrent jobs targeting overlapping datasets recognize their own markers
//! and leave everyone else's alone. The character class is therefore the
//! intersection of what ZFS accepts in hold tags and in bookmark names, and
//! the length cap leaves room for the longest marker prefix.

use std::fmt;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Maximum byte length of a job identifier.
///
/// ZFS hold tags are capped at 256 bytes and bookmark names share the
/// 255-byte dataset component limit; 64 bytes of job id leaves comfortable
/// headroom under both once the marker prefixes and guid field are added.
pub const MAX_JOB_ID_BYTES: usize = 64;

/// Error produced when a string cannot be used as a [`JobID`].
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum InvalidJobId {
    /// The job id is the empty string.
    #[snafu(display("job id must not be empty"))]
    Empty,

    /// The job id exceeds [`MAX_JOB_ID_BYTES`].
    #[snafu(display("job id {id:?} is {len} bytes, exceeds maximum {MAX_JOB_ID_BYTES} bytes"))]
    TooLong {
        /// The rejected id.
        id: String,
        /// Its byte length.
        len: usize,
    },

    /// The job id contains a character outside `[a-zA-Z0-9_.-]`.
    #[snafu(display(
        "job id {id:?} contains invalid character {character:?} at byte offset {offset}; \
         allowed: [a-zA-Z0-9_.-]"
    ))]
    InvalidCharacter {
        /// The rejected id.
        id: String,
        /// The offending character.
        character: char,
        /// Byte offset of the offending character.
        offset: usize,
    },
}

/// Stable identity of a replication job configuration.
///
/// Immutable once constructed. Construction validates the character class so
/// that every derived hold tag and bookmark name is valid by construction;
/// a job id that would produce an invalid marker name refuses to exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobID(String);

impl JobID {
    /// Validates `id` and wraps it.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidJobId`] if `id` is empty, longer than
    /// [`MAX_JOB_ID_BYTES`], or contains characters outside `[a-zA-Z0-9_.-]`.
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidJobId> {
        let id = id.into();
        if id.is_empty() {
            return Err(InvalidJobId::Empty);
        }
        if id.len() > MAX_JOB_ID_BYTES {
            let len = id.len();
            return Err(InvalidJobId::TooLong { id, len });
        }
        if let Some(offset) = id.find(|c: char| !is_job_id_char(c)) {
            let character = id[offset..].chars().next().unwrap_or('\0');
            return Err(InvalidJobId::InvalidCharacter { id, character, offset });
        }
        Ok(Self(id))
    }

    /// Like [`JobID::new`] but panics on invalid input.
    ///
    /// Test and fixture convenience; production construction goes through
    /// [`JobID::new`] at config load.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not validate.
    pub fn must(id: &str) -> Self {
        match Self::new(id) {
            Ok(jid) => jid,
            Err(e) => panic!("invalid job id {id:?}: {e}"),
        }
    }

    /// Returns the raw identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for JobID {
    type Err = InvalidJobId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for JobID {
    type Error = InvalidJobId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<JobID> for String {
    fn from(jid: JobID) -> Self {
        jid.0
    }
}

/// Checks if a character is allowed in job identifiers.
fn is_job_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}
