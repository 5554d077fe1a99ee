//! Endpoint configuration.
//!
//! The sender and receiver endpoints are constructed from these inputs once
//! at job startup. Invalid configuration (unknown strategy string, invalid
//! job id) is fatal at construction; nothing here is re-read at runtime.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::jobid::{InvalidJobId, JobID};

/// Configuration error; fatal at endpoint construction.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// The step-protection strategy string is not one of the known values.
    #[snafu(display(
        "unknown step protection strategy {value:?}; expected one of \"holds\", \"bookmarks\", \"none\""
    ))]
    UnknownStrategy {
        /// The rejected input.
        value: String,
    },

    /// The configured job id does not validate.
    #[snafu(display("invalid job id: {source}"))]
    JobId {
        /// The underlying validation failure.
        source: InvalidJobId,
    },

    /// The receiver root filesystem is empty.
    #[snafu(display("receiver root filesystem must not be empty"))]
    EmptyRootFilesystem,

    /// The job id cannot be embedded in marker names or hold tags.
    #[snafu(display("job id unusable in marker names: {message}"))]
    MarkerName {
        /// Description of the violated limit.
        message: String,
    },
}

/// Step-protection policy selector.
///
/// Serializes to the exact snake-case strings used by on-disk job
/// configuration files: `"holds"`, `"bookmarks"`, `"none"`. Parsing is
/// case-sensitive; anything else is a configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepProtectionStrategyKind {
    /// Place snapshot holds on the step endpoints; strongest protection.
    Holds,
    /// Place step bookmarks on the step endpoints; survives send, cannot
    /// pin a snapshot against destruction.
    Bookmarks,
    /// No markers; safety relies entirely on the operator.
    None,
}

impl StepProtectionStrategyKind {
    /// The wire string for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Holds => "holds",
            Self::Bookmarks => "bookmarks",
            Self::None => "none",
        }
    }
}

impl fmt::Display for StepProtectionStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepProtectionStrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "holds" => Ok(Self::Holds),
            "bookmarks" => Ok(Self::Bookmarks),
            "none" => Ok(Self::None),
            other => Err(ConfigError::UnknownStrategy { value: other.to_string() }),
        }
    }
}

/// Selects the datasets an endpoint operates on.
///
/// Either a single filesystem or an explicit set. Markers are only ever
/// created, listed, and collected within the matching datasets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilesystemFilter {
    /// Exactly one dataset.
    Single(String),
    /// An explicit set of datasets.
    Set(BTreeSet<String>),
}

impl FilesystemFilter {
    /// Filter matching exactly one dataset.
    pub fn single(fs: impl Into<String>) -> Self {
        Self::Single(fs.into())
    }

    /// Filter matching the given datasets.
    pub fn set(fs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::Set(fs.into_iter().map(Into::into).collect())
    }

    /// Whether `fs` is selected by this filter.
    pub fn matches(&self, fs: &str) -> bool {
        match self {
            Self::Single(only) => only == fs,
            Self::Set(set) => set.contains(fs),
        }
    }

    /// The single dataset, if this filter names exactly one.
    pub fn as_single(&self) -> Option<&str> {
        match self {
            Self::Single(fs) => Some(fs),
            Self::Set(set) if set.len() == 1 => set.iter().next().map(String::as_str),
            Self::Set(_) => None,
        }
    }
}

/// Inputs consumed by the sending endpoint.
#[derive(Debug, Clone, bon::Builder)]
pub struct SenderConfig {
    /// Datasets this sender replicates.
    pub filesystems: FilesystemFilter,
    /// Whether send streams are encrypted.
    pub encrypt: bool,
    /// Identity embedded in every marker this sender creates.
    pub job_id: JobID,
    /// Step-protection policy applied before each send step.
    pub step_protection: StepProtectionStrategyKind,
}

/// Inputs consumed by the receiving endpoint.
#[derive(Debug, Clone, bon::Builder)]
pub struct ReceiverConfig {
    /// Identity embedded in every marker this receiver creates.
    pub job_id: JobID,
    /// Dataset under which received filesystems are rooted.
    pub root_filesystem: String,
    /// Whether to pin the most recently received snapshot with a
    /// last-received hold after each successful receive.
    pub update_last_received_hold: bool,
}

impl ReceiverConfig {
    /// Validates fields that the builder cannot check.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyRootFilesystem`] if the root is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root_filesystem.is_empty() {
            return Err(ConfigError::EmptyRootFilesystem);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // =========================================================================
    // StepProtectionStrategyKind wire format
    // =========================================================================

    #[test]
    fn strategy_kind_json_roundtrip() {
        for (kind, wire) in [
            (StepProtectionStrategyKind::Holds, "\"holds\""),
            (StepProtectionStrategyKind::Bookmarks, "\"bookmarks\""),
            (StepProtectionStrategyKind::None, "\"none\""),
        ] {
            assert_eq!(serde_json::to_string(&kind).unwrap(), wire);
            let back: StepProtectionStrategyKind = serde_json::from_str(wire).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn strategy_kind_from_str() {
        assert_eq!("holds".parse::<StepProtectionStrategyKind>().unwrap(), StepProtectionStrategyKind::Holds);
        assert_eq!(
            "bookmarks".parse::<StepProtectionStrategyKind>().unwrap(),
            StepProtectionStrategyKind::Bookmarks
        );
        assert_eq!("none".parse::<StepProtectionStrategyKind>().unwrap(), StepProtectionStrategyKind::None);
    }

    #[test]
    fn strategy_kind_parse_is_case_sensitive() {
        for bad in ["Holds", "HOLDS", "Bookmarks", "NONE", "", "hold"] {
            let err = bad.parse::<StepProtectionStrategyKind>().unwrap_err();
            assert!(matches!(err, ConfigError::UnknownStrategy { .. }), "{bad:?} must be rejected");
        }
    }

    #[test]
    fn strategy_kind_json_rejects_unknown() {
        let parsed: Result<StepProtectionStrategyKind, _> = serde_json::from_str("\"Holds\"");
        assert!(parsed.is_err());
    }

    // =========================================================================
    // FilesystemFilter
    // =========================================================================

    #[test]
    fn single_filter_matches_exactly() {
        let f = FilesystemFilter::single("pool/sender");
        assert!(f.matches("pool/sender"));
        assert!(!f.matches("pool/sender/child"));
        assert!(!f.matches("pool"));
        assert_eq!(f.as_single(), Some("pool/sender"));
    }

    #[test]
    fn set_filter_matches_members() {
        let f = FilesystemFilter::set(["pool/a", "pool/b"]);
        assert!(f.matches("pool/a"));
        assert!(f.matches("pool/b"));
        assert!(!f.matches("pool/c"));
        assert_eq!(f.as_single(), None);
    }

    #[test]
    fn singleton_set_is_single() {
        let f = FilesystemFilter::set(["pool/a"]);
        assert_eq!(f.as_single(), Some("pool/a"));
    }

    // =========================================================================
    // Config construction
    // =========================================================================

    #[test]
    fn sender_config_builder() {
        let config = SenderConfig::builder()
            .filesystems(FilesystemFilter::single("pool/sender"))
            .encrypt(false)
            .job_id(JobID::must("sender-job"))
            .step_protection(StepProtectionStrategyKind::Holds)
            .build();
        assert_eq!(config.job_id.as_str(), "sender-job");
        assert_eq!(config.step_protection, StepProtectionStrategyKind::Holds);
    }

    #[test]
    fn receiver_config_rejects_empty_root() {
        let config = ReceiverConfig::builder()
            .job_id(JobID::must("receiver-job"))
            .root_filesystem(String::new())
            .update_last_received_hold(true)
            .build();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyRootFilesystem)));
    }
}
