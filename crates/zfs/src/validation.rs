//! ZFS name and hold-tag validation.
//!
//! Mirrors the kernel's entity name checks closely enough that a name
//! accepted here is accepted by ZFS. Marker names are validated at encode
//! time so that an over-long job id or dataset path is a construction
//! error, not a runtime surprise.

use crate::error::ZfsError;

/// Maximum byte length of a ZFS hold tag.
pub const MAX_HOLD_TAG_BYTES: usize = 256;

/// Maximum byte length of a full dataset name, including the `@`/`#`
/// delimiter and version component.
pub const MAX_DATASET_NAME_BYTES: usize = 255;

/// Validates a snapshot hold tag.
///
/// Tags must be non-empty, at most [`MAX_HOLD_TAG_BYTES`] bytes, and
/// consist of `[a-zA-Z0-9_.:-]`.
///
/// # Errors
///
/// Returns [`ZfsError::InvalidHoldTag`] naming the violated constraint.
pub fn valid_hold_tag(tag: &str) -> Result<(), ZfsError> {
    if tag.is_empty() {
        return Err(ZfsError::InvalidHoldTag {
            tag: tag.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    if tag.len() > MAX_HOLD_TAG_BYTES {
        return Err(ZfsError::InvalidHoldTag {
            tag: tag.to_string(),
            reason: format!("length {} exceeds maximum {} bytes", tag.len(), MAX_HOLD_TAG_BYTES),
        });
    }
    if let Some(c) = tag.chars().find(|c| !is_tag_char(*c)) {
        return Err(ZfsError::InvalidHoldTag {
            tag: tag.to_string(),
            reason: format!("contains invalid character {c:?}; allowed: [a-zA-Z0-9_.:-]"),
        });
    }
    Ok(())
}

/// Validates a snapshot or bookmark name component against the full-path
/// length limit for the dataset it will live on.
///
/// # Errors
///
/// Returns [`ZfsError::InvalidName`] if the component is empty, contains a
/// character outside `[a-zA-Z0-9_.:-]`, or `filesystem` + delimiter +
/// component exceeds [`MAX_DATASET_NAME_BYTES`].
pub fn valid_version_name(filesystem: &str, name: &str) -> Result<(), ZfsError> {
    if name.is_empty() {
        return Err(ZfsError::InvalidName {
            name: name.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    if let Some(c) = name.chars().find(|c| !is_tag_char(*c)) {
        return Err(ZfsError::InvalidName {
            name: name.to_string(),
            reason: format!("contains invalid character {c:?}; allowed: [a-zA-Z0-9_.:-]"),
        });
    }
    let full_len = filesystem.len() + 1 + name.len();
    if full_len > MAX_DATASET_NAME_BYTES {
        return Err(ZfsError::InvalidName {
            name: format!("{filesystem}@{name}"),
            reason: format!(
                "full path is {full_len} bytes, exceeds maximum {MAX_DATASET_NAME_BYTES} bytes"
            ),
        });
    }
    Ok(())
}

/// Checks if a character is allowed in hold tags and version names.
fn is_tag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-')
}
