//! ZFS capability consumed by the zrepl endpoints.
//!
//! This crate defines the seam between the replication core and the actual
//! ZFS command surface:
//! - [`Zfs`] — the async capability trait (holds, bookmarks, version
//!   listing, destroys), every operation cancellation-aware
//! - [`ZfsError`] — the error taxonomy, with the distinguished
//!   [`ZfsError::BookmarkCloningNotSupported`] and
//!   [`ZfsError::DatasetDoesNotExist`] conditions callers branch on
//! - validation of hold tags and version names
//! - [`MemoryZfs`] — a complete in-memory implementation backing the test
//!   suite, living beside the trait the way an in-memory storage engine
//!   lives beside a file-backed one

pub mod capability;
pub mod error;
pub mod memory;
pub mod validation;

pub use capability::{ListVersionOptions, Mountpoint, Zfs};
pub use error::{Result, ZfsError};
pub use memory::MemoryZfs;
pub use validation::{valid_hold_tag, valid_version_name, MAX_DATASET_NAME_BYTES, MAX_HOLD_TAG_BYTES};
