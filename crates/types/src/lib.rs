//! Core domain types for the zrepl replication engine.
//!
//! This crate provides the foundational types shared by the sender and
//! receiver endpoints:
//! - [`JobID`] — validated identity of a replication job, embedded in every
//!   durable marker the engine places on ZFS objects
//! - [`FilesystemVersion`] — an observed snapshot or bookmark of a dataset
//! - [`StepProtectionStrategyKind`] — the step-protection policy selector
//!   with its wire-exact serialization
//! - [`SenderConfig`] / [`ReceiverConfig`] — per-endpoint inputs

pub mod config;
pub mod jobid;
pub mod version;

// Re-export commonly used types at crate root
pub use config::{
    ConfigError, FilesystemFilter, ReceiverConfig, SenderConfig, StepProtectionStrategyKind,
};
pub use jobid::{InvalidJobId, JobID};
pub use version::{FilesystemVersion, VersionKind};
