//! Shared test utilities for the zrepl crates.
//!
//! Provides common helpers to reduce boilerplate across test modules:
//!
//! - [`ReplicaPair`] - An in-memory pool with a sender dataset and a
//!   receive-side root, the standing setup of the replication scenarios
//! - [`init_logging`] - Tracing subscriber for test output, honoring
//!   `RUST_LOG`
//! - [`strategies`] - Proptest generators for job ids, guids, and dataset
//!   names

#![deny(unsafe_code)]

mod fixtures;
pub use fixtures::{init_logging, ReplicaPair};

pub mod strategies;
