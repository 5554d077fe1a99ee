//! Step-protection core of the zrepl replication engine.
//!
//! Replication steps are long-running and resumable, and datasets they read
//! from are subject to concurrent pruning. This crate owns the durable
//! markers that keep an in-flight step's snapshots alive and record
//! replication progress:
//!
//! - [`names`] — the bijective codec between job/snapshot identity and ZFS
//!   hold tags / bookmark names
//! - [`abstraction`] — the [`Abstraction`] sum type over the marker kinds,
//!   with extractors that classify raw ZFS objects
//! - [`step`] — the pre-send step-protection strategies (`holds`,
//!   `bookmarks`, `none`)
//! - [`cursor`] — replication cursor, tentative cursor, and last-received
//!   hold with create-then-destroy move semantics
//! - [`list`] / [`cache`] / [`gc`] — enumeration of a filesystem's markers,
//!   the per-filesystem memoization in front of it, and the stale-marker
//!   collector that runs after every replication attempt
//! - [`sender`] / [`receiver`] — the endpoint façades the outer engine
//!   drives
//! - [`semaphore`] — the counting semaphore bounding listing fan-out
//!
//! All durable state lives in ZFS objects; there is no database. Every
//! marker name embeds the owning job's id, and cross-job collection is
//! forbidden throughout.

pub mod abstraction;
pub mod cache;
pub mod cursor;
pub mod gc;
pub mod list;
pub mod names;
pub mod receiver;
pub mod semaphore;
pub mod sender;
pub mod step;

pub use abstraction::{Abstraction, AbstractionKind, AbstractionKindSet};
pub use cache::SendAbstractionsCache;
pub use cursor::CursorError;
pub use gc::StaleDestroy;
pub use list::{list_abstractions, ListError, ListQuery, PerFilesystemError};
pub use names::NameError;
pub use receiver::{Receiver, ReceiverError};
pub use semaphore::{AcquireError, Permit, Semaphore};
pub use sender::{Sender, SenderError, StepCleanup};
pub use step::{SendArgs, StepError};
