//! Test fixtures over the in-memory ZFS.

use std::sync::Arc;

use zrepl_zfs::MemoryZfs;

/// Installs a tracing subscriber for test output.
///
/// Honors `RUST_LOG`; repeated calls are harmless (the first one wins).
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An in-memory pool holding one sender dataset and the receive-side root,
/// the standing setup of the replication scenarios.
///
/// Datasets created:
/// - `pool/sender` — the replicated dataset
/// - `pool/receiver` — the receive root
/// - `pool/receiver/pool/sender` — the receive-side counterpart, as laid
///   out by a receiver rooted at `pool/receiver`
pub struct ReplicaPair {
    /// The shared in-memory pool; sender and receiver datasets live on the
    /// same host, as in the platform tests.
    pub zfs: Arc<MemoryZfs>,
    /// The sender-side dataset.
    pub sender_fs: String,
    /// The receiver root dataset.
    pub receiver_root: String,
}

impl ReplicaPair {
    /// Creates the standing dataset layout.
    pub fn new() -> Self {
        let zfs = Arc::new(MemoryZfs::new());
        let sender_fs = "pool/sender".to_string();
        let receiver_root = "pool/receiver".to_string();
        zfs.create_filesystem(&sender_fs);
        zfs.create_filesystem(&receiver_root);
        zfs.create_filesystem(&format!("{receiver_root}/{sender_fs}"));
        Self { zfs, sender_fs, receiver_root }
    }

    /// The receive-side dataset for the sender dataset.
    pub fn receive_fs(&self) -> String {
        format!("{}/{}", self.receiver_root, self.sender_fs)
    }
}

impl Default for ReplicaPair {
    fn default() -> Self {
        Self::new()
    }
}
