//! Shared replication harness for the endpoint integration tests.
//!
//! Mimics the replication invocations of an active-side job for a single
//! sender-receiver filesystem pair. The wire transport is out of scope, so
//! a "transfer" is modeled as byte accounting against a per-snapshot size,
//! with an optional per-step budget standing in for a sender that fails
//! mid-stream; resume state carries across invocations the way a resume
//! token would.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use zrepl_endpoint::{Receiver, SendArgs, Sender};
use zrepl_test_utils::ReplicaPair;
use zrepl_types::{
    FilesystemFilter, FilesystemVersion, JobID, ReceiverConfig, SenderConfig,
    StepProtectionStrategyKind,
};
use zrepl_zfs::{ListVersionOptions, MemoryZfs, Zfs};

/// Default modeled size of a snapshot's send stream, in bytes.
const DEFAULT_STREAM_BYTES: u64 = 1024;

/// What one step of a replication run did.
#[derive(Debug)]
pub struct StepReport {
    /// Name of the step's target snapshot.
    pub to: String,
    /// Whether the step's stream transferred completely.
    pub completed: bool,
}

/// One sender/receiver pair plus the transfer model shared across retries.
pub struct ReplicationInvocation {
    pub zfs: Arc<MemoryZfs>,
    pub zfs_dyn: Arc<dyn Zfs>,
    pub sender: Sender,
    pub receiver: Receiver,
    pub sfs: String,
    pub rfs: String,
    /// Per-step transfer budget; `None` transfers everything.
    pub fail_after_bytes: Option<u64>,
    sizes: Arc<Mutex<HashMap<u64, u64>>>,
    resume: Arc<Mutex<HashMap<u64, u64>>>,
}

impl ReplicationInvocation {
    pub fn new(
        pair: &ReplicaPair,
        sjid: &JobID,
        rjid: &JobID,
        strategy: StepProtectionStrategyKind,
    ) -> Self {
        let zfs_dyn: Arc<dyn Zfs> = Arc::clone(&pair.zfs) as Arc<dyn Zfs>;
        let sender = Sender::new(
            SenderConfig::builder()
                .filesystems(FilesystemFilter::single(&pair.sender_fs))
                .encrypt(false)
                .job_id(sjid.clone())
                .step_protection(strategy)
                .build(),
            Arc::clone(&zfs_dyn),
        )
        .expect("sender config must validate");
        let receiver = Receiver::new(
            ReceiverConfig::builder()
                .job_id(rjid.clone())
                .root_filesystem(pair.receiver_root.clone())
                .update_last_received_hold(true)
                .build(),
            Arc::clone(&zfs_dyn),
        )
        .expect("receiver config must validate");
        Self {
            zfs: Arc::clone(&pair.zfs),
            zfs_dyn,
            sender,
            receiver,
            sfs: pair.sender_fs.clone(),
            rfs: pair.receive_fs(),
            fail_after_bytes: None,
            sizes: Arc::new(Mutex::new(HashMap::new())),
            resume: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// A new invocation against the same pool and transfer state, under a
    /// different step-protection strategy — a job reconfiguration between
    /// attempts.
    pub fn reconfigured(
        &self,
        pair: &ReplicaPair,
        sjid: &JobID,
        rjid: &JobID,
        strategy: StepProtectionStrategyKind,
    ) -> Self {
        let mut other = Self::new(pair, sjid, rjid, strategy);
        other.fail_after_bytes = self.fail_after_bytes;
        other.sizes = Arc::clone(&self.sizes);
        other.resume = Arc::clone(&self.resume);
        other
    }

    /// Takes a snapshot whose modeled stream is `bytes` long.
    pub fn snapshot_sized(&self, fs: &str, name: &str, bytes: u64) -> FilesystemVersion {
        let snap = self.zfs.snapshot(fs, name);
        self.sizes.lock().insert(snap.guid, bytes);
        snap
    }

    /// Plans the steps of the next run: resume a pending full send, start a
    /// full send of the newest snapshot on an empty receiver, or an
    /// incremental chain from the most recent common version.
    async fn plan(&self, ctx: &CancellationToken) -> Vec<SendArgs> {
        let sender_versions = self
            .zfs
            .list_filesystem_versions(ctx, &self.sfs, ListVersionOptions::all())
            .await
            .expect("list sender versions");
        let sender_snaps: Vec<FilesystemVersion> =
            sender_versions.iter().filter(|v| v.is_snapshot()).cloned().collect();
        let Some(latest) = sender_snaps.last().cloned() else {
            return Vec::new();
        };

        let receiver_snaps = match self
            .zfs
            .list_filesystem_versions(ctx, &self.rfs, ListVersionOptions::snapshots_only())
            .await
        {
            Ok(versions) => versions,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => panic!("list receiver versions: {e}"),
        };

        let Some(base_guid) = receiver_snaps.last().map(|v| v.guid) else {
            // empty receiver: full send, preferring a partially transferred
            // snapshot over the newest one
            let pending = {
                let resume = self.resume.lock();
                sender_snaps.iter().find(|s| resume.contains_key(&s.guid)).cloned()
            };
            let to = pending.unwrap_or(latest);
            return vec![SendArgs { filesystem: self.sfs.clone(), from: None, to }];
        };

        // incremental source: the common version on the sender side, a
        // snapshot if it still exists, else any bookmark of it (the
        // replication cursor's whole purpose)
        let from = sender_versions
            .iter()
            .filter(|v| v.guid == base_guid)
            .max_by_key(|v| v.is_snapshot())
            .cloned()
            .expect("no common version between sender and receiver");

        let mut steps = Vec::new();
        let mut prev = from;
        for snap in sender_snaps {
            if snap.create_txg <= prev.create_txg {
                continue;
            }
            steps.push(SendArgs {
                filesystem: self.sfs.clone(),
                from: Some(prev.clone()),
                to: snap.clone(),
            });
            prev = snap;
        }
        steps
    }

    /// Advances the modeled transfer of `to` by one attempt's budget.
    fn transfer(&self, to: &FilesystemVersion) -> bool {
        let size = *self.sizes.lock().get(&to.guid).unwrap_or(&DEFAULT_STREAM_BYTES);
        match self.fail_after_bytes {
            None => true,
            Some(budget) => {
                let mut resume = self.resume.lock();
                let received = resume.entry(to.guid).or_insert(0);
                *received += budget;
                if *received >= size {
                    resume.remove(&to.guid);
                    true
                } else {
                    false
                }
            },
        }
    }

    /// One replication attempt: plan, then run steps until one fails.
    pub async fn run(&self, ctx: &CancellationToken) -> Vec<StepReport> {
        let mut report = Vec::new();
        for args in self.plan(ctx).await {
            self.sender.pre_send(ctx, &args).await.expect("pre_send");
            if self.transfer(&args.to) {
                self.zfs.receive_snapshot(&self.rfs, &args.to.name, &args.to);
                self.receiver
                    .receive_complete(ctx, &self.rfs, &args.to.name)
                    .await
                    .expect("receive_complete");
                self.sender.after_step(ctx, &args, true).await.expect("after_step completed");
                report.push(StepReport { to: args.to.name.clone(), completed: true });
            } else {
                self.sender.after_step(ctx, &args, false).await.expect("after_step incomplete");
                report.push(StepReport { to: args.to.name.clone(), completed: false });
                break;
            }
        }
        report
    }
}

/// Looks up `fs{relpath}` (e.g. `@1` or `#name`), panicking if absent.
pub async fn fsversion(
    ctx: &CancellationToken,
    zfs: &MemoryZfs,
    fs: &str,
    relpath: &str,
) -> FilesystemVersion {
    zfs.get_filesystem_version(ctx, &format!("{fs}{relpath}"))
        .await
        .unwrap_or_else(|e| panic!("expected version {fs}{relpath}: {e}"))
}

/// The bookmark names present on `fs`.
pub async fn bookmark_names(ctx: &CancellationToken, zfs: &MemoryZfs, fs: &str) -> Vec<String> {
    zfs.list_filesystem_versions(ctx, fs, ListVersionOptions::bookmarks_only())
        .await
        .expect("list bookmarks")
        .into_iter()
        .map(|v| v.name)
        .collect()
}
