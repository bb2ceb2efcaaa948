//! In-flight mirror registry (singleflight).
//!
//! Concurrent `mirror` calls for the same package version share one
//! download. The first caller for a key leads and does the work; later
//! callers wait on the leader's completion signal. A leader that goes away
//! without finishing (cancelled, panicked) removes its entry, and its
//! followers retry from the top.

use crate::cancel::OrCancelExt;
use crate::error::{MirrorError, MirrorResult};
use crate::types::{PackageId, PackageVersion};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// `(lowercased id, lowercased normalized version)`
type MirrorKey = (String, String);

fn mirror_key(id: &PackageId, version: &PackageVersion) -> MirrorKey {
    (id.lower(), version.to_normalized().to_ascii_lowercase())
}

pub struct InflightMirrors {
    inflight: DashMap<MirrorKey, watch::Receiver<bool>>,
    joined_count: AtomicU64,
}

enum Role<'a> {
    Leader(LeaderGuard<'a>),
    Follower(watch::Receiver<bool>),
}

/// Owned by the leader. Dropping it unregisters the key; completion is
/// only signalled through [`LeaderGuard::complete`].
struct LeaderGuard<'a> {
    inflight: &'a DashMap<MirrorKey, watch::Receiver<bool>>,
    key: MirrorKey,
    done: watch::Sender<bool>,
}

impl LeaderGuard<'_> {
    fn complete(self) {
        // send_replace never fails, even with no receivers left.
        self.done.send_replace(true);
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        self.inflight.remove(&self.key);
    }
}

impl InflightMirrors {
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
            joined_count: AtomicU64::new(0),
        }
    }

    /// Run `work` unless another caller is already mirroring the same key,
    /// in which case wait for that caller instead.
    ///
    /// `work` runs at most once per call. Its error is returned to the
    /// leader only; followers treat any outcome other than cancellation as
    /// finished. A follower's wait races `cancel`.
    pub async fn run<F, Fut>(
        &self,
        id: &PackageId,
        version: &PackageVersion,
        cancel: &CancellationToken,
        work: F,
    ) -> MirrorResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = MirrorResult<()>>,
    {
        let key = mirror_key(id, version);

        let guard = loop {
            match self.join_or_lead(&key) {
                Role::Leader(guard) => break guard,
                Role::Follower(mut done) => {
                    self.joined_count.fetch_add(1, Ordering::Relaxed);
                    debug!(package_id = %id, version = %version, "Joining in-flight mirror");

                    let finished = async { done.wait_for(|finished| *finished).await.is_ok() }
                        .or_cancel(cancel)
                        .await?;
                    if finished {
                        return Ok(());
                    }
                    debug!(package_id = %id, version = %version, "In-flight mirror abandoned, retrying");
                }
            }
        };

        let result = work().await;
        // A cancelled leader did not finish; its followers take over.
        if result != Err(MirrorError::Cancelled) {
            guard.complete();
        }
        result
    }

    fn join_or_lead(&self, key: &MirrorKey) -> Role<'_> {
        match self.inflight.entry(key.clone()) {
            Entry::Occupied(entry) => Role::Follower(entry.get().clone()),
            Entry::Vacant(entry) => {
                let (done, waiting) = watch::channel(false);
                entry.insert(waiting);
                Role::Leader(LeaderGuard {
                    inflight: &self.inflight,
                    key: key.clone(),
                    done,
                })
            }
        }
    }

    /// How many callers have waited on another caller's mirror so far.
    pub fn joined_count(&self) -> u64 {
        self.joined_count.load(Ordering::Relaxed)
    }

    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }
}

impl Default for InflightMirrors {
    fn default() -> Self {
        Self::new()
    }
}
