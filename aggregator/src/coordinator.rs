use std::sync::Arc;

use comms::{hyper::Hyperparameters, msg::UpdateHead};
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::{
    round::{Contribution, RoundState},
    store::{SnapshotPayload, VersionStore},
};

/// What the coordinator did with one inbound update.
#[derive(Debug, Clone)]
pub enum Submission {
    /// Counted for the open round; `contributors` distinct clients so far.
    Accepted { contributors: usize },
    /// This update crossed the threshold: the round closed and the payload
    /// is the freshly advanced canonical snapshot to broadcast.
    Closed(Arc<SnapshotPayload>),
    /// Computed against an outdated baseline and discarded; the client
    /// self-corrects on its next broadcast.
    Stale { baseline: u64, round: u64 },
    /// The delta does not fit the canonical layout; excluded from the round.
    ShapeMismatch { got: usize, expected: usize },
}

/// Single writer over the canonical model and the open round.
///
/// Every mutation runs inside one critical section: the upsert and the
/// threshold check are atomic, so exactly one close happens per round, and
/// the merge-apply-advance-install sequence is never observed half-done.
/// Updates arriving while a close is installing wait on the lock and are then
/// validated against the new round's version, so they roll into the next
/// round instead of being dropped.
pub struct Coordinator {
    inner: Mutex<Inner>,
}

struct Inner {
    store: VersionStore,
    round: RoundState,
}

impl Coordinator {
    pub fn new(store: VersionStore) -> Self {
        let round = RoundState::new(store.version());
        Self {
            inner: Mutex::new(Inner { store, round }),
        }
    }

    /// Processes one client update: validate shape and baseline, upsert, and
    /// close the round once enough distinct clients contributed.
    pub fn submit(&self, head: &UpdateHead, delta: &[f32]) -> Submission {
        let mut inner = self.inner.lock();

        let expected = inner.store.params();
        if delta.len() != expected || head.layout != *inner.store.layout() {
            warn!(
                client_id = head.client_id.as_str();
                "excluding mismatched delta: got {} elements, expected {expected}", delta.len(),
            );
            return Submission::ShapeMismatch {
                got: delta.len(),
                expected,
            };
        }

        let round = inner.round.round_version();
        if head.baseline_version != round {
            debug!(
                client_id = head.client_id.as_str();
                "discarding stale update: baseline {} != round {round}", head.baseline_version,
            );
            return Submission::Stale {
                baseline: head.baseline_version,
                round,
            };
        }

        let contribution = Contribution {
            num_examples: head.num_examples,
            delta: delta.to_vec(),
        };
        let contributors = inner.round.upsert(&head.client_id, contribution);

        // Read at submit time so a hyperparameter swap can unstick an open
        // round that waits on too many contributors.
        let min = inner.store.hyper().min_contributors.get();
        if contributors < min {
            debug!(
                client_id = head.client_id.as_str();
                "contribution counted: {contributors}/{min} at version {round}",
            );
            return Submission::Accepted { contributors };
        }

        let merged = inner.round.merged(expected);
        inner.store.apply_merged(&merged);
        let version = inner.store.version();
        inner.round = RoundState::new(version);

        info!("round closed: {contributors} contributors, new version {version}");
        Submission::Closed(inner.store.payload())
    }

    /// The current canonical snapshot.
    pub fn payload(&self) -> Arc<SnapshotPayload> {
        self.inner.lock().store.payload()
    }

    /// The current canonical version.
    pub fn version(&self) -> u64 {
        self.inner.lock().store.version()
    }

    /// Distinct contributors counted in the open round.
    pub fn contributors(&self) -> usize {
        self.inner.lock().round.contributors()
    }

    /// Swaps the hyperparameters carried by the next snapshot; the new
    /// contributor threshold applies from the next submission on.
    pub fn set_hyperparameters(&self, hyper: Hyperparameters) {
        self.inner.lock().store.set_hyperparameters(hyper);
    }
}
