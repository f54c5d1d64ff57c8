use std::{borrow::Cow, sync::Arc};

use comms::{
    hyper::Hyperparameters,
    msg::{Msg, SnapshotHead},
    tensor::TensorLayout,
};

/// A consistent `(version, weights, hyperparameters)` triple, shared as-is
/// between connection bootstraps and round-close broadcasts.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotPayload {
    pub head: SnapshotHead,
    pub weights: Vec<f32>,
}

impl SnapshotPayload {
    /// The handshake reply for a newly attached client.
    pub fn init_msg(&self) -> Msg<'_> {
        Msg::InitSnapshot {
            head: Cow::Borrowed(&self.head),
            weights: &self.weights,
        }
    }

    /// The round-close broadcast frame.
    pub fn broadcast_msg(&self) -> Msg<'_> {
        Msg::NewVersion {
            head: Cow::Borrowed(&self.head),
            weights: &self.weights,
        }
    }
}

/// The canonical model: authoritative weights, their version, and the round
/// hyperparameters that travel with them.
///
/// The version advances by exactly one per applied merge and never anywhere
/// else.
pub struct VersionStore {
    version: u64,
    layout: TensorLayout,
    weights: Vec<f32>,
    hyper: Hyperparameters,
    /// Rebuilt after every mutation, so readers always see one consistent
    /// triple and never a mix of two versions.
    payload: Arc<SnapshotPayload>,
}

impl VersionStore {
    /// Creates a store with zero-initialized weights at version 0.
    pub fn new(layout: TensorLayout, hyper: Hyperparameters) -> Self {
        let weights = vec![0.0; layout.len()];
        let payload = Arc::new(SnapshotPayload {
            head: SnapshotHead {
                version: 0,
                hyper,
                layout: layout.clone(),
            },
            weights: weights.clone(),
        });

        Self {
            version: 0,
            layout,
            weights,
            hyper,
            payload,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn layout(&self) -> &TensorLayout {
        &self.layout
    }

    /// Elements in the canonical weight buffer.
    pub fn params(&self) -> usize {
        self.weights.len()
    }

    pub fn hyper(&self) -> Hyperparameters {
        self.hyper
    }

    /// Seeds non-zero initial weights without advancing the version.
    ///
    /// # Errors
    /// Returns the expected element count when `weights` does not fit the
    /// layout.
    pub fn set_weights(&mut self, weights: Vec<f32>) -> Result<(), usize> {
        self.layout.check(&weights)?;
        self.weights = weights;
        self.rebuild();
        Ok(())
    }

    /// Folds a merged round delta into the weights, scaled by the learning
    /// rate, and advances the version by exactly one.
    pub fn apply_merged(&mut self, merged: &[f32]) {
        debug_assert_eq!(merged.len(), self.weights.len());

        let lr = self.hyper.learning_rate;
        for (w, d) in self.weights.iter_mut().zip(merged) {
            *w += lr * d;
        }

        self.version += 1;
        self.rebuild();
    }

    /// Swaps the hyperparameters announced with the next snapshot.
    pub fn set_hyperparameters(&mut self, hyper: Hyperparameters) {
        self.hyper = hyper;
        self.rebuild();
    }

    /// The current canonical snapshot, cheap to clone and safe to ship.
    pub fn payload(&self) -> Arc<SnapshotPayload> {
        Arc::clone(&self.payload)
    }

    fn rebuild(&mut self) {
        self.payload = Arc::new(SnapshotPayload {
            head: SnapshotHead {
                version: self.version,
                hyper: self.hyper,
                layout: self.layout.clone(),
            },
            weights: self.weights.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use comms::tensor::TensorSpec;

    use super::*;

    fn store(learning_rate: f32) -> VersionStore {
        let layout = TensorLayout::new(vec![TensorSpec::new("params", vec![3])]);
        let hyper = Hyperparameters::new(
            NonZeroUsize::new(5).unwrap(),
            NonZeroUsize::new(2).unwrap(),
        )
        .with_learning_rate(learning_rate);

        VersionStore::new(layout, hyper)
    }

    #[test]
    fn starts_zeroed_at_version_zero() {
        let store = store(1.0);

        assert_eq!(store.version(), 0);
        assert_eq!(store.params(), 3);
        assert_eq!(store.payload().weights, vec![0.0; 3]);
        assert_eq!(store.payload().head.version, 0);
    }

    #[test]
    fn apply_merged_advances_version_by_one() {
        let mut store = store(1.0);

        store.apply_merged(&[1.0, 2.0, 3.0]);
        assert_eq!(store.version(), 1);
        assert_eq!(store.payload().weights, vec![1.0, 2.0, 3.0]);

        store.apply_merged(&[1.0, 1.0, 1.0]);
        assert_eq!(store.version(), 2);
        assert_eq!(store.payload().weights, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn apply_merged_scales_by_learning_rate() {
        let mut store = store(0.5);

        store.apply_merged(&[2.0, 4.0, 8.0]);
        assert_eq!(store.payload().weights, vec![1.0, 2.0, 4.0]);
    }

    #[test]
    fn payload_stays_consistent_across_mutation() {
        let mut store = store(1.0);
        let before = store.payload();

        store.apply_merged(&[1.0, 1.0, 1.0]);

        // The old payload is untouched; the new one carries the new pair.
        assert_eq!(before.head.version, 0);
        assert_eq!(before.weights, vec![0.0; 3]);
        assert_eq!(store.payload().head.version, 1);
        assert_eq!(store.payload().weights, vec![1.0; 3]);
    }

    #[test]
    fn hyper_swap_reaches_the_next_payload() {
        let mut store = store(1.0);
        let swapped = Hyperparameters::new(
            NonZeroUsize::new(7).unwrap(),
            NonZeroUsize::new(3).unwrap(),
        );

        store.set_hyperparameters(swapped);

        assert_eq!(store.payload().head.hyper, swapped);
        // The version does not move on a hyperparameter swap.
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn set_weights_validates_the_layout() {
        let mut store = store(1.0);

        assert_eq!(store.set_weights(vec![1.0, 2.0]), Err(3));
        assert!(store.set_weights(vec![1.0, 2.0, 3.0]).is_ok());
        assert_eq!(store.version(), 0);
        assert_eq!(store.payload().weights, vec![1.0, 2.0, 3.0]);
    }
}
