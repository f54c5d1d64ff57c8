use std::num::NonZeroUsize;

/// Round hyperparameters, versioned alongside each canonical snapshot.
///
/// These travel only inside `InitSnapshot` and `NewVersion` frames, so clients
/// and the aggregator always agree on the thresholds for a given version.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Hyperparameters {
    /// How many buffered examples trigger one client update.
    pub examples_per_update: NonZeroUsize,
    /// How many distinct contributors close a round.
    pub min_contributors: NonZeroUsize,
    /// Scale applied to the merged delta when it is folded into the weights.
    pub learning_rate: f32,
}

impl Hyperparameters {
    /// Creates hyperparameters with the default merge scale of `1.0`.
    pub fn new(examples_per_update: NonZeroUsize, min_contributors: NonZeroUsize) -> Self {
        Self {
            examples_per_update,
            min_contributors,
            learning_rate: 1.0,
        }
    }

    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }
}
