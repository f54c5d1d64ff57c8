use comms::msg::Metrics;
use comms::tensor::TensorLayout;

use crate::Result;

/// One supervised training example: a flat input row and its flat target row.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub input: Vec<f32>,
    pub target: Vec<f32>,
}

impl Example {
    pub fn new(input: Vec<f32>, target: Vec<f32>) -> Self {
        Self { input, target }
    }
}

/// Abstraction over a locally trainable model whose parameters can be
/// exported and replaced as one flat `f32` buffer.
///
/// Implementations encapsulate all architecture-, loss-, and optimizer-
/// specific logic. The synchronization machinery treats this trait as a
/// black box that maps example batches to parameter movements.
///
/// A `TrainableModel` does not:
/// - talk to the network,
/// - decide when training happens,
/// - track which parameter version it holds.
pub trait TrainableModel: Send {
    /// Shape of a single input row, without a batch dimension.
    fn input_shape(&self) -> &[usize];

    /// Shape of a single target/output row, without a batch dimension.
    fn output_shape(&self) -> &[usize];

    /// Describes how the flat parameter buffer splits into named tensors.
    ///
    /// The same layout must describe the buffers accepted by `set_weights`
    /// and produced by `weights`.
    fn layout(&self) -> TensorLayout;

    /// Copies the current parameters out as one flat buffer, in layout order.
    fn weights(&self) -> Vec<f32>;

    /// Replaces all parameters from one flat buffer, in layout order.
    ///
    /// # Errors
    /// Returns `ModelError::ShapeMismatch` if `weights` does not hold exactly
    /// the element count declared by `layout`.
    fn set_weights(&mut self, weights: &[f32]) -> Result<()>;

    /// Executes one training pass over the given batch, mutating parameters.
    ///
    /// # Errors
    /// Returns `ModelError::InvalidInput` for an empty batch and
    /// `ModelError::ShapeMismatch` when an example does not match the
    /// declared input/output shapes.
    fn fit(&mut self, examples: &[Example]) -> Result<()>;

    /// Computes the model output for a single input row.
    ///
    /// # Errors
    /// Returns `ModelError::ShapeMismatch` if `input` does not match
    /// `input_shape`.
    fn predict(&self, input: &[f32]) -> Result<Vec<f32>>;

    /// Measures prediction quality over a batch without mutating parameters.
    ///
    /// # Errors
    /// Returns `ModelError::InvalidInput` for an empty batch and
    /// `ModelError::ShapeMismatch` for malformed examples.
    fn evaluate(&self, examples: &[Example]) -> Result<Metrics>;
}
