use comms::msg::Metrics;
use comms::tensor::{TensorLayout, TensorSpec};
use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::{Example, ModelError, Result, TrainableModel};

/// A dense linear map `y = W·x + b` trained by full-batch gradient descent
/// on mean squared error.
///
/// Parameters start at zero and every `fit` call performs exactly one
/// gradient step over the whole batch, so training is deterministic given
/// the same sequence of batches.
pub struct LinearModel {
    weight: Array2<f32>,
    bias: Array1<f32>,
    learning_rate: f32,
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
}

impl LinearModel {
    /// Creates a zero-initialized model mapping `input_dim` features to
    /// `output_dim` outputs.
    ///
    /// # Errors
    /// Returns `ModelError::InvalidInput` if either dimension is zero or the
    /// learning rate is not a positive finite number.
    pub fn new(input_dim: usize, output_dim: usize, learning_rate: f32) -> Result<Self> {
        if input_dim == 0 || output_dim == 0 {
            return Err(ModelError::InvalidInput("model dimensions must be nonzero"));
        }
        if !learning_rate.is_finite() || learning_rate <= 0.0 {
            return Err(ModelError::InvalidInput(
                "learning rate must be positive and finite",
            ));
        }

        Ok(Self {
            weight: Array2::zeros((output_dim, input_dim)),
            bias: Array1::zeros(output_dim),
            learning_rate,
            input_shape: vec![input_dim],
            output_shape: vec![output_dim],
        })
    }

    fn input_dim(&self) -> usize {
        self.weight.ncols()
    }

    fn output_dim(&self) -> usize {
        self.weight.nrows()
    }

    /// Stacks a validated batch into `(inputs, targets)` design matrices.
    fn batch(&self, examples: &[Example]) -> Result<(Array2<f32>, Array2<f32>)> {
        if examples.is_empty() {
            return Err(ModelError::InvalidInput("batch is empty"));
        }

        let mut inputs = Array2::zeros((examples.len(), self.input_dim()));
        let mut targets = Array2::zeros((examples.len(), self.output_dim()));

        for (row, example) in examples.iter().enumerate() {
            if example.input.len() != self.input_dim() {
                return Err(ModelError::ShapeMismatch {
                    what: "input",
                    got: example.input.len(),
                    expected: self.input_dim(),
                });
            }
            if example.target.len() != self.output_dim() {
                return Err(ModelError::ShapeMismatch {
                    what: "target",
                    got: example.target.len(),
                    expected: self.output_dim(),
                });
            }

            inputs
                .row_mut(row)
                .assign(&ArrayView1::from(example.input.as_slice()));
            targets
                .row_mut(row)
                .assign(&ArrayView1::from(example.target.as_slice()));
        }

        Ok((inputs, targets))
    }
}

impl TrainableModel for LinearModel {
    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    fn layout(&self) -> TensorLayout {
        TensorLayout::new(vec![
            TensorSpec::new("weight", vec![self.output_dim(), self.input_dim()]),
            TensorSpec::new("bias", vec![self.output_dim()]),
        ])
    }

    fn weights(&self) -> Vec<f32> {
        let mut flat = Vec::with_capacity(self.weight.len() + self.bias.len());
        flat.extend(self.weight.iter());
        flat.extend(self.bias.iter());
        flat
    }

    fn set_weights(&mut self, weights: &[f32]) -> Result<()> {
        let expected = self.weight.len() + self.bias.len();
        if weights.len() != expected {
            return Err(ModelError::ShapeMismatch {
                what: "weights",
                got: weights.len(),
                expected,
            });
        }

        let (weight_flat, bias_flat) = weights.split_at(self.weight.len());
        for (dst, src) in self.weight.iter_mut().zip(weight_flat) {
            *dst = *src;
        }
        for (dst, src) in self.bias.iter_mut().zip(bias_flat) {
            *dst = *src;
        }
        Ok(())
    }

    fn fit(&mut self, examples: &[Example]) -> Result<()> {
        let (inputs, targets) = self.batch(examples)?;

        let predictions = inputs.dot(&self.weight.t()) + &self.bias;
        let errors = predictions - targets;

        // d/dW of mean squared error over every scalar in the batch.
        let step = self.learning_rate * 2.0
            / (examples.len() * self.output_dim()) as f32;
        let grad_weight = errors.t().dot(&inputs);
        let grad_bias = errors.sum_axis(Axis(0));

        self.weight -= &(grad_weight * step);
        self.bias -= &(grad_bias * step);
        Ok(())
    }

    fn predict(&self, input: &[f32]) -> Result<Vec<f32>> {
        if input.len() != self.input_dim() {
            return Err(ModelError::ShapeMismatch {
                what: "input",
                got: input.len(),
                expected: self.input_dim(),
            });
        }

        let x = ArrayView1::from(input);
        Ok((self.weight.dot(&x) + &self.bias).to_vec())
    }

    fn evaluate(&self, examples: &[Example]) -> Result<Metrics> {
        let (inputs, targets) = self.batch(examples)?;

        let predictions = inputs.dot(&self.weight.t()) + &self.bias;
        let loss = (predictions - targets).pow2().mean().unwrap_or(0.0);
        Ok(Metrics { loss })
    }
}
