use model::{Example, ModelError};
use parking_lot::Mutex;

/// Accumulates validated training examples until a round is triggered.
///
/// Inputs and targets are flat rows checked against the owning model's
/// declared shapes; a leading batch axis of size one carries the same flat
/// data and is therefore accepted as-is, while any larger batch changes the
/// row length and is rejected. Data is copied on entry, so callers keep
/// ownership of their slices.
pub struct ExampleBuffer {
    input_len: usize,
    target_len: usize,
    examples: Mutex<Vec<Example>>,
}

impl ExampleBuffer {
    /// Creates an empty buffer validating against the given per-example
    /// shapes (no batch dimension).
    pub fn new(input_shape: &[usize], output_shape: &[usize]) -> Self {
        Self {
            input_len: input_shape.iter().product(),
            target_len: output_shape.iter().product(),
            examples: Mutex::new(Vec::new()),
        }
    }

    /// Copies one example into the buffer and returns the new size.
    ///
    /// # Errors
    /// Returns `ModelError::ShapeMismatch` when either row disagrees with the
    /// declared shapes.
    pub fn add(&self, input: &[f32], target: &[f32]) -> Result<usize, ModelError> {
        if input.len() != self.input_len {
            return Err(ModelError::ShapeMismatch {
                what: "input",
                got: input.len(),
                expected: self.input_len,
            });
        }
        if target.len() != self.target_len {
            return Err(ModelError::ShapeMismatch {
                what: "target",
                got: target.len(),
                expected: self.target_len,
            });
        }

        let mut examples = self.examples.lock();
        examples.push(Example::new(input.to_vec(), target.to_vec()));
        Ok(examples.len())
    }

    /// Number of buffered examples.
    pub fn len(&self) -> usize {
        self.examples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes every buffered example in insertion order, leaving the buffer
    /// empty in the same atomic step.
    pub fn drain(&self) -> Vec<Example> {
        std::mem::take(&mut *self.examples.lock())
    }
}
