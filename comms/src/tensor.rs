//! Named segmentation of flat `f32` parameter buffers.
//!
//! Weights and deltas travel the wire as one flat tail; a `TensorLayout`
//! carried in the frame head says how that buffer splits into named tensors.

use std::ops::Range;

/// One named tensor inside a flat buffer.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<usize>,
}

impl TensorSpec {
    pub fn new(name: impl Into<String>, shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            shape,
        }
    }

    /// The number of elements this tensor occupies.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered sequence of named tensors mapping a flat buffer into segments.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TensorLayout {
    tensors: Vec<TensorSpec>,
}

impl TensorLayout {
    pub fn new(tensors: Vec<TensorSpec>) -> Self {
        Self { tensors }
    }

    /// Total element count across all tensors.
    pub fn len(&self) -> usize {
        self.tensors.iter().map(TensorSpec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tensors(&self) -> &[TensorSpec] {
        &self.tensors
    }

    /// Iterates the tensors together with their element ranges in the flat
    /// buffer, in declaration order.
    pub fn segments(&self) -> impl Iterator<Item = (&TensorSpec, Range<usize>)> {
        let mut offset = 0;
        self.tensors.iter().map(move |spec| {
            let range = offset..offset + spec.len();
            offset = range.end;
            (spec, range)
        })
    }

    /// Looks up the element range of a tensor by name.
    pub fn range_of(&self, name: &str) -> Option<Range<usize>> {
        self.segments()
            .find(|(spec, _)| spec.name == name)
            .map(|(_, range)| range)
    }

    /// Checks that a flat buffer holds exactly this layout's elements.
    ///
    /// # Returns
    /// `Ok(())` or the expected element count on mismatch.
    pub fn check(&self, data: &[f32]) -> Result<(), usize> {
        let expected = self.len();
        if data.len() == expected {
            Ok(())
        } else {
            Err(expected)
        }
    }
}
