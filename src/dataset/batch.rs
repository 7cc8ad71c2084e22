//! Batching of encoded examples.
//!
//! Boards are stacked into one (B, N, N, C) tensor. Targets are kept sparse
//! and unpadded in compressed-row form: all examples' coordinates and
//! probabilities live in two flat vectors, and `offsets[b]..offsets[b + 1]`
//! is example `b`'s slice.

use ndarray::{stack, Array1, Array3, Array4, ArrayView3, Axis};

use crate::nn::encoding::ActionCoord;

/// One encoded training example.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    /// (N, N, C) board tensor from the side to move.
    pub board: Array3<f32>,
    pub coords: Vec<ActionCoord>,
    /// Target probability per coordinate, parallel to `coords`.
    pub probs: Vec<f32>,
    pub value: f32,
}

/// Errors raised while assembling a batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("cannot build a batch from zero examples")]
    Empty,

    #[error("example {index} has board shape {found:?}, expected {expected:?}")]
    BoardShape {
        index: usize,
        found: (usize, usize, usize),
        expected: (usize, usize, usize),
    },

    #[error("failed to stack boards: {0}")]
    Stack(String),

    #[error("example {index} has {coords} coordinates but {probs} probabilities")]
    MisalignedTargets {
        index: usize,
        coords: usize,
        probs: usize,
    },
}

/// Per-example variable-length (coordinate, probability) lists.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseTargets {
    coords: Vec<ActionCoord>,
    probs: Vec<f32>,
    offsets: Vec<usize>,
}

impl Default for SparseTargets {
    fn default() -> Self {
        SparseTargets::new()
    }
}

impl SparseTargets {
    /// Creates an empty target set with no examples.
    pub fn new() -> SparseTargets {
        SparseTargets {
            coords: Vec::new(),
            probs: Vec::new(),
            offsets: vec![0],
        }
    }

    /// Appends one example's target list. Lists of different lengths are
    /// rejected.
    pub fn push(&mut self, coords: &[ActionCoord], probs: &[f32]) -> Result<(), BatchError> {
        if coords.len() != probs.len() {
            return Err(BatchError::MisalignedTargets {
                index: self.len(),
                coords: coords.len(),
                probs: probs.len(),
            });
        }
        self.coords.extend_from_slice(coords);
        self.probs.extend_from_slice(probs);
        self.offsets.push(self.coords.len());
        Ok(())
    }

    /// Number of examples.
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns example `b`'s coordinates and probabilities.
    pub fn example(&self, b: usize) -> (&[ActionCoord], &[f32]) {
        let range = self.offsets[b]..self.offsets[b + 1];
        (&self.coords[range.clone()], &self.probs[range])
    }

    /// Iterates over every example's target slices in batch order.
    pub fn iter(&self) -> impl Iterator<Item = (&[ActionCoord], &[f32])> + '_ {
        (0..self.len()).map(move |b| self.example(b))
    }

    /// Target-list length of every example.
    pub fn lengths(&self) -> Vec<usize> {
        self.offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Total number of (coordinate, probability) pairs.
    pub fn total_pairs(&self) -> usize {
        self.coords.len()
    }
}

/// A training batch. Example `b` is the `b`-th input to [`Batch::collate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// (B, N, N, C) stacked boards.
    pub boards: Array4<f32>,
    pub targets: SparseTargets,
    /// (B,) game outcomes.
    pub values: Array1<f32>,
}

impl Batch {
    /// Assembles examples into a batch, keeping their order. Inputs are not
    /// modified and target lists are neither padded nor sorted.
    pub fn collate(examples: &[Example]) -> Result<Batch, BatchError> {
        let first = examples.first().ok_or(BatchError::Empty)?;
        let expected = first.board.dim();

        let mut views: Vec<ArrayView3<f32>> = Vec::with_capacity(examples.len());
        let mut targets = SparseTargets::new();
        for (index, example) in examples.iter().enumerate() {
            if example.board.dim() != expected {
                return Err(BatchError::BoardShape {
                    index,
                    found: example.board.dim(),
                    expected,
                });
            }
            views.push(example.board.view());
            targets.push(&example.coords, &example.probs)?;
        }

        let boards = stack(Axis(0), &views).map_err(|e| BatchError::Stack(e.to_string()))?;
        let values = examples.iter().map(|e| e.value).collect::<Array1<f32>>();

        Ok(Batch {
            boards,
            targets,
            values,
        })
    }

    /// Number of examples.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
