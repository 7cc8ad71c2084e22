//! taknet: policy-value learning for 4x4 Tak.
//!
//! Encodes stacked Tak boards and slide-and-drop moves into fixed-shape
//! tensors, batches sparse move-probability targets without padding, and
//! computes the structured policy-value loss of a scorer over them, and
//! trains the reference scorer against that loss.

pub mod board;
pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluate;
pub mod nn;

pub use error::{Error, Result};
