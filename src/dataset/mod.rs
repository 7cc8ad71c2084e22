//! Training data: records, encoded examples, batches, and epoch iteration.

pub mod batch;
pub mod loader;
pub mod record;

pub use batch::{Batch, BatchError, Example, SparseTargets};
pub use loader::{Batches, DataLoader, LoaderError};
pub use record::{Dataset, DatasetError, Record, RecordError};
