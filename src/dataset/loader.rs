//! Shuffled epoch iteration over a dataset.
//!
//! Each epoch visits every record exactly once in a random order. The
//! records of one batch are encoded in parallel on a dedicated rayon pool;
//! encoding is a pure function of the record, so the result does not depend
//! on the number of workers.

use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use tracing::debug;

use super::batch::{Batch, BatchError, Example};
use super::record::{Dataset, DatasetError};
use crate::config::LoaderConfig;
use crate::nn::encoding::ActionSpace;

/// Errors raised while producing batches.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("batch size must be positive")]
    ZeroBatchSize,

    #[error("failed to build encoding thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// Batches a borrowed dataset.
pub struct DataLoader<'a> {
    dataset: &'a Dataset,
    space: ActionSpace,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    pool: rayon::ThreadPool,
}

impl<'a> DataLoader<'a> {
    pub fn new(
        dataset: &'a Dataset,
        space: ActionSpace,
        config: &LoaderConfig,
    ) -> Result<DataLoader<'a>, LoaderError> {
        if config.batch_size == 0 {
            return Err(LoaderError::ZeroBatchSize);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers.max(1))
            .build()?;
        Ok(DataLoader {
            dataset,
            space,
            batch_size: config.batch_size,
            shuffle: config.shuffle,
            drop_last: config.drop_last,
            pool,
        })
    }

    pub fn action_space(&self) -> ActionSpace {
        self.space
    }

    /// Number of batches one epoch yields.
    pub fn num_batches(&self) -> usize {
        let n = self.dataset.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    /// Starts a new epoch. The order is drawn from `rng` when shuffling is
    /// enabled and is the file order otherwise.
    pub fn epoch<R: Rng + ?Sized>(&self, rng: &mut R) -> Batches<'_, 'a> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            order.shuffle(rng);
        }
        Batches {
            loader: self,
            order,
            cursor: 0,
        }
    }

    /// Encodes the given records in parallel and collates them.
    pub fn batch_of(&self, indices: &[usize]) -> Result<Batch, LoaderError> {
        let examples: Vec<Example> = self.pool.install(|| {
            indices
                .par_iter()
                .map(|&i| self.dataset.example(i, &self.space))
                .collect::<Result<Vec<_>, _>>()
        })?;
        Ok(Batch::collate(&examples)?)
    }
}

/// Iterator over one epoch's batches.
pub struct Batches<'l, 'a> {
    loader: &'l DataLoader<'a>,
    order: Vec<usize>,
    cursor: usize,
}

impl Batches<'_, '_> {
    /// Record indices in visiting order for this epoch.
    pub fn order(&self) -> &[usize] {
        &self.order
    }
}

impl Iterator for Batches<'_, '_> {
    type Item = Result<Batch, LoaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.order.len() - self.cursor;
        let size = remaining.min(self.loader.batch_size);
        if size == 0 || (self.loader.drop_last && size < self.loader.batch_size) {
            return None;
        }
        let chunk = &self.order[self.cursor..self.cursor + size];
        self.cursor += size;
        debug!(start = self.cursor - size, size, "encoding batch");
        Some(self.loader.batch_of(chunk))
    }
}
