//! Crate-level error type.

use crate::board::{BoardError, MoveError, PieceCodeError};
use crate::config::ConfigError;
use crate::dataset::{BatchError, DatasetError, LoaderError, RecordError};
use crate::nn::checkpoint::CheckpointError;
use crate::nn::{EncodeError, InferenceError, LossError, ModelError, TrainError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    PieceCode(#[from] PieceCodeError),

    #[error(transparent)]
    Board(#[from] BoardError),

    #[error(transparent)]
    Move(#[from] MoveError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Loss(#[from] LossError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Train(#[from] TrainError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
