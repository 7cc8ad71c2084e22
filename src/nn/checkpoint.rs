//! Saving and restoring scorer parameters.
//!
//! A checkpoint is a CBOR blob holding a format version, the network
//! configuration, the network's burn record (MessagePack, full precision)
//! and, for checkpoints written during training, the optimiser state.
//! Restored networks are re-validated before use.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkBytesRecorder, Record, Recorder, RecorderError};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::network::{ModelError, TakModel, TakNet, TrainBackend, DEVICE};
use crate::config::NetConfig;

/// Current checkpoint format version.
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed checkpoint: {0}")]
    Decode(#[from] serde_cbor::Error),

    #[error("malformed parameter record: {0:?}")]
    Record(RecorderError),

    #[error("unsupported checkpoint version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },

    #[error("checkpoint holds an invalid network: {0}")]
    Model(#[from] ModelError),
}

/// Optimiser progress stored next to the parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    /// Parameter updates applied so far.
    pub steps: u64,
    /// The optimiser's burn record.
    pub optimizer: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct Checkpoint {
    version: u32,
    config: NetConfig,
    weights: Vec<u8>,
    #[serde(default)]
    training: Option<TrainingState>,
}

fn recorder() -> NamedMpkBytesRecorder<FullPrecisionSettings> {
    NamedMpkBytesRecorder::default()
}

/// Serialises any record of the training backend.
pub(crate) fn record_to_bytes<R: Record<TrainBackend>>(record: R) -> Result<Vec<u8>, CheckpointError> {
    Recorder::<TrainBackend>::record(&recorder(), record, ()).map_err(CheckpointError::Record)
}

/// Restores a record written by [`record_to_bytes`].
pub(crate) fn record_from_bytes<R: Record<TrainBackend>>(bytes: Vec<u8>) -> Result<R, CheckpointError> {
    Recorder::<TrainBackend>::load(&recorder(), bytes, &DEVICE).map_err(CheckpointError::Record)
}

fn encode(network: &TakNet, training: Option<TrainingState>) -> Result<Checkpoint, CheckpointError> {
    Ok(Checkpoint {
        version: CHECKPOINT_VERSION,
        config: network.config().clone(),
        weights: record_to_bytes(network.model.clone().into_record())?,
        training,
    })
}

fn decode(checkpoint: Checkpoint) -> Result<(TakNet, Option<TrainingState>), CheckpointError> {
    if checkpoint.version != CHECKPOINT_VERSION {
        return Err(CheckpointError::Version {
            found: checkpoint.version,
            expected: CHECKPOINT_VERSION,
        });
    }
    checkpoint.config.validate().map_err(ModelError::from)?;
    let record = record_from_bytes(checkpoint.weights)?;
    let model = TakModel::<TrainBackend>::new(&checkpoint.config, &DEVICE).load_record(record);
    let network = TakNet::from_parts(checkpoint.config, model)?;
    Ok((network, checkpoint.training))
}

/// Serialises a network to bytes.
pub fn to_bytes(network: &TakNet) -> Result<Vec<u8>, CheckpointError> {
    Ok(serde_cbor::to_vec(&encode(network, None)?)?)
}

/// Restores a network from bytes produced by [`to_bytes`].
pub fn from_bytes(bytes: &[u8]) -> Result<TakNet, CheckpointError> {
    let checkpoint: Checkpoint = serde_cbor::from_slice(bytes)?;
    Ok(decode(checkpoint)?.0)
}

pub fn save<P: AsRef<Path>>(network: &TakNet, path: P) -> Result<(), CheckpointError> {
    save_training(network, None, path)
}

/// Writes a checkpoint that also carries optimiser state.
pub fn save_training<P: AsRef<Path>>(
    network: &TakNet,
    training: Option<TrainingState>,
    path: P,
) -> Result<(), CheckpointError> {
    let path = path.as_ref();
    let io = |source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    };
    let checkpoint = encode(network, training)?;
    let mut writer = BufWriter::new(File::create(path).map_err(io)?);
    serde_cbor::to_writer(&mut writer, &checkpoint)?;
    writer.flush().map_err(io)?;
    info!(
        path = %path.display(),
        params = network.num_params(),
        steps = checkpoint.training.as_ref().map_or(0, |t| t.steps),
        "saved checkpoint"
    );
    Ok(())
}

pub fn load<P: AsRef<Path>>(path: P) -> Result<TakNet, CheckpointError> {
    Ok(load_training(path)?.0)
}

/// Reads a checkpoint along with any optimiser state it carries.
pub fn load_training<P: AsRef<Path>>(
    path: P,
) -> Result<(TakNet, Option<TrainingState>), CheckpointError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let checkpoint: Checkpoint = serde_cbor::from_reader(BufReader::new(file))?;
    let (network, training) = decode(checkpoint)?;
    info!(path = %path.display(), params = network.num_params(), "loaded checkpoint");
    Ok((network, training))
}
