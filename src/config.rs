//! Run configuration.
//!
//! Every field has a default, so a JSON config file only needs to name the
//! values it changes:
//!
//! ```json
//! {"net": {"hidden_channels": 64}, "loader": {"batch_size": 128}, "train": {"learning_rate": 0.0005}, "loss_weight": 0.5}
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::board::{BOARD_SIZE, STACK_DEPTH};

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to open config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Shape and initialisation of the reference scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Board edge length N.
    pub board_size: usize,
    /// Input channels C (stack slots per cell).
    pub stack_depth: usize,
    /// Backbone width F.
    pub hidden_channels: usize,
    /// Residual blocks in the shared backbone.
    pub residual_blocks: usize,
    /// Channels of the value head's unpadded convolution.
    pub value_channels: usize,
    /// Widths of the value head's hidden dense layers.
    pub value_hidden: Vec<usize>,
    /// Width of the policy head's expansion convolution.
    pub policy_hidden: usize,
    /// Parameter initialisation seed (0 = entropy).
    pub seed: u64,
}

impl Default for NetConfig {
    fn default() -> Self {
        NetConfig {
            board_size: BOARD_SIZE,
            stack_depth: STACK_DEPTH,
            hidden_channels: 128,
            residual_blocks: 1,
            value_channels: 64,
            value_hidden: vec![128, 16],
            policy_hidden: 512,
            seed: 0,
        }
    }
}

impl NetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.board_size < 3 {
            return Err(ConfigError::Invalid(format!(
                "board_size {} is below 3 (value head needs an unpadded 3x3 window)",
                self.board_size
            )));
        }
        if self.board_size > u8::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "board_size {} does not fit a cell coordinate",
                self.board_size
            )));
        }
        let widths = [
            ("stack_depth", self.stack_depth),
            ("hidden_channels", self.hidden_channels),
            ("value_channels", self.value_channels),
            ("policy_hidden", self.policy_hidden),
        ];
        for (name, width) in widths {
            if width == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if self.value_hidden.contains(&0) {
            return Err(ConfigError::Invalid(
                "value_hidden widths must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Batching and shuffling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub batch_size: usize,
    /// Threads used to encode the examples of a batch.
    pub workers: usize,
    pub shuffle: bool,
    /// Shuffle seed (0 = entropy).
    pub seed: u64,
    /// Skip the final batch when it is smaller than `batch_size`.
    pub drop_last: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            batch_size: 64,
            workers: 2,
            shuffle: true,
            seed: 0,
            drop_last: false,
        }
    }
}

impl LoaderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be positive".to_string()));
        }
        Ok(())
    }

    /// Returns the shuffle RNG for this configuration.
    pub fn rng(&self) -> SmallRng {
        if self.seed != 0 {
            SmallRng::seed_from_u64(self.seed)
        } else {
            SmallRng::from_entropy()
        }
    }
}

/// Optimiser settings. Defaults follow `torch.optim.AdamW`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub learning_rate: f64,
    pub weight_decay: f32,
    /// Passes over the dataset made by `taknet train`.
    pub epochs: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            learning_rate: 1e-3,
            weight_decay: 1e-2,
            epochs: 1,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "learning_rate {} must be finite and positive",
                self.learning_rate
            )));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "weight_decay {} must be finite and non-negative",
                self.weight_decay
            )));
        }
        Ok(())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub net: NetConfig,
    pub loader: LoaderConfig,
    pub train: TrainConfig,
    /// Weight λ of the value loss in `policy + λ·value`.
    pub loss_weight: f32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            net: NetConfig::default(),
            loader: LoaderConfig::default(),
            train: TrainConfig::default(),
            loss_weight: 1.0,
        }
    }
}

impl Config {
    /// Loads a JSON config file. Missing fields keep their defaults.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.net.validate()?;
        self.loader.validate()?;
        self.train.validate()?;
        if !self.loss_weight.is_finite() || self.loss_weight < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "loss_weight {} must be finite and non-negative",
                self.loss_weight
            )));
        }
        Ok(())
    }
}
