//! Policy-value scorers.
//!
//! A [`Scorer`] maps a (B, N, N, C) board batch to a (B,) value in [-1, 1]
//! and a (B, N, N, 6, 7, 8, 8) tensor of raw policy logits whose axes match
//! [`ActionSpace::shape`]. Logits are never normalised here.
//!
//! [`TakNet`] is the reference scorer, a burn module:
//!   backbone: 3×3 conv C→F, then residual blocks at width F
//!   value:    unpadded 3×3 conv F→V, dense layers with ReLU, dense →1, tanh
//!   policy:   residual block, 3×3 conv F→P + batch norm + leaky ReLU,
//!             3×3 conv P→6·7·8·8, rearranged to (B, N, N, 6, 7, 8, 8)
//!
//! Parameters live on the autodiff CPU backend so [`crate::nn::train`] can
//! backpropagate through them; scoring runs on the inner backend with batch
//! norm in inference mode.

use std::sync::{Mutex, PoisonError};

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::module::{AutodiffModule, Module};
use burn::nn::conv::Conv2d;
use burn::nn::Linear;
use burn::tensor::activation::{leaky_relu, relu, tanh};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use ndarray::{Array1, Array4, ArrayD, ArrayView4, IxDyn};
use tracing::debug;

use super::encoding::{ActionSpace, ACTIONS_PER_CELL};
use super::layers::{
    conv_channels, dense_stack, linear_features, same_conv, valid_conv, ConvNorm, ResidualBlock,
    KERNEL, LEAKY_SLOPE,
};
use crate::config::{ConfigError, NetConfig};

/// Backend used for scoring.
pub type CpuBackend = NdArray<f32>;

/// Backend the parameters are trained on.
pub type TrainBackend = Autodiff<CpuBackend>;

/// Device every tensor of the reference scorer lives on.
pub const DEVICE: NdArrayDevice = NdArrayDevice::Cpu;

/// Errors raised when building or running a scorer.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("layer {layer} has shape {found:?}, expected {expected:?}")]
    Layer {
        layer: &'static str,
        found: Vec<usize>,
        expected: Vec<usize>,
    },

    #[error("input batch shape {found:?} does not match (B, {size}, {size}, {depth})")]
    InputShape {
        found: [usize; 4],
        size: usize,
        depth: usize,
    },

    #[error("policy output shape {found:?} does not match {expected:?}")]
    PolicyShape {
        found: Vec<usize>,
        expected: Vec<usize>,
    },

    #[error("value output shape {found:?} does not match [{batch}]")]
    ValueShape { found: Vec<usize>, batch: usize },

    #[error("policy head produces {found} channels per cell, action space needs {expected}")]
    PolicyChannels { found: usize, expected: usize },

    #[error("failed to read tensor data: {0}")]
    TensorData(String),

    #[error("failed to reshape {0}")]
    Reshape(#[from] ndarray::ShapeError),
}

/// Raw outputs of one forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutput {
    /// (B,) values in [-1, 1].
    pub value: Array1<f32>,
    /// (B, N, N, 6, 7, 8, 8) unnormalised logits.
    pub policy: ArrayD<f32>,
}

/// Expected policy tensor shape for a batch of `batch` boards.
pub fn policy_shape(space: &ActionSpace, batch: usize) -> Vec<usize> {
    let mut shape = Vec::with_capacity(7);
    shape.push(batch);
    shape.extend_from_slice(&space.shape());
    shape
}

impl ScoreOutput {
    /// Checks both output shapes against the action space.
    pub fn check_shape(&self, space: &ActionSpace, batch: usize) -> Result<(), ModelError> {
        if self.value.len() != batch {
            return Err(ModelError::ValueShape {
                found: self.value.shape().to_vec(),
                batch,
            });
        }
        let expected = policy_shape(space, batch);
        if self.policy.shape() != expected.as_slice() {
            return Err(ModelError::PolicyShape {
                found: self.policy.shape().to_vec(),
                expected,
            });
        }
        Ok(())
    }
}

/// Anything that scores board batches.
pub trait Scorer {
    /// Action space the policy output is laid out in.
    fn action_space(&self) -> ActionSpace;

    /// Input channels per cell.
    fn stack_depth(&self) -> usize;

    /// Runs one forward pass over a (B, N, N, C) batch.
    fn score(&self, boards: ArrayView4<f32>) -> Result<ScoreOutput, ModelError>;
}

/// Layers of the reference scorer.
#[derive(Module, Debug)]
pub struct TakModel<B: Backend> {
    stem: Conv2d<B>,
    trunk: Vec<ResidualBlock<B>>,
    value_conv: Conv2d<B>,
    value_layers: Vec<Linear<B>>,
    policy_block: ResidualBlock<B>,
    policy_hidden: ConvNorm<B>,
    policy_out: Conv2d<B>,
}

impl<B: Backend> TakModel<B> {
    pub fn new(config: &NetConfig, device: &B::Device) -> Self {
        let f = config.hidden_channels;
        let reduced = config.board_size + 1 - KERNEL;
        let mut widths = vec![config.value_channels * reduced * reduced];
        widths.extend_from_slice(&config.value_hidden);
        widths.push(1);

        TakModel {
            stem: same_conv([config.stack_depth, f], device),
            trunk: (0..config.residual_blocks)
                .map(|_| ResidualBlock::new(f, device))
                .collect(),
            value_conv: valid_conv([f, config.value_channels], device),
            value_layers: dense_stack(&widths, device),
            policy_block: ResidualBlock::new(f, device),
            policy_hidden: ConvNorm::new([f, config.policy_hidden], device),
            policy_out: same_conv([config.policy_hidden, ACTIONS_PER_CELL], device),
        }
    }

    /// Maps (B, N, N, C) boards to (B,) values and (B, N, N, 6·7·8·8) logits.
    pub fn forward(&self, boards: Tensor<B, 4>) -> (Tensor<B, 1>, Tensor<B, 4>) {
        let [batch, _, _, _] = boards.dims();

        // b I J C -> b C I J
        let mut x = self.stem.forward(boards.permute([0, 3, 1, 2]));
        for block in &self.trunk {
            x = block.forward(x);
        }

        let v = self.value_conv.forward(x.clone());
        let [_, channels, rows, cols] = v.dims();
        let mut v = v.reshape([batch, channels * rows * cols]);
        let depth = self.value_layers.len();
        for (i, dense) in self.value_layers.iter().enumerate() {
            v = dense.forward(v);
            if i + 1 < depth {
                v = relu(v);
            }
        }
        let value = tanh(v).reshape([batch]);

        let p = self.policy_block.forward(x);
        let p = leaky_relu(self.policy_hidden.forward(p), LEAKY_SLOPE);
        // b (M d0 d1 d2) H W -> b H W (M d0 d1 d2)
        let policy = self.policy_out.forward(p).permute([0, 2, 3, 1]);
        (value, policy)
    }
}

/// Copies a (B, N, N, C) board batch into a tensor.
pub(crate) fn to_tensor<B: Backend>(boards: ArrayView4<f32>, device: &B::Device) -> Tensor<B, 4> {
    let (b, rows, cols, depth) = boards.dim();
    let data = TensorData::new(boards.iter().copied().collect::<Vec<f32>>(), [b, rows, cols, depth]);
    Tensor::from_data(data, device)
}

fn tensor_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>, ModelError> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|err| ModelError::TensorData(format!("{err:?}")))
}

/// Copies forward-pass tensors back into a [`ScoreOutput`].
pub(crate) fn to_output<B: Backend>(
    value: Tensor<B, 1>,
    policy: Tensor<B, 4>,
    space: &ActionSpace,
    batch: usize,
) -> Result<ScoreOutput, ModelError> {
    let value = Array1::from(tensor_values(value)?);
    let policy = ArrayD::from_shape_vec(IxDyn(&policy_shape(space, batch)), tensor_values(policy)?)?;
    Ok(ScoreOutput { value, policy })
}

// Parameters are drawn from the backend's global generator. Holding this
// lock while seeding and drawing keeps seeded construction reproducible
// when several networks are built at once.
static INIT: Mutex<()> = Mutex::new(());

fn checked<const D: usize>(
    layer: &'static str,
    found: Option<[usize; D]>,
    expected: [usize; D],
) -> Result<(), ModelError> {
    match found {
        Some(found) if found == expected => Ok(()),
        found => Err(ModelError::Layer {
            layer,
            found: found.map(|f| f.to_vec()).unwrap_or_default(),
            expected: expected.to_vec(),
        }),
    }
}

/// Reference convolutional scorer.
#[derive(Debug, Clone)]
pub struct TakNet {
    config: NetConfig,
    pub(crate) model: TakModel<TrainBackend>,
}

impl TakNet {
    /// Builds a randomly initialised network and checks its output contract.
    pub fn new(config: NetConfig) -> Result<TakNet, ModelError> {
        config.validate()?;
        let model = {
            let _guard = INIT.lock().unwrap_or_else(PoisonError::into_inner);
            let seed = if config.seed != 0 {
                config.seed
            } else {
                rand::random()
            };
            TrainBackend::seed(seed);
            // Cloning realises the lazily initialised parameters under the lock.
            TakModel::new(&config, &DEVICE).clone()
        };
        let net = TakNet::from_parts(config, model)?;
        debug!(params = net.num_params(), "initialised network");
        Ok(net)
    }

    /// Wraps restored layers, checking them against `config`.
    pub(crate) fn from_parts(
        config: NetConfig,
        model: TakModel<TrainBackend>,
    ) -> Result<TakNet, ModelError> {
        let net = TakNet { config, model };
        net.validate()?;
        Ok(net)
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn num_params(&self) -> usize {
        self.model.num_params()
    }

    /// Checks that the layer chain produces the contracted output shapes.
    /// Run at construction and after restoring parameters.
    pub fn validate(&self) -> Result<(), ModelError> {
        let c = &self.config;
        c.validate()?;
        let m = &self.model;
        let f = c.hidden_channels;

        checked("stem", Some(conv_channels(&m.stem)), [c.stack_depth, f])?;
        for block in m.trunk.iter().chain(std::iter::once(&m.policy_block)) {
            checked("residual", block.channels().map(|w| [w]), [f])?;
        }

        checked(
            "value_conv",
            Some(conv_channels(&m.value_conv)),
            [f, c.value_channels],
        )?;
        let reduced = c.board_size + 1 - KERNEL;
        let mut features = c.value_channels * reduced * reduced;
        for dense in &m.value_layers {
            let [inputs, out] = linear_features(dense);
            checked("value_dense", Some([inputs]), [features])?;
            features = out;
        }
        if m.value_layers.is_empty() || features != 1 {
            return Err(ModelError::ValueShape {
                found: vec![features],
                batch: 1,
            });
        }

        checked(
            "policy_hidden",
            m.policy_hidden.channels(),
            [f, c.policy_hidden],
        )?;
        let [inputs, out] = conv_channels(&m.policy_out);
        if out != ACTIONS_PER_CELL {
            return Err(ModelError::PolicyChannels {
                found: out,
                expected: ACTIONS_PER_CELL,
            });
        }
        checked("policy_out", Some([inputs]), [c.policy_hidden])?;

        // Layer widths agree; one dry run confirms the spatial contract.
        let blank = Array4::<f32>::zeros((1, c.board_size, c.board_size, c.stack_depth));
        self.score(blank.view())?;
        Ok(())
    }

    /// Rejects batches that are not (B, N, N, C).
    pub(crate) fn check_input(&self, boards: ArrayView4<f32>) -> Result<(), ModelError> {
        let (batch, rows, cols, depth) = boards.dim();
        let n = self.config.board_size;
        if rows != n || cols != n || depth != self.config.stack_depth {
            return Err(ModelError::InputShape {
                found: [batch, rows, cols, depth],
                size: n,
                depth: self.config.stack_depth,
            });
        }
        Ok(())
    }
}

impl Scorer for TakNet {
    fn action_space(&self) -> ActionSpace {
        ActionSpace::new(self.config.board_size)
    }

    fn stack_depth(&self) -> usize {
        self.config.stack_depth
    }

    fn score(&self, boards: ArrayView4<f32>) -> Result<ScoreOutput, ModelError> {
        self.check_input(boards)?;
        let batch = boards.len_of(ndarray::Axis(0));
        let space = self.action_space();
        if batch == 0 {
            return Ok(ScoreOutput {
                value: Array1::zeros(0),
                policy: ArrayD::zeros(IxDyn(&policy_shape(&space, 0))),
            });
        }

        let model = self.model.valid();
        let (value, policy) = model.forward(to_tensor::<CpuBackend>(boards, &DEVICE));
        let output = to_output(value, policy, &space, batch)?;
        output.check_shape(&space, batch)?;
        Ok(output)
    }
}
