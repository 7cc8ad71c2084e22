//! Tensor encoding, the reference policy-value scorer, and its loss.
//!
//! Boards become (N, N, C) tensors and moves become 6-axis coordinates into
//! a (N, N, 6, 7, 8, 8) policy tensor. A [`network::Scorer`] produces values
//! and logits over that space; [`loss`] scores them against sparse targets
//! and [`train`] turns that loss into parameter updates.

pub mod checkpoint;
pub mod encoding;
pub mod inference;
pub mod layers;
pub mod loss;
pub mod network;
pub mod train;

pub use encoding::{encode_board, encode_position, ActionCoord, ActionSpace, EncodeError};
pub use inference::{move_priors, Evaluation, InferenceError};
pub use loss::{structured_loss, structured_loss_with_grad, LossError, LossGradients, LossOutput};
pub use network::{ModelError, ScoreOutput, Scorer, TakModel, TakNet};
pub use train::{adamw, TrainError, Trainer};
