//! Parameter updates for the reference scorer.
//!
//! A step runs the forward pass on the autodiff backend, computes the
//! structured loss and its output gradients exactly on the host, then
//! backpropagates `λ·dv·value + dp·logits` through the network. The
//! parameter gradients of that surrogate equal those of
//! `policy_loss + λ·value_loss`, so any burn optimiser can apply them.

use std::path::Path;

use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::tensor::{Tensor, TensorData};
use ndarray::{Array1, ArrayD};
use rand::Rng;
use tracing::{debug, info};

use super::checkpoint::{self, record_from_bytes, record_to_bytes, CheckpointError, TrainingState};
use super::loss::{structured_loss_with_grad, LossError, LossOutput};
use super::network::{to_output, to_tensor, ModelError, Scorer, TakModel, TakNet, TrainBackend, DEVICE};
use crate::config::{Config, TrainConfig};
use crate::dataset::{Batch, DataLoader};
use crate::evaluate::{EvalSummary, LossTally};

#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Loss(#[from] LossError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// AdamW with the configured weight decay.
pub fn adamw(config: &TrainConfig) -> impl Optimizer<TakModel<TrainBackend>, TrainBackend> {
    AdamWConfig::new()
        .with_weight_decay(config.weight_decay)
        .init::<TrainBackend, TakModel<TrainBackend>>()
}

fn constant<const D: usize>(values: Vec<f32>, shape: [usize; D]) -> Tensor<TrainBackend, D> {
    Tensor::from_data(TensorData::new(values, shape), &DEVICE)
}

/// Owns a network and its optimiser state.
pub struct Trainer<O> {
    net: TakNet,
    optimizer: O,
    learning_rate: f64,
    loss_weight: f32,
    steps: u64,
}

impl<O> Trainer<O>
where
    O: Optimizer<TakModel<TrainBackend>, TrainBackend>,
{
    pub fn new(net: TakNet, optimizer: O, config: &Config) -> Self {
        Trainer {
            net,
            optimizer,
            learning_rate: config.train.learning_rate,
            loss_weight: config.loss_weight,
            steps: 0,
        }
    }

    /// Restores a network and, if the checkpoint carries it, the optimiser
    /// state and step count. `optimizer` must be freshly built.
    pub fn resume<P: AsRef<Path>>(path: P, optimizer: O, config: &Config) -> Result<Self, TrainError> {
        let (net, state) = checkpoint::load_training(path)?;
        let mut trainer = Trainer::new(net, optimizer, config);
        if let Some(state) = state {
            let record = record_from_bytes(state.optimizer)?;
            trainer.optimizer = trainer.optimizer.load_record(record);
            trainer.steps = state.steps;
        }
        Ok(trainer)
    }

    pub fn network(&self) -> &TakNet {
        &self.net
    }

    pub fn into_network(self) -> TakNet {
        self.net
    }

    /// Parameter updates applied so far, including resumed ones.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// One update on `batch`. Returns the loss measured before the update.
    pub fn step(&mut self, batch: &Batch) -> Result<LossOutput, TrainError> {
        let size = batch.len();
        if size == 0 {
            return Err(LossError::EmptyBatch.into());
        }
        self.net.check_input(batch.boards.view())?;
        let space = self.net.action_space();

        let (value, policy) = self
            .net
            .model
            .forward(to_tensor::<TrainBackend>(batch.boards.view(), &DEVICE));
        let output = to_output(value.clone(), policy.clone(), &space, size)?;
        output.check_shape(&space, size)?;
        let (loss, grads) = structured_loss_with_grad(
            output.value.view(),
            output.policy.view(),
            &batch.targets,
            batch.values.view(),
            &space,
        )?;

        let dv: Array1<f32> = grads.value * self.loss_weight;
        let dp: ArrayD<f32> = grads.policy;
        let surrogate = (value * constant(dv.to_vec(), [size])).sum()
            + (policy.clone() * constant(dp.iter().copied().collect(), policy.dims())).sum();
        let grads = GradientsParams::from_grads(surrogate.backward(), &self.net.model);
        self.net.model = self
            .optimizer
            .step(self.learning_rate, self.net.model.clone(), grads);
        self.steps += 1;

        debug!(
            step = self.steps,
            size,
            policy = loss.policy,
            value = loss.value,
            "applied update"
        );
        Ok(loss)
    }

    /// One pass over `loader`, updating after every batch.
    pub fn train_epoch<R: Rng + ?Sized>(
        &mut self,
        loader: &DataLoader<'_>,
        rng: &mut R,
    ) -> crate::Result<EvalSummary> {
        let mut tally = LossTally::default();
        for batch in loader.epoch(rng) {
            let batch = batch?;
            let loss = self.step(&batch)?;
            tally.add(&loss, batch.len());
        }
        let summary = tally.summary(self.loss_weight);
        info!(
            steps = self.steps,
            batches = summary.batches,
            policy_loss = summary.policy_loss,
            value_loss = summary.value_loss,
            total_loss = summary.total_loss,
            "epoch finished"
        );
        Ok(summary)
    }

    /// Writes the network together with the optimiser state.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), TrainError> {
        let state = TrainingState {
            steps: self.steps,
            optimizer: record_to_bytes(self.optimizer.to_record())?,
        };
        checkpoint::save_training(&self.net, Some(state), path)?;
        Ok(())
    }
}
