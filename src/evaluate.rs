//! Dataset-wide loss evaluation.

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::dataset::DataLoader;
use crate::error::Result;
use crate::nn::loss::{structured_loss, LossOutput};
use crate::nn::network::Scorer;

/// Example-weighted mean losses over one pass of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvalSummary {
    pub batches: usize,
    pub examples: usize,
    pub policy_loss: f64,
    pub value_loss: f64,
    /// `policy_loss + loss_weight · value_loss`.
    pub total_loss: f64,
    pub loss_weight: f32,
}

/// Running example-weighted sums of batch losses.
#[derive(Debug, Default)]
pub(crate) struct LossTally {
    batches: usize,
    examples: usize,
    policy_sum: f64,
    value_sum: f64,
}

impl LossTally {
    pub(crate) fn add(&mut self, loss: &LossOutput, examples: usize) {
        self.policy_sum += loss.policy as f64 * examples as f64;
        self.value_sum += loss.value as f64 * examples as f64;
        self.batches += 1;
        self.examples += examples;
    }

    pub(crate) fn batches(&self) -> usize {
        self.batches
    }

    pub(crate) fn summary(&self, loss_weight: f32) -> EvalSummary {
        let (policy_loss, value_loss) = if self.examples == 0 {
            (0.0, 0.0)
        } else {
            let n = self.examples as f64;
            (self.policy_sum / n, self.value_sum / n)
        };
        EvalSummary {
            batches: self.batches,
            examples: self.examples,
            policy_loss,
            value_loss,
            total_loss: policy_loss + loss_weight as f64 * value_loss,
            loss_weight,
        }
    }
}

/// Scores every batch of one epoch and averages the losses.
pub fn evaluate<S, R>(
    scorer: &S,
    loader: &DataLoader<'_>,
    loss_weight: f32,
    rng: &mut R,
) -> Result<EvalSummary>
where
    S: Scorer + ?Sized,
    R: Rng + ?Sized,
{
    let space = loader.action_space();
    let mut tally = LossTally::default();

    for batch in loader.epoch(rng) {
        let batch = batch?;
        let output = scorer.score(batch.boards.view())?;
        let loss = structured_loss(
            output.value.view(),
            output.policy.view(),
            &batch.targets,
            batch.values.view(),
            &space,
        )?;
        debug!(
            batch = tally.batches(),
            size = batch.len(),
            policy = loss.policy,
            value = loss.value,
            "scored batch"
        );
        tally.add(&loss, batch.len());
    }

    let summary = tally.summary(loss_weight);
    info!(
        batches = summary.batches,
        examples = summary.examples,
        policy_loss = summary.policy_loss,
        value_loss = summary.value_loss,
        total_loss = summary.total_loss,
        "evaluation finished"
    );
    Ok(summary)
}
