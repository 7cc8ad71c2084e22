//! Structured policy-value loss.
//!
//! The policy head's logits are dense over the whole action space while each
//! example's targets are a short, variable-length list of (coordinate,
//! probability) pairs. For example `b` with flattened logits `x_b`:
//!
//! ```text
//! log_softmax_b[a] = x_b[a] - log Σ_a' exp(x_b[a'])
//! policy_b         = -Σ_k p_bk · log_softmax_b[idx_bk]
//! policy_loss      = (1/B) Σ_b policy_b
//! value_loss       = (1/B) Σ_b (v_b - t_b)²
//! ```
//!
//! Target lists are used as given. Probabilities that sum to less than one
//! are not renormalised, and an empty list contributes zero.

use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayViewD, Axis, IxDyn};
use serde::Serialize;

use super::encoding::{ActionSpace, EncodeError};
use super::network::policy_shape;
use crate::dataset::SparseTargets;

/// Errors raised when loss inputs disagree with each other.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LossError {
    #[error("cannot compute a loss over an empty batch")]
    EmptyBatch,

    #[error("{what} has {found} entries, batch has {expected}")]
    BatchSize {
        what: &'static str,
        found: usize,
        expected: usize,
    },

    #[error("policy logits have shape {found:?}, expected {expected:?}")]
    PolicyShape {
        found: Vec<usize>,
        expected: Vec<usize>,
    },

    #[error("target {pair} of example {example}: {source}")]
    Target {
        example: usize,
        pair: usize,
        #[source]
        source: EncodeError,
    },
}

/// The two loss scalars. Combining them is the caller's choice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LossOutput {
    pub policy: f32,
    pub value: f32,
}

impl LossOutput {
    /// `policy + weight · value`.
    pub fn total(&self, weight: f32) -> f32 {
        self.policy + weight * self.value
    }
}

/// Gradients of the loss with respect to the scorer outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct LossGradients {
    /// d value_loss / d v, shape (B,).
    pub value: Array1<f32>,
    /// d policy_loss / d logits, same shape as the logits.
    pub policy: ArrayD<f32>,
}

/// Validated loss inputs with targets resolved to flat offsets.
struct Prepared {
    logits: Array2<f32>,
    /// Per example, (flat index, probability) pairs.
    targets: Vec<Vec<(usize, f32)>>,
}

fn prepare(
    pred_value: ArrayView1<f32>,
    pred_policy: ArrayViewD<f32>,
    targets: &SparseTargets,
    target_values: ArrayView1<f32>,
    space: &ActionSpace,
) -> Result<Prepared, LossError> {
    let batch = targets.len();
    if batch == 0 {
        return Err(LossError::EmptyBatch);
    }
    for (what, found) in [
        ("predicted values", pred_value.len()),
        ("target values", target_values.len()),
    ] {
        if found != batch {
            return Err(LossError::BatchSize {
                what,
                found,
                expected: batch,
            });
        }
    }
    let expected = policy_shape(space, batch);
    if pred_policy.shape() != expected.as_slice() {
        return Err(LossError::PolicyShape {
            found: pred_policy.shape().to_vec(),
            expected,
        });
    }

    let logits = pred_policy
        .to_shape((batch, space.len()))
        .map_err(|_| LossError::PolicyShape {
            found: pred_policy.shape().to_vec(),
            expected: vec![batch, space.len()],
        })?
        .into_owned();

    let resolved = targets
        .iter()
        .enumerate()
        .map(|(example, (coords, probs))| {
            coords
                .iter()
                .zip(probs)
                .enumerate()
                .map(|(pair, (coord, &p))| {
                    space
                        .flat_index(coord)
                        .map(|index| (index, p))
                        .map_err(|source| LossError::Target {
                            example,
                            pair,
                            source,
                        })
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Prepared {
        logits,
        targets: resolved,
    })
}

/// log Σ exp(row), shifted by the row maximum.
fn log_partition(row: ArrayView1<f32>) -> f64 {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
    let sum: f64 = row.iter().map(|&x| (x as f64 - max).exp()).sum();
    max + sum.ln()
}

fn example_terms(prepared: &Prepared) -> Vec<(f64, f64)> {
    prepared
        .logits
        .outer_iter()
        .zip(&prepared.targets)
        .map(|(row, pairs)| {
            if pairs.is_empty() {
                return (0.0, 0.0);
            }
            let lse = log_partition(row);
            let term = pairs
                .iter()
                .map(|&(index, p)| -(p as f64) * (row[index] as f64 - lse))
                .sum();
            (term, lse)
        })
        .collect()
}

fn value_loss(pred_value: ArrayView1<f32>, target_values: ArrayView1<f32>) -> f64 {
    let batch = pred_value.len() as f64;
    pred_value
        .iter()
        .zip(target_values.iter())
        .map(|(&v, &t)| {
            let d = v as f64 - t as f64;
            d * d
        })
        .sum::<f64>()
        / batch
}

/// Per-example policy cross-entropy, before averaging over the batch.
pub fn policy_terms(
    pred_policy: ArrayViewD<f32>,
    targets: &SparseTargets,
    space: &ActionSpace,
) -> Result<Vec<f32>, LossError> {
    let batch = targets.len();
    let zeros = Array1::<f32>::zeros(batch);
    let prepared = prepare(zeros.view(), pred_policy, targets, zeros.view(), space)?;
    Ok(example_terms(&prepared)
        .into_iter()
        .map(|(term, _)| term as f32)
        .collect())
}

/// Computes the policy and value losses for one batch.
pub fn structured_loss(
    pred_value: ArrayView1<f32>,
    pred_policy: ArrayViewD<f32>,
    targets: &SparseTargets,
    target_values: ArrayView1<f32>,
    space: &ActionSpace,
) -> Result<LossOutput, LossError> {
    let prepared = prepare(pred_value, pred_policy, targets, target_values, space)?;
    let batch = targets.len() as f64;
    let policy = example_terms(&prepared)
        .iter()
        .map(|&(term, _)| term)
        .sum::<f64>()
        / batch;
    Ok(LossOutput {
        policy: policy as f32,
        value: value_loss(pred_value, target_values) as f32,
    })
}

/// Like [`structured_loss`], also returning gradients with respect to the
/// predicted values and logits.
pub fn structured_loss_with_grad(
    pred_value: ArrayView1<f32>,
    pred_policy: ArrayViewD<f32>,
    targets: &SparseTargets,
    target_values: ArrayView1<f32>,
    space: &ActionSpace,
) -> Result<(LossOutput, LossGradients), LossError> {
    let prepared = prepare(pred_value, pred_policy.view(), targets, target_values, space)?;
    let batch = targets.len() as f64;
    let terms = example_terms(&prepared);

    let mut grad = Array2::<f32>::zeros(prepared.logits.raw_dim());
    for (b, (mut out, row)) in grad
        .axis_iter_mut(Axis(0))
        .zip(prepared.logits.outer_iter())
        .enumerate()
    {
        let pairs = &prepared.targets[b];
        if pairs.is_empty() {
            continue;
        }
        let mass: f64 = pairs.iter().map(|&(_, p)| p as f64).sum();
        let lse = terms[b].1;
        for (g, &x) in out.iter_mut().zip(row.iter()) {
            *g = (mass * (x as f64 - lse).exp() / batch) as f32;
        }
        for &(index, p) in pairs {
            out[index] -= (p as f64 / batch) as f32;
        }
    }
    let policy_grad = grad.into_shape_with_order(IxDyn(pred_policy.shape())).map_err(|_| {
        LossError::PolicyShape {
            found: pred_policy.shape().to_vec(),
            expected: policy_shape(space, targets.len()),
        }
    })?;

    let value_grad = pred_value
        .iter()
        .zip(target_values.iter())
        .map(|(&v, &t)| (2.0 * (v as f64 - t as f64) / batch) as f32)
        .collect::<Array1<f32>>();

    let policy = terms.iter().map(|&(term, _)| term).sum::<f64>() / batch;
    let output = LossOutput {
        policy: policy as f32,
        value: value_loss(pred_value, target_values) as f32,
    };
    Ok((
        output,
        LossGradients {
            value: value_grad,
            policy: policy_grad,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Board, Move, Player, Position};
    use crate::dataset::{Batch, Record};
    use crate::nn::encoding::ActionCoord;
    use crate::nn::network::{ModelError, ScoreOutput, Scorer};
    use ndarray::{array, ArrayView4};

    const SPACE: ActionSpace = ActionSpace::new(4);

    fn logits(batch: usize) -> ArrayD<f32> {
        ArrayD::zeros(IxDyn(&policy_shape(&SPACE, batch)))
    }

    fn set(policy: &mut ArrayD<f32>, b: usize, coord: ActionCoord, x: f32) {
        let [i, j, m, d0, d1, d2] = coord.as_array();
        policy[[b, i, j, m, d0, d1, d2].as_slice()] = x;
    }

    fn targets(lists: &[(&[ActionCoord], &[f32])]) -> SparseTargets {
        let mut targets = SparseTargets::new();
        for (coords, probs) in lists {
            targets.push(coords, probs).unwrap();
        }
        targets
    }

    const A: ActionCoord = ActionCoord::new(0, 0, 0, [0, 0, 0]);
    const B: ActionCoord = ActionCoord::new(1, 2, 4, [2, 1, 0]);
    const C: ActionCoord = ActionCoord::new(3, 3, 1, [0, 0, 0]);

    #[test]
    fn uniform_logits_give_log_action_count() {
        let policy = logits(1);
        let t = targets(&[(&[A], &[1.0])]);
        let loss = structured_loss(
            array![0.0].view(),
            policy.view(),
            &t,
            array![0.0].view(),
            &SPACE,
        )
        .unwrap();
        let expected = (SPACE.len() as f64).ln() as f32;
        assert!((loss.policy - expected).abs() < 1e-4);
        assert_eq!(loss.value, 0.0);
    }

    #[test]
    fn losses_are_non_negative() {
        let mut policy = logits(2);
        set(&mut policy, 0, B, 3.0);
        set(&mut policy, 1, C, -2.0);
        let t = targets(&[(&[A, B], &[0.25, 0.75]), (&[C], &[1.0])]);
        let loss = structured_loss(
            array![0.5, -0.2].view(),
            policy.view(),
            &t,
            array![1.0, 0.0].view(),
            &SPACE,
        )
        .unwrap();
        assert!(loss.policy >= 0.0);
        assert!(loss.value >= 0.0);
        assert!(((loss.value as f64) - (0.25 + 0.04) / 2.0).abs() < 1e-6);
    }

    #[test]
    fn confident_correct_prediction_has_near_zero_policy_loss() {
        let mut policy = logits(1);
        set(&mut policy, 0, B, 100.0);
        let t = targets(&[(&[B], &[1.0])]);
        let loss = structured_loss(
            array![0.3].view(),
            policy.view(),
            &t,
            array![0.3].view(),
            &SPACE,
        )
        .unwrap();
        assert!(loss.policy.abs() < 1e-6);
        assert_eq!(loss.value, 0.0);
    }

    #[test]
    fn scaling_one_example_leaves_others_unchanged() {
        let mut policy = logits(2);
        set(&mut policy, 0, A, 1.5);
        set(&mut policy, 1, B, 0.5);
        set(&mut policy, 1, C, -1.0);
        let t = targets(&[(&[A], &[1.0]), (&[B, C], &[0.6, 0.4])]);
        let before = policy_terms(policy.view(), &t, &SPACE).unwrap();

        policy.index_axis_mut(Axis(0), 0).mapv_inplace(|x| x * 7.0 + 3.0);
        let after = policy_terms(policy.view(), &t, &SPACE).unwrap();
        assert_eq!(before[1], after[1]);
        assert_ne!(before[0], after[0]);
    }

    #[test]
    fn empty_target_list_contributes_zero() {
        let mut policy = logits(2);
        set(&mut policy, 1, C, 2.0);
        let t = targets(&[(&[], &[]), (&[C], &[1.0])]);
        let terms = policy_terms(policy.view(), &t, &SPACE).unwrap();
        assert_eq!(terms[0], 0.0);
        let loss = structured_loss(
            array![0.0, 0.0].view(),
            policy.view(),
            &t,
            array![0.0, 0.0].view(),
            &SPACE,
        )
        .unwrap();
        assert!((loss.policy - terms[1] / 2.0).abs() < 1e-6);
    }

    #[test]
    fn under_normalised_targets_are_not_rescaled() {
        let policy = logits(1);
        let full = targets(&[(&[A], &[1.0])]);
        let half = targets(&[(&[A], &[0.5])]);
        let a = policy_terms(policy.view(), &full, &SPACE).unwrap()[0];
        let b = policy_terms(policy.view(), &half, &SPACE).unwrap()[0];
        assert!((b - a / 2.0).abs() < 1e-5);
    }

    #[test]
    fn huge_logits_stay_finite() {
        let mut policy = logits(1);
        policy.fill(-1.0e4);
        set(&mut policy, 0, A, 1.0e4);
        set(&mut policy, 0, B, 1.0e4 - 1.0);
        let t = targets(&[(&[A, B], &[0.5, 0.5])]);
        let loss = structured_loss(
            array![0.0].view(),
            policy.view(),
            &t,
            array![0.0].view(),
            &SPACE,
        )
        .unwrap();
        assert!(loss.policy.is_finite());
        assert!(loss.policy > 0.0 && loss.policy < 2.0);
    }

    #[test]
    fn gradients_match_finite_differences() {
        let mut policy = logits(2);
        set(&mut policy, 0, A, 2.0);
        set(&mut policy, 0, C, 5.0);
        set(&mut policy, 1, B, 1.0);
        let t = targets(&[(&[A, B], &[0.7, 0.2]), (&[B], &[1.0])]);
        let values = array![0.4, -0.1];
        let outcomes = array![1.0, -1.0];

        let (loss, grads) = structured_loss_with_grad(
            values.view(),
            policy.view(),
            &t,
            outcomes.view(),
            &SPACE,
        )
        .unwrap();
        assert_eq!(grads.policy.shape(), policy.shape());
        assert!((grads.value[0] - 2.0 * (0.4 - 1.0) / 2.0).abs() < 1e-6);
        assert!((grads.value[1] - 2.0 * (-0.1 + 1.0) / 2.0).abs() < 1e-6);

        let plain = structured_loss(values.view(), policy.view(), &t, outcomes.view(), &SPACE)
            .unwrap();
        assert_eq!(loss, plain);

        let eps = 1.0e-2;
        for (b, coord) in [(0, A), (0, B), (0, C), (1, B), (1, A)] {
            let [i, j, m, d0, d1, d2] = coord.as_array();
            let at = [b, i, j, m, d0, d1, d2];
            let mut up = policy.clone();
            up[at.as_slice()] += eps;
            let mut down = policy.clone();
            down[at.as_slice()] -= eps;
            let f = |p: &ArrayD<f32>| {
                structured_loss(values.view(), p.view(), &t, outcomes.view(), &SPACE)
                    .unwrap()
                    .policy
            };
            let numeric = (f(&up) - f(&down)) / (2.0 * eps);
            let analytic = grads.policy[at.as_slice()];
            assert!(
                (numeric - analytic).abs() < 2e-3,
                "{coord:?} in example {b}: numeric {numeric}, analytic {analytic}"
            );
        }
    }

    #[test]
    fn gradient_rows_sum_to_zero_for_normalised_targets() {
        let mut policy = logits(1);
        set(&mut policy, 0, A, 0.3);
        let t = targets(&[(&[A, C], &[0.5, 0.5])]);
        let (_, grads) = structured_loss_with_grad(
            array![0.0].view(),
            policy.view(),
            &t,
            array![0.0].view(),
            &SPACE,
        )
        .unwrap();
        let sum: f64 = grads.policy.iter().map(|&g| g as f64).sum();
        assert!(sum.abs() < 1e-4);
    }

    #[test]
    fn shape_and_size_mismatches_rejected() {
        let policy = logits(2);
        let t = targets(&[(&[A], &[1.0])]);
        assert!(matches!(
            structured_loss(
                array![0.0].view(),
                policy.view(),
                &t,
                array![0.0].view(),
                &SPACE
            ),
            Err(LossError::PolicyShape { .. })
        ));

        let policy = logits(1);
        assert!(matches!(
            structured_loss(
                array![0.0, 1.0].view(),
                policy.view(),
                &t,
                array![0.0].view(),
                &SPACE
            ),
            Err(LossError::BatchSize {
                what: "predicted values",
                ..
            })
        ));

        assert_eq!(
            structured_loss(
                Array1::<f32>::zeros(0).view(),
                logits(0).view(),
                &SparseTargets::new(),
                Array1::<f32>::zeros(0).view(),
                &SPACE
            ),
            Err(LossError::EmptyBatch)
        );
    }

    #[test]
    fn out_of_range_target_rejected() {
        let policy = logits(1);
        let bad = ActionCoord::new(4, 0, 0, [0, 0, 0]);
        let t = targets(&[(&[bad], &[1.0])]);
        assert!(matches!(
            structured_loss(
                array![0.0].view(),
                policy.view(),
                &t,
                array![0.0].view(),
                &SPACE
            ),
            Err(LossError::Target {
                example: 0,
                pair: 0,
                ..
            })
        ));
    }

    /// Scores every board with a fixed value and one spiked logit.
    struct Spike {
        value: f32,
        at: ActionCoord,
    }

    impl Scorer for Spike {
        fn action_space(&self) -> ActionSpace {
            SPACE
        }

        fn stack_depth(&self) -> usize {
            9
        }

        fn score(&self, boards: ArrayView4<f32>) -> Result<ScoreOutput, ModelError> {
            let batch = boards.len_of(Axis(0));
            let mut policy = logits(batch);
            for b in 0..batch {
                set(&mut policy, b, self.at, 60.0);
            }
            Ok(ScoreOutput {
                value: Array1::from_elem(batch, self.value),
                policy,
            })
        }
    }

    #[test]
    fn empty_board_single_placement() {
        let record = Record {
            game: Position::new(Board::empty(4, 9), Player::One),
            moves: vec![Move::PlaceFlat { row: 0, col: 0 }],
            p: vec![1.0],
            val: 0.3,
        };
        let example = record.encode(&SPACE).unwrap();
        assert!(example.board.iter().all(|&x| x == 0.0));
        assert_eq!(example.coords, vec![A]);

        let batch = Batch::collate(&[example]).unwrap();
        let scorer = Spike { value: 0.1, at: A };
        let out = scorer.score(batch.boards.view()).unwrap();
        let loss = structured_loss(
            out.value.view(),
            out.policy.view(),
            &batch.targets,
            batch.values.view(),
            &SPACE,
        )
        .unwrap();
        assert!(loss.policy.abs() < 1e-6);
        assert!((loss.value - (0.3f32 - 0.1).powi(2)).abs() < 1e-6);
    }
}
