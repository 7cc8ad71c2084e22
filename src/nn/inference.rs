//! Single-position evaluation for search.

use ndarray::Axis;
use serde::Serialize;

use super::encoding::{encode_position, EncodeError};
use super::network::{ModelError, Scorer};
use crate::board::{Move, Position};

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("board is {found}x{found}, scorer expects {expected}x{expected}")]
    BoardSize { found: usize, expected: usize },

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Value of a position and prior probabilities of its candidate moves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    /// Expected outcome for the side to move, in [-1, 1].
    pub value: f32,
    /// One prior per candidate move, in the order given. Sums to one unless
    /// there are no candidates.
    pub priors: Vec<f32>,
}

/// Scores `position` and turns the logits at each candidate move into a
/// probability distribution over those candidates only.
pub fn move_priors<S: Scorer + ?Sized>(
    scorer: &S,
    position: &Position,
    moves: &[Move],
) -> Result<Evaluation, InferenceError> {
    let space = scorer.action_space();
    if position.board.size() != space.board_size() {
        return Err(InferenceError::BoardSize {
            found: position.board.size(),
            expected: space.board_size(),
        });
    }
    let coords = moves
        .iter()
        .map(|mv| space.encode_move(mv))
        .collect::<Result<Vec<_>, _>>()?;

    let board = encode_position(position)?.insert_axis(Axis(0));
    let output = scorer.score(board.view())?;
    output.check_shape(&space, 1)?;
    let policy = output.policy.index_axis(Axis(0), 0);

    let logits: Vec<f32> = coords
        .iter()
        .map(|coord| policy[&coord.as_array()[..]])
        .collect();
    Ok(Evaluation {
        value: output.value[0],
        priors: softmax(&logits),
    })
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f64> = logits.iter().map(|&x| ((x - max) as f64).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        exps.iter().map(|e| (e / sum) as f32).collect()
    } else {
        vec![1.0 / logits.len() as f32; logits.len()]
    }
}
