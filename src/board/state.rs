//! Board and position representation.
//!
//! A `Board` is an N×N grid where every cell holds a fixed-depth stack of
//! raw piece codes. Codes are stored unvalidated so that a bad code surfaces
//! as a data-integrity error at encoding time, with its exact location.

use serde::{Deserialize, Serialize};

use super::piece::Player;

/// Board edge length of the reference configuration.
pub const BOARD_SIZE: usize = 4;

/// Stack slots per cell written by the generator (8 pieces plus a terminator).
pub const STACK_DEPTH: usize = 9;

/// Errors raised when building a board from nested lists.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    #[error("board has no rows")]
    Empty,

    #[error("board is not square: row {row} has {len} cells, expected {expected}")]
    NotSquare {
        row: usize,
        len: usize,
        expected: usize,
    },

    #[error("ragged stacks: cell ({row}, {col}) has depth {depth}, expected {expected}")]
    RaggedStack {
        row: usize,
        col: usize,
        depth: usize,
        expected: usize,
    },

    #[error("stack depth must be at least 1")]
    ZeroDepth,
}

/// N×N grid of piece-code stacks, stored row-major as (row, col, level).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<Vec<u8>>>", into = "Vec<Vec<Vec<u8>>>")]
pub struct Board {
    size: usize,
    depth: usize,
    cells: Vec<u8>,
}

impl Board {
    /// Creates an empty board.
    pub fn empty(size: usize, depth: usize) -> Board {
        Board {
            size,
            depth,
            cells: vec![0; size * size * depth],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    #[inline]
    fn offset(&self, row: usize, col: usize) -> usize {
        (row * self.size + col) * self.depth
    }

    /// Returns the raw stack at a cell, in the order the generator wrote it.
    pub fn stack(&self, row: usize, col: usize) -> &[u8] {
        let start = self.offset(row, col);
        &self.cells[start..start + self.depth]
    }

    /// Returns the raw code at one stack slot.
    pub fn get(&self, row: usize, col: usize, level: usize) -> u8 {
        self.cells[self.offset(row, col) + level]
    }

    /// Overwrites the raw code at one stack slot. No validation is done here.
    pub fn set(&mut self, row: usize, col: usize, level: usize, code: u8) {
        let idx = self.offset(row, col) + level;
        self.cells[idx] = code;
    }

    /// Iterates over `(row, col, level, code)` for every slot.
    pub fn slots(&self) -> impl Iterator<Item = (usize, usize, usize, u8)> + '_ {
        let (size, depth) = (self.size, self.depth);
        self.cells.iter().enumerate().map(move |(i, &code)| {
            let level = i % depth;
            let cell = i / depth;
            (cell / size, cell % size, level, code)
        })
    }
}

impl TryFrom<Vec<Vec<Vec<u8>>>> for Board {
    type Error = BoardError;

    fn try_from(rows: Vec<Vec<Vec<u8>>>) -> Result<Self, Self::Error> {
        let size = rows.len();
        if size == 0 {
            return Err(BoardError::Empty);
        }
        let depth = rows[0].first().map(Vec::len).unwrap_or(0);
        if depth == 0 {
            return Err(BoardError::ZeroDepth);
        }

        let mut cells = Vec::with_capacity(size * size * depth);
        for (row, cols) in rows.into_iter().enumerate() {
            if cols.len() != size {
                return Err(BoardError::NotSquare {
                    row,
                    len: cols.len(),
                    expected: size,
                });
            }
            for (col, stack) in cols.into_iter().enumerate() {
                if stack.len() != depth {
                    return Err(BoardError::RaggedStack {
                        row,
                        col,
                        depth: stack.len(),
                        expected: depth,
                    });
                }
                cells.extend(stack);
            }
        }
        Ok(Board { size, depth, cells })
    }
}

impl From<Board> for Vec<Vec<Vec<u8>>> {
    fn from(board: Board) -> Self {
        (0..board.size)
            .map(|row| {
                (0..board.size)
                    .map(|col| board.stack(row, col).to_vec())
                    .collect()
            })
            .collect()
    }
}

/// A recorded game position: the board, whose turn it is, and reserves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub board: Board,
    pub turn: Player,
    /// Player one's remaining reserve pieces. The generator spells this key
    /// `p1_pieces_rm`.
    #[serde(default, alias = "p1_pieces_rm", skip_serializing_if = "Option::is_none")]
    pub p1_pieces_rem: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p2_pieces_rem: Option<u8>,
}

impl Position {
    /// Creates a position with unknown reserves.
    pub fn new(board: Board, turn: Player) -> Position {
        Position {
            board,
            turn,
            p1_pieces_rem: None,
            p2_pieces_rem: None,
        }
    }
}
