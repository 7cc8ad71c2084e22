//! Board and move encoding for the policy-value network.
//!
//! Board tensor: (N, N, C) f32, one scalar per stack slot, relative to the
//! side to move:
//!    0  empty
//!   ±1  flat (positive = side to move, negative = opponent)
//!   ±2  wall
//!
//! Action space: (N, N, 6, 7, 8, 8), one policy logit per coordinate:
//!   [0:N)  origin row
//!   [0:N)  origin col
//!   [0:6)  kind: 0 place flat, 1 place wall, 2..5 slide down/up/right/left
//!   [0:7)  drop0: pieces dropped one step from the origin
//!   [0:8)  drop1: pieces dropped at the next step
//!   [0:8)  drop2: pieces dropped at the third step
//!
//! Placements always carry zero drops.

use ndarray::Array3;

use crate::board::{Board, Direction, Move, PieceCode, Player, Position};

/// Size of the kind/direction axis.
pub const MOVE_KINDS: usize = 6;

/// Size of the drop0 axis.
pub const DROP0_SIZE: usize = 7;

/// Size of the drop1 axis.
pub const DROP1_SIZE: usize = 8;

/// Size of the drop2 axis.
pub const DROP2_SIZE: usize = 8;

/// Number of policy entries per board cell.
pub const ACTIONS_PER_CELL: usize = MOVE_KINDS * DROP0_SIZE * DROP1_SIZE * DROP2_SIZE;

/// Kind code of a flat placement.
pub const KIND_FLAT: u8 = 0;

/// Kind code of a wall placement.
pub const KIND_WALL: u8 = 1;

const DROP_LIMITS: [usize; 3] = [DROP0_SIZE, DROP1_SIZE, DROP2_SIZE];

/// Errors raised while encoding boards or moves.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("invalid piece code {code} at cell ({row}, {col}) level {level}")]
    InvalidPieceCode {
        row: usize,
        col: usize,
        level: usize,
        code: u8,
    },

    #[error("cell ({row}, {col}) is outside a {size}x{size} board")]
    CellOutOfRange { row: u8, col: u8, size: usize },

    #[error("move kind {0} is outside 0..6")]
    InvalidKind(u8),

    #[error("drop{slot} = {value} is outside 0..{limit}")]
    DropOutOfRange { slot: usize, value: u8, limit: usize },

    #[error("placement coordinate carries nonzero drops {0:?}")]
    PlacementWithDrops([u8; 3]),

    #[error("flat index {index} is outside an action space of {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Address of one move in the policy tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionCoord {
    pub row: u8,
    pub col: u8,
    pub kind: u8,
    pub drops: [u8; 3],
}

impl ActionCoord {
    pub const fn new(row: u8, col: u8, kind: u8, drops: [u8; 3]) -> ActionCoord {
        ActionCoord {
            row,
            col,
            kind,
            drops,
        }
    }

    /// Returns the coordinate as a 6-tuple of axis indices.
    pub fn as_array(&self) -> [usize; 6] {
        [
            self.row as usize,
            self.col as usize,
            self.kind as usize,
            self.drops[0] as usize,
            self.drops[1] as usize,
            self.drops[2] as usize,
        ]
    }
}

#[inline]
const fn direction_kind(direction: Direction) -> u8 {
    match direction {
        Direction::Down => 2,
        Direction::Up => 3,
        Direction::Right => 4,
        Direction::Left => 5,
    }
}

#[inline]
const fn kind_direction(kind: u8) -> Option<Direction> {
    match kind {
        2 => Some(Direction::Down),
        3 => Some(Direction::Up),
        4 => Some(Direction::Right),
        5 => Some(Direction::Left),
        _ => None,
    }
}

/// The 6-axis action space for a given board size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionSpace {
    board_size: usize,
}

impl ActionSpace {
    pub const fn new(board_size: usize) -> ActionSpace {
        ActionSpace { board_size }
    }

    pub const fn board_size(&self) -> usize {
        self.board_size
    }

    /// Axis cardinalities: (N, N, 6, 7, 8, 8).
    pub const fn shape(&self) -> [usize; 6] {
        [
            self.board_size,
            self.board_size,
            MOVE_KINDS,
            DROP0_SIZE,
            DROP1_SIZE,
            DROP2_SIZE,
        ]
    }

    /// Total number of coordinates.
    pub const fn len(&self) -> usize {
        self.board_size * self.board_size * ACTIONS_PER_CELL
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks that every axis value is within its cardinality and that
    /// placements carry no drops.
    pub fn validate(&self, coord: &ActionCoord) -> Result<(), EncodeError> {
        if coord.row as usize >= self.board_size || coord.col as usize >= self.board_size {
            return Err(EncodeError::CellOutOfRange {
                row: coord.row,
                col: coord.col,
                size: self.board_size,
            });
        }
        if coord.kind as usize >= MOVE_KINDS {
            return Err(EncodeError::InvalidKind(coord.kind));
        }
        for (slot, (&value, &limit)) in coord.drops.iter().zip(DROP_LIMITS.iter()).enumerate() {
            if value as usize >= limit {
                return Err(EncodeError::DropOutOfRange { slot, value, limit });
            }
        }
        if coord.kind <= KIND_WALL && coord.drops != [0, 0, 0] {
            return Err(EncodeError::PlacementWithDrops(coord.drops));
        }
        Ok(())
    }

    /// Encodes a move into its action coordinate.
    pub fn encode_move(&self, mv: &Move) -> Result<ActionCoord, EncodeError> {
        let coord = match *mv {
            Move::PlaceFlat { row, col } => ActionCoord::new(row, col, KIND_FLAT, [0, 0, 0]),
            Move::PlaceWall { row, col } => ActionCoord::new(row, col, KIND_WALL, [0, 0, 0]),
            Move::Slide {
                row,
                col,
                direction,
                drops,
            } => ActionCoord::new(row, col, direction_kind(direction), drops),
        };
        self.validate(&coord)?;
        Ok(coord)
    }

    /// Decodes an action coordinate back into a move. Exact inverse of
    /// [`ActionSpace::encode_move`] on valid coordinates.
    pub fn decode(&self, coord: &ActionCoord) -> Result<Move, EncodeError> {
        self.validate(coord)?;
        let (row, col) = (coord.row, coord.col);
        Ok(match coord.kind {
            KIND_FLAT => Move::PlaceFlat { row, col },
            KIND_WALL => Move::PlaceWall { row, col },
            kind => Move::Slide {
                row,
                col,
                direction: kind_direction(kind).ok_or(EncodeError::InvalidKind(kind))?,
                drops: coord.drops,
            },
        })
    }

    /// Row-major offset of a coordinate in the flattened policy vector.
    pub fn flat_index(&self, coord: &ActionCoord) -> Result<usize, EncodeError> {
        self.validate(coord)?;
        let shape = self.shape();
        Ok(coord
            .as_array()
            .iter()
            .zip(shape.iter())
            .fold(0, |acc, (&idx, &dim)| acc * dim + idx))
    }

    /// Inverse of [`ActionSpace::flat_index`]. The returned coordinate is
    /// within every axis range but may be a placement with drops, which
    /// no move encodes to.
    pub fn coord_at(&self, index: usize) -> Result<ActionCoord, EncodeError> {
        if index >= self.len() {
            return Err(EncodeError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        let shape = self.shape();
        let mut axes = [0usize; 6];
        let mut rest = index;
        for axis in (0..6).rev() {
            axes[axis] = rest % shape[axis];
            rest /= shape[axis];
        }
        Ok(ActionCoord::new(
            axes[0] as u8,
            axes[1] as u8,
            axes[2] as u8,
            [axes[3] as u8, axes[4] as u8, axes[5] as u8],
        ))
    }
}

/// Encodes a board into an (N, N, C) tensor from `side_to_move`'s perspective.
///
/// Fails on the first code outside the piece-code table; nothing is
/// clamped.
pub fn encode_board(board: &Board, side_to_move: Player) -> Result<Array3<f32>, EncodeError> {
    let mut tensor = Array3::<f32>::zeros((board.size(), board.size(), board.depth()));
    for (row, col, level, code) in board.slots() {
        let piece = PieceCode::try_from(code).map_err(|_| EncodeError::InvalidPieceCode {
            row,
            col,
            level,
            code,
        })?;
        tensor[[row, col, level]] = piece.relative_value(side_to_move);
    }
    Ok(tensor)
}

/// Encodes a recorded position using its own side to move.
pub fn encode_position(position: &Position) -> Result<Array3<f32>, EncodeError> {
    encode_board(&position.board, position.turn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{BOARD_SIZE, STACK_DEPTH};

    fn space() -> ActionSpace {
        ActionSpace::new(BOARD_SIZE)
    }

    fn sample_board() -> Board {
        let mut board = Board::empty(BOARD_SIZE, STACK_DEPTH);
        board.set(0, 0, 0, 1);
        board.set(0, 0, 1, 2);
        board.set(1, 2, 0, 11);
        board.set(3, 3, 0, 12);
        board.set(3, 3, 1, 1);
        board
    }

    #[test]
    fn action_space_shape() {
        let space = space();
        assert_eq!(space.shape(), [4, 4, 6, 7, 8, 8]);
        assert_eq!(space.len(), 4 * 4 * 2688);
        assert_eq!(ACTIONS_PER_CELL, 2688);
    }

    #[test]
    fn placement_encoding() {
        let flat = space().encode_move(&Move::PlaceFlat { row: 2, col: 1 }).unwrap();
        assert_eq!(flat.as_array(), [2, 1, 0, 0, 0, 0]);
        let wall = space().encode_move(&Move::PlaceWall { row: 0, col: 3 }).unwrap();
        assert_eq!(wall.as_array(), [0, 3, 1, 0, 0, 0]);
    }

    #[test]
    fn slide_direction_codes() {
        let expected = [
            (Direction::Down, 2),
            (Direction::Up, 3),
            (Direction::Right, 4),
            (Direction::Left, 5),
        ];
        for (direction, kind) in expected {
            let mv = Move::Slide {
                row: 1,
                col: 1,
                direction,
                drops: [2, 1, 0],
            };
            let coord = space().encode_move(&mv).unwrap();
            assert_eq!(coord.as_array(), [1, 1, kind, 2, 1, 0]);
        }
    }

    #[test]
    fn every_valid_coordinate_roundtrips() {
        let space = space();
        let mut valid = 0;
        for index in 0..space.len() {
            let coord = space.coord_at(index).unwrap();
            let shape = space.shape();
            for (value, dim) in coord.as_array().iter().zip(shape.iter()) {
                assert!(value < dim);
            }
            match space.decode(&coord) {
                Ok(mv) => {
                    valid += 1;
                    assert_eq!(space.encode_move(&mv).unwrap(), coord);
                    assert_eq!(space.flat_index(&coord).unwrap(), index);
                }
                Err(err) => assert!(matches!(err, EncodeError::PlacementWithDrops(_))),
            }
        }
        // Two placements plus four directions of 7*8*8 drop patterns per cell.
        assert_eq!(valid, 16 * (2 + 4 * 7 * 8 * 8));
    }

    #[test]
    fn out_of_range_moves_rejected() {
        let space = space();
        assert!(matches!(
            space.encode_move(&Move::PlaceFlat { row: 4, col: 0 }),
            Err(EncodeError::CellOutOfRange { row: 4, .. })
        ));
        let too_many = Move::Slide {
            row: 0,
            col: 0,
            direction: Direction::Right,
            drops: [7, 0, 0],
        };
        assert_eq!(
            space.encode_move(&too_many),
            Err(EncodeError::DropOutOfRange {
                slot: 0,
                value: 7,
                limit: 7
            })
        );
        let bad_kind = ActionCoord::new(0, 0, 6, [0, 0, 0]);
        assert_eq!(space.decode(&bad_kind), Err(EncodeError::InvalidKind(6)));
        assert!(space.coord_at(space.len()).is_err());
    }

    #[test]
    fn first_and_last_flat_index() {
        let space = space();
        let first = ActionCoord::new(0, 0, 0, [0, 0, 0]);
        let last = ActionCoord::new(3, 3, 5, [6, 7, 7]);
        assert_eq!(space.flat_index(&first).unwrap(), 0);
        assert_eq!(space.flat_index(&last).unwrap(), space.len() - 1);
    }

    #[test]
    fn empty_board_encodes_to_zeros() {
        let board = Board::empty(BOARD_SIZE, STACK_DEPTH);
        let tensor = encode_board(&board, Player::One).unwrap();
        assert_eq!(tensor.dim(), (4, 4, 9));
        assert!(tensor.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn side_to_move_is_positive() {
        let board = sample_board();
        let one = encode_board(&board, Player::One).unwrap();
        assert_eq!(one[[0, 0, 0]], 1.0);
        assert_eq!(one[[0, 0, 1]], -1.0);
        assert_eq!(one[[1, 2, 0]], 2.0);
        assert_eq!(one[[3, 3, 0]], -2.0);
        assert_eq!(one[[3, 3, 1]], 1.0);
    }

    #[test]
    fn turn_flip_negates_nonzero_values() {
        let board = sample_board();
        let one = encode_board(&board, Player::One).unwrap();
        let two = encode_board(&board, Player::Two).unwrap();
        for (a, b) in one.iter().zip(two.iter()) {
            assert_eq!(*a, -*b);
            assert!([-2.0, -1.0, 0.0, 1.0, 2.0].contains(a));
        }
        assert_eq!(two[[2, 2, 4]], 0.0);
    }

    #[test]
    fn invalid_piece_code_is_fatal() {
        let mut board = sample_board();
        board.set(2, 1, 3, 7);
        let err = encode_board(&board, Player::One).unwrap_err();
        assert_eq!(
            err,
            EncodeError::InvalidPieceCode {
                row: 2,
                col: 1,
                level: 3,
                code: 7
            }
        );
    }

    #[test]
    fn position_uses_its_turn() {
        let position = Position::new(sample_board(), Player::Two);
        let tensor = encode_position(&position).unwrap();
        assert_eq!(tensor[[0, 0, 0]], -1.0);
    }
}
