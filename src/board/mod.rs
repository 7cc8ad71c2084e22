//! Board representation and move types.
//!
//! Contains the piece-code table, the stacked board grid, recorded
//! positions, and the three-kind move type.

pub mod moves;
pub mod piece;
pub mod state;

pub use moves::{Direction, Move, MoveError, ALL_DIRECTIONS};
pub use piece::{PieceCode, PieceCodeError, Player, WALL_OFFSET};
pub use state::{Board, BoardError, Position, BOARD_SIZE, STACK_DEPTH};
