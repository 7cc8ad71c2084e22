//! Piece codes and players.
//!
//! Board cells store raw `u8` codes exactly as written by the data
//! generator. `PieceCode` is the validated form of one of those codes.

use serde::{Deserialize, Serialize};

/// Offset added to a player's flat code to get their standing-piece code.
pub const WALL_OFFSET: u8 = 10;

/// One of the two players. Serialized as the generator's `turn` value (1 or 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Player {
    One,
    Two,
}

impl Player {
    /// Returns the generator's numeric id (1 or 2).
    pub const fn id(self) -> u8 {
        match self {
            Player::One => 1,
            Player::Two => 2,
        }
    }
}

impl TryFrom<u8> for Player {
    type Error = PieceCodeError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            1 => Ok(Player::One),
            2 => Ok(Player::Two),
            other => Err(PieceCodeError::InvalidPlayer(other)),
        }
    }
}

impl From<Player> for u8 {
    fn from(player: Player) -> u8 {
        player.id()
    }
}

/// Errors raised when validating raw codes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PieceCodeError {
    #[error("invalid piece code {0} (expected 0, 1, 2, 11 or 12)")]
    InvalidCode(u8),

    #[error("invalid player id {0} (expected 1 or 2)")]
    InvalidPlayer(u8),
}

/// A validated piece code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PieceCode {
    Empty,
    Flat(Player),
    Wall(Player),
}

impl PieceCode {
    /// Returns the raw code used on the wire.
    pub const fn code(self) -> u8 {
        match self {
            PieceCode::Empty => 0,
            PieceCode::Flat(p) => p.id(),
            PieceCode::Wall(p) => p.id() + WALL_OFFSET,
        }
    }

    /// Returns the owning player, or `None` for an empty slot.
    pub const fn owner(self) -> Option<Player> {
        match self {
            PieceCode::Empty => None,
            PieceCode::Flat(p) | PieceCode::Wall(p) => Some(p),
        }
    }

    /// Tensor value of this piece seen from `side_to_move`.
    ///
    /// Flats are worth 1 and walls 2, positive for the side to move and
    /// negative for the opponent.
    pub fn relative_value(self, side_to_move: Player) -> f32 {
        let magnitude = match self {
            PieceCode::Empty => return 0.0,
            PieceCode::Flat(_) => 1.0,
            PieceCode::Wall(_) => 2.0,
        };
        if self.owner() == Some(side_to_move) {
            magnitude
        } else {
            -magnitude
        }
    }
}

impl TryFrom<u8> for PieceCode {
    type Error = PieceCodeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(PieceCode::Empty),
            1 => Ok(PieceCode::Flat(Player::One)),
            2 => Ok(PieceCode::Flat(Player::Two)),
            11 => Ok(PieceCode::Wall(Player::One)),
            12 => Ok(PieceCode::Wall(Player::Two)),
            other => Err(PieceCodeError::InvalidCode(other)),
        }
    }
}
