//! Move representation.
//!
//! A move is one of three kinds: placing a flat, placing a wall, or sliding
//! a stack along a row or column while dropping pieces on the way. On the
//! wire a move is a JSON object tagged by `"move": "FLAT" | "WALL" | "MOVE"`
//! with `i, j` and, for slides, `di, dj, drop0, drop1, drop2`.

use serde::{Deserialize, Serialize};

/// Direction of a slide, as a unit step in (row, col).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Down,
    Up,
    Right,
    Left,
}

/// All directions in action-axis order.
pub const ALL_DIRECTIONS: [Direction; 4] = [
    Direction::Down,
    Direction::Up,
    Direction::Right,
    Direction::Left,
];

impl Direction {
    /// Returns the (row, col) step.
    pub const fn delta(self) -> (i8, i8) {
        match self {
            Direction::Down => (1, 0),
            Direction::Up => (-1, 0),
            Direction::Right => (0, 1),
            Direction::Left => (0, -1),
        }
    }

    /// Parses a (row, col) unit step.
    pub fn from_delta(di: i8, dj: i8) -> Option<Direction> {
        match (di, dj) {
            (1, 0) => Some(Direction::Down),
            (-1, 0) => Some(Direction::Up),
            (0, 1) => Some(Direction::Right),
            (0, -1) => Some(Direction::Left),
            _ => None,
        }
    }
}

/// Errors raised when converting a wire move.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoveError {
    #[error("invalid slide direction (di={di}, dj={dj})")]
    InvalidDirection { di: i8, dj: i8 },
}

/// A single move.
///
/// `drops[0]` pieces stay on the origin cell, `drops[1]` land one step away
/// and `drops[2]` two steps away; the rest of the carried stack lands on the
/// step after that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "WireMove", into = "WireMove")]
pub enum Move {
    PlaceFlat {
        row: u8,
        col: u8,
    },
    PlaceWall {
        row: u8,
        col: u8,
    },
    Slide {
        row: u8,
        col: u8,
        direction: Direction,
        drops: [u8; 3],
    },
}

/// Generator wire format of a move.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "move")]
enum WireMove {
    #[serde(rename = "MOVE")]
    Slide {
        i: u8,
        j: u8,
        di: i8,
        dj: i8,
        drop0: u8,
        drop1: u8,
        drop2: u8,
    },
    #[serde(rename = "FLAT")]
    Flat { i: u8, j: u8 },
    #[serde(rename = "WALL")]
    Wall { i: u8, j: u8 },
}

impl TryFrom<WireMove> for Move {
    type Error = MoveError;

    fn try_from(wire: WireMove) -> Result<Self, Self::Error> {
        match wire {
            WireMove::Flat { i, j } => Ok(Move::PlaceFlat { row: i, col: j }),
            WireMove::Wall { i, j } => Ok(Move::PlaceWall { row: i, col: j }),
            WireMove::Slide {
                i,
                j,
                di,
                dj,
                drop0,
                drop1,
                drop2,
            } => {
                let direction =
                    Direction::from_delta(di, dj).ok_or(MoveError::InvalidDirection { di, dj })?;
                Ok(Move::Slide {
                    row: i,
                    col: j,
                    direction,
                    drops: [drop0, drop1, drop2],
                })
            }
        }
    }
}

impl From<Move> for WireMove {
    fn from(mv: Move) -> WireMove {
        match mv {
            Move::PlaceFlat { row, col } => WireMove::Flat { i: row, j: col },
            Move::PlaceWall { row, col } => WireMove::Wall { i: row, j: col },
            Move::Slide {
                row,
                col,
                direction,
                drops,
            } => {
                let (di, dj) = direction.delta();
                WireMove::Slide {
                    i: row,
                    j: col,
                    di,
                    dj,
                    drop0: drops[0],
                    drop1: drops[1],
                    drop2: drops[2],
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_placements() {
        let flat: Move = serde_json::from_str(r#"{"move":"FLAT","i":1,"j":2}"#).unwrap();
        assert_eq!(flat, Move::PlaceFlat { row: 1, col: 2 });
        let wall: Move = serde_json::from_str(r#"{"move":"WALL","i":3,"j":0}"#).unwrap();
        assert_eq!(wall, Move::PlaceWall { row: 3, col: 0 });
    }

    #[test]
    fn parse_slide() {
        let json = r#"{"move":"MOVE","i":0,"j":1,"di":0,"dj":-1,"drop0":1,"drop1":2,"drop2":0}"#;
        let mv: Move = serde_json::from_str(json).unwrap();
        assert_eq!(
            mv,
            Move::Slide {
                row: 0,
                col: 1,
                direction: Direction::Left,
                drops: [1, 2, 0],
            }
        );
    }

    #[test]
    fn unknown_tag_rejected() {
        assert!(serde_json::from_str::<Move>(r#"{"move":"CAP","i":0,"j":0}"#).is_err());
    }

    #[test]
    fn diagonal_slide_rejected() {
        let json = r#"{"move":"MOVE","i":0,"j":0,"di":1,"dj":1,"drop0":0,"drop1":1,"drop2":0}"#;
        let err = serde_json::from_str::<Move>(json).unwrap_err();
        assert!(err.to_string().contains("invalid slide direction"));
    }

    #[test]
    fn wire_format_preserved() {
        let mv = Move::Slide {
            row: 2,
            col: 2,
            direction: Direction::Up,
            drops: [0, 1, 1],
        };
        let json = serde_json::to_value(mv).unwrap();
        assert_eq!(json["move"], "MOVE");
        assert_eq!(json["di"], -1);
        assert_eq!(json["dj"], 0);
        assert_eq!(serde_json::from_value::<Move>(json).unwrap(), mv);
    }

    #[test]
    fn direction_deltas_roundtrip() {
        for dir in ALL_DIRECTIONS {
            let (di, dj) = dir.delta();
            assert_eq!(Direction::from_delta(di, dj), Some(dir));
        }
        assert_eq!(Direction::from_delta(0, 0), None);
    }
}
