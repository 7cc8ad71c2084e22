//! Training records and dataset files.
//!
//! A dataset file is a JSON array of records as written by the self-play
//! generator:
//!
//! ```json
//! [{"game": {"turn": 1, "board": [[[0, ...], ...], ...]},
//!   "moves": [{"move": "FLAT", "i": 0, "j": 0}, ...],
//!   "p": [1.0, ...],
//!   "val": 0.3}]
//! ```
//!
//! Records are kept in their raw form and encoded on access.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::batch::Example;
use crate::board::{Move, Position};
use crate::nn::encoding::{encode_position, ActionSpace, EncodeError};

/// One training record: a position, its candidate moves with target
/// probabilities, and the game outcome from the side to move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub game: Position,
    pub moves: Vec<Move>,
    /// Target probability per move, parallel to `moves`.
    pub p: Vec<f32>,
    pub val: f32,
}

/// Errors raised while encoding a single record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("{moves} moves but {probs} probabilities")]
    MisalignedTargets { moves: usize, probs: usize },

    #[error("board is {found}x{found}, action space expects {expected}x{expected}")]
    BoardSize { found: usize, expected: usize },

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl Record {
    /// Encodes the board and every move of this record.
    pub fn encode(&self, space: &ActionSpace) -> Result<Example, RecordError> {
        if self.moves.len() != self.p.len() {
            return Err(RecordError::MisalignedTargets {
                moves: self.moves.len(),
                probs: self.p.len(),
            });
        }
        if self.game.board.size() != space.board_size() {
            return Err(RecordError::BoardSize {
                found: self.game.board.size(),
                expected: space.board_size(),
            });
        }

        let board = encode_position(&self.game)?;
        let coords = self
            .moves
            .iter()
            .map(|mv| space.encode_move(mv))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Example {
            board,
            coords,
            probs: self.p.clone(),
            value: self.val,
        })
    }
}

/// Errors raised while loading or indexing a dataset.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("record {index}: {source}")]
    Record {
        index: usize,
        #[source]
        source: RecordError,
    },

    #[error("record index {index} out of range for dataset of {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

/// A static, in-memory collection of records.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    records: Vec<Record>,
}

impl Dataset {
    pub fn from_records(records: Vec<Record>) -> Dataset {
        Dataset { records }
    }

    /// Parses a JSON array of records. `origin` names the source in errors.
    pub fn from_reader<R: Read>(reader: R, origin: &str) -> Result<Dataset, DatasetError> {
        let records: Vec<Record> =
            serde_json::from_reader(reader).map_err(|source| DatasetError::Parse {
                origin: origin.to_string(),
                source,
            })?;
        debug!(origin, records = records.len(), "parsed dataset");
        Ok(Dataset { records })
    }

    /// Loads one dataset file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Dataset, DatasetError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Dataset::from_reader(BufReader::new(file), &path.display().to_string())
    }

    /// Loads several files and concatenates their records in order.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Dataset, DatasetError> {
        let mut records = Vec::new();
        for path in paths {
            records.extend(Dataset::from_path(path)?.records);
        }
        info!(files = paths.len(), records = records.len(), "loaded dataset");
        Ok(Dataset { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn record(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    /// Encodes the record at `index`.
    pub fn example(&self, index: usize, space: &ActionSpace) -> Result<Example, DatasetError> {
        let record = self.record(index).ok_or(DatasetError::IndexOutOfRange {
            index,
            len: self.len(),
        })?;
        record
            .encode(space)
            .map_err(|source| DatasetError::Record { index, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Player;

    fn empty_board_json() -> String {
        let stack = vec![0u8; 9];
        let rows = vec![vec![stack; 4]; 4];
        serde_json::to_string(&rows).unwrap()
    }

    fn record_json(board: &str, moves: &str, p: &str, val: f32) -> String {
        format!(
            r#"{{"game":{{"turn":1,"p1_pieces_rm":15,"p2_pieces_rem":15,"board":{board}}},"moves":{moves},"p":{p},"val":{val}}}"#
        )
    }

    #[test]
    fn parses_generator_output() {
        let board = empty_board_json();
        let json = format!(
            "[{},{}]",
            record_json(&board, r#"[{"move":"FLAT","i":0,"j":0}]"#, "[1.0]", 0.3),
            record_json(
                &board,
                r#"[{"move":"WALL","i":1,"j":1},{"move":"MOVE","i":0,"j":0,"di":1,"dj":0,"drop0":0,"drop1":1,"drop2":0}]"#,
                "[0.25,0.75]",
                -1.0
            ),
        );
        let dataset = Dataset::from_reader(json.as_bytes(), "inline").unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.records()[0].game.turn, Player::One);
        assert_eq!(dataset.records()[1].moves.len(), 2);
    }

    #[test]
    fn example_encoding() {
        let board = empty_board_json();
        let json = format!(
            "[{}]",
            record_json(&board, r#"[{"move":"FLAT","i":0,"j":0}]"#, "[1.0]", 0.3)
        );
        let dataset = Dataset::from_reader(json.as_bytes(), "inline").unwrap();
        let example = dataset.example(0, &ActionSpace::new(4)).unwrap();
        assert_eq!(example.board.dim(), (4, 4, 9));
        assert!(example.board.iter().all(|&v| v == 0.0));
        assert_eq!(example.coords[0].as_array(), [0, 0, 0, 0, 0, 0]);
        assert_eq!(example.probs, vec![1.0]);
        assert!((example.value - 0.3).abs() < 1e-6);
    }

    #[test]
    fn misaligned_targets_rejected() {
        let board = empty_board_json();
        let json = format!(
            "[{}]",
            record_json(&board, r#"[{"move":"FLAT","i":0,"j":0}]"#, "[0.5,0.5]", 0.0)
        );
        let dataset = Dataset::from_reader(json.as_bytes(), "inline").unwrap();
        let err = dataset.example(0, &ActionSpace::new(4)).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::Record {
                index: 0,
                source: RecordError::MisalignedTargets { moves: 1, probs: 2 }
            }
        ));
    }

    #[test]
    fn bad_piece_code_surfaces_with_index() {
        let mut rows = vec![vec![vec![0u8; 9]; 4]; 4];
        rows[1][2][0] = 7;
        let board = serde_json::to_string(&rows).unwrap();
        let json = format!("[{}]", record_json(&board, "[]", "[]", 0.0));
        let dataset = Dataset::from_reader(json.as_bytes(), "inline").unwrap();
        let err = dataset.example(0, &ActionSpace::new(4)).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::Record {
                index: 0,
                source: RecordError::Encode(EncodeError::InvalidPieceCode { code: 7, .. })
            }
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = Dataset::from_reader("[{\"game\":".as_bytes(), "inline").unwrap_err();
        assert!(matches!(err, DatasetError::Parse { .. }));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = Dataset::from_path("/nonexistent/taknet/out0.json").unwrap_err();
        assert!(matches!(err, DatasetError::Io { .. }));
    }

    #[test]
    fn out_of_range_index() {
        let dataset = Dataset::default();
        assert!(matches!(
            dataset.example(3, &ActionSpace::new(4)),
            Err(DatasetError::IndexOutOfRange { index: 3, len: 0 })
        ));
    }
}
