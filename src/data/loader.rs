//! Fixed, ordered dataset of move sequences.
//!
//! Games are stored as JSON Lines: each line is a JSON array of move values
//! (square indices, optionally followed by `PAD_MOVE`). All games are padded
//! to the longest game, tokenized, and the first `block_size` tokens of each
//! form its input sequence. Iteration order is file order then line order and
//! never changes, so ground truth and features built from separate passes line
//! up row for row.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::vocab::{Vocabulary, PAD_MOVE};
use crate::board::Square;

/// Errors that can occur while loading a sequence dataset.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{}:{line}: malformed game: {source}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },

    #[error("game {game} contains move value {value}, which is neither a square nor padding")]
    InvalidSquare { game: usize, value: i32 },

    #[error("dataset contains no sequence with at least two moves")]
    Empty,
}

/// The valid prefix of one input sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSequence<'a> {
    /// Token ids up to (excluding) the first padding token.
    pub tokens: &'a [u32],
    /// The same prefix decoded to board squares.
    pub moves: Vec<Square>,
}

/// Tokenized, padded move sequences in stable order.
#[derive(Debug, Clone)]
pub struct SequenceLoader {
    vocab: Vocabulary,
    block_size: usize,
    sequences: Vec<Vec<u32>>,
}

impl SequenceLoader {
    /// Loads every `*.jsonl` file under `path` (sorted by file name), or the
    /// single file at `path`.
    pub fn open(path: &Path) -> Result<Self, LoaderError> {
        let io_err = |source| LoaderError::Io {
            path: path.to_path_buf(),
            source,
        };

        let files = if path.is_dir() {
            let mut files = Vec::new();
            for entry in fs::read_dir(path).map_err(io_err)? {
                let file = entry.map_err(io_err)?.path();
                if file.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                    files.push(file);
                }
            }
            files.sort();
            files
        } else {
            vec![path.to_path_buf()]
        };

        let mut games = Vec::new();
        for file in &files {
            let before = games.len();
            read_jsonl(file, &mut games)?;
            debug!(file = %file.display(), games = games.len() - before, "read game file");
        }
        info!(files = files.len(), games = games.len(), path = %path.display(), "loaded dataset");
        Self::from_games(games)
    }

    /// Builds the loader from in-memory games.
    pub fn from_games(games: Vec<Vec<i32>>) -> Result<Self, LoaderError> {
        for (game, moves) in games.iter().enumerate() {
            if let Some(&value) = moves
                .iter()
                .find(|&&v| v != PAD_MOVE && Square::from_move_value(v).is_none())
            {
                return Err(LoaderError::InvalidSquare { game, value });
            }
        }

        let max_len = games.iter().map(Vec::len).max().unwrap_or(0);
        if max_len < 2 {
            return Err(LoaderError::Empty);
        }
        let block_size = max_len - 1;

        let vocab = Vocabulary::from_games(games.iter().map(Vec::as_slice));
        let pad = vocab.pad_token();
        let sequences = games
            .iter()
            .map(|moves| {
                let mut tokens: Vec<u32> = moves
                    .iter()
                    .take(block_size)
                    .map(|&v| vocab.encode(v).unwrap_or(pad))
                    .collect();
                tokens.resize(block_size, pad);
                tokens
            })
            .collect();

        Ok(SequenceLoader {
            vocab,
            block_size,
            sequences,
        })
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Input length of every sequence: the longest game minus one.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Full padded token row of sequence `idx`.
    pub fn tokens(&self, idx: usize) -> Option<&[u32]> {
        self.sequences.get(idx).map(Vec::as_slice)
    }

    /// Position of the first padding move, or the block size when the
    /// sequence is unpadded.
    pub fn valid_len(&self, idx: usize) -> Option<usize> {
        let tokens = self.tokens(idx)?;
        Some(
            tokens
                .iter()
                .position(|&t| self.vocab.decode(t) == Some(PAD_MOVE))
                .unwrap_or(self.block_size),
        )
    }

    /// Valid prefix of sequence `idx`.
    pub fn sequence(&self, idx: usize) -> Option<LoadedSequence<'_>> {
        let tokens = &self.tokens(idx)?[..self.valid_len(idx)?];
        let moves = tokens
            .iter()
            .filter_map(|&t| self.vocab.decode_square(t))
            .collect();
        Some(LoadedSequence { tokens, moves })
    }

    /// Valid prefixes of all sequences, in dataset order.
    pub fn iter(&self) -> impl Iterator<Item = LoadedSequence<'_>> + '_ {
        (0..self.len()).filter_map(move |i| self.sequence(i))
    }

    /// Total number of valid prefixes across the dataset.
    pub fn total_prefixes(&self) -> usize {
        (0..self.len()).filter_map(|i| self.valid_len(i)).sum()
    }
}

fn read_jsonl(path: &Path, games: &mut Vec<Vec<i32>>) -> Result<(), LoaderError> {
    let text = fs::read_to_string(path).map_err(|source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let game: Vec<i32> = serde_json::from_str(line).map_err(|source| LoaderError::Parse {
            path: path.to_path_buf(),
            line: i + 1,
            source,
        })?;
        games.push(game);
    }
    Ok(())
}
