//! Token vocabulary for move sequences.
//!
//! Tokens are assigned to the distinct move values of a dataset in ascending
//! order. The padding sentinel sorts below every square, so it is always
//! token 0.

use std::collections::{BTreeSet, HashMap};

use crate::board::Square;

/// Move value used to pad sequences to a common length.
pub const PAD_MOVE: i32 = -100;

/// Bidirectional mapping between move values and token ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    itos: Vec<i32>,
    stoi: HashMap<i32, u32>,
}

impl Vocabulary {
    /// Builds the vocabulary from the move values present in `games`, plus
    /// the padding sentinel.
    pub fn from_games<'a, I>(games: I) -> Self
    where
        I: IntoIterator<Item = &'a [i32]>,
    {
        let mut values: BTreeSet<i32> = games.into_iter().flatten().copied().collect();
        values.insert(PAD_MOVE);
        Self::from_sorted(values.into_iter().collect())
    }

    fn from_sorted(itos: Vec<i32>) -> Self {
        let stoi = itos
            .iter()
            .enumerate()
            .map(|(token, &value)| (value, token as u32))
            .collect();
        Vocabulary { itos, stoi }
    }

    /// Number of tokens, padding included.
    pub fn len(&self) -> usize {
        self.itos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.itos.is_empty()
    }

    /// Token for a move value; None if the value was not in the dataset.
    pub fn encode(&self, value: i32) -> Option<u32> {
        self.stoi.get(&value).copied()
    }

    /// Move value of a token.
    pub fn decode(&self, token: u32) -> Option<i32> {
        self.itos.get(token as usize).copied()
    }

    /// Decodes a token straight to a board square; None for padding or
    /// unknown tokens.
    pub fn decode_square(&self, token: u32) -> Option<Square> {
        self.decode(token).and_then(Square::from_move_value)
    }

    /// Token of `PAD_MOVE`.
    pub fn pad_token(&self) -> u32 {
        self.stoi.get(&PAD_MOVE).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_sorts_to_front() {
        let games: Vec<Vec<i32>> = vec![vec![19, 18], vec![37, 19]];
        let vocab = Vocabulary::from_games(games.iter().map(Vec::as_slice));
        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.pad_token(), 0);
        assert_eq!(vocab.decode(0), Some(PAD_MOVE));
        assert_eq!(vocab.encode(18), Some(1));
        assert_eq!(vocab.encode(19), Some(2));
        assert_eq!(vocab.encode(37), Some(3));
        assert_eq!(vocab.encode(44), None);
    }
}
