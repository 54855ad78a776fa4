//! Per-prefix integer rows.

use super::FeatureError;

/// Value filling the unused tail of a prefix row. Distinct from every token.
pub const FEATURE_PAD: i32 = -1;

/// Dense row-major matrix with one row per sequence prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixMatrix {
    width: usize,
    data: Vec<i32>,
}

impl PrefixMatrix {
    /// Empty matrix with rows of `width` columns.
    pub fn new(width: usize) -> Self {
        PrefixMatrix {
            width,
            data: Vec::new(),
        }
    }

    /// Builds rows for every prefix of every sequence, in order.
    pub fn from_sequences<'a, I>(sequences: I, width: usize) -> Result<Self, FeatureError>
    where
        I: IntoIterator<Item = &'a [u32]>,
    {
        let mut matrix = PrefixMatrix::new(width);
        for tokens in sequences {
            matrix.push_sequence(tokens)?;
        }
        Ok(matrix)
    }

    /// Appends one row per prefix length 1..=len of `tokens` and returns the
    /// number of rows added.
    pub fn push_sequence(&mut self, tokens: &[u32]) -> Result<usize, FeatureError> {
        if tokens.len() > self.width {
            return Err(FeatureError::PrefixTooLong {
                len: tokens.len(),
                width: self.width,
            });
        }
        self.data.reserve(tokens.len() * self.width);
        for k in 1..=tokens.len() {
            self.data.extend(tokens[..k].iter().map(|&t| t as i32));
            self.data
                .extend(std::iter::repeat(FEATURE_PAD).take(self.width - k));
        }
        Ok(tokens.len())
    }

    /// Number of columns per row.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.data.len() / self.width
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row `i`, or None past the end.
    pub fn row(&self, i: usize) -> Option<&[i32]> {
        self.data.get(i * self.width..(i + 1) * self.width)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[i32]> {
        self.data.chunks_exact(self.width.max(1))
    }
}
