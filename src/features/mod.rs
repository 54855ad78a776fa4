//! Probe input features.
//!
//! Every prefix of a token sequence becomes a fixed-width integer row padded
//! with `FEATURE_PAD`; the rows are then one-hot encoded column by column into
//! a sparse matrix.

pub mod onehot;
pub mod prefix;

pub use onehot::{OneHotEncoder, OneHotMatrix};
pub use prefix::{PrefixMatrix, FEATURE_PAD};

/// Errors raised while building features.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeatureError {
    #[error("sequence of length {len} does not fit in rows of width {width}")]
    PrefixTooLong { len: usize, width: usize },

    #[error("rows have width {got}, encoder was fit on width {expected}")]
    WidthMismatch { expected: usize, got: usize },

    #[error("value {value} in column {column} was not seen during fit")]
    UnknownCategory { column: usize, value: i32 },

    #[error("encoded row has {got} entries, expected {expected}")]
    RowLength { expected: usize, got: usize },

    #[error("no active feature for column {0}")]
    MissingColumn(usize),
}
