//! Column-wise one-hot encoding of prefix rows.
//!
//! Each column gets its own category list: the sorted distinct values seen in
//! that column during `fit`, padding included. The encoded feature space is the
//! concatenation of those lists in column order, so a row of width `w` has
//! exactly `w` active features. Rows are stored sparsely as the sorted indices
//! of their active features.

use std::collections::BTreeSet;
use std::ops::Range;

use super::prefix::PrefixMatrix;
use super::FeatureError;

/// Per-column category lists learned from a prefix matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneHotEncoder {
    categories: Vec<Vec<i32>>,
    /// Start of each column's block in the feature space; one extra entry
    /// holds the total width.
    offsets: Vec<usize>,
}

impl OneHotEncoder {
    pub fn fit(rows: &PrefixMatrix) -> Self {
        let mut seen: Vec<BTreeSet<i32>> = vec![BTreeSet::new(); rows.width()];
        for row in rows.rows() {
            for (col, &v) in row.iter().enumerate() {
                seen[col].insert(v);
            }
        }
        let categories: Vec<Vec<i32>> = seen.into_iter().map(|s| s.into_iter().collect()).collect();

        let mut offsets = Vec::with_capacity(categories.len() + 1);
        let mut total = 0;
        for cats in &categories {
            offsets.push(total);
            total += cats.len();
        }
        offsets.push(total);

        OneHotEncoder {
            categories,
            offsets,
        }
    }

    /// Width of the encoded feature space.
    pub fn n_features(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    /// Number of original columns.
    pub fn n_columns(&self) -> usize {
        self.categories.len()
    }

    pub fn categories(&self, column: usize) -> Option<&[i32]> {
        self.categories.get(column).map(Vec::as_slice)
    }

    fn block(&self, column: usize) -> Range<usize> {
        self.offsets[column]..self.offsets[column + 1]
    }

    pub fn transform(&self, rows: &PrefixMatrix) -> Result<OneHotMatrix, FeatureError> {
        if rows.width() != self.n_columns() {
            return Err(FeatureError::WidthMismatch {
                expected: self.n_columns(),
                got: rows.width(),
            });
        }

        let mut indices = Vec::with_capacity(rows.len() * self.n_columns());
        for row in rows.rows() {
            for (column, &value) in row.iter().enumerate() {
                let pos = self.categories[column]
                    .binary_search(&value)
                    .map_err(|_| FeatureError::UnknownCategory { column, value })?;
                indices.push((self.offsets[column] + pos) as u32);
            }
        }

        Ok(OneHotMatrix {
            n_features: self.n_features(),
            nnz_per_row: self.n_columns(),
            indices,
        })
    }

    pub fn fit_transform(rows: &PrefixMatrix) -> Result<(Self, OneHotMatrix), FeatureError> {
        let encoder = Self::fit(rows);
        let matrix = encoder.transform(rows)?;
        Ok((encoder, matrix))
    }

    /// Recovers the original row from a dense encoded row by taking the
    /// arg-max inside each column's block.
    pub fn decode_dense(&self, encoded: &[f32]) -> Result<Vec<i32>, FeatureError> {
        if encoded.len() != self.n_features() {
            return Err(FeatureError::RowLength {
                expected: self.n_features(),
                got: encoded.len(),
            });
        }
        (0..self.n_columns())
            .map(|column| {
                let block = &encoded[self.block(column)];
                block
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(pos, _)| self.categories[column][pos])
                    .ok_or(FeatureError::MissingColumn(column))
            })
            .collect()
    }

    /// Recovers the original row from its active feature indices.
    pub fn decode(&self, active: &[u32]) -> Result<Vec<i32>, FeatureError> {
        (0..self.n_columns())
            .map(|column| {
                let block = self.block(column);
                active
                    .iter()
                    .map(|&i| i as usize)
                    .find(|i| block.contains(i))
                    .map(|i| self.categories[column][i - block.start])
                    .ok_or(FeatureError::MissingColumn(column))
            })
            .collect()
    }
}

/// Sparse binary matrix with a fixed number of active features per row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneHotMatrix {
    n_features: usize,
    nnz_per_row: usize,
    indices: Vec<u32>,
}

impl OneHotMatrix {
    pub fn len(&self) -> usize {
        if self.nnz_per_row == 0 {
            0
        } else {
            self.indices.len() / self.nnz_per_row
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Sorted active feature indices of row `i`.
    pub fn row(&self, i: usize) -> Option<&[u32]> {
        self.indices
            .get(i * self.nnz_per_row..(i + 1) * self.nnz_per_row)
    }

    pub fn to_dense_row(&self, i: usize) -> Option<Vec<f32>> {
        let active = self.row(i)?;
        let mut dense = vec![0.0f32; self.n_features];
        for &idx in active {
            dense[idx as usize] = 1.0;
        }
        Some(dense)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PrefixMatrix {
        PrefixMatrix::from_sequences([&[5u32, 7, 2][..], &[3, 7][..], &[5][..]], 3).unwrap()
    }

    #[test]
    fn categories_are_sorted_per_column() {
        let enc = OneHotEncoder::fit(&sample());
        assert_eq!(enc.n_columns(), 3);
        assert_eq!(enc.categories(0), Some(&[3, 5][..]));
        assert_eq!(enc.categories(1), Some(&[-1, 7][..]));
        assert_eq!(enc.categories(2), Some(&[-1, 2][..]));
        assert_eq!(enc.n_features(), 6);
    }

    #[test]
    fn one_active_feature_per_column() {
        let (enc, m) = OneHotEncoder::fit_transform(&sample()).unwrap();
        assert_eq!(m.len(), 6);
        assert_eq!(m.n_features(), enc.n_features());
        // Row 1 is [5, 7, -1]: 5 -> 1, 7 -> 2 + 1, -1 -> 4 + 0.
        assert_eq!(m.row(1), Some(&[1, 3, 4][..]));
        for i in 0..m.len() {
            let dense = m.to_dense_row(i).unwrap();
            assert_eq!(dense.iter().sum::<f32>(), 3.0);
        }
    }

    #[test]
    fn decode_reconstructs_rows() {
        let rows = sample();
        let (enc, m) = OneHotEncoder::fit_transform(&rows).unwrap();
        for i in 0..rows.len() {
            let original = rows.row(i).unwrap();
            let dense = m.to_dense_row(i).unwrap();
            assert_eq!(enc.decode_dense(&dense).unwrap(), original);
            assert_eq!(enc.decode(m.row(i).unwrap()).unwrap(), original);
        }
    }

    #[test]
    fn unseen_value_rejected() {
        let enc = OneHotEncoder::fit(&sample());
        let other = PrefixMatrix::from_sequences([&[9u32][..]], 3).unwrap();
        assert_eq!(
            enc.transform(&other),
            Err(FeatureError::UnknownCategory { column: 0, value: 9 })
        );
    }

    #[test]
    fn width_mismatch_rejected() {
        let enc = OneHotEncoder::fit(&sample());
        let other = PrefixMatrix::from_sequences([&[5u32][..]], 2).unwrap();
        assert_eq!(
            enc.transform(&other),
            Err(FeatureError::WidthMismatch { expected: 3, got: 2 })
        );
    }

    #[test]
    fn decode_checks_row_length() {
        let enc = OneHotEncoder::fit(&sample());
        assert_eq!(
            enc.decode_dense(&[1.0, 0.0]),
            Err(FeatureError::RowLength { expected: 6, got: 2 })
        );
        assert_eq!(enc.decode(&[1]), Err(FeatureError::MissingColumn(1)));
    }
}
