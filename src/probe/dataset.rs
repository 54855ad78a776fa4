//! Probing dataset: one-hot features joined with property and age labels.
//!
//! The backing containers are built once and shared; splitting produces views
//! that hold index lists into the shared storage.

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::info;

use crate::board::{Label, AGE_CLASSES};
use crate::features::OneHotMatrix;

/// Fraction of examples assigned to the training partition.
pub const TRAIN_RATIO: f64 = 0.8;

/// Errors raised while constructing or splitting a probing dataset.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DatasetError {
    #[error("length mismatch: {features} feature rows, {labels} property labels, {ages} age labels")]
    LengthMismatch {
        features: usize,
        labels: usize,
        ages: usize,
    },

    #[error("train ratio {0} is outside [0, 1]")]
    InvalidRatio(f64),
}

#[derive(Debug)]
struct Storage {
    features: OneHotMatrix,
    labels: Vec<Label>,
    ages: Vec<Label>,
}

/// One probing example.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Example<'a> {
    /// Active one-hot feature indices.
    pub features: &'a [u32],
    /// Property class per task.
    pub label: &'a [u8],
    /// Age class per square.
    pub age: &'a [u8],
}

/// Immutable set of probing examples, possibly a view onto a larger set.
#[derive(Debug, Clone)]
pub struct ProbingDataset {
    storage: Arc<Storage>,
    index: Vec<usize>,
}

/// Number of training examples for a ratio: floor(ratio * n).
pub fn train_size(n: usize, ratio: f64) -> usize {
    ((ratio * n as f64).floor() as usize).min(n)
}

impl ProbingDataset {
    /// Joins three parallel containers. All three must have the same length.
    pub fn new(
        features: OneHotMatrix,
        labels: Vec<Label>,
        ages: Vec<Label>,
    ) -> Result<Self, DatasetError> {
        if features.len() != labels.len() || features.len() != ages.len() {
            return Err(DatasetError::LengthMismatch {
                features: features.len(),
                labels: labels.len(),
                ages: ages.len(),
            });
        }
        let n = labels.len();
        let dataset = ProbingDataset {
            storage: Arc::new(Storage {
                features,
                labels,
                ages,
            }),
            index: (0..n).collect(),
        };
        dataset.report();
        Ok(dataset)
    }

    fn view(&self, index: Vec<usize>) -> Self {
        ProbingDataset {
            storage: Arc::clone(&self.storage),
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Width of the one-hot feature space.
    pub fn n_features(&self) -> usize {
        self.storage.features.n_features()
    }

    /// Positions of this view's examples in the full dataset.
    pub fn source_indices(&self) -> &[usize] {
        &self.index
    }

    /// Example `i` of this view.
    pub fn get(&self, i: usize) -> Option<Example<'_>> {
        let src = *self.index.get(i)?;
        Some(Example {
            features: self.storage.features.row(src)?,
            label: &self.storage.labels[src],
            age: &self.storage.ages[src],
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Example<'_>> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    /// Splits on a random permutation: the first `floor(ratio * n)` permuted
    /// examples train, the rest test. Prefixes of one game can land on both
    /// sides.
    pub fn split_random<R: Rng + ?Sized>(
        &self,
        ratio: f64,
        rng: &mut R,
    ) -> Result<(Self, Self), DatasetError> {
        check_ratio(ratio)?;
        let mut perm = self.index.clone();
        perm.shuffle(rng);
        let test = perm.split_off(train_size(perm.len(), ratio));
        Ok((self.view(perm), self.view(test)))
    }

    /// Splits in loader order: the first `floor(ratio * n)` examples train,
    /// the rest test. At most one game straddles the boundary.
    pub fn split_contiguous(&self, ratio: f64) -> Result<(Self, Self), DatasetError> {
        check_ratio(ratio)?;
        let cut = train_size(self.len(), ratio);
        let train = self.view(self.index[..cut].to_vec());
        let test = self.view(self.index[cut..].to_vec());
        train.report();
        test.report();
        Ok((train, test))
    }

    /// Counts property label entries per class, over every task of every example.
    pub fn class_counts(&self, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0usize; num_classes];
        for ex in self.iter() {
            for &c in ex.label {
                if let Some(slot) = counts.get_mut(c as usize) {
                    *slot += 1;
                }
            }
        }
        counts
    }

    /// Histogram of age label entries over 0..AGE_CLASSES.
    pub fn age_histogram(&self) -> Vec<usize> {
        let mut counts = vec![0usize; AGE_CLASSES];
        for ex in self.iter() {
            for &a in ex.age {
                if let Some(slot) = counts.get_mut(a as usize) {
                    *slot += 1;
                }
            }
        }
        counts
    }

    fn report(&self) {
        info!(pairs = self.len(), "probing pairs loaded");
        info!(counts = ?self.class_counts(3), "property class balance");
        info!(histogram = ?self.age_histogram(), "age histogram");
    }
}

fn check_ratio(ratio: f64) -> Result<(), DatasetError> {
    if (0.0..=1.0).contains(&ratio) {
        Ok(())
    } else {
        Err(DatasetError::InvalidRatio(ratio))
    }
}
