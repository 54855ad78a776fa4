//! Probing: labelled datasets, probe classifiers, and their training loop.

pub mod dataset;
pub mod model;
pub mod trainer;

pub use dataset::{train_size, DatasetError, Example, ProbingDataset, TRAIN_RATIO};
pub use model::{BatchStats, ProbeCheckpoint, ProbeClassifier, ProbeError, ProbeKind};
pub use trainer::{Trainer, TrainerConfig, TrainerError, Traces, PROBE_FILE, TRACES_FILE};
