//! Mini-batch Adam training of a probe on a train/test pair of datasets.

use std::f32::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array, Dimension, Zip};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::dataset::ProbingDataset;
use super::model::{BatchStats, Dense, ProbeClassifier};
use crate::board::AGE_CLASSES;

/// File name of the serialized probe inside the checkpoint directory.
pub const PROBE_FILE: &str = "probe.json";
/// File name of the per-epoch metrics inside the checkpoint directory.
pub const TRACES_FILE: &str = "traces.json";

#[derive(Debug, thiserror::Error)]
pub enum TrainerError {
    #[error("no checkpoint directory configured")]
    MissingCheckpointPath,

    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Optimisation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub max_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub betas: (f32, f32),
    pub eps: f32,
    /// Global gradient norm ceiling; 0 disables clipping.
    pub grad_norm_clip: f32,
    /// Decoupled weight decay on weight matrices only.
    pub weight_decay: f32,
    /// Linear warmup then cosine decay, both counted in examples seen.
    pub lr_decay: bool,
    pub warmup_examples: usize,
    pub final_examples: usize,
    /// Directory receiving traces and the probe checkpoint.
    pub ckpt_path: Option<PathBuf>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        TrainerConfig {
            max_epochs: 10,
            batch_size: 1024,
            learning_rate: 1e-3,
            betas: (0.9, 0.999),
            eps: 1e-8,
            grad_norm_clip: 1.0,
            weight_decay: 0.0,
            lr_decay: false,
            warmup_examples: 0,
            final_examples: 0,
            ckpt_path: None,
        }
    }
}

impl TrainerConfig {
    /// Learning rate after `seen` training examples.
    pub fn learning_rate_at(&self, seen: usize) -> f32 {
        if !self.lr_decay {
            return self.learning_rate;
        }
        let mult = if seen < self.warmup_examples {
            seen as f32 / self.warmup_examples.max(1) as f32
        } else {
            let span = self.final_examples.saturating_sub(self.warmup_examples).max(1);
            let progress = (seen - self.warmup_examples) as f32 / span as f32;
            (0.5 * (1.0 + (PI * progress.min(1.0)).cos())).max(0.1)
        };
        self.learning_rate * mult
    }
}

/// Per-epoch metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Traces {
    pub train_loss: Vec<f32>,
    pub train_acc: Vec<f32>,
    pub test_loss: Vec<f32>,
    pub test_acc: Vec<f32>,
    /// Test accuracy per age class, one vector per epoch. Empty when the
    /// property does not have one task per cell.
    pub test_acc_by_age: Vec<Vec<Option<f32>>>,
}

struct AdamState {
    m: Vec<Dense>,
    v: Vec<Dense>,
    step: i32,
}

pub struct Trainer {
    model: ProbeClassifier,
    train: ProbingDataset,
    test: ProbingDataset,
    config: TrainerConfig,
    adam: AdamState,
    examples_seen: usize,
    traces: Traces,
}

impl Trainer {
    pub fn new(
        model: ProbeClassifier,
        train: ProbingDataset,
        test: ProbingDataset,
        config: TrainerConfig,
    ) -> Self {
        let adam = AdamState {
            m: model.zero_grads(),
            v: model.zero_grads(),
            step: 0,
        };
        Trainer {
            model,
            train,
            test,
            config,
            adam,
            examples_seen: 0,
            traces: Traces::default(),
        }
    }

    pub fn model(&self) -> &ProbeClassifier {
        &self.model
    }

    pub fn traces(&self) -> &Traces {
        &self.traces
    }

    /// Runs every configured epoch: one shuffled train pass then one test pass.
    pub fn train<R: Rng + ?Sized>(&mut self, rng: &mut R) -> &Traces {
        for epoch in 0..self.config.max_epochs {
            let train = self.train_epoch(rng);
            let (test, by_age) = self.evaluate();
            info!(
                epoch = epoch + 1,
                train_loss = train.mean_loss(),
                train_acc = train.accuracy(),
                test_loss = test.mean_loss(),
                test_acc = test.accuracy(),
                lr = self.config.learning_rate_at(self.examples_seen),
                "epoch done"
            );
            self.traces.train_loss.push(train.mean_loss());
            self.traces.train_acc.push(train.accuracy());
            self.traces.test_loss.push(test.mean_loss());
            self.traces.test_acc.push(test.accuracy());
            if let Some(by_age) = by_age {
                self.traces.test_acc_by_age.push(by_age);
            }
        }
        &self.traces
    }

    fn train_epoch<R: Rng + ?Sized>(&mut self, rng: &mut R) -> BatchStats {
        let mut order: Vec<usize> = (0..self.train.len()).collect();
        order.shuffle(rng);

        let mut epoch = BatchStats::default();
        for batch in order.chunks(self.config.batch_size.max(1)) {
            let mut grads = self.model.zero_grads();
            let mut stats = BatchStats::default();
            for &i in batch {
                if let Some(ex) = self.train.get(i) {
                    stats.merge(self.model.accumulate(ex.features, ex.label, &mut grads));
                }
            }
            if stats.total > 0 {
                let scale = 1.0 / stats.total as f32;
                grads.iter_mut().for_each(|g| g.scale(scale));
                self.clip(&mut grads);
                self.examples_seen += batch.len();
                let lr = self.config.learning_rate_at(self.examples_seen);
                self.apply(&grads, lr);
            }
            epoch.merge(stats);
        }
        debug!(steps = self.adam.step, seen = self.examples_seen, "train pass");
        epoch
    }

    fn clip(&self, grads: &mut [Dense]) {
        if self.config.grad_norm_clip <= 0.0 {
            return;
        }
        let norm = grads.iter().map(Dense::sum_squares).sum::<f32>().sqrt();
        if norm > self.config.grad_norm_clip {
            let scale = self.config.grad_norm_clip / (norm + 1e-6);
            grads.iter_mut().for_each(|g| g.scale(scale));
        }
    }

    fn apply(&mut self, grads: &[Dense], lr: f32) {
        self.adam.step += 1;
        let (b1, b2) = self.config.betas;
        let step = AdamStep {
            lr,
            b1,
            b2,
            eps: self.config.eps,
            correction1: 1.0 - b1.powi(self.adam.step),
            correction2: 1.0 - b2.powi(self.adam.step),
        };
        let decay = self.config.weight_decay;
        let state = self
            .model
            .layers_mut()
            .iter_mut()
            .zip(grads)
            .zip(self.adam.m.iter_mut().zip(self.adam.v.iter_mut()));
        for ((layer, grad), (m, v)) in state {
            adam_update(&mut layer.weight, &grad.weight, &mut m.weight, &mut v.weight, &step, decay);
            adam_update(&mut layer.bias, &grad.bias, &mut m.bias, &mut v.bias, &step, 0.0);
        }
    }

    /// Loss and accuracy on the test partition, plus accuracy per age class
    /// when every cell is a task.
    pub fn evaluate(&self) -> (BatchStats, Option<Vec<Option<f32>>>) {
        let per_cell = self.model.num_tasks() > 1;
        let mut hits = vec![0usize; AGE_CLASSES];
        let mut seen = vec![0usize; AGE_CLASSES];
        let mut stats = BatchStats::default();
        for ex in self.test.iter() {
            let (s, task_hits) = self.model.evaluate(ex.features, ex.label);
            stats.merge(s);
            if !per_cell {
                continue;
            }
            for ((&hit, &age), &y) in task_hits.iter().zip(ex.age).zip(ex.label) {
                let age = age as usize;
                if age < AGE_CLASSES && (y as usize) < self.model.num_classes() {
                    seen[age] += 1;
                    hits[age] += usize::from(hit);
                }
            }
        }
        let by_age = per_cell.then(|| {
            hits.iter()
                .zip(&seen)
                .map(|(&h, &n)| (n > 0).then(|| h as f32 / n as f32))
                .collect()
        });
        (stats, by_age)
    }

    /// Highest test accuracy over the recorded epochs.
    pub fn best_test_accuracy(&self) -> Option<f32> {
        self.traces.test_acc.iter().copied().reduce(f32::max)
    }

    fn ckpt_dir(&self) -> Result<&Path, TrainerError> {
        self.config
            .ckpt_path
            .as_deref()
            .ok_or(TrainerError::MissingCheckpointPath)
    }

    pub fn save_traces(&self) -> Result<PathBuf, TrainerError> {
        let path = self.ckpt_dir()?.join(TRACES_FILE);
        write_json(&path, &self.traces)?;
        Ok(path)
    }

    pub fn save_checkpoint(&self) -> Result<PathBuf, TrainerError> {
        let path = self.ckpt_dir()?.join(PROBE_FILE);
        write_json(&path, &self.model.to_checkpoint())?;
        info!(path = %path.display(), "probe checkpoint saved");
        Ok(path)
    }
}

struct AdamStep {
    lr: f32,
    b1: f32,
    b2: f32,
    eps: f32,
    correction1: f32,
    correction2: f32,
}

fn adam_update<D: Dimension>(
    param: &mut Array<f32, D>,
    grad: &Array<f32, D>,
    m: &mut Array<f32, D>,
    v: &mut Array<f32, D>,
    s: &AdamStep,
    decay: f32,
) {
    Zip::from(param)
        .and(grad)
        .and(m)
        .and(v)
        .for_each(|p, &g, m, v| {
            *m = s.b1 * *m + (1.0 - s.b1) * g;
            *v = s.b2 * *v + (1.0 - s.b2) * g * g;
            let m_hat = *m / s.correction1;
            let v_hat = *v / s.correction2;
            *p -= s.lr * (m_hat / (v_hat.sqrt() + s.eps) + decay * *p);
        });
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), TrainerError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|source| TrainerError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let json = serde_json::to_string(value)?;
    fs::write(path, json).map_err(|source| TrainerError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{OneHotEncoder, PrefixMatrix};
    use crate::probe::model::{ProbeCheckpoint, ProbeKind};
    use crate::probe::TRAIN_RATIO;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    /// Prefixes of one 20-token sequence labelled by prefix length mod 3.
    fn dataset() -> ProbingDataset {
        let tokens: Vec<u32> = (1..=20).collect();
        let rows = PrefixMatrix::from_sequences([tokens.as_slice()], 20).unwrap();
        let (_, features) = OneHotEncoder::fit_transform(&rows).unwrap();
        let labels = (1..=20).map(|k| vec![(k % 3) as u8]).collect();
        let ages = (1..=20).map(|_| vec![0u8]).collect();
        ProbingDataset::new(features, labels, ages).unwrap()
    }

    fn trainer(config: TrainerConfig) -> Trainer {
        let data = dataset();
        let mut rng = SmallRng::seed_from_u64(5);
        let model = ProbeClassifier::new(ProbeKind::Linear, data.n_features(), 3, 1, &mut rng);
        Trainer::new(model, data.clone(), data, config)
    }

    #[test]
    fn learns_separable_labels() {
        let mut t = trainer(TrainerConfig {
            max_epochs: 150,
            batch_size: 4,
            learning_rate: 0.05,
            ..TrainerConfig::default()
        });
        let traces = t.train(&mut SmallRng::seed_from_u64(1)).clone();
        assert_eq!(traces.train_loss.len(), 150);
        assert_eq!(traces.test_acc.len(), 150);
        assert!(traces.train_loss[149] < traces.train_loss[0]);
        assert!(t.best_test_accuracy().unwrap() >= 0.9);
        // One task only: no per-age breakdown.
        assert!(traces.test_acc_by_age.is_empty());
    }

    #[test]
    fn warmup_then_cosine_floor() {
        let config = TrainerConfig {
            learning_rate: 1.0,
            lr_decay: true,
            warmup_examples: 10,
            final_examples: 110,
            ..TrainerConfig::default()
        };
        assert_eq!(config.learning_rate_at(0), 0.0);
        assert!((config.learning_rate_at(5) - 0.5).abs() < 1e-6);
        assert!((config.learning_rate_at(10) - 1.0).abs() < 1e-6);
        assert!((config.learning_rate_at(60) - 0.5).abs() < 1e-5);
        assert!((config.learning_rate_at(110) - 0.1).abs() < 1e-6);
        assert!((config.learning_rate_at(10_000) - 0.1).abs() < 1e-6);

        let flat = TrainerConfig::default();
        assert_eq!(flat.learning_rate_at(1_000_000), flat.learning_rate);
    }

    #[test]
    fn per_cell_tasks_bucket_accuracy_by_age() {
        let tokens: Vec<u32> = (1..=10).collect();
        let rows = PrefixMatrix::from_sequences([tokens.as_slice()], 10).unwrap();
        let (_, features) = OneHotEncoder::fit_transform(&rows).unwrap();
        let labels = vec![vec![0u8, 1]; 10];
        let ages = vec![vec![3u8, 7]; 10];
        let data = ProbingDataset::new(features, labels, ages).unwrap();
        let (train, test) = data.split_contiguous(TRAIN_RATIO).unwrap();

        let mut rng = SmallRng::seed_from_u64(2);
        let model = ProbeClassifier::new(ProbeKind::Linear, data.n_features(), 2, 2, &mut rng);
        let mut t = Trainer::new(
            model,
            train,
            test,
            TrainerConfig {
                max_epochs: 2,
                ..TrainerConfig::default()
            },
        );
        t.train(&mut rng);
        let by_age = &t.traces().test_acc_by_age;
        assert_eq!(by_age.len(), 2);
        assert_eq!(by_age[0].len(), AGE_CLASSES);
        assert!(by_age[0][3].is_some());
        assert!(by_age[0][7].is_some());
        assert!(by_age[0][0].is_none());
    }

    #[test]
    fn saves_traces_and_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = trainer(TrainerConfig {
            max_epochs: 1,
            ckpt_path: Some(dir.path().join("layer6")),
            ..TrainerConfig::default()
        });
        t.train(&mut SmallRng::seed_from_u64(0));

        let traces_path = t.save_traces().unwrap();
        let traces: Traces =
            serde_json::from_str(&fs::read_to_string(&traces_path).unwrap()).unwrap();
        assert_eq!(&traces, t.traces());

        let probe_path = t.save_checkpoint().unwrap();
        let ckpt: ProbeCheckpoint =
            serde_json::from_str(&fs::read_to_string(&probe_path).unwrap()).unwrap();
        assert_eq!(ProbeClassifier::from_checkpoint(ckpt).unwrap(), *t.model());
    }

    #[test]
    fn saving_without_directory_fails() {
        let t = trainer(TrainerConfig::default());
        assert!(matches!(
            t.save_traces(),
            Err(TrainerError::MissingCheckpointPath)
        ));
        assert!(t.best_test_accuracy().is_none());
    }
}
