//! Probe classifiers over sparse one-hot input.
//!
//! A probe predicts `num_classes` logits for each of `num_tasks` tasks. The
//! output vector is task-major: logit `c` of task `t` sits at
//! `t * num_classes + c`. Hidden layers use ReLU.

use ndarray::linalg::general_mat_mul;
use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Errors raised when restoring a probe.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("bad parameter shape: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("checkpoint has {got} layers, a {kind:?} probe needs {expected}")]
    LayerCount {
        kind: ProbeKind,
        expected: usize,
        got: usize,
    },

    #[error("layer {layer} {what} is {got}, expected {expected}")]
    Dimension {
        layer: usize,
        what: &'static str,
        expected: usize,
        got: usize,
    },
}

/// Probe architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeKind {
    /// A single affine map from features to logits.
    Linear,
    /// Affine, ReLU, affine.
    TwoLayer { mid_dim: usize },
}

impl ProbeKind {
    pub const fn num_layers(self) -> usize {
        match self {
            ProbeKind::Linear => 1,
            ProbeKind::TwoLayer { .. } => 2,
        }
    }
}

/// Affine layer `y = x W + b` with `W` shaped `[in, out]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dense {
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
}

impl Dense {
    /// Uniform init in ±1/sqrt(in), the usual default for linear layers.
    fn init<R: Rng + ?Sized>(input: usize, output: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (input.max(1) as f32).sqrt();
        Dense {
            weight: Array2::from_shape_fn((input, output), |_| rng.gen_range(-bound..bound)),
            bias: Array1::from_shape_fn(output, |_| rng.gen_range(-bound..bound)),
        }
    }

    pub fn zeros_like(&self) -> Self {
        Dense {
            weight: Array2::zeros(self.weight.raw_dim()),
            bias: Array1::zeros(self.bias.raw_dim()),
        }
    }

    /// Input width.
    pub fn input_dim(&self) -> usize {
        self.weight.nrows()
    }

    pub fn output_dim(&self) -> usize {
        self.weight.ncols()
    }

    /// Forward pass for a binary input given by its active indices.
    fn forward_sparse(&self, active: &[u32]) -> Array1<f32> {
        let mut out = self.bias.clone();
        for &i in active {
            out += &self.weight.row(i as usize);
        }
        out
    }

    fn forward(&self, x: &Array1<f32>) -> Array1<f32> {
        x.dot(&self.weight) + &self.bias
    }

    pub fn scale(&mut self, factor: f32) {
        self.weight *= factor;
        self.bias *= factor;
    }

    pub fn sum_squares(&self) -> f32 {
        self.weight.iter().chain(self.bias.iter()).map(|g| g * g).sum()
    }
}

/// Loss and accuracy totals over a set of (example, task) pairs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchStats {
    pub loss_sum: f64,
    pub correct: usize,
    pub total: usize,
}

impl BatchStats {
    pub fn merge(&mut self, other: BatchStats) {
        self.loss_sum += other.loss_sum;
        self.correct += other.correct;
        self.total += other.total;
    }

    pub fn mean_loss(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            (self.loss_sum / self.total as f64) as f32
        }
    }

    pub fn accuracy(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f32 / self.total as f32
        }
    }
}

/// A probe classifier and its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeClassifier {
    kind: ProbeKind,
    num_classes: usize,
    num_tasks: usize,
    layers: Vec<Dense>,
}

impl ProbeClassifier {
    pub fn new<R: Rng + ?Sized>(
        kind: ProbeKind,
        input_dim: usize,
        num_classes: usize,
        num_tasks: usize,
        rng: &mut R,
    ) -> Self {
        let output = num_classes * num_tasks;
        let layers = match kind {
            ProbeKind::Linear => vec![Dense::init(input_dim, output, rng)],
            ProbeKind::TwoLayer { mid_dim } => vec![
                Dense::init(input_dim, mid_dim, rng),
                Dense::init(mid_dim, output, rng),
            ],
        };
        ProbeClassifier {
            kind,
            num_classes,
            num_tasks,
            layers,
        }
    }

    pub fn kind(&self) -> ProbeKind {
        self.kind
    }

    pub fn input_dim(&self) -> usize {
        self.layers[0].input_dim()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn num_tasks(&self) -> usize {
        self.num_tasks
    }

    pub fn layers(&self) -> &[Dense] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Dense] {
        &mut self.layers
    }

    /// Zeroed gradient buffers matching the layers.
    pub fn zero_grads(&self) -> Vec<Dense> {
        self.layers.iter().map(Dense::zeros_like).collect()
    }

    /// Pre-activation outputs of every layer; the last entry holds the logits.
    fn forward_all(&self, active: &[u32]) -> Vec<Array1<f32>> {
        let mut outputs = Vec::with_capacity(self.layers.len());
        outputs.push(self.layers[0].forward_sparse(active));
        for layer in &self.layers[1..] {
            let hidden = outputs[outputs.len() - 1].mapv(|v| v.max(0.0));
            outputs.push(layer.forward(&hidden));
        }
        outputs
    }

    /// Task-major logits for one example.
    pub fn logits(&self, active: &[u32]) -> Array1<f32> {
        self.forward_all(active).pop().unwrap_or_else(|| Array1::zeros(0))
    }

    /// Loss and accuracy for one example without touching gradients.
    /// Label entries outside the class range are ignored.
    pub fn evaluate(&self, active: &[u32], label: &[u8]) -> (BatchStats, Vec<bool>) {
        let logits = self.logits(active);
        let mut stats = BatchStats::default();
        let mut hits = Vec::with_capacity(self.num_tasks);
        for (t, &y) in label.iter().enumerate().take(self.num_tasks) {
            let y = y as usize;
            if y >= self.num_classes {
                hits.push(false);
                continue;
            }
            let task = logits.slice(ndarray::s![t * self.num_classes..(t + 1) * self.num_classes]);
            let probs = softmax(task.iter().copied());
            let hit = argmax(probs.iter().copied()) == y;
            stats.loss_sum -= f64::from(probs[y].max(f32::MIN_POSITIVE).ln());
            stats.correct += usize::from(hit);
            stats.total += 1;
            hits.push(hit);
        }
        (stats, hits)
    }

    /// Adds the cross-entropy gradient of one example to `grads` (summed, not
    /// averaged) and returns its loss and accuracy totals.
    pub fn accumulate(&self, active: &[u32], label: &[u8], grads: &mut [Dense]) -> BatchStats {
        let outputs = self.forward_all(active);
        let Some(logits) = outputs.last() else {
            return BatchStats::default();
        };

        let mut stats = BatchStats::default();
        let mut delta = Array1::<f32>::zeros(logits.len());
        for (t, &y) in label.iter().enumerate().take(self.num_tasks) {
            let y = y as usize;
            if y >= self.num_classes {
                continue;
            }
            let base = t * self.num_classes;
            let task = logits.slice(ndarray::s![base..base + self.num_classes]);
            let probs = softmax(task.iter().copied());
            if argmax(probs.iter().copied()) == y {
                stats.correct += 1;
            }
            stats.loss_sum -= f64::from(probs[y].max(f32::MIN_POSITIVE).ln());
            stats.total += 1;
            for (c, p) in probs.into_iter().enumerate() {
                delta[base + c] = p - if c == y { 1.0 } else { 0.0 };
            }
        }

        for l in (1..self.layers.len()).rev() {
            let pre = &outputs[l - 1];
            let hidden = pre.mapv(|v| v.max(0.0));
            general_mat_mul(
                1.0,
                &hidden.view().insert_axis(Axis(1)),
                &delta.view().insert_axis(Axis(0)),
                1.0,
                &mut grads[l].weight,
            );
            grads[l].bias += &delta;
            let mut back = self.layers[l].weight.dot(&delta);
            back.zip_mut_with(pre, |d, &p| {
                if p <= 0.0 {
                    *d = 0.0;
                }
            });
            delta = back;
        }

        for &i in active {
            let mut row = grads[0].weight.row_mut(i as usize);
            row += &delta;
        }
        grads[0].bias += &delta;
        stats
    }

    pub fn to_checkpoint(&self) -> ProbeCheckpoint {
        ProbeCheckpoint {
            kind: self.kind,
            num_classes: self.num_classes,
            num_tasks: self.num_tasks,
            layers: self
                .layers
                .iter()
                .map(|l| LayerCheckpoint {
                    input_dim: l.input_dim(),
                    output_dim: l.output_dim(),
                    weight: l.weight.iter().copied().collect(),
                    bias: l.bias.to_vec(),
                })
                .collect(),
        }
    }

    pub fn from_checkpoint(ckpt: ProbeCheckpoint) -> Result<Self, ProbeError> {
        let expected = ckpt.kind.num_layers();
        if ckpt.layers.len() != expected {
            return Err(ProbeError::LayerCount {
                kind: ckpt.kind,
                expected,
                got: ckpt.layers.len(),
            });
        }
        check_dims(&ckpt)?;
        let layers = ckpt
            .layers
            .into_iter()
            .map(|l| {
                Ok(Dense {
                    weight: Array2::from_shape_vec((l.input_dim, l.output_dim), l.weight)?,
                    bias: Array1::from_shape_vec(l.output_dim, l.bias)?,
                })
            })
            .collect::<Result<Vec<_>, ProbeError>>()?;
        Ok(ProbeClassifier {
            kind: ckpt.kind,
            num_classes: ckpt.num_classes,
            num_tasks: ckpt.num_tasks,
            layers,
        })
    }
}

/// Serialized probe parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeCheckpoint {
    pub kind: ProbeKind,
    pub num_classes: usize,
    pub num_tasks: usize,
    pub layers: Vec<LayerCheckpoint>,
}

/// One layer, weights row-major `[input_dim, output_dim]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerCheckpoint {
    pub input_dim: usize,
    pub output_dim: usize,
    pub weight: Vec<f32>,
    pub bias: Vec<f32>,
}

/// Layer widths must chain and end in one logit per (task, class).
fn check_dims(ckpt: &ProbeCheckpoint) -> Result<(), ProbeError> {
    let mismatch = |layer, what, expected, got| {
        if expected == got {
            Ok(())
        } else {
            Err(ProbeError::Dimension {
                layer,
                what,
                expected,
                got,
            })
        }
    };
    if let ProbeKind::TwoLayer { mid_dim } = ckpt.kind {
        mismatch(0, "output width", mid_dim, ckpt.layers[0].output_dim)?;
    }
    for (i, pair) in ckpt.layers.windows(2).enumerate() {
        mismatch(i + 1, "input width", pair[0].output_dim, pair[1].input_dim)?;
    }
    let last = ckpt.layers.len() - 1;
    mismatch(
        last,
        "output width",
        ckpt.num_classes * ckpt.num_tasks,
        ckpt.layers[last].output_dim,
    )
}

fn softmax(logits: impl Iterator<Item = f32>) -> Vec<f32> {
    let logits: Vec<f32> = logits.collect();
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn argmax(values: impl Iterator<Item = f32>) -> usize {
    values
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, v)| if v > bv { (i, v) } else { (bi, bv) })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn probe(kind: ProbeKind) -> ProbeClassifier {
        let mut rng = SmallRng::seed_from_u64(1);
        ProbeClassifier::new(kind, 6, 3, 2, &mut rng)
    }

    #[test]
    fn shapes_follow_kind() {
        let linear = probe(ProbeKind::Linear);
        assert_eq!(linear.layers().len(), 1);
        assert_eq!(linear.layers()[0].weight.dim(), (6, 6));
        assert_eq!(linear.input_dim(), 6);

        let two = probe(ProbeKind::TwoLayer { mid_dim: 4 });
        assert_eq!(two.layers().len(), 2);
        assert_eq!(two.layers()[0].weight.dim(), (6, 4));
        assert_eq!(two.layers()[1].weight.dim(), (4, 6));
        assert_eq!(two.logits(&[0, 3]).len(), 6);
    }

    #[test]
    fn sparse_forward_matches_dense() {
        let p = probe(ProbeKind::Linear);
        let active = [1u32, 4];
        let mut dense = Array1::<f32>::zeros(6);
        for &i in &active {
            dense[i as usize] = 1.0;
        }
        let expected = p.layers()[0].forward(&dense);
        let got = p.logits(&active);
        for (a, b) in expected.iter().zip(got.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn gradient_matches_finite_difference() {
        for kind in [ProbeKind::Linear, ProbeKind::TwoLayer { mid_dim: 5 }] {
            let mut p = probe(kind);
            let active = [0u32, 2, 5];
            let label = [2u8, 0];
            let mut grads = p.zero_grads();
            p.accumulate(&active, &label, &mut grads);

            let eps = 1e-2f32;
            let last = p.layers().len() - 1;
            for (l, r, c) in [(0usize, 2usize, 1usize), (last, 1, 4)] {
                let orig = p.layers()[l].weight[[r, c]];
                p.layers_mut()[l].weight[[r, c]] = orig + eps;
                let up = p.evaluate(&active, &label).0.loss_sum;
                p.layers_mut()[l].weight[[r, c]] = orig - eps;
                let down = p.evaluate(&active, &label).0.loss_sum;
                p.layers_mut()[l].weight[[r, c]] = orig;

                let numeric = ((up - down) / (2.0 * eps as f64)) as f32;
                let analytic = grads[l].weight[[r, c]];
                assert!(
                    (numeric - analytic).abs() < 2e-2,
                    "{:?} layer {} ({}, {}): numeric {} analytic {}",
                    kind,
                    l,
                    r,
                    c,
                    numeric,
                    analytic
                );
            }
        }
    }

    #[test]
    fn inactive_feature_rows_get_no_gradient() {
        let p = probe(ProbeKind::Linear);
        let mut grads = p.zero_grads();
        p.accumulate(&[0, 2], &[1, 1], &mut grads);
        assert!(grads[0].weight.row(1).iter().all(|&g| g == 0.0));
        assert!(grads[0].weight.row(0).iter().any(|&g| g != 0.0));
    }

    #[test]
    fn out_of_range_labels_ignored() {
        let p = probe(ProbeKind::Linear);
        let (stats, hits) = p.evaluate(&[0], &[7, 1]);
        assert_eq!(stats.total, 1);
        assert_eq!(hits.len(), 2);
        assert!(!hits[0]);
    }

    #[test]
    fn checkpoint_restores_parameters() {
        let p = probe(ProbeKind::TwoLayer { mid_dim: 3 });
        let json = serde_json::to_string(&p.to_checkpoint()).unwrap();
        let ckpt: ProbeCheckpoint = serde_json::from_str(&json).unwrap();
        let restored = ProbeClassifier::from_checkpoint(ckpt).unwrap();
        assert_eq!(restored, p);
    }

    #[test]
    fn checkpoint_with_wrong_layer_count_rejected() {
        let mut ckpt = probe(ProbeKind::Linear).to_checkpoint();
        ckpt.kind = ProbeKind::TwoLayer { mid_dim: 3 };
        assert!(matches!(
            ProbeClassifier::from_checkpoint(ckpt),
            Err(ProbeError::LayerCount { expected: 2, got: 1, .. })
        ));
    }

    #[test]
    fn checkpoint_with_wrong_task_count_rejected() {
        let mut ckpt = probe(ProbeKind::Linear).to_checkpoint();
        ckpt.num_tasks = 5;
        assert!(matches!(
            ProbeClassifier::from_checkpoint(ckpt),
            Err(ProbeError::Dimension { layer: 0, expected: 15, got: 6, .. })
        ));
    }

    #[test]
    fn checkpoint_with_unchained_layers_rejected() {
        let mut ckpt = probe(ProbeKind::TwoLayer { mid_dim: 3 }).to_checkpoint();
        // Second layer claims 4 inputs; weights still hold 4 * 6 values.
        ckpt.layers[1].input_dim = 4;
        ckpt.layers[1].weight.extend([0.0; 6]);
        assert!(matches!(
            ProbeClassifier::from_checkpoint(ckpt),
            Err(ProbeError::Dimension { layer: 1, expected: 3, got: 4, .. })
        ));
    }

    #[test]
    fn checkpoint_with_wrong_hidden_width_rejected() {
        let mut ckpt = probe(ProbeKind::TwoLayer { mid_dim: 3 }).to_checkpoint();
        ckpt.kind = ProbeKind::TwoLayer { mid_dim: 7 };
        assert!(matches!(
            ProbeClassifier::from_checkpoint(ckpt),
            Err(ProbeError::Dimension { layer: 0, expected: 7, got: 3, .. })
        ));
    }

    #[test]
    fn batch_stats_means() {
        let mut a = BatchStats { loss_sum: 2.0, correct: 1, total: 2 };
        a.merge(BatchStats { loss_sum: 1.0, correct: 2, total: 2 });
        assert_eq!(a.total, 4);
        assert!((a.mean_loss() - 0.75).abs() < 1e-6);
        assert!((a.accuracy() - 0.75).abs() < 1e-6);
        assert_eq!(BatchStats::default().accuracy(), 0.0);
    }
}
