//! One probing experiment, from stored games to a line in the results log.
//!
//! `run` verifies the sequence-model checkpoint, loads games, replays them for
//! ground truth, builds one-hot prefix features, splits, trains a probe, saves
//! its traces and parameters, and finally appends
//! `raw_seq_<layers>-layer,<contiguous>,<best test accuracy>,<seed>` to the
//! results log. Any earlier failure leaves the log untouched.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::board::{replay, IllegalMove, Label, Property};
use crate::data::{LoaderError, SequenceLoader};
use crate::features::{FeatureError, OneHotEncoder, PrefixMatrix};
use crate::probe::{
    DatasetError, ProbeClassifier, ProbeKind, ProbingDataset, Trainer, TrainerConfig,
    TrainerError, TRAIN_RATIO,
};

/// Seeds drawn from entropy fall in `0..SEED_RANGE`.
pub const SEED_RANGE: u64 = 12_389_823;

#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    #[error("sequence model checkpoint {} is unusable: {reason}", .path.display())]
    Checkpoint { path: PathBuf, reason: String },

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error("game {game} cannot be replayed: {source}")]
    Replay {
        game: usize,
        #[source]
        source: IllegalMove,
    },

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Trainer(#[from] TrainerError),

    #[error("cannot append to results log {}: {source}", .path.display())]
    Results {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How examples are divided between training and test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitStrategy {
    /// Random permutation of all examples.
    Random,
    /// Loader order; the last fifth is the test set.
    Contiguous,
}

/// Sequence model whose setting the probe results are filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelSource {
    /// Trained on synthetic games.
    Synthetic,
    /// Trained on championship games.
    Championship,
    /// Randomly initialised; no checkpoint.
    Random,
}

impl ModelSource {
    /// Checkpoint file under `ckpt_root`, if this source has one. Both
    /// trained sources live under the same root.
    pub fn checkpoint_path(self, ckpt_root: &Path) -> Option<PathBuf> {
        match self {
            ModelSource::Synthetic => Some(ckpt_root.join("gpt_synthetic.ckpt")),
            ModelSource::Championship => Some(ckpt_root.join("gpt_championship.ckpt")),
            ModelSource::Random => None,
        }
    }
}

/// Settings for one experiment run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentConfig {
    /// Sequence-model layer the run is filed under.
    pub layer: i32,
    pub epochs: usize,
    /// Hidden width of the two-layer probe.
    pub mid_dim: usize,
    pub split: SplitStrategy,
    pub two_layer: bool,
    pub model: ModelSource,
    pub property: Property,
    pub data_root: PathBuf,
    pub ckpt_root: PathBuf,
    pub results_path: PathBuf,
    /// Overrides the checkpoint location derived from `model`.
    pub model_checkpoint: Option<PathBuf>,
    pub seed: Option<u64>,
    /// Draw a progress bar during replay.
    pub progress: bool,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        ExperimentConfig {
            layer: 6,
            epochs: 16,
            mid_dim: 128,
            split: SplitStrategy::Random,
            two_layer: false,
            model: ModelSource::Synthetic,
            property: Property::State,
            data_root: PathBuf::from("data/othello_championship"),
            ckpt_root: PathBuf::from("./ckpts"),
            results_path: PathBuf::from("results.txt"),
            model_checkpoint: None,
            seed: None,
            progress: false,
        }
    }
}

impl ExperimentConfig {
    pub fn probe_kind(&self) -> ProbeKind {
        if self.two_layer {
            ProbeKind::TwoLayer {
                mid_dim: self.mid_dim,
            }
        } else {
            ProbeKind::Linear
        }
    }

    /// `battery_othello/<exp>[_tl<mid>][_random][_championship]`
    pub fn folder_name(&self) -> String {
        let mut name = format!("battery_othello/{}", self.property);
        if self.two_layer {
            name.push_str(&format!("_tl{}", self.mid_dim));
        }
        match self.model {
            ModelSource::Random => name.push_str("_random"),
            ModelSource::Championship => name.push_str("_championship"),
            ModelSource::Synthetic => {}
        }
        name
    }

    /// Directory receiving this run's traces and probe checkpoint.
    pub fn artifact_dir(&self) -> PathBuf {
        self.ckpt_root
            .join(self.folder_name())
            .join(format!("layer{}", self.layer))
    }

    pub fn checkpoint_path(&self) -> Option<PathBuf> {
        self.model_checkpoint
            .clone()
            .or_else(|| self.model.checkpoint_path(&self.ckpt_root))
    }

    /// Trainer settings for a training set of `train_len` examples: warmup
    /// over five passes, cosine decay to the last epoch.
    pub fn trainer_config(&self, train_len: usize) -> TrainerConfig {
        TrainerConfig {
            max_epochs: self.epochs,
            lr_decay: true,
            warmup_examples: train_len * 5,
            final_examples: train_len * self.epochs,
            ckpt_path: Some(self.artifact_dir()),
            ..TrainerConfig::default()
        }
    }
}

/// Fails unless the configured sequence-model checkpoint is a readable file.
/// Sources without a checkpoint always pass.
pub fn verify_checkpoint(config: &ExperimentConfig) -> Result<Option<PathBuf>, ExperimentError> {
    let Some(path) = config.checkpoint_path() else {
        return Ok(None);
    };
    let unusable = |reason: String| ExperimentError::Checkpoint {
        path: path.clone(),
        reason,
    };
    let meta = fs::metadata(&path).map_err(|e| unusable(e.to_string()))?;
    if !meta.is_file() {
        return Err(unusable("not a regular file".to_string()));
    }
    fs::File::open(&path).map_err(|e| unusable(e.to_string()))?;
    info!(path = %path.display(), bytes = meta.len(), "sequence model checkpoint found");
    Ok(Some(path))
}

/// Replays every loaded game and joins its labels with one-hot features of
/// its prefixes. Example `k` of a game is the prefix of length `k + 1`.
pub fn build_dataset(
    loader: &SequenceLoader,
    property: Property,
    progress: bool,
) -> Result<ProbingDataset, ExperimentError> {
    let bar = if progress {
        let bar = ProgressBar::new(loader.len() as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} games ({eta})",
        ) {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar
    } else {
        ProgressBar::hidden()
    };

    let total = loader.total_prefixes();
    let mut labels: Vec<Label> = Vec::with_capacity(total);
    let mut ages: Vec<Label> = Vec::with_capacity(total);
    let mut rows = PrefixMatrix::new(loader.block_size());

    for game in 0..loader.len() {
        let Some(seq) = loader.sequence(game) else {
            continue;
        };
        let mut per_property = replay(&seq.moves, &[property, Property::Age])
            .map_err(|source| ExperimentError::Replay { game, source })?;
        ages.extend(per_property.pop().unwrap_or_default());
        labels.extend(per_property.pop().unwrap_or_default());
        rows.push_sequence(seq.tokens)?;
        bar.inc(1);
    }
    bar.finish_and_clear();

    let (encoder, features) = OneHotEncoder::fit_transform(&rows)?;
    info!(
        rows = rows.len(),
        columns = encoder.n_columns(),
        features = encoder.n_features(),
        "one-hot features built"
    );
    Ok(ProbingDataset::new(features, labels, ages)?)
}

/// One line of the results log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultRow {
    pub probe_layers: usize,
    pub contiguous: bool,
    pub accuracy: f32,
    pub seed: u64,
}

impl fmt::Display for ResultRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "raw_seq_{}-layer,{},{},{}",
            self.probe_layers,
            if self.contiguous { "True" } else { "False" },
            self.accuracy,
            self.seed
        )
    }
}

/// Appends `row` as one line, creating the log if needed.
pub fn append_result(path: &Path, row: &ResultRow) -> Result<(), ExperimentError> {
    let results_err = |source| ExperimentError::Results {
        path: path.to_path_buf(),
        source,
    };
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(results_err)?;
    writeln!(file, "{}", row).map_err(results_err)
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub seed: u64,
    pub examples: usize,
    pub train_len: usize,
    pub test_len: usize,
    pub n_features: usize,
    pub artifact_dir: PathBuf,
    pub result: ResultRow,
}

pub fn run(config: &ExperimentConfig) -> Result<RunSummary, ExperimentError> {
    let seed = config
        .seed
        .unwrap_or_else(|| SmallRng::from_entropy().gen_range(0..SEED_RANGE));
    let mut rng = SmallRng::seed_from_u64(seed);
    info!(
        seed,
        property = %config.property,
        folder = %config.folder_name(),
        layer = config.layer,
        "starting probe run"
    );

    verify_checkpoint(config)?;

    let loader = SequenceLoader::open(&config.data_root)?;
    let dataset = build_dataset(&loader, config.property, config.progress)?;

    let (train, test) = match config.split {
        SplitStrategy::Random => dataset.split_random(TRAIN_RATIO, &mut rng)?,
        SplitStrategy::Contiguous => dataset.split_contiguous(TRAIN_RATIO)?,
    };
    info!(train = train.len(), test = test.len(), split = ?config.split, "dataset split");

    let kind = config.probe_kind();
    let model = ProbeClassifier::new(
        kind,
        dataset.n_features(),
        config.property.num_classes(),
        config.property.num_tasks(),
        &mut rng,
    );
    let (train_len, test_len) = (train.len(), test.len());
    let mut trainer = Trainer::new(model, train, test, config.trainer_config(train_len));
    trainer.train(&mut rng);
    trainer.save_traces()?;
    trainer.save_checkpoint()?;

    let result = ResultRow {
        probe_layers: kind.num_layers(),
        contiguous: config.split == SplitStrategy::Contiguous,
        accuracy: trainer.best_test_accuracy().unwrap_or(0.0),
        seed,
    };
    append_result(&config.results_path, &result)?;
    info!(result = %result, "probe run recorded");

    Ok(RunSummary {
        seed,
        examples: dataset.len(),
        train_len,
        test_len,
        n_features: dataset.n_features(),
        artifact_dir: config.artifact_dir(),
        result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PAD_MOVE;

    #[test]
    fn folder_name_suffixes() {
        let mut config = ExperimentConfig::default();
        assert_eq!(config.folder_name(), "battery_othello/state");

        config.two_layer = true;
        config.model = ModelSource::Championship;
        assert_eq!(config.folder_name(), "battery_othello/state_tl128_championship");

        config.two_layer = false;
        config.model = ModelSource::Random;
        config.property = Property::Age;
        config.layer = 3;
        assert_eq!(config.folder_name(), "battery_othello/age_random");
        assert_eq!(
            config.artifact_dir(),
            PathBuf::from("./ckpts/battery_othello/age_random/layer3")
        );
    }

    #[test]
    fn checkpoint_locations() {
        let root = Path::new("ckpts");
        assert_eq!(
            ModelSource::Synthetic.checkpoint_path(root),
            Some(root.join("gpt_synthetic.ckpt"))
        );
        assert_eq!(
            ModelSource::Championship.checkpoint_path(root),
            Some(root.join("gpt_championship.ckpt"))
        );
        assert_eq!(ModelSource::Random.checkpoint_path(root), None);
    }

    #[test]
    fn explicit_checkpoint_overrides_root() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = dir.path().join("gpt_championship.ckpt");
        fs::write(&ckpt, b"weights").unwrap();
        let config = ExperimentConfig {
            model: ModelSource::Championship,
            ckpt_root: dir.path().join("elsewhere"),
            model_checkpoint: Some(ckpt.clone()),
            ..ExperimentConfig::default()
        };
        assert_eq!(verify_checkpoint(&config).unwrap(), Some(ckpt));
    }

    #[test]
    fn missing_checkpoint_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExperimentConfig {
            ckpt_root: dir.path().to_path_buf(),
            ..ExperimentConfig::default()
        };
        assert!(matches!(
            verify_checkpoint(&config),
            Err(ExperimentError::Checkpoint { .. })
        ));

        fs::write(dir.path().join("gpt_synthetic.ckpt"), b"weights").unwrap();
        assert!(verify_checkpoint(&config).unwrap().is_some());

        let random = ExperimentConfig {
            model: ModelSource::Random,
            ..config
        };
        assert_eq!(verify_checkpoint(&random).unwrap(), None);
    }

    #[test]
    fn result_row_format() {
        let row = ResultRow {
            probe_layers: 2,
            contiguous: true,
            accuracy: 0.75,
            seed: 42,
        };
        assert_eq!(row.to_string(), "raw_seq_2-layer,True,0.75,42");
        let row = ResultRow {
            contiguous: false,
            probe_layers: 1,
            ..row
        };
        assert_eq!(row.to_string(), "raw_seq_1-layer,False,0.75,42");
    }

    #[test]
    fn append_result_adds_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.txt");
        let row = ResultRow {
            probe_layers: 1,
            contiguous: false,
            accuracy: 0.5,
            seed: 7,
        };
        append_result(&path, &row).unwrap();
        append_result(&path, &row).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().all(|l| l == "raw_seq_1-layer,False,0.5,7"));
    }

    #[test]
    fn padded_game_yields_one_example_per_move() {
        let loader = SequenceLoader::from_games(vec![
            vec![19, 18, PAD_MOVE, PAD_MOVE],
            vec![19, 18, 17, 9, 37],
        ])
        .unwrap();
        let dataset = build_dataset(&loader, Property::State, false).unwrap();
        // 2 prefixes of the padded game, 4 of the other (block size 4).
        assert_eq!(dataset.len(), 6);

        let first = dataset.get(0).unwrap();
        assert_eq!(first.label.len(), 64);
        assert_eq!(first.age.len(), 64);
        assert_eq!(first.features.len(), loader.block_size());
        assert_eq!(first.age[19], 0);

        let second = dataset.get(1).unwrap();
        assert_eq!(second.age[19], 1);
        assert_eq!(second.age[18], 0);
    }

    #[test]
    fn illegal_game_reports_its_index() {
        let loader =
            SequenceLoader::from_games(vec![vec![19, 18, 26], vec![0, 1, 2]]).unwrap();
        match build_dataset(&loader, Property::State, false) {
            Err(ExperimentError::Replay { game, .. }) => assert_eq!(game, 1),
            other => panic!("expected replay error, got {:?}", other.map(|d| d.len())),
        }
    }

    #[test]
    fn trainer_schedule_scales_with_training_set() {
        let config = ExperimentConfig {
            epochs: 4,
            ..ExperimentConfig::default()
        };
        let t = config.trainer_config(100);
        assert_eq!(t.max_epochs, 4);
        assert_eq!(t.batch_size, 1024);
        assert_eq!(t.warmup_examples, 500);
        assert_eq!(t.final_examples, 400);
        assert_eq!(t.ckpt_path, Some(config.artifact_dir()));
    }
}
