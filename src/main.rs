//! othello-probe: trains a probe on one-hot raw move-sequence features.
//!
//! Usage:
//!   cargo run --release -- --layer 6 [--twolayer] [--splitconsec] [--exp state]

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use othello_probe::board::Property;
use othello_probe::experiment::{self, ExperimentConfig, ModelSource, SplitStrategy};
use othello_probe::logging::init_logging;

#[derive(Parser, Debug)]
#[command(
    name = "othello-probe",
    about = "Probe board properties from one-hot encoded raw move sequences"
)]
struct Args {
    /// Sequence-model layer the results are filed under.
    #[arg(long, allow_hyphen_values = true)]
    layer: i32,

    /// Training epochs.
    #[arg(long, default_value_t = 16)]
    epo: usize,

    /// Hidden width of the two-layer probe.
    #[arg(long = "mid_dim", default_value_t = 128)]
    mid_dim: usize,

    /// Split train/test in dataset order instead of at random.
    #[arg(long)]
    splitconsec: bool,

    /// Use a two-layer probe.
    #[arg(long)]
    twolayer: bool,

    /// File under the randomly initialised sequence model.
    #[arg(long, conflicts_with = "championship")]
    random: bool,

    /// File under the championship-trained sequence model.
    #[arg(long)]
    championship: bool,

    /// Property to probe: state, age, next_hand_color or valid_moves.
    #[arg(long, default_value = "state")]
    exp: Property,

    /// Game dataset: a .jsonl file or a directory of them.
    #[arg(long, default_value = "data/othello_championship")]
    data: PathBuf,

    /// Root of sequence-model checkpoints and probe artifacts.
    #[arg(long = "ckpt-dir", default_value = "./ckpts")]
    ckpt_dir: PathBuf,

    /// Explicit sequence-model checkpoint, overriding the one under --ckpt-dir.
    #[arg(long = "model-ckpt")]
    model_ckpt: Option<PathBuf>,

    /// Results log to append to.
    #[arg(long, default_value = "results.txt")]
    results: PathBuf,

    /// Seed for splitting, initialisation and shuffling; drawn at random if absent.
    #[arg(long)]
    seed: Option<u64>,

    /// Only log warnings and hide the progress bar.
    #[arg(long)]
    quiet: bool,
}

impl Args {
    fn into_config(self) -> ExperimentConfig {
        let model = if self.random {
            ModelSource::Random
        } else if self.championship {
            ModelSource::Championship
        } else {
            ModelSource::Synthetic
        };
        ExperimentConfig {
            layer: self.layer,
            epochs: self.epo,
            mid_dim: self.mid_dim,
            split: if self.splitconsec {
                SplitStrategy::Contiguous
            } else {
                SplitStrategy::Random
            },
            two_layer: self.twolayer,
            model,
            property: self.exp,
            data_root: self.data,
            ckpt_root: self.ckpt_dir,
            results_path: self.results,
            model_checkpoint: self.model_ckpt,
            seed: self.seed,
            progress: !self.quiet,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(if args.quiet { "warn" } else { "info" });

    let config = args.into_config();
    let summary = experiment::run(&config)
        .with_context(|| format!("probe run for {} failed", config.folder_name()))?;

    info!(
        examples = summary.examples,
        train = summary.train_len,
        test = summary.test_len,
        features = summary.n_features,
        artifacts = %summary.artifact_dir.display(),
        "done"
    );
    println!("{}", summary.result);
    Ok(())
}
