//! Synthetic game generation CLI.
//!
//! Plays Othello games with uniformly random legal moves and writes them as
//! JSONL, one array of square indices per game.
//!
//! Usage:
//!   cargo run --release --bin synthetic -- --games 10000 --output data/synthetic/games.jsonl

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use othello_probe::data::synthetic::{self, SyntheticConfig};
use othello_probe::logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "synthetic", about = "Generate random legal Othello games as JSONL")]
struct Args {
    /// Number of games to play.
    #[arg(long, default_value_t = 1000)]
    games: usize,

    /// Worker threads; 1 plays sequentially.
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Base seed; drawn at random if absent.
    #[arg(long)]
    seed: Option<u64>,

    /// Output file (default: stdout).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Suppress the summary.
    #[arg(long)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(if args.quiet { "warn" } else { "info" });

    let config = SyntheticConfig {
        num_games: args.games,
        threads: args.threads.max(1),
        seed: args.seed,
    };
    let games = synthetic::generate(&config).context("game generation failed")?;

    match &args.output {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)
                    .with_context(|| format!("cannot create {}", dir.display()))?;
            }
            let file = File::create(path)
                .with_context(|| format!("cannot create {}", path.display()))?;
            synthetic::write_jsonl(&games, &mut BufWriter::new(file))
                .with_context(|| format!("cannot write {}", path.display()))?;
            info!(games = games.len(), path = %path.display(), "wrote games");
        }
        None => {
            let stdout = io::stdout();
            synthetic::write_jsonl(&games, &mut BufWriter::new(stdout.lock()))
                .context("cannot write to stdout")?;
        }
    }

    if !args.quiet {
        let s = synthetic::summarize(&games);
        info!(
            games = s.games,
            min_moves = s.min_moves,
            max_moves = s.max_moves,
            avg_moves = s.avg_moves,
            "summary"
        );
    }
    Ok(())
}
