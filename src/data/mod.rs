//! Move-sequence datasets.
//!
//! Loads stored games in a fixed order, maps move values to tokens, and
//! generates synthetic games from random legal play.

pub mod loader;
pub mod synthetic;
pub mod vocab;

pub use loader::{LoadedSequence, LoaderError, SequenceLoader};
pub use synthetic::{generate, play_random_game, write_jsonl, SyntheticConfig, SyntheticError};
pub use vocab::{Vocabulary, PAD_MOVE};
