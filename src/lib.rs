//! Othello probing library.
//!
//! Replays stored games for ground-truth board properties, encodes every move
//! prefix as one-hot features, and trains probe classifiers that measure how
//! much of the board is decodable from the raw move sequence alone.

pub mod board;
pub mod data;
pub mod experiment;
pub mod features;
pub mod logging;
pub mod probe;
