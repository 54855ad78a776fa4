//! Othello board simulation and ground-truth extraction.
//!
//! Contains squares, the board state with move application, and the
//! properties that are read off the board after every move of a replay.

pub mod property;
pub mod square;
pub mod state;

pub use property::{
    ground_truth, replay, Label, Property, UnknownProperty, AGE_CLASSES, AGE_NEVER_PLAYED,
    STATE_BLACK, STATE_EMPTY, STATE_WHITE,
};
pub use square::{Square, BOARD_SIZE, CELL_COUNT, DIRECTIONS};
pub use state::{Disc, IllegalMove, OthelloBoard};
