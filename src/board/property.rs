//! Ground-truth properties extracted by replaying a game.
//!
//! Each `Property` maps a board to a label: one class index per task. Most
//! properties have one task per square; `NextHandColor` has a single task.

use std::fmt;
use std::str::FromStr;

use super::square::{Square, CELL_COUNT};
use super::state::{Disc, IllegalMove, OthelloBoard};

/// One class index per task.
pub type Label = Vec<u8>;

/// Number of age classes (0..=59).
pub const AGE_CLASSES: usize = 60;

/// Age class reported for a square that has never been placed or flipped.
pub const AGE_NEVER_PLAYED: u8 = (AGE_CLASSES - 1) as u8;

/// State classes, in label order.
pub const STATE_WHITE: u8 = 0;
pub const STATE_EMPTY: u8 = 1;
pub const STATE_BLACK: u8 = 2;

/// A ground-truth property that can be probed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    /// Occupancy of each square.
    State,
    /// Moves since each square was last placed or flipped.
    Age,
    /// Colour nominally to move after the prefix.
    NextHandColor,
    /// Whether each square is a legal placement for the side to move.
    ValidMoves,
}

/// Error for an unrecognised property name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown property '{0}' (expected state, age, next_hand_color or valid_moves)")]
pub struct UnknownProperty(pub String);

impl Property {
    pub const ALL: [Property; 4] = [
        Property::State,
        Property::Age,
        Property::NextHandColor,
        Property::ValidMoves,
    ];

    /// The name used on the command line and in experiment folder names.
    pub const fn name(self) -> &'static str {
        match self {
            Property::State => "state",
            Property::Age => "age",
            Property::NextHandColor => "next_hand_color",
            Property::ValidMoves => "valid_moves",
        }
    }

    /// Number of classes per task.
    pub const fn num_classes(self) -> usize {
        match self {
            Property::State => 3,
            Property::Age => AGE_CLASSES,
            Property::NextHandColor | Property::ValidMoves => 2,
        }
    }

    /// Number of tasks (label entries) per example.
    pub const fn num_tasks(self) -> usize {
        match self {
            Property::NextHandColor => 1,
            Property::State | Property::Age | Property::ValidMoves => CELL_COUNT,
        }
    }

    /// Reads this property off the current board.
    pub fn extract(self, board: &OthelloBoard) -> Label {
        match self {
            Property::State => Square::all()
                .map(|sq| match board.cell(sq) {
                    Some(Disc::White) => STATE_WHITE,
                    None => STATE_EMPTY,
                    Some(Disc::Black) => STATE_BLACK,
                })
                .collect(),
            Property::Age => Square::all()
                .map(|sq| match board.age(sq) {
                    Some(a) => a.min(AGE_NEVER_PLAYED - 1),
                    None => AGE_NEVER_PLAYED,
                })
                .collect(),
            Property::NextHandColor => vec![match board.next_to_move() {
                Disc::White => 0,
                Disc::Black => 1,
            }],
            Property::ValidMoves => {
                let mut label = vec![0u8; CELL_COUNT];
                for sq in board.valid_moves() {
                    label[sq.index()] = 1;
                }
                label
            }
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Property {
    type Err = UnknownProperty;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Property::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| UnknownProperty(s.to_string()))
    }
}

/// Replays `moves` on a fresh board and records every requested property
/// after each prefix.
///
/// `result[p][k]` is the label of `properties[p]` after the first `k + 1`
/// moves, so each inner list has exactly `moves.len()` entries. The first
/// illegal move aborts the replay and nothing partial is returned.
pub fn replay(moves: &[Square], properties: &[Property]) -> Result<Vec<Vec<Label>>, IllegalMove> {
    let mut board = OthelloBoard::new();
    let mut traces: Vec<Vec<Label>> = properties
        .iter()
        .map(|_| Vec::with_capacity(moves.len()))
        .collect();

    for &mv in moves {
        board.play(mv)?;
        for (trace, &property) in traces.iter_mut().zip(properties) {
            trace.push(property.extract(&board));
        }
    }
    Ok(traces)
}

/// Single-property form of [`replay`].
pub fn ground_truth(moves: &[Square], property: Property) -> Result<Vec<Label>, IllegalMove> {
    Ok(replay(moves, &[property])?.into_iter().next().unwrap_or_default())
}
