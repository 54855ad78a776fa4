//! Board squares and move notation.
//!
//! Squares are numbered row-major from 0 (`a1`) to 63 (`h8`). The row is
//! written as a letter `a`-`h` and the column as a digit `1`-`8`, so square
//! 19 is `c4`.

use std::fmt;

/// Board edge length.
pub const BOARD_SIZE: usize = 8;

/// Number of squares on the board.
pub const CELL_COUNT: usize = BOARD_SIZE * BOARD_SIZE;

/// The eight neighbour directions as (row, column) steps.
pub const DIRECTIONS: [(i8, i8); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// A single board square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Square(u8);

impl Square {
    /// Creates a square from its row-major index. Returns None when out of range.
    pub fn new(index: usize) -> Option<Square> {
        if index < CELL_COUNT {
            Some(Square(index as u8))
        } else {
            None
        }
    }

    /// Converts a stored move value into a square. Negative or oversized values
    /// (including the padding sentinel) are rejected.
    pub fn from_move_value(value: i32) -> Option<Square> {
        usize::try_from(value).ok().and_then(Square::new)
    }

    /// Creates a square from a (row, column) pair, both in 0..8.
    pub fn from_row_col(row: usize, col: usize) -> Option<Square> {
        if row < BOARD_SIZE && col < BOARD_SIZE {
            Some(Square((row * BOARD_SIZE + col) as u8))
        } else {
            None
        }
    }

    /// Parses notation like `c4`.
    pub fn from_notation(s: &str) -> Option<Square> {
        let mut chars = s.chars();
        let row = chars.next()?;
        let col = chars.next()?;
        if chars.next().is_some() || !('a'..='h').contains(&row) || !('1'..='8').contains(&col) {
            return None;
        }
        Square::from_row_col(row as usize - 'a' as usize, col as usize - '1' as usize)
    }

    /// Row-major index in 0..64.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Row, 0 for `a`.
    pub const fn row(self) -> usize {
        self.0 as usize / BOARD_SIZE
    }

    /// Column, 0 for `1`.
    pub const fn col(self) -> usize {
        self.0 as usize % BOARD_SIZE
    }

    /// Steps once in a direction, returning None off the board.
    pub fn offset(self, (dr, dc): (i8, i8)) -> Option<Square> {
        let r = self.row() as i8 + dr;
        let c = self.col() as i8 + dc;
        if (0..BOARD_SIZE as i8).contains(&r) && (0..BOARD_SIZE as i8).contains(&c) {
            Square::from_row_col(r as usize, c as usize)
        } else {
            None
        }
    }

    /// Iterates every square in index order.
    pub fn all() -> impl Iterator<Item = Square> {
        (0..CELL_COUNT as u8).map(Square)
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'a' + self.row() as u8) as char, self.col() + 1)
    }
}
