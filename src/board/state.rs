//! Othello board state and move application.
//!
//! Holds the disc on every square, the per-square age since the square was
//! last placed or flipped, the side to move, and the move history of one
//! replayed game.

use std::fmt;

use super::square::{Square, CELL_COUNT, DIRECTIONS};

/// Errors raised when a move cannot be applied to the current board.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IllegalMove {
    #[error("square {0} is already occupied")]
    Occupied(Square),

    #[error("placing at {0} flips nothing for the side that must move")]
    NoFlips(Square),

    #[error("move {0} played after neither side could move")]
    GameOver(Square),
}

/// Disc colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disc {
    Black,
    White,
}

impl Disc {
    /// The other colour.
    pub const fn opponent(self) -> Disc {
        match self {
            Disc::Black => Disc::White,
            Disc::White => Disc::Black,
        }
    }

    const fn symbol(self) -> char {
        match self {
            Disc::Black => 'X',
            Disc::White => 'O',
        }
    }
}

/// Complete board state at a point in a game.
///
/// Fixed-size arrays indexed by `Square::index()`; the only heap data is the
/// move history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OthelloBoard {
    cells: [Option<Disc>; CELL_COUNT],
    /// Moves since the square was last placed or flipped; None if never touched.
    ages: [Option<u8>; CELL_COUNT],
    next: Disc,
    history: Vec<Square>,
}

impl Default for OthelloBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl OthelloBoard {
    /// Creates the standard opening position with Black to move.
    pub fn new() -> Self {
        let mut cells = [None; CELL_COUNT];
        cells[27] = Some(Disc::White);
        cells[28] = Some(Disc::Black);
        cells[35] = Some(Disc::Black);
        cells[36] = Some(Disc::White);
        OthelloBoard {
            cells,
            ages: [None; CELL_COUNT],
            next: Disc::Black,
            history: Vec::new(),
        }
    }

    /// Disc on `square`, if any.
    pub fn cell(&self, square: Square) -> Option<Disc> {
        self.cells[square.index()]
    }

    /// Moves since `square` was last placed or flipped; None if never.
    pub fn age(&self, square: Square) -> Option<u8> {
        self.ages[square.index()]
    }

    /// The side nominally to move. A side with no legal move still appears
    /// here until the next placement reveals the pass.
    pub fn next_to_move(&self) -> Disc {
        self.next
    }

    /// Squares played so far, in order.
    pub fn history(&self) -> &[Square] {
        &self.history
    }

    /// Returns (black, white) disc counts.
    pub fn disc_counts(&self) -> (usize, usize) {
        self.cells.iter().fold((0, 0), |(b, w), c| match c {
            Some(Disc::Black) => (b + 1, w),
            Some(Disc::White) => (b, w + 1),
            None => (b, w),
        })
    }

    /// Collects the opponent discs that `disc` would flip by placing at `square`.
    /// Empty when the square is occupied or brackets nothing.
    pub fn flips(&self, square: Square, disc: Disc) -> Vec<Square> {
        let mut flipped = Vec::new();
        if self.cells[square.index()].is_some() {
            return flipped;
        }
        for &dir in DIRECTIONS.iter() {
            let mut run = Vec::new();
            let mut cur = square.offset(dir);
            while let Some(sq) = cur {
                match self.cells[sq.index()] {
                    Some(d) if d == disc => {
                        flipped.extend_from_slice(&run);
                        break;
                    }
                    Some(_) => run.push(sq),
                    None => break,
                }
                cur = sq.offset(dir);
            }
        }
        flipped
    }

    fn is_legal_for(&self, square: Square, disc: Disc) -> bool {
        !self.flips(square, disc).is_empty()
    }

    fn legal_moves_for(&self, disc: Disc) -> Vec<Square> {
        Square::all().filter(|&sq| self.is_legal_for(sq, disc)).collect()
    }

    /// Legal squares for the side that actually moves next. When the nominal
    /// side to move has none, it passes and the opponent's moves are returned.
    pub fn valid_moves(&self) -> Vec<Square> {
        let moves = self.legal_moves_for(self.next);
        if moves.is_empty() {
            self.legal_moves_for(self.next.opponent())
        } else {
            moves
        }
    }

    /// Applies a placement for the side to move. A side with no legal move
    /// anywhere passes, and the placement is made for the opponent.
    ///
    /// On error the board is left unchanged.
    pub fn play(&mut self, square: Square) -> Result<(), IllegalMove> {
        if self.cells[square.index()].is_some() {
            return Err(IllegalMove::Occupied(square));
        }

        let mut color = self.next;
        let mut flipped = self.flips(square, color);
        // The opponent may only take over when the side to move has no move at all.
        if flipped.is_empty() && self.legal_moves_for(color).is_empty() {
            color = color.opponent();
            flipped = self.flips(square, color);
        }
        if flipped.is_empty() {
            return Err(if self.valid_moves().is_empty() {
                IllegalMove::GameOver(square)
            } else {
                IllegalMove::NoFlips(square)
            });
        }

        for age in self.ages.iter_mut() {
            *age = age.map(|a| a.saturating_add(1));
        }
        for sq in flipped.into_iter().chain(std::iter::once(square)) {
            self.cells[sq.index()] = Some(color);
            self.ages[sq.index()] = Some(0);
        }
        self.next = color.opponent();
        self.history.push(square);
        Ok(())
    }

    /// Whether neither side has a legal placement.
    pub fn is_over(&self) -> bool {
        self.valid_moves().is_empty()
    }
}

impl fmt::Display for OthelloBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  1 2 3 4 5 6 7 8")?;
        for (r, row) in self.cells.chunks(8).enumerate() {
            write!(f, "{}", (b'a' + r as u8) as char)?;
            for cell in row {
                write!(f, " {}", cell.map_or('.', Disc::symbol))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
