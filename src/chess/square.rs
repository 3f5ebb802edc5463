use std::fmt;

use serde::{Deserialize, Serialize};

/// A board square, indexed 0..=63 as rank * 8 + file.
/// Rank 0 is white's back rank, file 0 is the a-file, so index 0 is "a1".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Square(u8);

impl Square {
    pub fn new(rank: u8, file: u8) -> Option<Square> {
        if rank < 8 && file < 8 {
            Some(Square(rank * 8 + file))
        } else {
            None
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn rank(self) -> u8 {
        self.0 / 8
    }

    pub fn file(self) -> u8 {
        self.0 % 8
    }

    /// The square `rank_delta` ranks and `file_delta` files away, if it is
    /// still on the board.
    pub fn offset(self, rank_delta: i8, file_delta: i8) -> Option<Square> {
        let rank = self.rank() as i8 + rank_delta;
        let file = self.file() as i8 + file_delta;
        if (0..8).contains(&rank) && (0..8).contains(&file) {
            Square::new(rank as u8, file as u8)
        } else {
            None
        }
    }

    /// Parse an algebraic label like "e4". Case-insensitive on the file
    /// letter.
    pub fn from_algebraic(label: &str) -> Option<Square> {
        let mut chars = label.chars();
        let file_char = chars.next()?.to_ascii_lowercase();
        let rank_char = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        if !('a'..='h').contains(&file_char) || !('1'..='8').contains(&rank_char) {
            return None;
        }
        let file = file_char as u8 - b'a';
        let rank = rank_char as u8 - b'1';
        Square::new(rank, file)
    }

    pub fn to_algebraic(self) -> String {
        let file = (b'a' + self.file()) as char;
        let rank = (b'1' + self.rank()) as char;
        format!("{}{}", file, rank)
    }

    pub fn all() -> impl Iterator<Item = Square> {
        (0..64).map(Square)
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_algebraic())
    }
}
