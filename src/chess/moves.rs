use std::fmt;

use serde::{Deserialize, Serialize};

use super::piece::PieceKind;
use super::square::Square;

/// What kind of move this is. Every move carries exactly one flag; special
/// behavior (rook relocation, en-passant removal, double-push target) is
/// driven by the flag, never inferred from the squares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveFlag {
    Quiet,
    Capture,
    EnPassant,
    CastleKingside,
    CastleQueenside,
    DoublePush,
}

/// A move, meaningful only relative to the position it was generated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<PieceKind>,
    pub flag: MoveFlag,
}

impl Move {
    pub fn new(from: Square, to: Square, flag: MoveFlag) -> Move {
        Move {
            from,
            to,
            promotion: None,
            flag,
        }
    }

    pub fn promoting(from: Square, to: Square, flag: MoveFlag, kind: PieceKind) -> Move {
        Move {
            from,
            to,
            promotion: Some(kind),
            flag,
        }
    }

    pub fn is_capture(&self) -> bool {
        matches!(self.flag, MoveFlag::Capture | MoveFlag::EnPassant)
    }

    pub fn is_castle(&self) -> bool {
        matches!(self.flag, MoveFlag::CastleKingside | MoveFlag::CastleQueenside)
    }

    /// Coordinate notation: "e2e4", "e7e8q".
    pub fn coord(&self) -> String {
        match self.promotion {
            Some(kind) => format!("{}{}{}", self.from, self.to, kind.fen_char()),
            None => format!("{}{}", self.from, self.to),
        }
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.coord())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::piece::PieceKind;

    fn sq(label: &str) -> Square {
        Square::from_algebraic(label).unwrap()
    }

    #[test]
    fn coord_notation() {
        let mv = Move::new(sq("e2"), sq("e4"), MoveFlag::DoublePush);
        assert_eq!(mv.coord(), "e2e4");
        let promo = Move::promoting(sq("e7"), sq("e8"), MoveFlag::Quiet, PieceKind::Queen);
        assert_eq!(promo.coord(), "e7e8q");
    }

    #[test]
    fn capture_flags() {
        assert!(Move::new(sq("d4"), sq("e5"), MoveFlag::Capture).is_capture());
        assert!(Move::new(sq("d5"), sq("e6"), MoveFlag::EnPassant).is_capture());
        assert!(!Move::new(sq("e1"), sq("g1"), MoveFlag::CastleKingside).is_capture());
    }
}
