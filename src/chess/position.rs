use std::fmt;

use super::moves::{Move, MoveFlag};
use super::piece::{Color, Piece, PieceKind};
use super::square::Square;

/// Four independent castling permissions. These survive FEN round-trips,
/// unlike per-piece `has_moved`, and are the source of truth for castle
/// legality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CastlingRights {
    pub white_kingside: bool,
    pub white_queenside: bool,
    pub black_kingside: bool,
    pub black_queenside: bool,
}

impl CastlingRights {
    pub fn all() -> CastlingRights {
        CastlingRights {
            white_kingside: true,
            white_queenside: true,
            black_kingside: true,
            black_queenside: true,
        }
    }

    pub fn none() -> CastlingRights {
        CastlingRights {
            white_kingside: false,
            white_queenside: false,
            black_kingside: false,
            black_queenside: false,
        }
    }

    pub fn kingside(&self, color: Color) -> bool {
        match color {
            Color::White => self.white_kingside,
            Color::Black => self.black_kingside,
        }
    }

    pub fn queenside(&self, color: Color) -> bool {
        match color {
            Color::White => self.white_queenside,
            Color::Black => self.black_queenside,
        }
    }

    fn clear_for(&mut self, color: Color) {
        match color {
            Color::White => {
                self.white_kingside = false;
                self.white_queenside = false;
            }
            Color::Black => {
                self.black_kingside = false;
                self.black_queenside = false;
            }
        }
    }

    fn fen_field(&self) -> String {
        let mut out = String::new();
        if self.white_kingside {
            out.push('K');
        }
        if self.white_queenside {
            out.push('Q');
        }
        if self.black_kingside {
            out.push('k');
        }
        if self.black_queenside {
            out.push('q');
        }
        if out.is_empty() {
            out.push('-');
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FenError {
    WrongFieldCount,
    BadBoard,
    BadSideToMove,
    BadCastling,
    BadEnPassant,
    BadCounter,
    KingCount,
}

impl fmt::Display for FenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FenError::WrongFieldCount => write!(f, "FEN must have 4 to 6 fields"),
            FenError::BadBoard => write!(f, "malformed board field"),
            FenError::BadSideToMove => write!(f, "side to move must be 'w' or 'b'"),
            FenError::BadCastling => write!(f, "malformed castling field"),
            FenError::BadEnPassant => write!(f, "malformed en-passant field"),
            FenError::BadCounter => write!(f, "malformed move counter"),
            FenError::KingCount => write!(f, "each side must have exactly one king"),
        }
    }
}

impl std::error::Error for FenError {}

/// An immutable-per-turn board snapshot. `apply` returns a new position and
/// never mutates the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub board: [Option<Piece>; 64],
    pub side_to_move: Color,
    pub castling: CastlingRights,
    pub en_passant: Option<Square>,
    pub halfmove_clock: u32,
    pub fullmove_number: u32,
}

pub const INITIAL_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

const BACK_RANK: [PieceKind; 8] = [
    PieceKind::Rook,
    PieceKind::Knight,
    PieceKind::Bishop,
    PieceKind::Queen,
    PieceKind::King,
    PieceKind::Bishop,
    PieceKind::Knight,
    PieceKind::Rook,
];

impl Position {
    pub fn initial() -> Position {
        let mut board = [None; 64];
        for (file, kind) in BACK_RANK.iter().enumerate() {
            board[file] = Some(Piece::new(*kind, Color::White));
            board[8 + file] = Some(Piece::new(PieceKind::Pawn, Color::White));
            board[48 + file] = Some(Piece::new(PieceKind::Pawn, Color::Black));
            board[56 + file] = Some(Piece::new(*kind, Color::Black));
        }
        Position {
            board,
            side_to_move: Color::White,
            castling: CastlingRights::all(),
            en_passant: None,
            halfmove_clock: 0,
            fullmove_number: 1,
        }
    }

    pub fn piece_at(&self, square: Square) -> Option<Piece> {
        self.board[square.index()]
    }

    pub fn king_square(&self, color: Color) -> Option<Square> {
        Square::all().find(|sq| {
            matches!(
                self.board[sq.index()],
                Some(piece) if piece.kind == PieceKind::King && piece.color == color
            )
        })
    }

    /// Iterate over occupied squares.
    pub fn pieces(&self) -> impl Iterator<Item = (Square, Piece)> + '_ {
        Square::all().filter_map(|sq| self.board[sq.index()].map(|p| (sq, p)))
    }

    /// Apply a generator-produced move, returning the resulting position.
    /// The move must come from `legal_moves` on this position; callers that
    /// accept outside input go through `MatchController`, which rejects
    /// anything not in the legal set first.
    pub fn apply(&self, mv: &Move) -> Position {
        let mut next = self.clone();
        let piece = match next.board[mv.from.index()] {
            Some(piece) => piece,
            None => {
                debug_assert!(false, "apply called with empty from-square");
                return next;
            }
        };
        let mover = piece.color;

        next.board[mv.from.index()] = None;
        let mut moved = piece;
        moved.has_moved = true;
        if let Some(kind) = mv.promotion {
            moved.kind = kind;
        }
        next.board[mv.to.index()] = Some(moved);

        match mv.flag {
            MoveFlag::EnPassant => {
                // The captured pawn sits beside the destination, on the
                // mover's original rank.
                if let Some(captured) = Square::new(mv.from.rank(), mv.to.file()) {
                    next.board[captured.index()] = None;
                }
            }
            MoveFlag::CastleKingside => {
                next.move_castling_rook(mv.to.rank(), 7, 5);
            }
            MoveFlag::CastleQueenside => {
                next.move_castling_rook(mv.to.rank(), 0, 3);
            }
            _ => {}
        }

        // Castling rights: king move clears both, rook move or rook capture
        // clears the matching side.
        if piece.kind == PieceKind::King {
            next.castling.clear_for(mover);
        }
        // Corner indices: a1, h1, a8, h8.
        for (corner, right) in [
            (0usize, &mut next.castling.white_queenside),
            (7, &mut next.castling.white_kingside),
            (56, &mut next.castling.black_queenside),
            (63, &mut next.castling.black_kingside),
        ] {
            if mv.from.index() == corner || mv.to.index() == corner {
                *right = false;
            }
        }

        next.en_passant = if mv.flag == MoveFlag::DoublePush {
            let skipped_rank = (mv.from.rank() + mv.to.rank()) / 2;
            Square::new(skipped_rank, mv.from.file())
        } else {
            None
        };

        if piece.kind == PieceKind::Pawn || mv.is_capture() {
            next.halfmove_clock = 0;
        } else {
            next.halfmove_clock += 1;
        }
        if mover == Color::Black {
            next.fullmove_number += 1;
        }
        next.side_to_move = mover.opposite();
        next
    }

    fn move_castling_rook(&mut self, rank: u8, from_file: u8, to_file: u8) {
        let from = Square::new(rank, from_file).map(|s| s.index());
        let to = Square::new(rank, to_file).map(|s| s.index());
        if let (Some(from), Some(to)) = (from, to) {
            if let Some(mut rook) = self.board[from].take() {
                rook.has_moved = true;
                self.board[to] = Some(rook);
            }
        }
    }

    pub fn to_fen(&self) -> String {
        let mut board_field = String::new();
        for rank in (0..8u8).rev() {
            let mut empty_run = 0;
            for file in 0..8u8 {
                match self.board[(rank * 8 + file) as usize] {
                    Some(piece) => {
                        if empty_run > 0 {
                            board_field.push_str(&empty_run.to_string());
                            empty_run = 0;
                        }
                        board_field.push(piece.fen_char());
                    }
                    None => empty_run += 1,
                }
            }
            if empty_run > 0 {
                board_field.push_str(&empty_run.to_string());
            }
            if rank > 0 {
                board_field.push('/');
            }
        }

        let side = match self.side_to_move {
            Color::White => "w",
            Color::Black => "b",
        };
        let en_passant = self
            .en_passant
            .map(|sq| sq.to_algebraic())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "{} {} {} {} {} {}",
            board_field,
            side,
            self.castling.fen_field(),
            en_passant,
            self.halfmove_clock,
            self.fullmove_number
        )
    }

    pub fn from_fen(fen: &str) -> Result<Position, FenError> {
        let fields: Vec<&str> = fen.split_whitespace().collect();
        if !(4..=6).contains(&fields.len()) {
            return Err(FenError::WrongFieldCount);
        }

        let mut board = [None; 64];
        let ranks: Vec<&str> = fields[0].split('/').collect();
        if ranks.len() != 8 {
            return Err(FenError::BadBoard);
        }
        for (row, rank_field) in ranks.iter().enumerate() {
            let rank = 7 - row as u8;
            let mut file = 0u8;
            for c in rank_field.chars() {
                if let Some(run) = c.to_digit(10) {
                    file += run as u8;
                } else {
                    let piece = Piece::from_fen_char(c).ok_or(FenError::BadBoard)?;
                    let square = Square::new(rank, file).ok_or(FenError::BadBoard)?;
                    board[square.index()] = Some(piece);
                    file += 1;
                }
                if file > 8 {
                    return Err(FenError::BadBoard);
                }
            }
            if file != 8 {
                return Err(FenError::BadBoard);
            }
        }

        let side_to_move = match fields[1] {
            "w" => Color::White,
            "b" => Color::Black,
            _ => return Err(FenError::BadSideToMove),
        };

        let mut castling = CastlingRights::none();
        if fields[2] != "-" {
            for c in fields[2].chars() {
                match c {
                    'K' => castling.white_kingside = true,
                    'Q' => castling.white_queenside = true,
                    'k' => castling.black_kingside = true,
                    'q' => castling.black_queenside = true,
                    _ => return Err(FenError::BadCastling),
                }
            }
        }

        let en_passant = if fields[3] == "-" {
            None
        } else {
            Some(Square::from_algebraic(fields[3]).ok_or(FenError::BadEnPassant)?)
        };

        let halfmove_clock = match fields.get(4) {
            Some(v) => v.parse().map_err(|_| FenError::BadCounter)?,
            None => 0,
        };
        let fullmove_number = match fields.get(5) {
            Some(v) => v.parse().map_err(|_| FenError::BadCounter)?,
            None => 1,
        };

        let position = Position {
            board,
            side_to_move,
            castling,
            en_passant,
            halfmove_clock,
            fullmove_number,
        };
        for color in [Color::White, Color::Black] {
            let kings = position
                .pieces()
                .filter(|(_, p)| p.kind == PieceKind::King && p.color == color)
                .count();
            if kings != 1 {
                return Err(FenError::KingCount);
            }
        }
        Ok(position)
    }

    /// Key used for threefold-repetition comparison: board, side to move,
    /// castling rights and en-passant target, without the move counters.
    pub fn repetition_key(&self) -> String {
        let fen = self.to_fen();
        fen.split_whitespace()
            .take(4)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Fixed table of piece-count combinations that can never force mate:
    /// K vs K, K+B vs K, K+N vs K, and K+B vs K+B with both bishops on the
    /// same square color.
    pub fn insufficient_material(&self) -> bool {
        let mut minor_squares: Vec<(Color, PieceKind, Square)> = Vec::new();
        for (square, piece) in self.pieces() {
            match piece.kind {
                PieceKind::King => {}
                PieceKind::Bishop | PieceKind::Knight => {
                    minor_squares.push((piece.color, piece.kind, square));
                }
                // Any pawn, rook or queen is mating material.
                _ => return false,
            }
        }
        match minor_squares.as_slice() {
            [] => true,
            [(_, _, _)] => true,
            [(color_a, PieceKind::Bishop, sq_a), (color_b, PieceKind::Bishop, sq_b)]
                if color_a != color_b =>
            {
                let shade = |sq: &Square| (sq.rank() + sq.file()) % 2;
                shade(sq_a) == shade(sq_b)
            }
            _ => false,
        }
    }
}
