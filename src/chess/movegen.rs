//! Legal move generation: pseudo-legal piece geometry filtered by a scratch
//! apply that rejects anything leaving the mover's own king in check.

use super::moves::{Move, MoveFlag};
use super::piece::{Color, Piece, PieceKind};
use super::position::Position;
use super::square::Square;

const KNIGHT_OFFSETS: [(i8, i8); 8] = [
    (2, 1),
    (1, 2),
    (-1, 2),
    (-2, 1),
    (-2, -1),
    (-1, -2),
    (1, -2),
    (2, -1),
];

const KING_OFFSETS: [(i8, i8); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

const BISHOP_RAYS: [(i8, i8); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];
const ROOK_RAYS: [(i8, i8); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

/// Whether `by` attacks `target` in this position. Works directly from piece
/// geometry, which is equivalent to scanning `by`'s pseudo-legal moves.
pub fn is_square_attacked(position: &Position, target: Square, by: Color) -> bool {
    let matches_piece = |sq: Square, kind: PieceKind| {
        matches!(
            position.piece_at(sq),
            Some(piece) if piece.color == by && piece.kind == kind
        )
    };

    for (dr, df) in KNIGHT_OFFSETS {
        if let Some(sq) = target.offset(dr, df) {
            if matches_piece(sq, PieceKind::Knight) {
                return true;
            }
        }
    }
    for (dr, df) in KING_OFFSETS {
        if let Some(sq) = target.offset(dr, df) {
            if matches_piece(sq, PieceKind::King) {
                return true;
            }
        }
    }

    // A pawn attacks diagonally toward its own advance direction, so the
    // attacker sits one rank behind the target from its point of view.
    let pawn_rank_delta = match by {
        Color::White => -1,
        Color::Black => 1,
    };
    for df in [-1, 1] {
        if let Some(sq) = target.offset(pawn_rank_delta, df) {
            if matches_piece(sq, PieceKind::Pawn) {
                return true;
            }
        }
    }

    let ray_hits = |rays: &[(i8, i8)], kinds: [PieceKind; 2]| {
        for &(dr, df) in rays {
            let mut current = target;
            while let Some(sq) = current.offset(dr, df) {
                if let Some(piece) = position.piece_at(sq) {
                    if piece.color == by && kinds.contains(&piece.kind) {
                        return true;
                    }
                    break;
                }
                current = sq;
            }
        }
        false
    };
    ray_hits(&BISHOP_RAYS, [PieceKind::Bishop, PieceKind::Queen])
        || ray_hits(&ROOK_RAYS, [PieceKind::Rook, PieceKind::Queen])
}

pub fn in_check(position: &Position, color: Color) -> bool {
    match position.king_square(color) {
        Some(king) => is_square_attacked(position, king, color.opposite()),
        None => false,
    }
}

/// All legal moves for the side to move.
pub fn legal_moves(position: &Position) -> Vec<Move> {
    let mover = position.side_to_move;
    pseudo_legal_moves(position, mover)
        .into_iter()
        .filter(|mv| !in_check(&position.apply(mv), mover))
        .collect()
}

/// Legal moves originating from a single square.
pub fn legal_moves_from(position: &Position, from: Square) -> Vec<Move> {
    legal_moves(position)
        .into_iter()
        .filter(|mv| mv.from == from)
        .collect()
}

/// Resolve a from/to/promotion request against the legal set, recovering the
/// full flagged move. An omitted promotion on a promoting move defaults to
/// the queen.
pub fn find_move(
    position: &Position,
    from: Square,
    to: Square,
    promotion: Option<PieceKind>,
) -> Option<Move> {
    legal_moves(position).into_iter().find(|mv| {
        mv.from == from
            && mv.to == to
            && match (mv.promotion, promotion) {
                (None, None) => true,
                (None, Some(_)) => false,
                (Some(kind), Some(requested)) => kind == requested,
                (Some(kind), None) => kind == PieceKind::Queen,
            }
    })
}

fn pseudo_legal_moves(position: &Position, color: Color) -> Vec<Move> {
    let mut moves = Vec::new();
    for (from, piece) in position.pieces().filter(|(_, p)| p.color == color) {
        match piece.kind {
            PieceKind::Pawn => pawn_moves(position, from, color, &mut moves),
            PieceKind::Knight => offset_moves(position, from, piece, &KNIGHT_OFFSETS, &mut moves),
            PieceKind::King => {
                offset_moves(position, from, piece, &KING_OFFSETS, &mut moves);
                castle_moves(position, from, color, &mut moves);
            }
            PieceKind::Bishop => ray_moves(position, from, piece, &BISHOP_RAYS, &mut moves),
            PieceKind::Rook => ray_moves(position, from, piece, &ROOK_RAYS, &mut moves),
            PieceKind::Queen => {
                ray_moves(position, from, piece, &BISHOP_RAYS, &mut moves);
                ray_moves(position, from, piece, &ROOK_RAYS, &mut moves);
            }
        }
    }
    moves
}

fn offset_moves(
    position: &Position,
    from: Square,
    piece: Piece,
    offsets: &[(i8, i8)],
    out: &mut Vec<Move>,
) {
    for &(dr, df) in offsets {
        if let Some(to) = from.offset(dr, df) {
            match position.piece_at(to) {
                None => out.push(Move::new(from, to, MoveFlag::Quiet)),
                Some(target) if target.color != piece.color => {
                    out.push(Move::new(from, to, MoveFlag::Capture));
                }
                Some(_) => {}
            }
        }
    }
}

fn ray_moves(
    position: &Position,
    from: Square,
    piece: Piece,
    rays: &[(i8, i8)],
    out: &mut Vec<Move>,
) {
    for &(dr, df) in rays {
        let mut current = from;
        // Sliding pieces stop at the first occupied square, capturing if it
        // holds an enemy piece.
        while let Some(to) = current.offset(dr, df) {
            match position.piece_at(to) {
                None => {
                    out.push(Move::new(from, to, MoveFlag::Quiet));
                    current = to;
                }
                Some(target) => {
                    if target.color != piece.color {
                        out.push(Move::new(from, to, MoveFlag::Capture));
                    }
                    break;
                }
            }
        }
    }
}

fn pawn_moves(position: &Position, from: Square, color: Color, out: &mut Vec<Move>) {
    let (dir, start_rank, last_rank) = match color {
        Color::White => (1i8, 1u8, 7u8),
        Color::Black => (-1i8, 6u8, 0u8),
    };

    let push_with_promotions = |to: Square, flag: MoveFlag, out: &mut Vec<Move>| {
        if to.rank() == last_rank {
            for kind in [
                PieceKind::Queen,
                PieceKind::Rook,
                PieceKind::Bishop,
                PieceKind::Knight,
            ] {
                out.push(Move::promoting(from, to, flag, kind));
            }
        } else {
            out.push(Move::new(from, to, flag));
        }
    };

    if let Some(single) = from.offset(dir, 0) {
        if position.piece_at(single).is_none() {
            push_with_promotions(single, MoveFlag::Quiet, out);
            if from.rank() == start_rank {
                if let Some(double) = from.offset(2 * dir, 0) {
                    if position.piece_at(double).is_none() {
                        out.push(Move::new(from, double, MoveFlag::DoublePush));
                    }
                }
            }
        }
    }

    for df in [-1, 1] {
        if let Some(to) = from.offset(dir, df) {
            match position.piece_at(to) {
                Some(target) if target.color != color => {
                    push_with_promotions(to, MoveFlag::Capture, out);
                }
                None if position.en_passant == Some(to) => {
                    out.push(Move::new(from, to, MoveFlag::EnPassant));
                }
                _ => {}
            }
        }
    }
}

fn castle_moves(position: &Position, from: Square, color: Color, out: &mut Vec<Move>) {
    let back_rank = match color {
        Color::White => 0,
        Color::Black => 7,
    };
    let king_start = match Square::new(back_rank, 4) {
        Some(sq) => sq,
        None => return,
    };
    if from != king_start {
        return;
    }
    let enemy = color.opposite();
    let attacked = |file: u8| {
        Square::new(back_rank, file)
            .map(|sq| is_square_attacked(position, sq, enemy))
            .unwrap_or(true)
    };
    let empty = |file: u8| {
        Square::new(back_rank, file)
            .map(|sq| position.piece_at(sq).is_none())
            .unwrap_or(false)
    };
    let rook_at = |file: u8| {
        Square::new(back_rank, file)
            .and_then(|sq| position.piece_at(sq))
            .map(|p| p.kind == PieceKind::Rook && p.color == color)
            .unwrap_or(false)
    };

    // King's start, passing and destination squares must all be safe; the
    // between-squares must be empty.
    if position.castling.kingside(color)
        && rook_at(7)
        && empty(5)
        && empty(6)
        && !attacked(4)
        && !attacked(5)
        && !attacked(6)
    {
        if let Some(to) = Square::new(back_rank, 6) {
            out.push(Move::new(from, to, MoveFlag::CastleKingside));
        }
    }
    if position.castling.queenside(color)
        && rook_at(0)
        && empty(1)
        && empty(2)
        && empty(3)
        && !attacked(4)
        && !attacked(3)
        && !attacked(2)
    {
        if let Some(to) = Square::new(back_rank, 2) {
            out.push(Move::new(from, to, MoveFlag::CastleQueenside));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sq(label: &str) -> Square {
        Square::from_algebraic(label).unwrap()
    }

    fn pos(fen: &str) -> Position {
        Position::from_fen(fen).unwrap()
    }

    #[test]
    fn initial_position_has_twenty_moves() {
        assert_eq!(legal_moves(&Position::initial()).len(), 20);
    }

    #[test]
    fn no_legal_move_leaves_own_king_in_check() {
        let fens = [
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            "r1bqkbnr/pppp1ppp/2n5/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R b KQkq - 3 3",
            "4k3/8/8/3q4/8/8/4R3/4K3 w - - 0 1",
            "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3",
        ];
        for fen in fens {
            let position = pos(fen);
            for mv in legal_moves(&position) {
                let next = position.apply(&mv);
                assert!(
                    !in_check(&next, position.side_to_move),
                    "{} leaves the king in check in {}",
                    mv,
                    fen
                );
            }
        }
    }

    #[test]
    fn pinned_piece_cannot_move_off_the_pin_line() {
        // White bishop on e2 is pinned against the king by the e8 rook.
        let position = pos("4r1k1/8/8/8/8/8/4B3/4K3 w - - 0 1");
        assert!(legal_moves_from(&position, sq("e2")).is_empty());
    }

    #[test]
    fn must_resolve_check() {
        // Queen gives check on e-file; only blocking, capturing or king
        // moves are legal.
        let position = pos("4k3/8/8/4q3/8/8/3P4/4K3 w - - 0 1");
        for mv in legal_moves(&position) {
            let next = position.apply(&mv);
            assert!(!in_check(&next, Color::White));
        }
        // The d-pawn push does not address the check.
        assert!(find_move(&position, sq("d2"), sq("d4"), None).is_none());
    }

    #[test]
    fn castling_requires_safe_king_path() {
        // f1 is covered by the f8 rook: kingside castle must be absent even
        // though neither king nor rook has moved.
        let blocked = pos("5r2/4k3/8/8/8/8/8/4K2R w K - 0 1");
        assert!(find_move(&blocked, sq("e1"), sq("g1"), None).is_none());

        // A rook eyeing only h1 does not touch the king's path.
        let open = pos("7r/4k3/8/8/8/8/8/4K2R w K - 0 1");
        assert!(find_move(&open, sq("e1"), sq("g1"), None).is_some());
    }

    #[test]
    fn castling_requires_empty_between_squares() {
        let position = pos("4k3/8/8/8/8/8/8/4KB1R w K - 0 1");
        assert!(find_move(&position, sq("e1"), sq("g1"), None).is_none());
    }

    #[test]
    fn castling_requires_the_right() {
        let position = pos("4k3/8/8/8/8/8/8/4K2R w - - 0 1");
        assert!(find_move(&position, sq("e1"), sq("g1"), None).is_none());
    }

    #[test]
    fn queenside_castle_generated_when_clear() {
        let position = pos("4k3/8/8/8/8/8/8/R3K3 w Q - 0 1");
        let mv = find_move(&position, sq("e1"), sq("c1"), None).unwrap();
        assert_eq!(mv.flag, MoveFlag::CastleQueenside);
    }

    #[test]
    fn en_passant_generated_only_while_target_is_set() {
        let with_target = pos("rnbqkbnr/ppp1pppp/8/8/3pP3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 2");
        let mv = find_move(&with_target, sq("d4"), sq("e3"), None).unwrap();
        assert_eq!(mv.flag, MoveFlag::EnPassant);

        // Same board one move later, target cleared: capture is gone.
        let without_target = pos("rnbqkbnr/ppp1pppp/8/8/3pP3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 3");
        assert!(find_move(&without_target, sq("d4"), sq("e3"), None).is_none());
    }

    #[test]
    fn promotion_offers_all_four_pieces() {
        let position = pos("4k3/P7/8/8/8/8/8/4K3 w - - 0 1");
        let promotions = legal_moves_from(&position, sq("a7"));
        assert_eq!(promotions.len(), 4);
        assert!(promotions.iter().all(|mv| mv.promotion.is_some()));
    }

    #[test]
    fn promotion_request_defaults_to_queen() {
        let position = pos("4k3/P7/8/8/8/8/8/4K3 w - - 0 1");
        let mv = find_move(&position, sq("a7"), sq("a8"), None).unwrap();
        assert_eq!(mv.promotion, Some(PieceKind::Queen));
        let under = find_move(&position, sq("a7"), sq("a8"), Some(PieceKind::Knight)).unwrap();
        assert_eq!(under.promotion, Some(PieceKind::Knight));
    }

    #[test]
    fn checkmate_positions_have_no_legal_moves() {
        // Fool's mate final position.
        let mated = pos("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3");
        assert!(in_check(&mated, Color::White));
        assert!(legal_moves(&mated).is_empty());
    }

    #[test]
    fn stalemate_positions_have_no_legal_moves_without_check() {
        // Classic king + queen stalemate.
        let stale = pos("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1");
        assert!(!in_check(&stale, Color::Black));
        assert!(legal_moves(&stale).is_empty());
    }

    #[test]
    fn attack_detection_covers_pawn_direction() {
        let position = pos("4k3/8/8/3p4/8/8/8/4K3 w - - 0 1");
        // Black pawn on d5 attacks c4 and e4, not d4.
        assert!(is_square_attacked(&position, sq("c4"), Color::Black));
        assert!(is_square_attacked(&position, sq("e4"), Color::Black));
        assert!(!is_square_attacked(&position, sq("d4"), Color::Black));
    }
}
