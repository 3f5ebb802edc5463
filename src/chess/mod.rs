pub mod movegen;
pub mod moves;
pub mod piece;
pub mod position;
pub mod square;

pub use moves::{Move, MoveFlag};
pub use piece::{Color, Piece, PieceKind};
pub use position::{FenError, Position};
pub use square::Square;
