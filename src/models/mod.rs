pub mod app_state;
pub mod messages;
pub mod room;

// Re-export important types
pub use app_state::{AppState, RoomSeats};
pub use messages::{ClientMessage, ServerMessage, SessionText};
