use std::collections::HashMap;
use std::sync::Mutex;

use actix::Addr;

use crate::engine::adapter::EngineSession;
use crate::sync::store::MemoryStore;
use crate::websocket::MatchSocket;

/// Seat assignments and time control for one room. The match state itself
/// lives in the snapshot store; this only tracks who sits where.
pub struct RoomSeats {
    pub white: Option<String>,
    pub black: Option<String>,
    pub seconds_per_side: u32,
}

/// Application state shared between connections
pub struct AppState {
    /// The authoritative snapshot store both participants write to.
    pub store: MemoryStore,
    /// room code -> session ids connected to it
    pub connections: Mutex<HashMap<String, Vec<String>>>,
    /// session id -> actor address, for per-room fan-out
    pub sessions: Mutex<HashMap<String, Addr<MatchSocket>>>,
    pub seats: Mutex<HashMap<String, RoomSeats>>,
    /// Lazily-opened search process for the HTTP bestmove fallback.
    pub engine: Mutex<Option<EngineSession>>,
    pub engine_command: Option<String>,
}

impl AppState {
    pub fn new(engine_command: Option<String>) -> AppState {
        AppState {
            store: MemoryStore::new(),
            connections: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            seats: Mutex::new(HashMap::new()),
            engine: Mutex::new(None),
            engine_command,
        }
    }
}
