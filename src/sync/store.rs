//! The shared arbitration point for networked play: a versioned snapshot
//! per room, written conditionally on the last observed version, with
//! ordered change notifications to subscribers.

use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// The remote document both participants converge to. Field names match the
/// store schema exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDoc {
    /// FEN-serialized position.
    pub game_state: String,
    pub game_started: bool,
    pub game_over: bool,
    pub was_aborted: bool,
    pub winner: Option<String>,
    pub white_time: u32,
    pub black_time: u32,
    pub last_move_squares: Option<[String; 2]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedSnapshot {
    /// Monotonic per-room version; every accepted write bumps it by one.
    pub version: u64,
    pub doc: RemoteDoc,
}

/// A conditional write lost its race: the room moved past the version the
/// writer last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteConflict {
    pub current: Option<u64>,
}

impl fmt::Display for WriteConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.current {
            Some(version) => write!(f, "conditional write rejected, room is at version {}", version),
            None => write!(f, "conditional write rejected, room does not exist"),
        }
    }
}

impl std::error::Error for WriteConflict {}

/// Ordered change notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchStateChanged {
    pub room: String,
    pub snapshot: VersionedSnapshot,
}

pub trait SnapshotStore {
    fn read(&self, room: &str) -> Option<VersionedSnapshot>;

    /// Write `doc` if and only if the room is still at `expected` (`None`
    /// meaning the room must not exist yet). Returns the new version.
    fn try_write(
        &self,
        room: &str,
        expected: Option<u64>,
        doc: RemoteDoc,
    ) -> Result<u64, WriteConflict>;

    fn subscribe(&self, room: &str) -> Subscription;

    fn remove(&self, room: &str);
}

struct StoreInner {
    rooms: HashMap<String, VersionedSnapshot>,
    subscribers: HashMap<String, Vec<(u64, Sender<MatchStateChanged>)>>,
    next_subscriber_id: u64,
}

/// In-memory `SnapshotStore`. Writes and notifications happen under one
/// lock, so subscribers observe versions in strictly increasing order.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore {
            inner: Arc::new(Mutex::new(StoreInner {
                rooms: HashMap::new(),
                subscribers: HashMap::new(),
                next_subscriber_id: 0,
            })),
        }
    }

    pub fn room_exists(&self, room: &str) -> bool {
        self.inner.lock().unwrap().rooms.contains_key(room)
    }

    fn unsubscribe(&self, room: &str, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(list) = inner.subscribers.get_mut(room) {
            list.retain(|(sub_id, _)| *sub_id != id);
            if list.is_empty() {
                inner.subscribers.remove(room);
            }
        }
    }
}

impl SnapshotStore for MemoryStore {
    fn read(&self, room: &str) -> Option<VersionedSnapshot> {
        self.inner.lock().unwrap().rooms.get(room).cloned()
    }

    fn try_write(
        &self,
        room: &str,
        expected: Option<u64>,
        doc: RemoteDoc,
    ) -> Result<u64, WriteConflict> {
        let mut inner = self.inner.lock().unwrap();
        let current = inner.rooms.get(room).map(|snap| snap.version);
        if current != expected {
            return Err(WriteConflict { current });
        }
        let version = current.unwrap_or(0) + 1;
        let snapshot = VersionedSnapshot { version, doc };
        inner.rooms.insert(room.to_string(), snapshot.clone());

        if let Some(list) = inner.subscribers.get_mut(room) {
            // Drop subscribers whose receiving end is gone.
            list.retain(|(_, tx)| {
                tx.send(MatchStateChanged {
                    room: room.to_string(),
                    snapshot: snapshot.clone(),
                })
                .is_ok()
            });
        }
        Ok(version)
    }

    fn subscribe(&self, room: &str) -> Subscription {
        let (tx, rx) = mpsc::channel();
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        inner
            .subscribers
            .entry(room.to_string())
            .or_default()
            .push((id, tx));
        let store = MemoryStore {
            inner: Arc::clone(&self.inner),
        };
        let room_name = room.to_string();
        Subscription {
            room: room.to_string(),
            rx,
            canceller: Some(Box::new(move || store.unsubscribe(&room_name, id))),
        }
    }

    fn remove(&self, room: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.rooms.remove(room);
        inner.subscribers.remove(room);
    }
}

/// A cancellable handle to a room's change feed. Dropping it unsubscribes.
pub struct Subscription {
    room: String,
    rx: Receiver<MatchStateChanged>,
    canceller: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Drain whatever notifications have arrived so far, in order.
    pub fn poll(&self) -> Vec<MatchStateChanged> {
        let mut out = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(change) => out.push(change),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn cancel(mut self) {
        if let Some(canceller) = self.canceller.take() {
            canceller();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(canceller) = self.canceller.take() {
            canceller();
        }
    }
}
