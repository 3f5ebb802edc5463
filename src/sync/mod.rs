pub mod bridge;
pub mod store;

pub use bridge::{SubmitOutcome, SyncBridge};
pub use store::{MemoryStore, RemoteDoc, SnapshotStore, VersionedSnapshot, WriteConflict};
