pub mod adapter;

pub use adapter::{EngineMove, EngineSession, SearchLimit};
