pub mod clock;
pub mod controller;

pub use clock::Clock;
pub use controller::{MatchController, MatchError, MatchStatus, Termination, TerminationReason, Winner};
