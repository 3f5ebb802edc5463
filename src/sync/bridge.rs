//! Keeps a participant's local `MatchController` convergent with the shared
//! remote snapshot. Local changes are speculative until a conditional write
//! confirms them; the remote copy is always authoritative on conflict.

use log::{debug, warn};

use crate::chess::movegen;
use crate::chess::piece::Color;
use crate::chess::position::Position;
use crate::game::clock::Clock;
use crate::game::controller::{
    HistoryEntry, MatchController, MatchError, MatchState, MatchStatus, Termination,
    TerminationReason, Winner,
};
use crate::sync::store::{MatchStateChanged, RemoteDoc, SnapshotStore, VersionedSnapshot};

/// Local clocks tick every second but are published only this often, which
/// bounds cross-client clock skew to the interval. Timeouts and other
/// terminations publish immediately.
pub const CLOCK_PUBLISH_INTERVAL: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The conditional write landed; the local change is now authoritative.
    Committed(u64),
    /// The write lost its race. The speculative change was discarded; the
    /// next snapshot adoption re-derives local state. Not an error.
    Superseded,
}

pub struct SyncBridge<S: SnapshotStore> {
    store: S,
    room: String,
    side: Color,
    controller: MatchController,
    last_seen: Option<u64>,
    ticks_since_publish: u32,
    last_move: Option<[String; 2]>,
}

impl<S: SnapshotStore> SyncBridge<S> {
    pub fn new(store: S, room: &str, side: Color, initial_seconds: u32) -> SyncBridge<S> {
        SyncBridge {
            store,
            room: room.to_string(),
            side,
            controller: MatchController::new(initial_seconds),
            last_seen: None,
            ticks_since_publish: 0,
            last_move: None,
        }
    }

    pub fn controller(&self) -> &MatchController {
        &self.controller
    }

    pub fn side(&self) -> Color {
        self.side
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn last_seen_version(&self) -> Option<u64> {
        self.last_seen
    }

    /// Create the room document. Fails if the room already exists.
    pub fn create_room(&mut self) -> Result<u64, MatchError> {
        match self.store.try_write(&self.room, None, self.doc()) {
            Ok(version) => {
                self.last_seen = Some(version);
                Ok(version)
            }
            Err(conflict) => {
                debug!("room {} already exists: {}", self.room, conflict);
                Err(MatchError::AlreadyStarted)
            }
        }
    }

    /// Adopt the room's current snapshot, if any.
    pub fn attach(&mut self) -> bool {
        match self.store.read(&self.room) {
            Some(snapshot) => {
                self.adopt(snapshot);
                true
            }
            None => false,
        }
    }

    /// `Waiting -> InProgress`, published to the store.
    pub fn start_match(&mut self) -> Result<SubmitOutcome, MatchError> {
        let mut speculative = self.controller.clone();
        speculative.start()?;
        Ok(self.commit(speculative, None))
    }

    /// Apply a local move speculatively and publish it with a conditional
    /// write. A lost write rolls the move back; the caller sees
    /// `Superseded` and the next snapshot re-derives state.
    pub fn submit_move(
        &mut self,
        from: crate::chess::square::Square,
        to: crate::chess::square::Square,
        promotion: Option<crate::chess::piece::PieceKind>,
    ) -> Result<SubmitOutcome, MatchError> {
        let mut speculative = self.controller.clone();
        let mv = speculative.apply_move(self.side, from, to, promotion)?;
        let last_move = Some([mv.from.to_algebraic(), mv.to.to_algebraic()]);
        Ok(self.commit(speculative, last_move))
    }

    pub fn abort(&mut self) -> Result<SubmitOutcome, MatchError> {
        let mut speculative = self.controller.clone();
        speculative.abort(self.side)?;
        Ok(self.commit(speculative, self.last_move.clone()))
    }

    pub fn rematch(&mut self) -> Result<SubmitOutcome, MatchError> {
        if self.controller.status() != MatchStatus::Terminated {
            return Err(MatchError::AlreadyStarted);
        }
        let mut speculative = self.controller.clone();
        speculative.reset();
        Ok(self.commit(speculative, None))
    }

    /// One local second elapsed. The clock value is published only every
    /// `CLOCK_PUBLISH_INTERVAL` ticks, except that a timeout publishes
    /// immediately; if two clients both detect a timeout, conditional-write
    /// ordering decides and the loser is overridden by the next snapshot.
    pub fn tick(&mut self) {
        let was_running = self.controller.status() == MatchStatus::InProgress;
        self.controller.tick_clock();
        if !was_running {
            return;
        }
        if self.controller.status() == MatchStatus::Terminated {
            self.publish();
            return;
        }
        self.ticks_since_publish += 1;
        if self.ticks_since_publish >= CLOCK_PUBLISH_INTERVAL {
            self.publish();
        }
    }

    /// Handle one ordered change notification. Stale versions are ignored;
    /// anything newer fully replaces local state (remote is authoritative).
    pub fn on_change(&mut self, change: MatchStateChanged) -> bool {
        if let Some(seen) = self.last_seen {
            if change.snapshot.version <= seen {
                return false;
            }
        }
        self.adopt(change.snapshot);
        true
    }

    /// Take the committer's termination reason for an adopted terminal
    /// snapshot. `derive_termination` can only approximate the reason from
    /// the document (threefold in particular is underivable), so whoever
    /// committed the termination passes the real one alongside the
    /// snapshot. A no-op unless the match is terminated.
    pub fn set_termination_reason(&mut self, reason: TerminationReason) {
        self.controller.set_termination_reason(reason);
    }

    /// Drain a subscription, adopting every new snapshot in order. Returns
    /// how many were adopted.
    pub fn pump(&mut self, subscription: &crate::sync::store::Subscription) -> usize {
        subscription
            .poll()
            .into_iter()
            .filter(|change| self.on_change(change.clone()))
            .count()
    }

    fn commit(
        &mut self,
        speculative: MatchController,
        last_move: Option<[String; 2]>,
    ) -> SubmitOutcome {
        let doc = doc_from_state(speculative.state(), last_move.as_ref());
        match self.store.try_write(&self.room, self.last_seen, doc) {
            Ok(version) => {
                self.controller = speculative;
                self.last_move = last_move;
                self.last_seen = Some(version);
                self.ticks_since_publish = 0;
                SubmitOutcome::Committed(version)
            }
            Err(conflict) => {
                debug!(
                    "speculative state for room {} superseded: {}",
                    self.room, conflict
                );
                SubmitOutcome::Superseded
            }
        }
    }

    /// Publish the current confirmed state (clock updates, timeouts).
    fn publish(&mut self) -> bool {
        let doc = doc_from_state(self.controller.state(), self.last_move.as_ref());
        match self.store.try_write(&self.room, self.last_seen, doc) {
            Ok(version) => {
                self.last_seen = Some(version);
                self.ticks_since_publish = 0;
                true
            }
            Err(conflict) => {
                debug!("clock publish for room {} lost: {}", self.room, conflict);
                false
            }
        }
    }

    fn adopt(&mut self, snapshot: VersionedSnapshot) {
        let VersionedSnapshot { version, doc } = snapshot;
        let previous = self.controller.state().clone();

        // Malformed position snapshots fall back to a fresh board rather
        // than propagating a parse error.
        let position = match Position::from_fen(&doc.game_state) {
            Ok(position) => position,
            Err(err) => {
                warn!(
                    "room {}: unparsable remote position ({}), falling back to initial",
                    self.room, err
                );
                Position::initial()
            }
        };

        let status = if doc.game_over {
            MatchStatus::Terminated
        } else if doc.game_started {
            MatchStatus::InProgress
        } else {
            MatchStatus::Waiting
        };
        let termination = if doc.game_over {
            Some(derive_termination(&position, &doc))
        } else {
            None
        };

        // A not-yet-started doc is a fresh match (create or rematch): carry
        // nothing over, or the old game's positions would count toward the
        // new game's threefold repetition.
        let (mut history, mut repetition_keys) = if doc.game_started {
            (previous.history, previous.repetition_keys)
        } else {
            (Vec::new(), Vec::new())
        };
        if doc.game_started {
            if let Some(entry) =
                reconstruct_move(&previous.position, &position, doc.last_move_squares.as_ref())
            {
                history.push(entry);
            }
        }
        let key = position.repetition_key();
        if repetition_keys.last() != Some(&key) {
            repetition_keys.push(key);
        }

        self.controller.replace_state(MatchState {
            position,
            history,
            clock: Clock::with_times(doc.white_time, doc.black_time),
            status,
            termination,
            repetition_keys,
        });
        self.last_move = doc.last_move_squares.clone();
        self.last_seen = Some(version);
        self.ticks_since_publish = 0;
    }

    fn doc(&self) -> RemoteDoc {
        doc_from_state(self.controller.state(), self.last_move.as_ref())
    }
}

pub fn doc_from_state(state: &MatchState, last_move: Option<&[String; 2]>) -> RemoteDoc {
    RemoteDoc {
        game_state: state.position.to_fen(),
        game_started: state.status != MatchStatus::Waiting,
        game_over: state.status == MatchStatus::Terminated,
        was_aborted: matches!(
            state.termination,
            Some(Termination {
                reason: TerminationReason::Abort,
                ..
            })
        ),
        winner: state
            .termination
            .and_then(|t| t.winner.as_color())
            .map(|c| c.as_str().to_string()),
        white_time: state.clock.white,
        black_time: state.clock.black,
        last_move_squares: last_move.cloned(),
    }
}

/// The remote document does not carry a termination reason, so derive one
/// from the position and the document flags.
fn derive_termination(position: &Position, doc: &RemoteDoc) -> Termination {
    let winner = doc
        .winner
        .as_deref()
        .and_then(Color::from_str)
        .map(Winner::from_color)
        .unwrap_or(Winner::None);
    if doc.was_aborted {
        return Termination {
            reason: TerminationReason::Abort,
            winner,
        };
    }
    if movegen::legal_moves(position).is_empty() {
        let reason = if movegen::in_check(position, position.side_to_move) {
            TerminationReason::Checkmate
        } else {
            TerminationReason::Stalemate
        };
        return Termination { reason, winner };
    }
    if position.insufficient_material() {
        return Termination {
            reason: TerminationReason::InsufficientMaterial,
            winner,
        };
    }
    if position.halfmove_clock >= 100 {
        return Termination {
            reason: TerminationReason::FiftyMoveRule,
            winner,
        };
    }
    if doc.white_time == 0 || doc.black_time == 0 {
        return Termination {
            reason: TerminationReason::Timeout,
            winner,
        };
    }
    Termination {
        reason: TerminationReason::DrawAgreement,
        winner,
    }
}

/// Recover the move between two consecutive snapshots so adopted history
/// stays useful. Gives up silently when the gap spans more than one move.
fn reconstruct_move(
    before: &Position,
    after: &Position,
    last_move: Option<&[String; 2]>,
) -> Option<HistoryEntry> {
    let [from_label, to_label] = last_move?;
    let from = crate::chess::square::Square::from_algebraic(from_label)?;
    let to = crate::chess::square::Square::from_algebraic(to_label)?;
    movegen::legal_moves(before)
        .into_iter()
        .filter(|mv| mv.from == from && mv.to == to)
        .find(|mv| before.apply(mv).to_fen() == after.to_fen())
        .map(|mv| HistoryEntry {
            mv,
            position: after.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::square::Square;
    use crate::sync::store::MemoryStore;

    fn sq(label: &str) -> Square {
        Square::from_algebraic(label).unwrap()
    }

    fn paired_bridges(seconds: u32) -> (MemoryStore, SyncBridge<MemoryStore>, SyncBridge<MemoryStore>) {
        let store = MemoryStore::new();
        let mut white = SyncBridge::new(store.clone(), "ROOM01", Color::White, seconds);
        let mut black = SyncBridge::new(store.clone(), "ROOM01", Color::Black, seconds);
        white.create_room().unwrap();
        assert!(black.attach());
        assert!(matches!(
            black.start_match().unwrap(),
            SubmitOutcome::Committed(_)
        ));
        assert!(white.attach());
        assert_eq!(white.controller().status(), MatchStatus::InProgress);
        (store, white, black)
    }

    #[test]
    fn both_sides_converge_after_a_move() {
        let (store, mut white, mut black) = paired_bridges(300);
        let black_sub = store.subscribe("ROOM01");

        assert!(matches!(
            white.submit_move(sq("e2"), sq("e4"), None).unwrap(),
            SubmitOutcome::Committed(_)
        ));
        assert_eq!(black.pump(&black_sub), 1);

        assert_eq!(
            black.controller().state().position.to_fen(),
            white.controller().state().position.to_fen()
        );
        // The adopted move was reconstructed into history.
        assert_eq!(black.controller().state().history.len(), 1);
        assert_eq!(
            black.controller().state().history[0].mv.coord(),
            "e2e4"
        );
    }

    #[test]
    fn conflicting_writes_roll_back_the_loser() {
        let (store, mut white, mut black) = paired_bridges(300);
        let white_sub = store.subscribe("ROOM01");
        let black_sub = store.subscribe("ROOM01");

        // White moves first; black submits an out-of-date move for the same
        // observed version (it is not black's turn, so black races with a
        // clock publish instead).
        let outcome = white.submit_move(sq("e2"), sq("e4"), None).unwrap();
        assert!(matches!(outcome, SubmitOutcome::Committed(_)));

        // Black has not yet seen white's write; its clock publish conflicts.
        for _ in 0..CLOCK_PUBLISH_INTERVAL {
            black.tick();
        }
        // Exactly one write per version: black's publish lost.
        assert_eq!(black.last_seen_version(), Some(2));
        assert_ne!(
            black.controller().state().position.to_fen(),
            white.controller().state().position.to_fen()
        );

        // Convergence on the next snapshot.
        black.pump(&black_sub);
        white.pump(&white_sub);
        assert_eq!(
            black.controller().state().position.to_fen(),
            white.controller().state().position.to_fen()
        );
    }

    #[test]
    fn clock_publishes_are_batched() {
        let (store, mut white, _black) = paired_bridges(300);
        let version_before = store.read("ROOM01").unwrap().version;

        for _ in 0..CLOCK_PUBLISH_INTERVAL - 1 {
            white.tick();
        }
        assert_eq!(store.read("ROOM01").unwrap().version, version_before);

        white.tick();
        let snapshot = store.read("ROOM01").unwrap();
        assert_eq!(snapshot.version, version_before + 1);
        assert_eq!(snapshot.doc.white_time, 300 - CLOCK_PUBLISH_INTERVAL);
    }

    #[test]
    fn simultaneous_timeouts_resolve_by_write_order() {
        let (store, mut white, mut black) = paired_bridges(1);
        let white_sub = store.subscribe("ROOM01");
        let black_sub = store.subscribe("ROOM01");

        // Both clients independently see white's flag fall and publish.
        white.tick();
        black.tick();

        white.pump(&white_sub);
        black.pump(&black_sub);

        let a = white.controller().state();
        let b = black.controller().state();
        assert_eq!(a.status, MatchStatus::Terminated);
        assert_eq!(a.termination, b.termination);
        assert_eq!(
            a.termination.map(|t| t.reason),
            Some(TerminationReason::Timeout)
        );
        assert_eq!(a.termination.map(|t| t.winner), Some(Winner::Black));
    }

    #[test]
    fn malformed_remote_position_falls_back_to_initial() {
        let store = MemoryStore::new();
        let mut bridge = SyncBridge::new(store.clone(), "ROOM01", Color::White, 300);
        store
            .try_write(
                "ROOM01",
                None,
                RemoteDoc {
                    game_state: "not a fen".to_string(),
                    game_started: true,
                    game_over: false,
                    was_aborted: false,
                    winner: None,
                    white_time: 300,
                    black_time: 300,
                    last_move_squares: None,
                },
            )
            .unwrap();

        assert!(bridge.attach());
        assert_eq!(bridge.controller().state().position, Position::initial());
        assert_eq!(bridge.controller().status(), MatchStatus::InProgress);
    }

    #[test]
    fn remote_silence_never_ends_the_match() {
        let (_store, white, _black) = paired_bridges(300);
        // No remote updates arrive; status only changes through explicit
        // abort or timeout writes.
        assert_eq!(white.controller().status(), MatchStatus::InProgress);
    }

    #[test]
    fn abort_publishes_a_forfeit() {
        let (store, mut white, mut black) = paired_bridges(300);
        let black_sub = store.subscribe("ROOM01");

        assert!(matches!(
            white.abort().unwrap(),
            SubmitOutcome::Committed(_)
        ));
        black.pump(&black_sub);

        let termination = black.controller().state().termination.unwrap();
        assert_eq!(termination.reason, TerminationReason::Abort);
        assert_eq!(termination.winner, Winner::Black);
        assert!(store.read("ROOM01").unwrap().doc.was_aborted);
    }

    #[test]
    fn rematch_resets_the_room() {
        let (store, mut white, mut black) = paired_bridges(300);
        let black_sub = store.subscribe("ROOM01");
        white.abort().unwrap();
        black.pump(&black_sub);

        assert!(matches!(
            white.rematch().unwrap(),
            SubmitOutcome::Committed(_)
        ));
        black.pump(&black_sub);
        assert_eq!(black.controller().status(), MatchStatus::Waiting);
        assert_eq!(black.controller().state().position, Position::initial());
        assert!(!store.read("ROOM01").unwrap().doc.game_started);
    }
}
