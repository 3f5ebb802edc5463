//! The match state machine: `Waiting -> InProgress -> Terminated`, with the
//! controller as the sole writer of local match state.

use std::fmt;

use log::debug;

use crate::chess::movegen;
use crate::chess::moves::Move;
use crate::chess::piece::{Color, PieceKind};
use crate::chess::position::Position;
use crate::chess::square::Square;
use crate::game::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    Waiting,
    InProgress,
    Terminated,
}

impl MatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStatus::Waiting => "waiting",
            MatchStatus::InProgress => "in_progress",
            MatchStatus::Terminated => "terminated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    Timeout,
    Abort,
    DrawAgreement,
    FiftyMoveRule,
    ThreefoldRepetition,
}

impl TerminationReason {
    pub fn from_str(value: &str) -> Option<TerminationReason> {
        match value {
            "checkmate" => Some(TerminationReason::Checkmate),
            "stalemate" => Some(TerminationReason::Stalemate),
            "insufficient_material" => Some(TerminationReason::InsufficientMaterial),
            "timeout" => Some(TerminationReason::Timeout),
            "abort" => Some(TerminationReason::Abort),
            "draw_agreement" => Some(TerminationReason::DrawAgreement),
            "fifty_move_rule" => Some(TerminationReason::FiftyMoveRule),
            "threefold_repetition" => Some(TerminationReason::ThreefoldRepetition),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TerminationReason::Checkmate => "checkmate",
            TerminationReason::Stalemate => "stalemate",
            TerminationReason::InsufficientMaterial => "insufficient_material",
            TerminationReason::Timeout => "timeout",
            TerminationReason::Abort => "abort",
            TerminationReason::DrawAgreement => "draw_agreement",
            TerminationReason::FiftyMoveRule => "fifty_move_rule",
            TerminationReason::ThreefoldRepetition => "threefold_repetition",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    White,
    Black,
    None,
}

impl Winner {
    pub fn from_color(color: Color) -> Winner {
        match color {
            Color::White => Winner::White,
            Color::Black => Winner::Black,
        }
    }

    pub fn as_color(self) -> Option<Color> {
        match self {
            Winner::White => Some(Color::White),
            Winner::Black => Some(Color::Black),
            Winner::None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    pub reason: TerminationReason,
    pub winner: Winner,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub mv: Move,
    /// Snapshot of the position after the move was applied.
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchState {
    pub position: Position,
    pub history: Vec<HistoryEntry>,
    pub clock: Clock,
    pub status: MatchStatus,
    pub termination: Option<Termination>,
    /// Serialized position keys seen so far, for threefold repetition.
    pub repetition_keys: Vec<String>,
}

impl MatchState {
    pub fn fresh(seconds_per_side: u32) -> MatchState {
        MatchState::from_position(Position::initial(), seconds_per_side)
    }

    pub fn from_position(position: Position, seconds_per_side: u32) -> MatchState {
        let key = position.repetition_key();
        MatchState {
            position,
            history: Vec::new(),
            clock: Clock::new(seconds_per_side),
            status: MatchStatus::Waiting,
            termination: None,
            repetition_keys: vec![key],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchError {
    MatchNotStarted,
    AlreadyOver,
    NotYourTurn,
    IllegalMove,
    AlreadyStarted,
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchError::MatchNotStarted => write!(f, "match has not started"),
            MatchError::AlreadyOver => write!(f, "match is already over"),
            MatchError::NotYourTurn => write!(f, "not your turn"),
            MatchError::IllegalMove => write!(f, "illegal move"),
            MatchError::AlreadyStarted => write!(f, "match already started"),
        }
    }
}

impl std::error::Error for MatchError {}

/// Owns the current position, move history, clock and termination state.
/// Every mutation goes through one of the methods below; all of them reject
/// without side effects when called in the wrong state.
#[derive(Debug, Clone)]
pub struct MatchController {
    state: MatchState,
    initial_seconds: u32,
    increment_seconds: u32,
}

impl MatchController {
    pub fn new(initial_seconds: u32) -> MatchController {
        MatchController {
            state: MatchState::fresh(initial_seconds),
            initial_seconds,
            increment_seconds: 0,
        }
    }

    pub fn with_increment(initial_seconds: u32, increment_seconds: u32) -> MatchController {
        MatchController {
            state: MatchState::fresh(initial_seconds),
            initial_seconds,
            increment_seconds,
        }
    }

    pub fn from_position(position: Position, initial_seconds: u32) -> MatchController {
        MatchController {
            state: MatchState::from_position(position, initial_seconds),
            initial_seconds,
            increment_seconds: 0,
        }
    }

    pub fn state(&self) -> &MatchState {
        &self.state
    }

    pub fn status(&self) -> MatchStatus {
        self.state.status
    }

    pub fn initial_seconds(&self) -> u32 {
        self.initial_seconds
    }

    /// Replace the whole local state with an authoritative copy. Used by the
    /// sync layer when a remote snapshot supersedes local speculation.
    pub fn replace_state(&mut self, state: MatchState) {
        self.state = state;
    }

    /// Correct the termination reason without touching winner or status.
    /// The remote document cannot carry the reason, so a peer that adopted
    /// a terminal snapshot takes the committer's reason when it arrives.
    /// A no-op unless terminated.
    pub fn set_termination_reason(&mut self, reason: TerminationReason) {
        if let Some(termination) = self.state.termination.as_mut() {
            termination.reason = reason;
        }
    }

    /// `Waiting -> InProgress`. Clocks are reset to the configured duration
    /// and any stale history is cleared.
    pub fn start(&mut self) -> Result<(), MatchError> {
        match self.state.status {
            MatchStatus::Waiting => {
                let position = self.state.position.clone();
                self.state = MatchState::from_position(position, self.initial_seconds);
                self.state.status = MatchStatus::InProgress;
                Ok(())
            }
            MatchStatus::InProgress => Err(MatchError::AlreadyStarted),
            MatchStatus::Terminated => Err(MatchError::AlreadyOver),
        }
    }

    /// Apply one move for `mover`. Rejects out-of-turn and illegal moves
    /// with no state change; on acceptance flips the side to move, charges
    /// the clock increment and re-evaluates every termination trigger.
    pub fn apply_move(
        &mut self,
        mover: Color,
        from: Square,
        to: Square,
        promotion: Option<PieceKind>,
    ) -> Result<Move, MatchError> {
        match self.state.status {
            MatchStatus::Waiting => return Err(MatchError::MatchNotStarted),
            MatchStatus::Terminated => return Err(MatchError::AlreadyOver),
            MatchStatus::InProgress => {}
        }
        if mover != self.state.position.side_to_move {
            return Err(MatchError::NotYourTurn);
        }
        let mv = movegen::find_move(&self.state.position, from, to, promotion)
            .ok_or(MatchError::IllegalMove)?;

        let next = self.state.position.apply(&mv);
        self.state.history.push(HistoryEntry {
            mv,
            position: next.clone(),
        });
        self.state.repetition_keys.push(next.repetition_key());
        self.state.position = next;
        if self.increment_seconds > 0 {
            self.state.clock.add(mover, self.increment_seconds);
        }
        self.evaluate_termination(mover);
        Ok(mv)
    }

    /// One whole second elapsed for the side to move. A no-op unless the
    /// match is in progress; hitting zero terminates with `Timeout` within
    /// the same call, so no move can be accepted after expiry.
    pub fn tick_clock(&mut self) -> bool {
        if self.state.status != MatchStatus::InProgress {
            return false;
        }
        let side = self.state.position.side_to_move;
        if self.state.clock.tick(side) == 0 {
            debug!("{} flag fell", side);
            self.terminate(TerminationReason::Timeout, Winner::from_color(side.opposite()));
        }
        true
    }

    /// Apply `seconds` whole-second ticks, stopping early on termination.
    /// Servers drive this from elapsed wall time, so multiple drivers are
    /// harmless.
    pub fn tick_clocks(&mut self, seconds: u32) {
        for _ in 0..seconds {
            if !self.tick_clock() {
                break;
            }
        }
    }

    /// Forfeit: the non-aborting side wins.
    pub fn abort(&mut self, aborting: Color) -> Result<(), MatchError> {
        match self.state.status {
            MatchStatus::Waiting => Err(MatchError::MatchNotStarted),
            MatchStatus::Terminated => Err(MatchError::AlreadyOver),
            MatchStatus::InProgress => {
                self.terminate(
                    TerminationReason::Abort,
                    Winner::from_color(aborting.opposite()),
                );
                Ok(())
            }
        }
    }

    pub fn agree_draw(&mut self) -> Result<(), MatchError> {
        match self.state.status {
            MatchStatus::Waiting => Err(MatchError::MatchNotStarted),
            MatchStatus::Terminated => Err(MatchError::AlreadyOver),
            MatchStatus::InProgress => {
                self.terminate(TerminationReason::DrawAgreement, Winner::None);
                Ok(())
            }
        }
    }

    /// Back to `Waiting` with a fresh position and the configured duration.
    pub fn reset(&mut self) {
        self.state = MatchState::fresh(self.initial_seconds);
    }

    fn evaluate_termination(&mut self, last_mover: Color) {
        if movegen::legal_moves(&self.state.position).is_empty() {
            if movegen::in_check(&self.state.position, self.state.position.side_to_move) {
                self.terminate(
                    TerminationReason::Checkmate,
                    Winner::from_color(last_mover),
                );
            } else {
                self.terminate(TerminationReason::Stalemate, Winner::None);
            }
            return;
        }
        if self.state.position.insufficient_material() {
            self.terminate(TerminationReason::InsufficientMaterial, Winner::None);
            return;
        }
        if self.state.position.halfmove_clock >= 100 {
            self.terminate(TerminationReason::FiftyMoveRule, Winner::None);
            return;
        }
        let current = self.state.position.repetition_key();
        let repeats = self
            .state
            .repetition_keys
            .iter()
            .filter(|key| **key == current)
            .count();
        if repeats >= 3 {
            self.terminate(TerminationReason::ThreefoldRepetition, Winner::None);
        }
    }

    fn terminate(&mut self, reason: TerminationReason, winner: Winner) {
        self.state.status = MatchStatus::Terminated;
        self.state.termination = Some(Termination { reason, winner });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sq(label: &str) -> Square {
        Square::from_algebraic(label).unwrap()
    }

    fn play(controller: &mut MatchController, mover: Color, from: &str, to: &str) -> Move {
        controller
            .apply_move(mover, sq(from), sq(to), None)
            .unwrap()
    }

    #[test]
    fn moves_rejected_before_start() {
        let mut controller = MatchController::new(60);
        assert_eq!(
            controller.apply_move(Color::White, sq("e2"), sq("e4"), None),
            Err(MatchError::MatchNotStarted)
        );
    }

    #[test]
    fn out_of_turn_and_illegal_moves_leave_state_unchanged() {
        let mut controller = MatchController::new(60);
        controller.start().unwrap();
        let before = controller.state().clone();

        assert_eq!(
            controller.apply_move(Color::Black, sq("e7"), sq("e5"), None),
            Err(MatchError::NotYourTurn)
        );
        assert_eq!(
            controller.apply_move(Color::White, sq("e2"), sq("e5"), None),
            Err(MatchError::IllegalMove)
        );
        assert_eq!(controller.state(), &before);
    }

    #[test]
    fn fools_mate_terminates_with_black_checkmate() {
        let mut controller = MatchController::new(300);
        controller.start().unwrap();
        play(&mut controller, Color::White, "f2", "f3");
        play(&mut controller, Color::Black, "e7", "e5");
        play(&mut controller, Color::White, "g2", "g4");
        play(&mut controller, Color::Black, "d8", "h4");

        assert_eq!(controller.status(), MatchStatus::Terminated);
        assert_eq!(
            controller.state().termination,
            Some(Termination {
                reason: TerminationReason::Checkmate,
                winner: Winner::Black,
            })
        );
    }

    #[test]
    fn stalemate_terminates_with_no_winner() {
        let position = Position::from_fen("7k/8/6K1/8/8/8/8/5Q2 w - - 0 1").unwrap();
        let mut controller = MatchController::from_position(position, 60);
        controller.start().unwrap();
        play(&mut controller, Color::White, "f1", "f7");

        assert_eq!(
            controller.state().termination,
            Some(Termination {
                reason: TerminationReason::Stalemate,
                winner: Winner::None,
            })
        );
    }

    #[test]
    fn capturing_down_to_bare_kings_is_a_draw() {
        let position = Position::from_fen("4k3/8/8/8/8/8/r7/K7 w - - 0 1").unwrap();
        let mut controller = MatchController::from_position(position, 60);
        controller.start().unwrap();
        play(&mut controller, Color::White, "a1", "a2");

        assert_eq!(
            controller.state().termination.map(|t| t.reason),
            Some(TerminationReason::InsufficientMaterial)
        );
    }

    #[test]
    fn fifty_move_rule_fires_at_one_hundred_halfmoves() {
        let position =
            Position::from_fen("4k3/8/8/8/8/8/8/R3K3 w - - 99 80").unwrap();
        let mut controller = MatchController::from_position(position, 60);
        controller.start().unwrap();
        play(&mut controller, Color::White, "a1", "a2");

        assert_eq!(
            controller.state().termination.map(|t| t.reason),
            Some(TerminationReason::FiftyMoveRule)
        );
    }

    #[test]
    fn threefold_repetition_detected() {
        let mut controller = MatchController::new(300);
        controller.start().unwrap();
        for _ in 0..2 {
            play(&mut controller, Color::White, "g1", "f3");
            play(&mut controller, Color::Black, "g8", "f6");
            play(&mut controller, Color::White, "f3", "g1");
            play(&mut controller, Color::Black, "f6", "g8");
        }

        assert_eq!(
            controller.state().termination.map(|t| t.reason),
            Some(TerminationReason::ThreefoldRepetition)
        );
    }

    #[test]
    fn sixty_ticks_time_out_the_side_to_move() {
        let mut controller = MatchController::new(60);
        controller.start().unwrap();
        controller.tick_clocks(60);

        assert_eq!(controller.status(), MatchStatus::Terminated);
        assert_eq!(
            controller.state().termination,
            Some(Termination {
                reason: TerminationReason::Timeout,
                winner: Winner::Black,
            })
        );
        // Further ticks are no-ops.
        controller.tick_clocks(10);
        assert_eq!(controller.state().clock.white, 0);
    }

    #[test]
    fn ticks_are_noops_while_waiting() {
        let mut controller = MatchController::new(5);
        controller.tick_clocks(10);
        assert_eq!(controller.status(), MatchStatus::Waiting);
        assert_eq!(controller.state().clock.white, 5);
    }

    #[test]
    fn no_move_accepted_after_timeout() {
        let mut controller = MatchController::new(1);
        controller.start().unwrap();
        controller.tick_clock();
        assert_eq!(
            controller.apply_move(Color::White, sq("e2"), sq("e4"), None),
            Err(MatchError::AlreadyOver)
        );
    }

    #[test]
    fn abort_forfeits_to_the_other_side() {
        let mut controller = MatchController::new(60);
        controller.start().unwrap();
        controller.abort(Color::White).unwrap();
        assert_eq!(
            controller.state().termination,
            Some(Termination {
                reason: TerminationReason::Abort,
                winner: Winner::Black,
            })
        );
        // Terminated is final apart from reset.
        assert_eq!(controller.abort(Color::Black), Err(MatchError::AlreadyOver));
        assert_eq!(controller.start(), Err(MatchError::AlreadyOver));
    }

    #[test]
    fn agreed_draw_has_no_winner() {
        let mut controller = MatchController::new(60);
        controller.start().unwrap();
        controller.agree_draw().unwrap();
        assert_eq!(
            controller.state().termination,
            Some(Termination {
                reason: TerminationReason::DrawAgreement,
                winner: Winner::None,
            })
        );
    }

    #[test]
    fn termination_reason_round_trips_through_strings() {
        for reason in [
            TerminationReason::Checkmate,
            TerminationReason::Stalemate,
            TerminationReason::InsufficientMaterial,
            TerminationReason::Timeout,
            TerminationReason::Abort,
            TerminationReason::DrawAgreement,
            TerminationReason::FiftyMoveRule,
            TerminationReason::ThreefoldRepetition,
        ] {
            assert_eq!(TerminationReason::from_str(reason.as_str()), Some(reason));
        }
        assert_eq!(TerminationReason::from_str("resignation"), None);
    }

    #[test]
    fn termination_reason_override_requires_a_terminated_match() {
        let mut controller = MatchController::new(60);
        controller.start().unwrap();
        controller.set_termination_reason(TerminationReason::DrawAgreement);
        assert_eq!(controller.state().termination, None);

        controller.abort(Color::White).unwrap();
        controller.set_termination_reason(TerminationReason::Timeout);
        let termination = controller.state().termination.unwrap();
        assert_eq!(termination.reason, TerminationReason::Timeout);
        assert_eq!(termination.winner, Winner::Black);
    }

    #[test]
    fn reset_returns_to_waiting_with_fresh_clocks() {
        let mut controller = MatchController::new(60);
        controller.start().unwrap();
        play(&mut controller, Color::White, "e2", "e4");
        controller.tick_clocks(5);
        controller.abort(Color::Black).unwrap();

        controller.reset();
        assert_eq!(controller.status(), MatchStatus::Waiting);
        assert!(controller.state().history.is_empty());
        assert_eq!(controller.state().clock, Clock::new(60));
        assert_eq!(controller.state().position, Position::initial());
    }

    #[test]
    fn increment_credits_the_mover() {
        let mut controller = MatchController::with_increment(60, 2);
        controller.start().unwrap();
        play(&mut controller, Color::White, "e2", "e4");
        assert_eq!(controller.state().clock.white, 62);
        assert_eq!(controller.state().clock.black, 60);
    }
}
