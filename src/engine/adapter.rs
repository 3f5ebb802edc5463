//! Adapter for an external move-search process speaking a line-based
//! protocol: `uci`/`uciok` handshake once per process lifetime,
//! `isready`/`readyok`, then `position fen ...` + `go ...` answered by a
//! terminal `bestmove` line.

use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::chess::piece::PieceKind;
use crate::chess::position::Position;
use crate::chess::square::Square;

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchLimit {
    Depth(u32),
    MoveTimeMs(u64),
}

/// A candidate move in coordinate notation, as returned by the search
/// process. Validation against the legal set is the caller's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineMove {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<PieceKind>,
}

impl EngineMove {
    pub fn coord(&self) -> String {
        match self.promotion {
            Some(kind) => format!("{}{}{}", self.from, self.to, kind.fen_char()),
            None => format!("{}{}", self.from, self.to),
        }
    }
}

/// One search process with an owned lifecycle. A single request may be in
/// flight at a time; issuing a new request drains any stale response lines
/// left over from an abandoned one.
pub struct EngineSession {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
    response_timeout: Duration,
}

impl EngineSession {
    /// Spawn the process and run the readiness handshake. Handshake failure
    /// (timeout or closed channel) is an error; the session never retries.
    pub fn open(command: &str) -> io::Result<EngineSession> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty engine command"))?;
        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "engine stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "engine stdout unavailable"))?;

        // A dedicated reader thread feeds lines into a channel so waits can
        // be bounded with recv_timeout.
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let mut session = EngineSession {
            child,
            stdin,
            lines: rx,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        };
        session.handshake()?;
        info!("engine process ready: {}", command);
        Ok(session)
    }

    pub fn set_response_timeout(&mut self, timeout: Duration) {
        self.response_timeout = timeout;
    }

    fn handshake(&mut self) -> io::Result<()> {
        writeln!(self.stdin, "uci")?;
        self.await_line("uciok")?;
        writeln!(self.stdin, "isready")?;
        self.await_line("readyok")?;
        Ok(())
    }

    fn await_line(&mut self, expected: &str) -> io::Result<()> {
        let deadline = Instant::now() + self.response_timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::TimedOut, "engine handshake timed out")
                })?;
            match self.lines.recv_timeout(remaining) {
                Ok(line) if line.trim().eq_ignore_ascii_case(expected) => return Ok(()),
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "engine handshake timed out",
                    ))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "engine closed its output during handshake",
                    ))
                }
            }
        }
    }

    /// Ask for a single candidate move. `None` means "no move available":
    /// the search timed out, the channel closed, or the terminal line was
    /// malformed. The caller must not read any game result into it.
    pub fn request_move(&mut self, position: &Position, limit: SearchLimit) -> Option<EngineMove> {
        // Ignore any stale response from an abandoned previous request.
        while self.lines.try_recv().is_ok() {}

        let fen = position.to_fen();
        if writeln!(self.stdin, "position fen {}", fen).is_err() {
            warn!("engine stdin closed");
            return None;
        }
        let go = match limit {
            SearchLimit::Depth(depth) => format!("go depth {}", depth),
            SearchLimit::MoveTimeMs(ms) => format!("go movetime {}", ms),
        };
        if writeln!(self.stdin, "{}", go).is_err() {
            warn!("engine stdin closed");
            return None;
        }

        let deadline = Instant::now() + self.response_timeout;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match self.lines.recv_timeout(remaining) {
                Ok(line) => {
                    let line = line.trim();
                    if let Some(rest) = strip_prefix_ignore_case(line, "bestmove") {
                        return parse_bestmove(rest);
                    }
                    debug!("engine: {}", line);
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!("engine search timed out after {:?}", self.response_timeout);
                    return None;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("engine closed its output mid-search");
                    return None;
                }
            }
        }
    }

    pub fn close(mut self) {
        let _ = writeln!(self.stdin, "quit");
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        let _ = writeln!(self.stdin, "quit");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    match (line.get(..prefix.len()), line.get(prefix.len()..)) {
        (Some(head), Some(rest)) if head.eq_ignore_ascii_case(prefix) => Some(rest),
        _ => None,
    }
}

/// Parse the token after `bestmove`: two coordinates plus an optional
/// promotion letter, case not significant. Anything else is `None`.
fn parse_bestmove(rest: &str) -> Option<EngineMove> {
    let token = rest.split_whitespace().next()?;
    let token = token.to_ascii_lowercase();
    if token == "(none)" || token == "0000" {
        return None;
    }
    // Coordinate tokens are ASCII; anything else makes the byte ranges
    // below meaningless.
    if !token.is_ascii() || !(4..=5).contains(&token.len()) {
        return None;
    }
    let from = Square::from_algebraic(&token[0..2])?;
    let to = Square::from_algebraic(&token[2..4])?;
    let promotion = match token.len() {
        5 => Some(PieceKind::from_fen_char(token.chars().nth(4)?)?),
        _ => None,
    };
    Some(EngineMove {
        from,
        to,
        promotion,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sq(label: &str) -> Square {
        Square::from_algebraic(label).unwrap()
    }

    #[test]
    fn parses_plain_bestmove() {
        let mv = parse_bestmove(" e2e4").unwrap();
        assert_eq!(mv.from, sq("e2"));
        assert_eq!(mv.to, sq("e4"));
        assert_eq!(mv.promotion, None);
    }

    #[test]
    fn parses_promotion_and_ignores_ponder() {
        let mv = parse_bestmove(" e7e8q ponder d7d6").unwrap();
        assert_eq!(mv.to, sq("e8"));
        assert_eq!(mv.promotion, Some(PieceKind::Queen));
    }

    #[test]
    fn case_is_not_significant() {
        let mv = parse_bestmove(" E2E4").unwrap();
        assert_eq!(mv.coord(), "e2e4");
    }

    #[test]
    fn malformed_tokens_yield_none() {
        assert_eq!(parse_bestmove(" "), None);
        assert_eq!(parse_bestmove(" e2"), None);
        assert_eq!(parse_bestmove(" e2e9"), None);
        assert_eq!(parse_bestmove(" xxyyz"), None);
        assert_eq!(parse_bestmove(" (none)"), None);
        assert_eq!(parse_bestmove(" 0000"), None);
        assert_eq!(parse_bestmove(" e7e8x"), None);
    }

    #[test]
    fn non_ascii_tokens_yield_none() {
        assert_eq!(parse_bestmove(" xée"), None);
        assert_eq!(parse_bestmove(" é2e4"), None);
        assert_eq!(parse_bestmove(" e2e4é"), None);
    }

    #[test]
    fn bestmove_prefix_matching_is_case_insensitive() {
        assert!(strip_prefix_ignore_case("BESTMOVE e2e4", "bestmove").is_some());
        assert!(strip_prefix_ignore_case("info depth 3", "bestmove").is_none());
    }
}
