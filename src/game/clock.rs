use crate::chess::piece::Color;

/// Two independent per-side countdowns, in whole seconds. Turn gating and
/// timeout resolution live in `MatchController`; the clock itself only
/// counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    pub white: u32,
    pub black: u32,
}

impl Clock {
    pub fn new(seconds_per_side: u32) -> Clock {
        Clock {
            white: seconds_per_side,
            black: seconds_per_side,
        }
    }

    pub fn with_times(white: u32, black: u32) -> Clock {
        Clock { white, black }
    }

    pub fn remaining(&self, color: Color) -> u32 {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }

    pub fn set(&mut self, color: Color, seconds: u32) {
        match color {
            Color::White => self.white = seconds,
            Color::Black => self.black = seconds,
        }
    }

    pub fn add(&mut self, color: Color, seconds: u32) {
        match color {
            Color::White => self.white += seconds,
            Color::Black => self.black += seconds,
        }
    }

    /// Remove one second from `color`'s counter, saturating at zero.
    /// Returns the remaining time.
    pub fn tick(&mut self, color: Color) -> u32 {
        let counter = match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        };
        *counter = counter.saturating_sub(1);
        *counter
    }

    pub fn expired(&self, color: Color) -> bool {
        self.remaining(color) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_decrements_only_the_given_side() {
        let mut clock = Clock::new(60);
        assert_eq!(clock.tick(Color::White), 59);
        assert_eq!(clock.black, 60);
    }

    #[test]
    fn tick_saturates_at_zero() {
        let mut clock = Clock::with_times(1, 5);
        assert_eq!(clock.tick(Color::White), 0);
        assert_eq!(clock.tick(Color::White), 0);
        assert!(clock.expired(Color::White));
        assert!(!clock.expired(Color::Black));
    }

    #[test]
    fn increment_adds_time() {
        let mut clock = Clock::new(60);
        clock.add(Color::Black, 2);
        assert_eq!(clock.remaining(Color::Black), 62);
    }
}
