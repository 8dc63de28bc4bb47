//! Tick-counted timer. Durations are whole simulation ticks; the timer
//! counts down to zero and reports `is_end` until it is reset.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    current: u32,
    duration: u32,
}

/// Reset targets for [`Timer::reset`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerReset {
    /// Jump to the end state (expired).
    End,
    /// Restart the full duration.
    Begin,
}

impl Timer {
    pub fn new(duration: u32) -> Self {
        Self {
            current: 0,
            duration,
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn duration(&self) -> u32 {
        self.duration
    }

    pub fn set_current(&mut self, val: u32) {
        self.current = val.min(self.duration);
    }

    /// Change the duration, clamping the remaining time into range.
    pub fn set_duration(&mut self, val: u32) {
        self.duration = val;
        self.current = self.current.min(self.duration);
    }

    /// Set a new duration and restart from it.
    pub fn restart_with(&mut self, val: u32) {
        self.duration = val;
        self.current = val;
    }

    /// Advance one tick. Returns true on the tick the timer reaches zero.
    pub fn tick(&mut self) -> bool {
        if self.current > 0 {
            self.current -= 1;
            return self.current == 0;
        }
        false
    }

    pub fn is_end(&self) -> bool {
        self.current == 0
    }

    pub fn is_begin(&self) -> bool {
        self.current == self.duration
    }

    pub fn reset(&mut self, target: TimerReset) {
        match target {
            TimerReset::End => self.current = 0,
            TimerReset::Begin => self.current = self.duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_down_and_reports_end() {
        let mut t = Timer::new(3);
        t.reset(TimerReset::Begin);
        assert!(!t.is_end());
        assert!(!t.tick());
        assert!(!t.tick());
        assert!(t.tick());
        assert!(t.is_end());
        // further ticks are inert
        assert!(!t.tick());
    }

    #[test]
    fn zero_duration_is_always_end() {
        let mut t = Timer::new(0);
        t.reset(TimerReset::Begin);
        assert!(t.is_end());
        assert!(t.is_begin());
    }
}
