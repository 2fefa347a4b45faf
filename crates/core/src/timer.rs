use serde::{Deserialize, Serialize};
use thiserror::Error;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TimerError {
    #[error("configured minutes must be > 0")]
    InvalidMinutes,
    #[error("timer minutes can only change while the timer is idle")]
    NotIdle,
}

/// Minutes used when nothing else is configured.
pub const DEFAULT_MINUTES: u32 = 10;

//
// ─── PHASES ────────────────────────────────────────────────────────────────────
//

/// Derived lifecycle phase of the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerPhase {
    /// Never started since the last reset.
    Idle,
    Running,
    /// Stopped with time left.
    Paused,
    /// Ran out of time. Only `reset` leaves this phase.
    Expired,
}

/// Result of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The timer was not running; nothing changed.
    Ignored,
    Ticked { remaining: u32 },
    /// This tick consumed the last second.
    Expired,
}

//
// ─── STATE ─────────────────────────────────────────────────────────────────────
//

/// Countdown that locks the session once it runs out.
///
/// All transitions are pure; scheduling the ticks is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerState {
    configured_minutes: u32,
    remaining_seconds: u32,
    total_seconds: u32,
    running: bool,
    ever_started: bool,
}

impl TimerState {
    /// Create an idle timer.
    ///
    /// # Errors
    ///
    /// Returns `TimerError::InvalidMinutes` if `configured_minutes` is zero.
    pub fn new(configured_minutes: u32) -> Result<Self, TimerError> {
        if configured_minutes == 0 {
            return Err(TimerError::InvalidMinutes);
        }
        Ok(Self {
            configured_minutes,
            remaining_seconds: 0,
            total_seconds: 0,
            running: false,
            ever_started: false,
        })
    }

    #[must_use]
    pub fn configured_minutes(&self) -> u32 {
        self.configured_minutes
    }

    #[must_use]
    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    #[must_use]
    pub fn total_seconds(&self) -> u32 {
        self.total_seconds
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[must_use]
    pub fn ever_started(&self) -> bool {
        self.ever_started
    }

    /// True once the countdown has been started and has reached zero.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.ever_started && self.remaining_seconds == 0
    }

    #[must_use]
    pub fn phase(&self) -> TimerPhase {
        if self.running {
            TimerPhase::Running
        } else if self.remaining_seconds > 0 {
            TimerPhase::Paused
        } else if self.ever_started {
            TimerPhase::Expired
        } else {
            TimerPhase::Idle
        }
    }

    /// Start from `Idle` (fresh budget) or resume from `Paused`.
    ///
    /// Returns `false` (and changes nothing) when already running or expired.
    pub fn start(&mut self) -> bool {
        match self.phase() {
            TimerPhase::Idle => {
                self.total_seconds = self.configured_minutes.saturating_mul(60).max(1);
                self.remaining_seconds = self.total_seconds;
            }
            TimerPhase::Paused => {}
            TimerPhase::Running | TimerPhase::Expired => return false,
        }
        self.running = true;
        self.ever_started = true;
        true
    }

    /// Consume one second of a running countdown.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.running {
            return TickOutcome::Ignored;
        }
        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        if self.remaining_seconds == 0 {
            self.running = false;
            return TickOutcome::Expired;
        }
        TickOutcome::Ticked {
            remaining: self.remaining_seconds,
        }
    }

    /// Returns `false` when the timer was not running.
    pub fn pause(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;
        true
    }

    /// Back to `Idle` from any phase; clears the lock.
    pub fn reset(&mut self) {
        self.running = false;
        self.remaining_seconds = 0;
        self.total_seconds = 0;
        self.ever_started = false;
    }

    /// Change the budget used by the next start.
    ///
    /// # Errors
    ///
    /// Returns `TimerError::NotIdle` unless the timer is idle, and
    /// `TimerError::InvalidMinutes` for zero.
    pub fn set_configured_minutes(&mut self, minutes: u32) -> Result<(), TimerError> {
        if self.phase() != TimerPhase::Idle {
            return Err(TimerError::NotIdle);
        }
        if minutes == 0 {
            return Err(TimerError::InvalidMinutes);
        }
        self.configured_minutes = minutes;
        Ok(())
    }

    /// Apply persisted timer fields.
    ///
    /// `configured_minutes` is always taken; `remaining_seconds` only when the countdown
    /// is not running. Returns whether the remaining time was replaced.
    pub(crate) fn restore(&mut self, configured_minutes: u32, remaining_seconds: u32) -> bool {
        self.configured_minutes = configured_minutes;
        if self.running {
            return false;
        }
        self.remaining_seconds = remaining_seconds;
        if remaining_seconds > 0 {
            self.total_seconds = remaining_seconds.max(configured_minutes.saturating_mul(60));
        }
        true
    }

    /// Fraction of the budget still left, for progress displays.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.total_seconds == 0 {
            return 0.0;
        }
        f64::from(self.remaining_seconds) / f64::from(self.total_seconds)
    }

    /// Remaining time as `mm:ss`.
    #[must_use]
    pub fn remaining_label(&self) -> String {
        format!(
            "{:02}:{:02}",
            self.remaining_seconds / 60,
            self.remaining_seconds % 60
        )
    }
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            configured_minutes: DEFAULT_MINUTES,
            remaining_seconds: 0,
            total_seconds: 0,
            running: false,
            ever_started: false,
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
