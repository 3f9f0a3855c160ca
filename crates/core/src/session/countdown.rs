/// Result of advancing the countdown by one second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownTick {
    /// The clock is not running; nothing changed.
    Inert,
    /// Still running with this many seconds left.
    Remaining(u32),
    /// Reached zero on this tick. Reported once.
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
    Expired,
}

/// Session clock driven by one external tick per second.
///
/// Holds no timer of its own; whoever owns the session feeds it ticks and is
/// responsible for cancelling that source once the clock stops running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    remaining: u32,
    phase: Phase,
}

impl Countdown {
    #[must_use]
    pub fn new() -> Self {
        Self {
            remaining: 0,
            phase: Phase::Idle,
        }
    }

    /// Arm the clock with `duration_secs`, replacing any previous state.
    pub fn start(&mut self, duration_secs: u32) {
        self.remaining = duration_secs;
        self.phase = Phase::Running;
    }

    /// Advance by one second.
    pub fn tick(&mut self) -> CountdownTick {
        if self.phase != Phase::Running {
            return CountdownTick::Inert;
        }
        if self.remaining <= 1 {
            self.remaining = 0;
            self.phase = Phase::Expired;
            return CountdownTick::Expired;
        }
        self.remaining -= 1;
        CountdownTick::Remaining(self.remaining)
    }

    /// Stop the clock, keeping the remaining time. Safe to call in any state.
    pub fn stop(&mut self) {
        if self.phase == Phase::Running {
            self.phase = Phase::Stopped;
        }
    }

    /// Re-arm a stopped clock with its remaining time.
    ///
    /// Returns `false` if the clock was not stopped or has no time left.
    pub fn resume(&mut self) -> bool {
        if self.phase == Phase::Stopped && self.remaining > 0 {
            self.phase = Phase::Running;
            return true;
        }
        false
    }

    #[must_use]
    pub fn remaining_secs(&self) -> u32 {
        self.remaining
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.phase == Phase::Expired
    }
}

impl Default for Countdown {
    fn default() -> Self {
        Self::new()
    }
}
