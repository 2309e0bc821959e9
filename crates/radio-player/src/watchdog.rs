//! Stall detection and the recovery ladder.
//!
//! The monitor only looks at progress timestamps. A stall has to persist for
//! `stall_strikes` consecutive ticks before anything heavier than a nudge
//! happens, and each tick after that climbs at most one rung:
//! nudge, then soft reload, then failover.

use crate::clock::Millis;
use crate::config::FailoverConfig;

/// Counters owned by the monitor; reset on every source switch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WatchdogState {
    /// Last forward progress reported by the output.
    pub last_progress_at: Millis,
    /// Start of the current grace window.
    pub last_switch_at: Millis,
    /// Consecutive stalled ticks.
    pub stall_strikes: u32,
    /// Next rung on the recovery ladder.
    pub recovery_attempts: u32,
    /// Last executed soft reload.
    pub last_soft_reload_at: Option<Millis>,
}

impl WatchdogState {
    /// Progress observed: the stream is healthy again.
    pub fn mark_progress(&mut self, now: Millis) {
        self.last_progress_at = now;
        self.stall_strikes = 0;
        self.recovery_attempts = 0;
    }

    /// A new source was bound: restart grace and forget the ladder.
    pub fn on_switch(&mut self, now: Millis) {
        self.last_switch_at = now;
        self.stall_strikes = 0;
        self.recovery_attempts = 0;
    }

    /// Same source rebound: restart grace and strikes, keep the ladder.
    pub fn on_reload(&mut self, now: Millis) {
        self.last_switch_at = now;
        self.stall_strikes = 0;
    }

    pub fn reload_cooling_down(&self, now: Millis, cooldown: Millis) -> bool {
        self.last_soft_reload_at
            .is_some_and(|at| now.saturating_sub(at) < cooldown)
    }
}

/// What the controller observed at tick time.
#[derive(Clone, Copy, Debug)]
pub struct TickInput {
    pub now: Millis,
    /// Player intends to play and the output is not paused.
    pub playing: bool,
    /// Page/window is in the foreground.
    pub visible: bool,
}

/// Why a tick was not evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NotPlaying,
    Hidden,
    Grace,
}

/// Escalation rungs once the strike threshold is met.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryStep {
    Nudge,
    SoftReload,
    Failover,
}

/// Result of one monitor tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Skipped(SkipReason),
    Healthy,
    /// Stall seen but strikes not yet met; nudge and wait.
    Strike { strikes: u32 },
    /// Strikes met but the soft reload is still cooling down.
    CoolingDown,
    Recover(RecoveryStep),
}

#[derive(Clone, Copy, Debug)]
pub struct HealthMonitor {
    stall_threshold_ms: Millis,
    stall_strikes: u32,
    grace_ms: Millis,
    soft_reload_cooldown_ms: Millis,
}

impl HealthMonitor {
    pub fn new(config: &FailoverConfig) -> Self {
        Self {
            stall_threshold_ms: config.stall_threshold_ms,
            stall_strikes: config.stall_strikes.max(1),
            grace_ms: config.grace_after_switch_ms,
            soft_reload_cooldown_ms: config.soft_reload_cooldown_ms,
        }
    }

    pub fn soft_reload_cooldown_ms(&self) -> Millis {
        self.soft_reload_cooldown_ms
    }

    /// Evaluate one tick, updating `state` in place.
    pub fn evaluate(&self, state: &mut WatchdogState, input: TickInput) -> Verdict {
        if !input.playing {
            return Verdict::Skipped(SkipReason::NotPlaying);
        }
        if !input.visible {
            return Verdict::Skipped(SkipReason::Hidden);
        }
        if input.now.saturating_sub(state.last_switch_at) < self.grace_ms {
            return Verdict::Skipped(SkipReason::Grace);
        }

        let delta = input.now.saturating_sub(state.last_progress_at);
        if delta <= self.stall_threshold_ms {
            state.stall_strikes = 0;
            return Verdict::Healthy;
        }

        state.stall_strikes = state.stall_strikes.saturating_add(1);
        tracing::debug!(
            strikes = state.stall_strikes,
            required = self.stall_strikes,
            delta_ms = delta,
            "stall strike"
        );
        if state.stall_strikes < self.stall_strikes {
            return Verdict::Strike {
                strikes: state.stall_strikes,
            };
        }

        match state.recovery_attempts {
            0 => {
                state.recovery_attempts = 1;
                Verdict::Recover(RecoveryStep::Nudge)
            }
            1 => {
                if state.reload_cooling_down(input.now, self.soft_reload_cooldown_ms) {
                    Verdict::CoolingDown
                } else {
                    state.recovery_attempts = 2;
                    Verdict::Recover(RecoveryStep::SoftReload)
                }
            }
            _ => Verdict::Recover(RecoveryStep::Failover),
        }
    }
}
