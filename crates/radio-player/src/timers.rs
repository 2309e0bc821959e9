//! Pending controller deadlines.
//!
//! Every timeout and interval the controller uses lives here, so superseding
//! and teardown are a single assignment each.

use crate::clock::Millis;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerKind {
    /// Fails over if the output never confirmed playback.
    ConnectTimeout,
    /// Resume after a soft reload.
    Resume,
    /// End of the primary verification window.
    VerifyPrimary,
    /// Health monitor tick (interval).
    Watchdog,
    /// Return-to-primary attempt (interval).
    RetryPrimary,
}

const ALL: [TimerKind; 5] = [
    TimerKind::ConnectTimeout,
    TimerKind::Resume,
    TimerKind::VerifyPrimary,
    TimerKind::Watchdog,
    TimerKind::RetryPrimary,
];

#[derive(Clone, Copy, Debug)]
struct Slot {
    due: Millis,
    period: Option<Millis>,
}

#[derive(Debug, Default)]
pub struct Timers {
    slots: [Option<Slot>; 5],
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-shot deadline; replaces any pending deadline of the same kind.
    pub fn arm(&mut self, kind: TimerKind, now: Millis, after: Millis) {
        self.slots[index(kind)] = Some(Slot {
            due: now.saturating_add(after),
            period: None,
        });
    }

    /// Interval first due one `period` from `now`; restarts the phase.
    pub fn arm_interval(&mut self, kind: TimerKind, now: Millis, period: Millis) {
        let period = period.max(1);
        self.slots[index(kind)] = Some(Slot {
            due: now.saturating_add(period),
            period: Some(period),
        });
    }

    pub fn clear(&mut self, kind: TimerKind) {
        self.slots[index(kind)] = None;
    }

    pub fn clear_all(&mut self) {
        self.slots = [None; 5];
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Millis> {
        self.slots.iter().flatten().map(|s| s.due).min()
    }

    /// Take the earliest timer due at `now`. One-shots are removed; intervals
    /// are rescheduled one period after `now` (missed ticks are not replayed).
    pub fn pop_due(&mut self, now: Millis) -> Option<TimerKind> {
        let kind = ALL
            .into_iter()
            .filter_map(|k| self.slots[index(k)].map(|s| (k, s.due)))
            .filter(|(_, due)| *due <= now)
            .min_by_key(|(_, due)| *due)
            .map(|(k, _)| k)?;
        let slot = &mut self.slots[index(kind)];
        *slot = slot.and_then(|s| {
            s.period.map(|period| Slot {
                due: now.saturating_add(period),
                period: Some(period),
            })
        });
        Some(kind)
    }
}

fn index(kind: TimerKind) -> usize {
    match kind {
        TimerKind::ConnectTimeout => 0,
        TimerKind::Resume => 1,
        TimerKind::VerifyPrimary => 2,
        TimerKind::Watchdog => 3,
        TimerKind::RetryPrimary => 4,
    }
}
