//! Primary/backup selection with a sticky backup window and verified return.

use radio_types::ServerRole;

use crate::clock::Millis;
use crate::config::{FailoverConfig, PROBE_LATCH_MS, SWITCH_LATCH_MS};

/// Outcome of a failover request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackupDecision {
    /// Another switch is in flight; nothing changed.
    InFlight,
    /// Already on backup; the caller should soft-reload instead.
    SoftReload,
    /// Now on backup; the caller must rebind the output.
    Switched,
}

/// Result of a finished primary verification window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Primary showed progress; stay there.
    Confirmed,
    /// No progress; back on backup with a fresh sticky window.
    Reverted { was_playing: bool },
}

#[derive(Clone, Copy, Debug)]
struct PrimaryProbe {
    started_at: Millis,
    was_playing: bool,
    verified: bool,
}

#[derive(Debug)]
pub struct FailoverCoordinator {
    primary_url: String,
    backup_url: String,
    sticky_ms: Millis,
    active: ServerRole,
    last_failover_at: Option<Millis>,
    /// Switch latch: requests before this instant are ignored.
    latched_until: Option<Millis>,
    probe: Option<PrimaryProbe>,
}

impl FailoverCoordinator {
    pub fn new(config: &FailoverConfig) -> Self {
        Self {
            primary_url: config.primary_url.clone(),
            backup_url: config.backup_url.clone(),
            sticky_ms: config.sticky_backup_ms,
            active: ServerRole::Primary,
            last_failover_at: None,
            latched_until: None,
            probe: None,
        }
    }

    pub fn active(&self) -> ServerRole {
        self.active
    }

    pub fn active_url(&self) -> &str {
        self.url_for(self.active)
    }

    pub fn url_for(&self, role: ServerRole) -> &str {
        match role {
            ServerRole::Primary => &self.primary_url,
            ServerRole::Backup => &self.backup_url,
        }
    }

    pub fn last_failover_at(&self) -> Option<Millis> {
        self.last_failover_at
    }

    pub fn is_verifying(&self) -> bool {
        self.probe.is_some()
    }

    /// A switch is in flight (latched, or a primary probe is pending).
    pub fn is_switching(&self, now: Millis) -> bool {
        self.probe.is_some() || self.latched_until.is_some_and(|until| now < until)
    }

    pub fn request_backup(&mut self, now: Millis) -> BackupDecision {
        if self.is_switching(now) {
            return BackupDecision::InFlight;
        }
        if self.active == ServerRole::Backup {
            return BackupDecision::SoftReload;
        }
        self.active = ServerRole::Backup;
        self.last_failover_at = Some(now);
        self.latched_until = Some(now.saturating_add(SWITCH_LATCH_MS));
        BackupDecision::Switched
    }

    /// Whether a return to primary may be attempted now.
    pub fn should_retry_primary(&self, now: Millis, playing: bool) -> bool {
        if self.active != ServerRole::Backup || !playing || self.is_switching(now) {
            return false;
        }
        match self.last_failover_at {
            Some(at) => now.saturating_sub(at) >= self.sticky_ms,
            None => false,
        }
    }

    /// Speculatively switch to primary. Returns `false` if refused.
    pub fn begin_probe(&mut self, now: Millis, was_playing: bool) -> bool {
        if self.is_switching(now) || self.primary_url.is_empty() {
            return false;
        }
        self.active = ServerRole::Primary;
        self.probe = Some(PrimaryProbe {
            started_at: now,
            was_playing,
            verified: false,
        });
        true
    }

    /// Progress observed on the output while a probe is pending.
    pub fn observe_progress(&mut self) {
        if let Some(probe) = self.probe.as_mut() {
            probe.verified = true;
        }
    }

    /// Close the verification window. Progress observed after this call is
    /// not attributed to the probe.
    pub fn finish_probe(&mut self, now: Millis) -> Option<ProbeOutcome> {
        let probe = self.probe.take()?;
        self.latched_until = Some(now.saturating_add(PROBE_LATCH_MS));
        tracing::debug!(
            waited_ms = now.saturating_sub(probe.started_at),
            verified = probe.verified,
            "primary probe finished"
        );
        if probe.verified {
            return Some(ProbeOutcome::Confirmed);
        }
        self.active = ServerRole::Backup;
        self.last_failover_at = Some(now);
        Some(ProbeOutcome::Reverted {
            was_playing: probe.was_playing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(sticky: Millis) -> FailoverCoordinator {
        let mut cfg = FailoverConfig::with_urls("http://a/live", "http://b/live");
        cfg.sticky_backup_ms = sticky;
        FailoverCoordinator::new(&cfg)
    }

    #[test]
    fn first_request_switches_and_records_time() {
        let mut c = coordinator(60_000);
        assert_eq!(c.active_url(), "http://a/live");
        assert_eq!(c.request_backup(1_000), BackupDecision::Switched);
        assert_eq!(c.active(), ServerRole::Backup);
        assert_eq!(c.active_url(), "http://b/live");
        assert_eq!(c.last_failover_at(), Some(1_000));
    }

    #[test]
    fn requests_inside_latch_are_ignored() {
        let mut c = coordinator(60_000);
        assert_eq!(c.request_backup(1_000), BackupDecision::Switched);
        assert_eq!(c.request_backup(1_299), BackupDecision::InFlight);
        assert_eq!(c.last_failover_at(), Some(1_000));
        assert_eq!(c.request_backup(1_300), BackupDecision::SoftReload);
    }

    #[test]
    fn retry_waits_for_sticky_window() {
        let mut c = coordinator(60_000);
        assert!(!c.should_retry_primary(0, true));
        c.request_backup(1_000);
        assert!(!c.should_retry_primary(30_000, true));
        assert!(!c.should_retry_primary(60_999, true));
        assert!(!c.should_retry_primary(61_000, false));
        assert!(c.should_retry_primary(61_000, true));
    }

    #[test]
    fn verified_probe_stays_on_primary() {
        let mut c = coordinator(10_000);
        c.request_backup(0);
        assert!(c.begin_probe(20_000, true));
        assert!(c.is_switching(20_000));
        assert_eq!(c.request_backup(21_000), BackupDecision::InFlight);
        c.observe_progress();
        assert_eq!(c.finish_probe(26_000), Some(ProbeOutcome::Confirmed));
        assert_eq!(c.active(), ServerRole::Primary);
        assert_eq!(c.last_failover_at(), Some(0));
        assert!(c.is_switching(26_119));
        assert!(!c.is_switching(26_120));
    }

    #[test]
    fn unverified_probe_reverts_and_restarts_sticky() {
        let mut c = coordinator(10_000);
        c.request_backup(0);
        assert!(c.begin_probe(20_000, true));
        assert_eq!(
            c.finish_probe(26_000),
            Some(ProbeOutcome::Reverted { was_playing: true })
        );
        assert_eq!(c.active(), ServerRole::Backup);
        assert_eq!(c.last_failover_at(), Some(26_000));
        assert!(!c.should_retry_primary(35_999, true));
        assert!(c.should_retry_primary(36_000, true));
    }

    #[test]
    fn progress_after_window_is_not_attributed() {
        let mut c = coordinator(10_000);
        c.request_backup(0);
        c.begin_probe(20_000, false);
        assert!(matches!(c.finish_probe(26_000), Some(ProbeOutcome::Reverted { .. })));
        c.observe_progress();
        assert_eq!(c.finish_probe(27_000), None);
        assert_eq!(c.active(), ServerRole::Backup);
    }

    #[test]
    fn probe_refused_while_latched() {
        let mut c = coordinator(0);
        c.request_backup(0);
        assert!(!c.begin_probe(100, true));
        assert_eq!(c.active(), ServerRole::Backup);
        assert!(c.begin_probe(300, true));
    }
}
