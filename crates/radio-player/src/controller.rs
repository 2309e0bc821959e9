//! The radio playback controller.
//!
//! One [`RadioController`] exists per session. It owns the only
//! [`AudioOutput`], the watchdog counters, the failover coordinator and every
//! pending timer. All state changes happen on one thread, driven by public
//! calls, output events, bus signals and [`RadioController::advance`].

use std::sync::Arc;

use radio_types::{FailoverReason, PlayerStatus, ServerRole};
use serde_json::json;
use url::Url;

use crate::clock::{Clock, Millis};
use crate::config::{FailoverConfig, RELOAD_RESUME_DELAY_MS, WATCHDOG_INTERVAL_MS};
use crate::failover::{BackupDecision, FailoverCoordinator, ProbeOutcome};
use crate::output::{AudioOutput, MediaEvent};
use crate::prefs::{self, PreferenceStore};
use crate::signals::{RadioSignal, SignalBus};
use crate::timers::{TimerKind, Timers};
use crate::watchdog::{HealthMonitor, RecoveryStep, TickInput, Verdict, WatchdogState};

/// Upper bound on timer firings handled by one `advance` call.
const MAX_FIRES_PER_ADVANCE: usize = 64;

/// User-facing player state.
///
/// `is_playing` is optimistic: it follows the latest play/pause intent or
/// confirmed output event, not whether audio is audibly flowing.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerState {
    pub is_playing: bool,
    pub muted: bool,
    pub volume: f32,
    pub is_expanded: bool,
}

pub struct RadioController<O: AudioOutput> {
    config: FailoverConfig,
    output: O,
    clock: Arc<dyn Clock>,
    prefs: Box<dyn PreferenceStore>,
    signals: SignalBus,
    state: PlayerState,
    failover: FailoverCoordinator,
    watchdog: WatchdogState,
    monitor: HealthMonitor,
    timers: Timers,
    visible: bool,
    /// `(is_playing, active, last_failover_at)` the intervals were armed for.
    interval_key: Option<(bool, ServerRole, Option<Millis>)>,
    disposed: bool,
}

impl<O: AudioOutput> RadioController<O> {
    /// Start a session: restore preferences onto `output` and arm the watchdog.
    pub fn new(
        config: FailoverConfig,
        mut output: O,
        clock: Arc<dyn Clock>,
        prefs: Box<dyn PreferenceStore>,
        signals: SignalBus,
    ) -> Self {
        let (muted, volume) = prefs::load_audio_prefs(prefs.as_ref());
        output.set_muted(muted);
        output.set_volume(volume);

        tracing::info!(
            primary = %config.primary_url,
            backup = %config.backup_url,
            stall_ms = config.stall_threshold_ms,
            strikes = config.stall_strikes,
            grace_ms = config.grace_after_switch_ms,
            "radio controller ready"
        );

        let mut controller = Self {
            failover: FailoverCoordinator::new(&config),
            monitor: HealthMonitor::new(&config),
            config,
            output,
            clock,
            prefs,
            signals,
            state: PlayerState {
                is_playing: false,
                muted,
                volume,
                is_expanded: false,
            },
            watchdog: WatchdogState::default(),
            timers: Timers::new(),
            visible: true,
            interval_key: None,
            disposed: false,
        };
        let now = controller.now();
        controller.sync_intervals(now);
        controller
    }

    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn prefs(&self) -> &dyn PreferenceStore {
        self.prefs.as_ref()
    }

    pub fn watchdog(&self) -> &WatchdogState {
        &self.watchdog
    }

    pub fn active_server(&self) -> ServerRole {
        self.failover.active()
    }

    pub fn last_failover_at(&self) -> Option<Millis> {
        self.failover.last_failover_at()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Snapshot for control clients.
    pub fn status(&self) -> PlayerStatus {
        PlayerStatus {
            playing: self.state.is_playing,
            muted: self.state.muted,
            volume: self.state.volume,
            expanded: self.state.is_expanded,
            visible: self.visible,
            active_server: self.failover.active(),
            primary_url: self.config.primary_url.clone(),
            backup_url: self.config.backup_url.clone(),
            last_failover_at_ms: self.failover.last_failover_at(),
            verifying_primary: self.failover.is_verifying(),
        }
    }

    /// Earliest pending timer, if any.
    pub fn next_deadline(&self) -> Option<Millis> {
        self.timers.next_deadline()
    }

    pub fn play(&mut self) {
        if self.disposed {
            return;
        }
        let now = self.now();
        if self.output.source().is_none() {
            let url = self.busted_active_url();
            self.output.set_source(Some(url));
            self.output.load();
            self.watchdog.last_switch_at = now;
        }
        self.arm_connect_guard(now);
        match self.output.play() {
            Ok(()) => self.state.is_playing = true,
            Err(e) => {
                tracing::warn!("play rejected: {e}");
                self.state.is_playing = false;
                self.timers.clear(TimerKind::ConnectTimeout);
            }
        }
        self.sync_intervals(now);
    }

    pub fn pause(&mut self) {
        if self.disposed {
            return;
        }
        let changed = self.state.is_playing || !self.output.is_paused();
        self.output.pause();
        self.state.is_playing = false;
        self.timers.clear(TimerKind::ConnectTimeout);
        if changed {
            self.signals.publish(RadioSignal::RadioPaused);
        }
        let now = self.now();
        self.sync_intervals(now);
    }

    pub fn toggle_play(&mut self) {
        if self.output.is_paused() {
            self.play();
        } else {
            self.pause();
        }
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.state.muted = muted;
        self.output.set_muted(muted);
        self.prefs.set(prefs::KEY_MUTED, json!(muted));
    }

    pub fn set_volume(&mut self, volume: f32) {
        let volume = prefs::clamp_volume(volume);
        self.state.volume = volume;
        self.output.set_volume(volume);
        self.prefs.set(prefs::KEY_VOLUME, json!(volume));
    }

    pub fn set_expanded(&mut self, expanded: bool) {
        self.state.is_expanded = expanded;
    }

    /// Foreground/background state of the controlling page or window.
    pub fn set_page_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Feed one event reported by the output.
    pub fn handle_media_event(&mut self, event: MediaEvent) {
        if self.disposed {
            return;
        }
        let now = self.now();
        match event {
            MediaEvent::Play => self.state.is_playing = true,
            MediaEvent::Playing => {
                self.state.is_playing = true;
                self.watchdog.mark_progress(now);
                self.failover.observe_progress();
                self.timers.clear(TimerKind::ConnectTimeout);
                self.signals.publish(RadioSignal::RadioStarted);
            }
            MediaEvent::Pause => {
                self.state.is_playing = false;
                self.timers.clear(TimerKind::ConnectTimeout);
            }
            MediaEvent::Progress => {
                self.watchdog.mark_progress(now);
                self.failover.observe_progress();
            }
            MediaEvent::Waiting | MediaEvent::Stalled => {
                tracing::debug!(?event, "output starved; nudging");
                self.nudge();
            }
            MediaEvent::Error(message) => {
                self.state.is_playing = false;
                self.timers.clear(TimerKind::ConnectTimeout);
                if self.output.is_paused() {
                    tracing::debug!(%message, "error on paused output ignored");
                } else {
                    tracing::warn!(%message, server = %self.failover.active(), "output error");
                    self.failover_to_backup(FailoverReason::Error);
                }
            }
        }
        self.sync_intervals(now);
    }

    /// React to a signal from another component.
    pub fn handle_signal(&mut self, signal: RadioSignal) {
        if self.disposed {
            return;
        }
        match signal {
            RadioSignal::VideoStarted => {
                tracing::debug!("video started; pausing radio");
                self.output.pause();
                self.state.is_playing = false;
                self.timers.clear(TimerKind::ConnectTimeout);
            }
            RadioSignal::Online => {
                tracing::info!("back online; reloading stream");
                self.soft_reload();
            }
            RadioSignal::RadioStarted | RadioSignal::RadioPaused | RadioSignal::ServerChanged(_) => {}
        }
        let now = self.now();
        self.sync_intervals(now);
    }

    /// Fire every timer that is due at the current clock time.
    pub fn advance(&mut self) {
        if self.disposed {
            return;
        }
        let now = self.now();
        for _ in 0..MAX_FIRES_PER_ADVANCE {
            let Some(kind) = self.timers.pop_due(now) else {
                break;
            };
            match kind {
                TimerKind::ConnectTimeout => self.on_connect_timeout(),
                TimerKind::Resume => self.resume(),
                TimerKind::VerifyPrimary => self.on_verify_primary(now),
                TimerKind::Watchdog => self.on_watchdog_tick(now),
                TimerKind::RetryPrimary => self.on_retry_primary(now),
            }
            self.sync_intervals(now);
        }
    }

    /// End the session: release the output and drop every timer.
    pub fn shutdown(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.timers.clear_all();
        self.output.release();
        self.state.is_playing = false;
        tracing::info!("radio controller disposed");
    }

    fn now(&self) -> Millis {
        self.clock.now_ms()
    }

    fn busted_active_url(&self) -> String {
        cache_bust(self.failover.active_url(), self.clock.wall_ms())
    }

    fn is_effectively_playing(&self) -> bool {
        self.state.is_playing && !self.output.is_paused()
    }

    fn arm_connect_guard(&mut self, now: Millis) {
        self.timers
            .arm(TimerKind::ConnectTimeout, now, self.config.connect_timeout_ms);
    }

    fn nudge(&mut self) {
        if let Err(e) = self.output.play() {
            tracing::debug!("nudge rejected: {e}");
        }
    }

    fn resume(&mut self) {
        if let Err(e) = self.output.play() {
            tracing::debug!("resume rejected: {e}");
        }
    }

    /// Re-point the output at the active server: pause, rebind, load, then
    /// resume if it was playing.
    fn rebind(&mut self, now: Millis) {
        let was_playing = !self.output.is_paused();
        let url = self.busted_active_url();
        self.output.pause();
        self.output.set_source(Some(url));
        self.output.load();
        self.watchdog.on_switch(now);

        if was_playing {
            self.arm_connect_guard(now);
            if let Err(e) = self.output.play() {
                tracing::debug!("resume after switch rejected: {e}");
                self.state.is_playing = false;
                self.timers.clear(TimerKind::ConnectTimeout);
            }
        }

        let server = self.failover.active();
        self.signals.publish(RadioSignal::ServerChanged(server));
        tracing::info!(%server, was_playing, "switched stream server");
    }

    /// Rebind the same server with a fresh cache-buster. Rate limited.
    fn soft_reload(&mut self) {
        let now = self.now();
        if self
            .watchdog
            .reload_cooling_down(now, self.monitor.soft_reload_cooldown_ms())
        {
            tracing::debug!("soft reload skipped (cooldown)");
            return;
        }
        self.watchdog.last_soft_reload_at = Some(now);

        let was_playing = !self.output.is_paused();
        let url = self.busted_active_url();
        self.output.pause();
        self.output.set_source(Some(url));
        self.output.load();
        self.watchdog.on_reload(now);

        if was_playing {
            self.arm_connect_guard(now);
            self.timers.arm(TimerKind::Resume, now, RELOAD_RESUME_DELAY_MS);
        }
        tracing::debug!(server = %self.failover.active(), was_playing, "soft reload");
    }

    fn failover_to_backup(&mut self, reason: FailoverReason) {
        let now = self.now();
        match self.failover.request_backup(now) {
            BackupDecision::InFlight => {
                tracing::debug!(reason = reason.as_str(), "failover ignored; switch in flight");
            }
            BackupDecision::SoftReload => {
                tracing::warn!(reason = reason.as_str(), "backup unhealthy; soft reload");
                self.soft_reload();
            }
            BackupDecision::Switched => {
                tracing::warn!(reason = reason.as_str(), "failing over to backup");
                self.timers.clear(TimerKind::ConnectTimeout);
                self.rebind(now);
            }
        }
    }

    fn try_return_to_primary(&mut self, now: Millis) {
        let was_playing = !self.output.is_paused();
        if !self.failover.begin_probe(now, was_playing) {
            return;
        }
        tracing::info!("probing primary");
        self.rebind(now);
        self.timers
            .arm(TimerKind::VerifyPrimary, now, self.config.verify_primary_ms);
    }

    fn on_connect_timeout(&mut self) {
        if self.output.is_paused() || !self.visible {
            return;
        }
        tracing::warn!(
            timeout_ms = self.config.connect_timeout_ms,
            server = %self.failover.active(),
            "no playback confirmation"
        );
        self.failover_to_backup(FailoverReason::ConnectTimeout);
    }

    fn on_verify_primary(&mut self, now: Millis) {
        match self.failover.finish_probe(now) {
            Some(ProbeOutcome::Confirmed) => {
                tracing::info!("primary verified; staying");
                self.timers.clear(TimerKind::ConnectTimeout);
                self.state.is_playing = true;
                self.watchdog.last_switch_at = now;
            }
            Some(ProbeOutcome::Reverted { was_playing }) => {
                tracing::warn!("primary not verified; back to backup");
                self.rebind(now);
                if was_playing && self.output.is_paused() {
                    self.arm_connect_guard(now);
                    self.resume();
                }
            }
            None => {}
        }
    }

    fn on_watchdog_tick(&mut self, now: Millis) {
        let input = TickInput {
            now,
            playing: self.is_effectively_playing(),
            visible: self.visible,
        };
        match self.monitor.evaluate(&mut self.watchdog, input) {
            Verdict::Skipped(_) | Verdict::Healthy => {}
            Verdict::Strike { strikes } => {
                tracing::debug!(strikes, "stall suspected; nudging");
                self.nudge();
            }
            Verdict::CoolingDown => {
                tracing::debug!("stall persists; soft reload cooling down");
            }
            Verdict::Recover(RecoveryStep::Nudge) => {
                tracing::warn!("stall recovery: nudge");
                self.nudge();
            }
            Verdict::Recover(RecoveryStep::SoftReload) => {
                tracing::warn!("stall recovery: soft reload");
                self.soft_reload();
            }
            Verdict::Recover(RecoveryStep::Failover) => {
                tracing::warn!("stall recovery exhausted");
                self.failover_to_backup(FailoverReason::Stall);
            }
        }
    }

    fn on_retry_primary(&mut self, now: Millis) {
        if self
            .failover
            .should_retry_primary(now, self.is_effectively_playing())
        {
            self.try_return_to_primary(now);
        }
    }

    /// Recreate the watchdog interval when play state or server changes, and
    /// keep the retry interval armed only while on backup.
    fn sync_intervals(&mut self, now: Millis) {
        if self.disposed {
            return;
        }
        let key = (
            self.state.is_playing,
            self.failover.active(),
            self.failover.last_failover_at(),
        );
        let previous = self.interval_key;
        if previous == Some(key) {
            return;
        }
        self.interval_key = Some(key);

        if previous.map(|(playing, active, _)| (playing, active)) != Some((key.0, key.1)) {
            self.timers
                .arm_interval(TimerKind::Watchdog, now, WATCHDOG_INTERVAL_MS);
        }
        if key.1 == ServerRole::Backup {
            self.timers.arm_interval(
                TimerKind::RetryPrimary,
                now,
                self.config.retry_primary_interval_ms,
            );
        } else {
            self.timers.clear(TimerKind::RetryPrimary);
        }
    }
}

impl<O: AudioOutput> Drop for RadioController<O> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Set (or replace) the `_ts` query parameter.
pub fn cache_bust(raw: &str, stamp: u64) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            let kept: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| k != "_ts")
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            url.query_pairs_mut()
                .clear()
                .extend_pairs(kept)
                .append_pair("_ts", &stamp.to_string());
            url.to_string()
        }
        Err(_) => {
            let sep = if raw.contains('?') { '&' } else { '?' };
            format!("{raw}{sep}_ts={stamp}")
        }
    }
}
