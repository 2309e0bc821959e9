//! Player configuration.
//!
//! Failover tuning is resolved from (lowest to highest precedence) built-in
//! defaults, an optional TOML file, `RADIO_*` environment variables and CLI
//! overrides. Every numeric knob is clamped to a sane range.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::clock::Millis;

/// Playback tuning parameters shared by decode/resample/playback stages.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Resampler chunk size in frames.
    pub chunk_frames: usize,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
    /// Target buffer duration for queue sizing.
    pub buffer_seconds: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            refill_max_frames: 4096,
            buffer_seconds: 2.0,
        }
    }
}

pub const ENV_PRIMARY: &str = "RADIO_STREAM_PRIMARY";
pub const ENV_BACKUP: &str = "RADIO_STREAM_BACKUP";
pub const ENV_DEBUG: &str = "RADIO_PLAYER_DEBUG";

/// Watchdog evaluation period.
pub const WATCHDOG_INTERVAL_MS: Millis = 2_000;
/// In-flight latch held after a failover request.
pub const SWITCH_LATCH_MS: Millis = 300;
/// In-flight latch held after a primary probe resolves.
pub const PROBE_LATCH_MS: Millis = 120;
/// Delay between a soft reload and the resume call.
pub const RELOAD_RESUME_DELAY_MS: Millis = 200;

/// Bounded integer knob: env key, default and inclusive range.
struct Knob {
    env: &'static str,
    default: u64,
    min: u64,
    max: u64,
}

const STALL_MS: Knob = Knob { env: "RADIO_PLAYER_STALL_MS", default: 15_000, min: 5_000, max: 60_000 };
const CONNECT_TIMEOUT_MS: Knob = Knob { env: "RADIO_PLAYER_CONNECT_TIMEOUT_MS", default: 15_000, min: 5_000, max: 60_000 };
const STICKY_MS: Knob = Knob { env: "RADIO_PLAYER_STICKY_MS", default: 300_000, min: 10_000, max: 1_800_000 };
const RETRY_PRIMARY_MS: Knob = Knob { env: "RADIO_PLAYER_RETRY_PRIMARY_MS", default: 120_000, min: 20_000, max: 600_000 };
const VERIFY_MS: Knob = Knob { env: "RADIO_PLAYER_VERIFY_MS", default: 6_000, min: 1_000, max: 30_000 };
const STALL_STRIKES: Knob = Knob { env: "RADIO_PLAYER_STALL_STRIKES", default: 2, min: 1, max: 5 };
const GRACE_MS: Knob = Knob { env: "RADIO_PLAYER_GRACE_MS", default: 12_000, min: 2_000, max: 30_000 };
const RELOAD_COOLDOWN_MS: Knob = Knob { env: "RADIO_PLAYER_RELOAD_COOLDOWN_MS", default: 10_000, min: 2_000, max: 60_000 };

/// Errors raised while resolving [`FailoverConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required stream URL was missing or blank.
    MissingStreamUrl { key: &'static str },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingStreamUrl { key } => {
                write!(f, "stream url is required (set {key} or pass it on the command line)")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Failover and watchdog tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailoverConfig {
    pub primary_url: String,
    pub backup_url: String,
    /// Enables verbose recovery logging.
    pub debug: bool,
    /// Time without progress before a tick counts as a stall.
    pub stall_threshold_ms: Millis,
    /// Time to wait for the first `Playing` confirmation.
    pub connect_timeout_ms: Millis,
    /// Minimum dwell on backup before probing primary.
    pub sticky_backup_ms: Millis,
    /// How often a return to primary is attempted while on backup.
    pub retry_primary_interval_ms: Millis,
    /// Window in which primary must show progress after a probe.
    pub verify_primary_ms: Millis,
    /// Consecutive stall ticks required before escalating.
    pub stall_strikes: u32,
    /// Stall detection is suppressed this long after any switch.
    pub grace_after_switch_ms: Millis,
    /// Minimum spacing between soft reloads.
    pub soft_reload_cooldown_ms: Millis,
}

impl FailoverConfig {
    /// Defaults for the given stream pair (no clamping applied to URLs).
    pub fn with_urls(primary_url: impl Into<String>, backup_url: impl Into<String>) -> Self {
        Self {
            primary_url: primary_url.into(),
            backup_url: backup_url.into(),
            debug: false,
            stall_threshold_ms: STALL_MS.default,
            connect_timeout_ms: CONNECT_TIMEOUT_MS.default,
            sticky_backup_ms: STICKY_MS.default,
            retry_primary_interval_ms: RETRY_PRIMARY_MS.default,
            verify_primary_ms: VERIFY_MS.default,
            stall_strikes: STALL_STRIKES.default as u32,
            grace_after_switch_ms: GRACE_MS.default,
            soft_reload_cooldown_ms: RELOAD_COOLDOWN_MS.default,
        }
    }

    /// Resolve from an optional file, an env-style lookup and CLI overrides.
    pub fn resolve<F>(
        file: Option<&PlayerFileConfig>,
        lookup: F,
        overrides: &StreamOverrides,
    ) -> std::result::Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let streams = file.and_then(|f| f.streams.as_ref());
        let tuning = file.and_then(|f| f.tuning.as_ref());

        let primary_url = pick_url(
            overrides.primary.as_deref(),
            lookup(ENV_PRIMARY),
            streams.and_then(|s| s.primary.clone()),
        )
        .ok_or(ConfigError::MissingStreamUrl { key: ENV_PRIMARY })?;
        let backup_url = pick_url(
            overrides.backup.as_deref(),
            lookup(ENV_BACKUP),
            streams.and_then(|s| s.backup.clone()),
        )
        .ok_or(ConfigError::MissingStreamUrl { key: ENV_BACKUP })?;

        let debug = match lookup(ENV_DEBUG) {
            Some(v) => v.trim() == "1",
            None => file.and_then(|f| f.debug).unwrap_or(false),
        };

        let knob = |k: &Knob, from_file: Option<u64>| -> u64 {
            let env = lookup(k.env);
            resolve_knob(k, env.as_deref(), from_file)
        };

        Ok(Self {
            primary_url,
            backup_url,
            debug,
            stall_threshold_ms: knob(&STALL_MS, tuning.and_then(|t| t.stall_ms)),
            connect_timeout_ms: knob(&CONNECT_TIMEOUT_MS, tuning.and_then(|t| t.connect_timeout_ms)),
            sticky_backup_ms: knob(&STICKY_MS, tuning.and_then(|t| t.sticky_ms)),
            retry_primary_interval_ms: knob(&RETRY_PRIMARY_MS, tuning.and_then(|t| t.retry_primary_ms)),
            verify_primary_ms: knob(&VERIFY_MS, tuning.and_then(|t| t.verify_ms)),
            stall_strikes: knob(&STALL_STRIKES, tuning.and_then(|t| t.stall_strikes)) as u32,
            grace_after_switch_ms: knob(&GRACE_MS, tuning.and_then(|t| t.grace_ms)),
            soft_reload_cooldown_ms: knob(&RELOAD_COOLDOWN_MS, tuning.and_then(|t| t.reload_cooldown_ms)),
        })
    }
}

/// Stream URLs supplied on the command line.
#[derive(Clone, Debug, Default)]
pub struct StreamOverrides {
    pub primary: Option<String>,
    pub backup: Option<String>,
}

/// Optional TOML configuration file.
///
/// ```toml
/// debug = false
///
/// [streams]
/// primary = "https://stream.example/live.mp3"
/// backup = "https://backup.example/live.mp3"
///
/// [tuning]
/// stall_ms = 15000
/// stall_strikes = 2
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct PlayerFileConfig {
    pub debug: Option<bool>,
    pub streams: Option<StreamsSection>,
    pub tuning: Option<TuningSection>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamsSection {
    pub primary: Option<String>,
    pub backup: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TuningSection {
    pub stall_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub sticky_ms: Option<u64>,
    pub retry_primary_ms: Option<u64>,
    pub verify_ms: Option<u64>,
    pub stall_strikes: Option<u64>,
    pub grace_ms: Option<u64>,
    pub reload_cooldown_ms: Option<u64>,
}

impl PlayerFileConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::from_toml_str(&raw).with_context(|| format!("parse config {:?}", path))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str::<PlayerFileConfig>(raw)?)
    }
}

fn pick_url(cli: Option<&str>, env: Option<String>, file: Option<String>) -> Option<String> {
    [cli.map(str::to_string), env, file]
        .into_iter()
        .flatten()
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

/// Env value wins over the file value; unparseable env values fall back to the
/// file value or the default. The result is clamped to the knob's range.
fn resolve_knob(knob: &Knob, env: Option<&str>, from_file: Option<u64>) -> u64 {
    let parsed = env.and_then(|raw| raw.trim().parse::<i64>().ok());
    match parsed {
        Some(v) => (v.max(0) as u64).clamp(knob.min, knob.max),
        None => from_file
            .map(|v| v.clamp(knob.min, knob.max))
            .unwrap_or(knob.default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn resolve_uses_defaults_when_only_urls_set() {
        let env = lookup(&[(ENV_PRIMARY, "http://a/live"), (ENV_BACKUP, "http://b/live")]);
        let cfg = FailoverConfig::resolve(None, env, &StreamOverrides::default()).unwrap();
        assert_eq!(cfg, FailoverConfig::with_urls("http://a/live", "http://b/live"));
        assert_eq!(cfg.stall_threshold_ms, 15_000);
        assert_eq!(cfg.sticky_backup_ms, 300_000);
        assert_eq!(cfg.stall_strikes, 2);
        assert!(!cfg.debug);
    }

    #[test]
    fn resolve_clamps_out_of_range_values() {
        let env = lookup(&[
            (ENV_PRIMARY, "http://a"),
            (ENV_BACKUP, "http://b"),
            ("RADIO_PLAYER_STALL_MS", "100"),
            ("RADIO_PLAYER_STALL_STRIKES", "9"),
            ("RADIO_PLAYER_STICKY_MS", "99999999"),
            ("RADIO_PLAYER_VERIFY_MS", "-5"),
        ]);
        let cfg = FailoverConfig::resolve(None, env, &StreamOverrides::default()).unwrap();
        assert_eq!(cfg.stall_threshold_ms, 5_000);
        assert_eq!(cfg.stall_strikes, 5);
        assert_eq!(cfg.sticky_backup_ms, 1_800_000);
        assert_eq!(cfg.verify_primary_ms, 1_000);
    }

    #[test]
    fn resolve_ignores_unparseable_values() {
        let env = lookup(&[
            (ENV_PRIMARY, "http://a"),
            (ENV_BACKUP, "http://b"),
            ("RADIO_PLAYER_GRACE_MS", "soon"),
            (ENV_DEBUG, "1"),
        ]);
        let cfg = FailoverConfig::resolve(None, env, &StreamOverrides::default()).unwrap();
        assert_eq!(cfg.grace_after_switch_ms, 12_000);
        assert!(cfg.debug);
    }

    #[test]
    fn resolve_requires_both_urls() {
        let env = lookup(&[(ENV_PRIMARY, "http://a"), (ENV_BACKUP, "   ")]);
        let err = FailoverConfig::resolve(None, env, &StreamOverrides::default()).unwrap_err();
        assert_eq!(err, ConfigError::MissingStreamUrl { key: ENV_BACKUP });
        assert!(err.to_string().contains(ENV_BACKUP));
    }

    #[test]
    fn precedence_is_cli_then_env_then_file() {
        let file = PlayerFileConfig::from_toml_str(
            r#"
            debug = true

            [streams]
            primary = "http://file-a"
            backup = "http://file-b"

            [tuning]
            stall_ms = 20000
            grace_ms = 1
            "#,
        )
        .unwrap();
        let env = lookup(&[(ENV_BACKUP, "http://env-b"), ("RADIO_PLAYER_STALL_MS", "30000")]);
        let overrides = StreamOverrides {
            primary: Some("http://cli-a".to_string()),
            backup: None,
        };
        let cfg = FailoverConfig::resolve(Some(&file), env, &overrides).unwrap();
        assert_eq!(cfg.primary_url, "http://cli-a");
        assert_eq!(cfg.backup_url, "http://env-b");
        assert_eq!(cfg.stall_threshold_ms, 30_000);
        assert_eq!(cfg.grace_after_switch_ms, 2_000);
        assert!(cfg.debug);
    }

    #[test]
    fn file_config_rejects_bad_toml() {
        assert!(PlayerFileConfig::from_toml_str("[streams\nprimary=").is_err());
    }

    #[test]
    fn playback_defaults_are_stable() {
        let playback = PlaybackConfig::default();
        assert_eq!(playback.chunk_frames, 1024);
        assert_eq!(playback.refill_max_frames, 4096);
        assert_eq!(playback.buffer_seconds, 2.0);
    }
}
