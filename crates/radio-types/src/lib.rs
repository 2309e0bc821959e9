use serde::{Deserialize, Serialize};

/// Which upstream stream is attached to the output.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServerRole {
    /// Preferred source.
    #[default]
    Primary,
    /// Fallback source used after a failover.
    Backup,
}

impl ServerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerRole::Primary => "primary",
            ServerRole::Backup => "backup",
        }
    }
}

impl std::fmt::Display for ServerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a failover to the backup stream was requested.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailoverReason {
    /// The watchdog exhausted its recovery ladder.
    Stall,
    /// The output reported an error while it was expected to play.
    Error,
    /// The source never confirmed playback within the connect timeout.
    ConnectTimeout,
}

impl FailoverReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailoverReason::Stall => "stall",
            FailoverReason::Error => "error",
            FailoverReason::ConnectTimeout => "connect_timeout",
        }
    }
}

/// Player state reported to control clients.
///
/// `playing` reflects user intent or the most recent confirmed output event,
/// not a guarantee that audio is currently flowing.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerStatus {
    /// Optimistic play/pause state.
    pub playing: bool,
    /// Output mute flag (persisted).
    pub muted: bool,
    /// Output volume in `0.0..=1.0` (persisted).
    pub volume: f32,
    /// Expanded player view flag.
    pub expanded: bool,
    /// Whether the controlling page/window is in the foreground.
    pub visible: bool,
    /// Server currently bound to the output.
    pub active_server: ServerRole,
    /// Primary stream URL.
    pub primary_url: String,
    /// Backup stream URL.
    pub backup_url: String,
    /// Milliseconds since controller start of the most recent failover, if any.
    pub last_failover_at_ms: Option<u64>,
    /// `true` while a return to primary is being verified.
    pub verifying_primary: bool,
}
