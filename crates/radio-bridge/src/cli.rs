use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "radio-bridge", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Primary stream URL (overrides RADIO_STREAM_PRIMARY and the config file)
    #[arg(long)]
    pub primary: Option<String>,

    /// Backup stream URL (overrides RADIO_STREAM_BACKUP and the config file)
    #[arg(long)]
    pub backup: Option<String>,

    /// TOML config file with stream URLs and failover tuning
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Preferences file (defaults to the per-user config dir)
    #[arg(long)]
    pub prefs: Option<PathBuf>,

    /// Start playing as soon as the player is up
    #[arg(long)]
    pub autoplay: bool,

    /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long, default_value_t = 1024)]
    pub chunk_frames: usize,

    /// Playback callback refill cap (frames). Larger reduces lock churn but can add latency.
    #[arg(long, default_value_t = 4096)]
    pub refill_max_frames: usize,

    /// Queue buffer target in seconds (per stage)
    #[arg(long, default_value_t = 2.0)]
    pub buffer_seconds: f32,

    /// HTTP API bind address, e.g. 127.0.0.1:5560
    #[arg(long, default_value = "127.0.0.1:5560")]
    pub http_bind: SocketAddr,

    /// Seconds between connectivity checks against the primary stream host
    #[arg(long, default_value_t = 10)]
    pub online_check_secs: u64,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the player and its HTTP control API (default)
    Listen,
}

impl Args {
    pub fn command(&self) -> Command {
        self.cmd.unwrap_or(Command::Listen)
    }
}
