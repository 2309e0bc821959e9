//! Radio Bridge: a streaming radio player with primary/backup failover,
//! controlled over HTTP.
//!
//! ## Pipeline
//! 1. **Fetch**: a live HTTP stream is read on a background thread.
//! 2. **Decode**: Symphonia decodes it into interleaved `f32`.
//! 3. **Resample**: Rubato converts to the device rate when the two differ.
//! 4. **Playback**: the CPAL callback pulls audio without blocking.
//!
//! A single player thread owns the controller that watches playback health and
//! moves between the primary and backup streams.

mod cli;
mod connectivity;
mod http_api;
mod runtime;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use actix_web::{App, HttpServer, middleware::Logger, web};
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use radio_player::config::{ENV_DEBUG, FailoverConfig, PlaybackConfig, PlayerFileConfig, StreamOverrides};
use radio_player::signals::SignalBus;
use radio_player::stream::{LiveHttpConfig, StreamOutputConfig, device};
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    let debug = std::env::var(ENV_DEBUG).is_ok_and(|v| v.trim() == "1");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(default_filter(debug))
        }))
        .init();

    if args.list_devices {
        let host = cpal::default_host();
        for name in device::list_device_names(&host)? {
            println!("{name}");
        }
        return Ok(());
    }

    match args.command() {
        cli::Command::Listen => run_listen(args).await,
    }
}

fn default_filter(debug: bool) -> &'static str {
    if debug {
        "info,actix_web=info,radio_bridge=debug,radio_player=debug"
    } else {
        "info,actix_web=info,radio_bridge=info,radio_player=info"
    }
}

async fn run_listen(args: cli::Args) -> Result<()> {
    let file = args
        .config
        .as_deref()
        .map(PlayerFileConfig::load)
        .transpose()?;
    let overrides = StreamOverrides {
        primary: args.primary.clone(),
        backup: args.backup.clone(),
    };
    let failover = FailoverConfig::resolve(file.as_ref(), |key| std::env::var(key).ok(), &overrides)
        .map_err(|e| anyhow!(e))
        .context("resolve stream configuration")?;

    tracing::info!(
        primary = %failover.primary_url,
        backup = %failover.backup_url,
        stall_ms = failover.stall_threshold_ms,
        strikes = failover.stall_strikes,
        bind = %args.http_bind,
        "starting radio-bridge"
    );

    let bus = SignalBus::new();
    let device = args
        .device
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);
    let primary_url = failover.primary_url.clone();
    let http = LiveHttpConfig {
        idle_timeout: Duration::from_millis(failover.stall_threshold_ms.saturating_add(5_000)),
        ..LiveHttpConfig::default()
    };
    let player = runtime::spawn_player(runtime::PlayerSetup {
        failover,
        output: StreamOutputConfig {
            device: device.clone(),
            playback: PlaybackConfig {
                chunk_frames: args.chunk_frames,
                refill_max_frames: args.refill_max_frames,
                buffer_seconds: args.buffer_seconds,
            },
            http,
        },
        prefs_path: args.prefs.clone(),
        autoplay: args.autoplay,
        bus: bus.clone(),
    });

    let stop_watcher = Arc::new(AtomicBool::new(false));
    let watcher = connectivity::spawn_connectivity_watcher(
        &primary_url,
        Duration::from_secs(args.online_check_secs.max(1)),
        bus.clone(),
        stop_watcher.clone(),
    );

    let state = web::Data::new(http_api::AppState {
        cmd_tx: player.cmd_tx.clone(),
        status: player.status.clone(),
        bus,
        device,
    });
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default().exclude("/status").exclude("/health"))
            .configure(http_api::configure)
    })
    .disable_signals()
    .bind(args.http_bind)
    .with_context(|| format!("bind {}", args.http_bind))?
    .run();

    let server_handle = server.handle();
    let shutdown_tx = player.cmd_tx.clone();
    let _ = ctrlc::set_handler(move || {
        tracing::info!("interrupt received; shutting down");
        let _ = shutdown_tx.send(runtime::PlayerCommand::Shutdown);
        drop(server_handle.stop(true));
    });

    let served = server.await;

    stop_watcher.store(true, Ordering::Relaxed);
    player.shutdown();
    if let Some(watcher) = watcher {
        let _ = watcher.join();
    }
    served.context("http server")
}
