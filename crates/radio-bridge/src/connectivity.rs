//! Connectivity watcher.
//!
//! Periodically opens a TCP connection to the primary stream host. When the
//! host becomes reachable again after a failed check, `Online` is published on
//! the signal bus.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use radio_player::signals::{RadioSignal, SignalBus};
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const STOP_POLL: Duration = Duration::from_millis(250);

/// Host and port to probe for `stream_url`.
pub fn probe_target(stream_url: &str) -> Option<(String, u16)> {
    let url = Url::parse(stream_url).ok()?;
    let host = url.host_str()?.to_string();
    let port = url.port_or_known_default()?;
    Some((host, port))
}

fn reachable(host: &str, port: u16) -> bool {
    let addrs = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::debug!(host, "resolve failed: {e}");
            return false;
        }
    };
    addrs
        .into_iter()
        .any(|addr| TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).is_ok())
}

/// Tracks reachability across checks.
#[derive(Debug, Default)]
pub struct OnlineTracker {
    last: Option<bool>,
}

impl OnlineTracker {
    /// Record a check; true only for an offline to online transition.
    pub fn observe(&mut self, reachable: bool) -> bool {
        let came_back = self.last == Some(false) && reachable;
        if self.last != Some(reachable) {
            tracing::info!(online = reachable, "connectivity changed");
        }
        self.last = Some(reachable);
        came_back
    }
}

/// Start the watcher thread. Returns `None` when the URL has no probeable host.
pub fn spawn_connectivity_watcher(
    stream_url: &str,
    interval: Duration,
    bus: SignalBus,
    stop: Arc<AtomicBool>,
) -> Option<JoinHandle<()>> {
    let Some((host, port)) = probe_target(stream_url) else {
        tracing::warn!(url = stream_url, "connectivity watcher disabled: no host in stream url");
        return None;
    };
    tracing::debug!(host = %host, port, "connectivity watcher started");
    Some(std::thread::spawn(move || {
        let mut tracker = OnlineTracker::default();
        while !stop.load(Ordering::Relaxed) {
            if tracker.observe(reachable(&host, port)) {
                bus.publish(RadioSignal::Online);
            }
            let mut waited = Duration::ZERO;
            while waited < interval && !stop.load(Ordering::Relaxed) {
                std::thread::sleep(STOP_POLL);
                waited += STOP_POLL;
            }
        }
    }))
}
