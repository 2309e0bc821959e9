//! In-process signal bus shared by independent media components.
//!
//! The radio controller and any video consumer never reference each other;
//! they only publish and subscribe to [`RadioSignal`]s.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};
use radio_types::ServerRole;

/// Signals crossing component boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RadioSignal {
    /// The radio confirmed audible playback.
    RadioStarted,
    /// The radio was paused by an explicit request.
    RadioPaused,
    /// A video player elsewhere started playing.
    VideoStarted,
    /// The radio rebound its output to another server.
    ServerChanged(ServerRole),
    /// Network connectivity was restored.
    Online,
}

/// Fan-out publish/subscribe channel for [`RadioSignal`]s.
#[derive(Clone, Default)]
pub struct SignalBus {
    subscribers: Arc<Mutex<Vec<Sender<RadioSignal>>>>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every signal published after this call.
    pub fn subscribe(&self) -> Receiver<RadioSignal> {
        let (tx, rx) = crossbeam_channel::unbounded();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    /// Deliver `signal` to every live subscriber, dropping closed ones.
    pub fn publish(&self, signal: RadioSignal) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|tx| tx.send(signal).is_ok());
        }
        tracing::trace!(?signal, "signal published");
    }
}

/// The video side of the radio/video handshake.
///
/// Starting a video asks the radio to pause; the radio starting asks the
/// video to pause.
pub struct VideoSession {
    bus: SignalBus,
    inbox: Receiver<RadioSignal>,
    playing: bool,
}

impl VideoSession {
    pub fn new(bus: SignalBus) -> Self {
        let inbox = bus.subscribe();
        Self {
            bus,
            inbox,
            playing: false,
        }
    }

    pub fn start(&mut self) {
        self.playing = true;
        self.bus.publish(RadioSignal::VideoStarted);
    }

    pub fn stop(&mut self) {
        self.playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// React to a single signal.
    pub fn handle(&mut self, signal: RadioSignal) {
        if signal == RadioSignal::RadioStarted && self.playing {
            tracing::debug!("radio started; pausing video");
            self.playing = false;
        }
    }

    /// Drain and handle all queued signals.
    pub fn poll(&mut self) {
        while let Ok(signal) = self.inbox.try_recv() {
            self.handle(signal);
        }
    }
}
