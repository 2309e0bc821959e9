//! Live HTTP radio output backed by Symphonia and CPAL.
//!
//! [`StreamOutput`] is the [`AudioOutput`] used outside of tests. Each started
//! source runs as a session thread (connect, decode, optional resample, device
//! output). Media events come back through an [`EventStream`].

pub mod decode;
pub mod device;
pub mod events;
pub mod http_source;
pub mod playback;
pub mod queue;
pub mod resample;
mod session;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::config::PlaybackConfig;
use crate::output::{AudioOutput, MediaEvent, PlayRejected};
use crate::prefs::DEFAULT_VOLUME;

pub use events::{EventSink, EventStream, StampedEvent, event_channel};
pub use http_source::LiveHttpConfig;

use session::{SessionHandle, SessionParams};

/// Settings for [`StreamOutput`].
#[derive(Clone, Debug, Default)]
pub struct StreamOutputConfig {
    /// Output device name substring; `None` for the host default.
    pub device: Option<String>,
    pub playback: PlaybackConfig,
    pub http: LiveHttpConfig,
}

pub struct StreamOutput {
    config: StreamOutputConfig,
    sink: EventSink,
    source: Option<String>,
    paused: bool,
    volume_percent: Arc<AtomicU8>,
    muted: Arc<AtomicBool>,
    session: Option<SessionHandle>,
}

impl StreamOutput {
    /// New paused output with no source, plus the stream its events arrive on.
    pub fn new(config: StreamOutputConfig) -> (Self, EventStream) {
        let (sink, events) = event_channel();
        (Self::with_sink(config, sink), events)
    }

    pub fn with_sink(config: StreamOutputConfig, sink: EventSink) -> Self {
        Self {
            config,
            sink,
            source: None,
            paused: true,
            volume_percent: Arc::new(AtomicU8::new(playback::volume_to_percent(DEFAULT_VOLUME))),
            muted: Arc::new(AtomicBool::new(false)),
            session: None,
        }
    }

    pub fn device(&self) -> Option<&str> {
        self.config.device.as_deref()
    }

    pub fn volume_percent(&self) -> u8 {
        self.volume_percent.load(Ordering::Relaxed)
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    fn stop_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel();
        }
    }

    fn check_device(&self) -> Result<(), PlayRejected> {
        let host = cpal::default_host();
        device::pick_device(&host, self.config.device.as_deref())
            .map(|_| ())
            .map_err(|e| PlayRejected::Device(format!("{e:#}")))
    }
}

impl AudioOutput for StreamOutput {
    fn set_source(&mut self, url: Option<String>) {
        if url != self.source {
            self.stop_session();
        }
        self.source = url;
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    fn load(&mut self) {
        self.stop_session();
        let generation = self.sink.bump();
        tracing::trace!(generation, source = ?self.source, "output load");
    }

    fn play(&mut self) -> Result<(), PlayRejected> {
        let Some(url) = self.source.clone() else {
            return Err(PlayRejected::NoSource);
        };

        match &self.session {
            Some(session) if !session.is_finished() => session.set_paused(false),
            // An ended session reports its error; reconnecting is left to a reload.
            Some(_) => tracing::debug!(url = %url, "stream session ended; not restarting"),
            None => {
                self.check_device()?;
                tracing::debug!(url = %url, "starting stream session");
                self.session = Some(session::spawn(SessionParams {
                    url,
                    device: self.config.device.clone(),
                    playback: self.config.playback.clone(),
                    http: self.config.http.clone(),
                    volume_percent: self.volume_percent.clone(),
                    muted: self.muted.clone(),
                    sink: self.sink.clone(),
                }));
            }
        }
        self.paused = false;
        self.sink.emit(MediaEvent::Play);
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(session) = &self.session {
            session.set_paused(true);
        }
        if !self.paused {
            self.paused = true;
            self.sink.emit(MediaEvent::Pause);
        }
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume_percent
            .store(playback::volume_to_percent(volume), Ordering::Relaxed);
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    fn release(&mut self) {
        self.pause();
        self.source = None;
        self.load();
        tracing::debug!("stream output released");
    }
}

impl Drop for StreamOutput {
    fn drop(&mut self) {
        self.stop_session();
    }
}
