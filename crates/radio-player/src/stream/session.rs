//! One playback session: connect, decode, (resample,) play, and report.
//!
//! A session runs on its own thread and owns the CPAL stream, which must be
//! created and dropped on that thread. It reports back through the event sink
//! under the generation it was started in.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use cpal::traits::StreamTrait;

use super::decode::start_decode;
use super::device::{pick_device, pick_output_config};
use super::events::EventSink;
use super::http_source::{LiveHttpConfig, LiveHttpSource, extension_hint};
use super::playback::{OutputControls, build_output_stream};
use super::queue::SharedAudio;
use super::resample::start_resampler;
use crate::config::PlaybackConfig;
use crate::output::MediaEvent;

const REPORT_EVERY: Duration = Duration::from_millis(250);
const PROGRESS_EVERY_MS: u64 = 1_000;

pub(crate) struct SessionParams {
    pub url: String,
    pub device: Option<String>,
    pub playback: PlaybackConfig,
    pub http: LiveHttpConfig,
    pub volume_percent: Arc<AtomicU8>,
    pub muted: Arc<AtomicBool>,
    pub sink: EventSink,
}

pub(crate) struct SessionHandle {
    cancel: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl SessionHandle {
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal the session to stop without waiting for it. A session may be
    /// blocked in a connect for several seconds.
    pub fn cancel(self) {
        self.cancel.store(true, Ordering::Relaxed);
        thread::spawn(move || {
            let _ = self.join.join();
        });
    }
}

#[cfg(test)]
impl SessionHandle {
    /// Handle whose thread has already exited, plus its cancel flag.
    pub fn ended() -> (Self, Arc<AtomicBool>) {
        let join = thread::spawn(|| {});
        while !join.is_finished() {
            thread::yield_now();
        }
        let cancel = Arc::new(AtomicBool::new(false));
        let handle = Self {
            cancel: cancel.clone(),
            paused: Arc::new(AtomicBool::new(false)),
            join,
        };
        (handle, cancel)
    }
}

pub(crate) fn spawn(params: SessionParams) -> SessionHandle {
    let cancel = Arc::new(AtomicBool::new(false));
    let paused = Arc::new(AtomicBool::new(false));
    let generation = params.sink.current();

    let controls = OutputControls {
        paused: paused.clone(),
        volume_percent: params.volume_percent.clone(),
        muted: params.muted.clone(),
        played_frames: Arc::new(AtomicU64::new(0)),
        underruns: Arc::new(AtomicU64::new(0)),
    };
    let cancel_for_thread = cancel.clone();
    let join = thread::spawn(move || {
        let sink = params.sink.clone();
        let url = params.url.clone();
        if let Err(e) = run(params, &controls, &cancel_for_thread, generation) {
            if cancel_for_thread.load(Ordering::Relaxed) {
                tracing::debug!(url = %url, "cancelled session ended: {e:#}");
                return;
            }
            tracing::warn!(url = %url, "stream session failed: {e:#}");
            sink.emit_for(generation, MediaEvent::Error(format!("{e:#}")));
        }
    });

    SessionHandle {
        cancel,
        paused,
        join,
    }
}

fn run(
    params: SessionParams,
    controls: &OutputControls,
    cancel: &Arc<AtomicBool>,
    generation: u64,
) -> Result<()> {
    let SessionParams {
        url,
        device,
        playback,
        http,
        sink,
        ..
    } = params;

    let source = LiveHttpSource::connect(&url, &http, cancel.clone())?;
    let hint = extension_hint(source.content_type(), &url);
    let decoded = start_decode(Box::new(source), hint.as_deref(), playback.buffer_seconds)
        .context("probe stream")?;
    if cancel.load(Ordering::Relaxed) {
        decoded.queue.close();
        return Ok(());
    }

    let host = cpal::default_host();
    let device = pick_device(&host, device.as_deref())?;
    let supported = pick_output_config(&device, decoded.spec.rate)?;
    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.into();

    let out_queue = if stream_config.sample_rate != decoded.spec.rate {
        start_resampler(
            decoded.queue.clone(),
            decoded.spec.rate,
            stream_config.sample_rate,
            playback.chunk_frames,
            playback.buffer_seconds,
        )?
    } else {
        decoded.queue.clone()
    };

    let stream = build_output_stream(
        &device,
        &stream_config,
        sample_format,
        &out_queue,
        playback.refill_max_frames,
        controls.clone(),
    )?;
    stream.play().context("start output stream")?;
    tracing::info!(
        url = %url,
        codec = decoded.codec.unwrap_or("unknown"),
        source_rate = decoded.spec.rate,
        output_rate = stream_config.sample_rate,
        channels = decoded.spec.channels.count(),
        "stream session started"
    );

    let result = report(&out_queue, controls, cancel, &sink, generation);
    drop(stream);
    decoded.queue.close();
    out_queue.close();
    result
}

/// Poll the output counters and translate them into media events until the
/// session is cancelled or the stream runs dry.
fn report(
    queue: &SharedAudio,
    controls: &OutputControls,
    cancel: &AtomicBool,
    sink: &EventSink,
    generation: u64,
) -> Result<()> {
    let started = Instant::now();
    let mut reporter = Reporter::new(PROGRESS_EVERY_MS);
    loop {
        if cancel.load(Ordering::Relaxed) {
            return Ok(());
        }
        if queue.is_drained() {
            return Err(anyhow!("stream ended"));
        }
        let snapshot = Snapshot {
            played_frames: controls.played_frames.load(Ordering::Relaxed),
            underruns: controls.underruns.load(Ordering::Relaxed),
            paused: controls.paused.load(Ordering::Relaxed),
        };
        let now = started.elapsed().as_millis() as u64;
        for event in reporter.observe(snapshot, now) {
            if !sink.emit_for(generation, event) {
                return Ok(());
            }
        }
        thread::sleep(REPORT_EVERY);
    }
}

#[derive(Clone, Copy, Debug)]
struct Snapshot {
    played_frames: u64,
    underruns: u64,
    paused: bool,
}

/// Edge detector over the output counters.
#[derive(Debug)]
struct Reporter {
    progress_every_ms: u64,
    last_played: u64,
    last_underruns: u64,
    /// `Playing` sent since the last start or resume.
    announced: bool,
    starved: bool,
    last_progress_at: u64,
}

impl Reporter {
    fn new(progress_every_ms: u64) -> Self {
        Self {
            progress_every_ms,
            last_played: 0,
            last_underruns: 0,
            announced: false,
            starved: false,
            last_progress_at: 0,
        }
    }

    fn observe(&mut self, snap: Snapshot, now: u64) -> Vec<MediaEvent> {
        let mut events = Vec::new();
        let advanced = snap.played_frames > self.last_played;
        let new_underrun = snap.underruns > self.last_underruns;
        self.last_played = snap.played_frames;
        self.last_underruns = snap.underruns;

        if snap.paused {
            self.announced = false;
            self.starved = false;
            return events;
        }

        if advanced {
            self.starved = false;
            if !self.announced {
                self.announced = true;
                self.last_progress_at = now;
                events.push(MediaEvent::Playing);
            } else if now.saturating_sub(self.last_progress_at) >= self.progress_every_ms {
                self.last_progress_at = now;
                events.push(MediaEvent::Progress);
            }
        } else if new_underrun && self.announced && !self.starved {
            self.starved = true;
            events.push(MediaEvent::Waiting);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(played_frames: u64, underruns: u64, paused: bool) -> Snapshot {
        Snapshot {
            played_frames,
            underruns,
            paused,
        }
    }

    #[test]
    fn first_audio_reports_playing_then_throttled_progress() {
        let mut r = Reporter::new(1_000);
        assert!(r.observe(snap(0, 3, false), 0).is_empty());
        assert_eq!(r.observe(snap(512, 3, false), 250), vec![MediaEvent::Playing]);
        assert!(r.observe(snap(1_024, 3, false), 500).is_empty());
        assert_eq!(r.observe(snap(4_096, 3, false), 1_250), vec![MediaEvent::Progress]);
    }

    #[test]
    fn underrun_after_playing_reports_waiting_once() {
        let mut r = Reporter::new(1_000);
        r.observe(snap(512, 0, false), 0);
        assert_eq!(r.observe(snap(512, 1, false), 250), vec![MediaEvent::Waiting]);
        assert!(r.observe(snap(512, 4, false), 500).is_empty());
        r.observe(snap(1_024, 4, false), 750);
        assert_eq!(r.observe(snap(1_024, 5, false), 1_000), vec![MediaEvent::Waiting]);
    }

    #[test]
    fn startup_underruns_are_not_waiting() {
        let mut r = Reporter::new(1_000);
        assert!(r.observe(snap(0, 10, false), 250).is_empty());
    }

    #[test]
    fn resume_reports_playing_again() {
        let mut r = Reporter::new(1_000);
        r.observe(snap(512, 0, false), 0);
        assert!(r.observe(snap(512, 0, true), 250).is_empty());
        assert_eq!(r.observe(snap(1_024, 0, false), 500), vec![MediaEvent::Playing]);
    }
}
