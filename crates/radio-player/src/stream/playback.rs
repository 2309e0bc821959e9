//! CPAL output stage.
//!
//! The callback never blocks: it refills a local buffer from the queue with a
//! non-blocking pop, maps channels, applies gain and writes silence on
//! underrun. While paused it writes silence without draining the queue.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use super::queue::{PopStrategy, SharedAudio};

/// Shared knobs and counters between the session and the callback.
#[derive(Clone)]
pub struct OutputControls {
    pub paused: Arc<AtomicBool>,
    /// Volume in percent, `0..=100`.
    pub volume_percent: Arc<AtomicU8>,
    pub muted: Arc<AtomicBool>,
    /// Frames of real audio written to the device.
    pub played_frames: Arc<AtomicU64>,
    /// Callbacks that ran out of buffered audio.
    pub underruns: Arc<AtomicU64>,
}

impl OutputControls {
    pub fn gain(&self) -> f32 {
        if self.muted.load(Ordering::Relaxed) {
            return 0.0;
        }
        f32::from(self.volume_percent.load(Ordering::Relaxed).min(100)) / 100.0
    }
}

pub fn volume_to_percent(volume: f32) -> u8 {
    (volume.clamp(0.0, 1.0) * 100.0).round() as u8
}

pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SharedAudio>,
    refill_max_frames: usize,
    controls: OutputControls,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build::<f32>(device, config, queue, refill_max_frames, controls),
        cpal::SampleFormat::I32 => build::<i32>(device, config, queue, refill_max_frames, controls),
        cpal::SampleFormat::I16 => build::<i16>(device, config, queue, refill_max_frames, controls),
        cpal::SampleFormat::U16 => build::<u16>(device, config, queue, refill_max_frames, controls),
        other => Err(anyhow!("unsupported sample format {other:?}")),
    }
}

fn build<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SharedAudio>,
    refill_max_frames: usize,
    controls: OutputControls,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let out_channels = usize::from(config.channels).max(1);
    let refill = refill_max_frames.max(1);
    let queue = queue.clone();
    let local = Mutex::new(Pending::new(queue.channels()));

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
            if controls.paused.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }
            let gain = controls.gain();
            let mut pending = local.lock().unwrap_or_else(PoisonError::into_inner);
            let frames = data.len() / out_channels;
            let mut written = 0usize;

            for frame in data.chunks_mut(out_channels).take(frames) {
                if pending.is_empty() {
                    match queue.pop(PopStrategy::NonBlocking { max_frames: refill }) {
                        Some(samples) => pending.refill(samples),
                        None => {
                            controls.underruns.fetch_add(1, Ordering::Relaxed);
                            break;
                        }
                    }
                }
                for (ch, slot) in frame.iter_mut().enumerate() {
                    let sample = pending.sample_for(ch, out_channels) * gain;
                    *slot = <T as cpal::Sample>::from_sample::<f32>(sample);
                }
                pending.advance();
                written += 1;
            }

            data[written * out_channels..].fill(silence);
            if written > 0 {
                controls
                    .played_frames
                    .fetch_add(written as u64, Ordering::Relaxed);
            }
        },
        |err| tracing::warn!("output stream error: {err}"),
        None,
    )?;
    Ok(stream)
}

/// Samples popped from the queue but not yet written.
struct Pending {
    channels: usize,
    samples: Vec<f32>,
    pos: usize,
}

impl Pending {
    fn new(channels: usize) -> Self {
        Self {
            channels: channels.max(1),
            samples: Vec::new(),
            pos: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.pos + self.channels > self.samples.len()
    }

    fn refill(&mut self, samples: Vec<f32>) {
        self.samples = samples;
        self.pos = 0;
    }

    fn advance(&mut self) {
        self.pos += self.channels;
    }

    /// Source sample for output channel `ch`: mono is duplicated, stereo is
    /// averaged down to mono, other layouts clamp to the last source channel.
    fn sample_for(&self, ch: usize, out_channels: usize) -> f32 {
        let frame = &self.samples[self.pos..self.pos + self.channels];
        match (self.channels, out_channels) {
            (2, 1) => 0.5 * (frame[0] + frame[1]),
            (src, _) => frame[ch.min(src - 1)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controls() -> OutputControls {
        OutputControls {
            paused: Arc::new(AtomicBool::new(false)),
            volume_percent: Arc::new(AtomicU8::new(90)),
            muted: Arc::new(AtomicBool::new(false)),
            played_frames: Arc::new(AtomicU64::new(0)),
            underruns: Arc::new(AtomicU64::new(0)),
        }
    }

    #[test]
    fn gain_follows_volume_and_mute() {
        let c = controls();
        assert!((c.gain() - 0.9).abs() < 1e-6);
        c.muted.store(true, Ordering::Relaxed);
        assert_eq!(c.gain(), 0.0);
    }

    #[test]
    fn volume_percent_rounds_and_clamps() {
        assert_eq!(volume_to_percent(0.904), 90);
        assert_eq!(volume_to_percent(1.5), 100);
        assert_eq!(volume_to_percent(-1.0), 0);
    }

    #[test]
    fn pending_maps_mono_to_stereo() {
        let mut p = Pending::new(1);
        p.refill(vec![0.5, 0.25]);
        assert_eq!(p.sample_for(0, 2), 0.5);
        assert_eq!(p.sample_for(1, 2), 0.5);
        p.advance();
        assert_eq!(p.sample_for(1, 2), 0.25);
        p.advance();
        assert!(p.is_empty());
    }

    #[test]
    fn pending_downmixes_stereo() {
        let mut p = Pending::new(2);
        p.refill(vec![1.0, 0.0]);
        assert_eq!(p.sample_for(0, 1), 0.5);
        assert_eq!(p.sample_for(1, 2), 0.0);
    }
}
