//! Bounded sample queue between decode, resample and the output callback.
//!
//! Samples are interleaved `f32`. Producers block when the queue is full;
//! the output callback only ever pops without blocking. `close()` wakes
//! everyone and makes blocked pushes return.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

pub struct SharedAudio {
    channels: usize,
    capacity_samples: usize,
    inner: Mutex<Inner>,
    cv: Condvar,
}

struct Inner {
    samples: VecDeque<f32>,
    closed: bool,
}

/// How [`SharedAudio::pop`] waits for data.
#[derive(Clone, Copy, Debug)]
pub enum PopStrategy {
    /// Wait for exactly `frames`; `None` if closed first.
    BlockingExact { frames: usize },
    /// Wait for at least one frame, take up to `max_frames`.
    BlockingUpTo { max_frames: usize },
    /// Take up to `max_frames` of what is buffered now.
    NonBlocking { max_frames: usize },
}

/// Queue capacity in samples for `seconds` of audio (2 s if not positive).
pub fn capacity_for(rate_hz: u32, channels: usize, seconds: f32) -> usize {
    let seconds = if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        2.0
    };
    let frames = (rate_hz as f32 * seconds).ceil() as usize;
    frames.max(1).saturating_mul(channels.max(1))
}

impl SharedAudio {
    pub fn new(channels: usize, capacity_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            capacity_samples: capacity_samples.max(channels),
            inner: Mutex::new(Inner {
                samples: VecDeque::new(),
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn len_frames(&self) -> usize {
        self.lock().samples.len() / self.channels
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Closed and nothing left to play.
    pub fn is_drained(&self) -> bool {
        let g = self.lock();
        g.closed && g.samples.len() < self.channels
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.cv.notify_all();
    }

    /// Append samples, waiting for room. Returns `false` if the queue closed
    /// before everything was written.
    pub fn push_blocking(&self, samples: &[f32]) -> bool {
        let mut offset = 0;
        while offset < samples.len() {
            let mut g = self.lock();
            while g.samples.len() >= self.capacity_samples && !g.closed {
                g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
            }
            if g.closed {
                return false;
            }
            let room = self.capacity_samples - g.samples.len();
            let take = room.min(samples.len() - offset);
            g.samples.extend(&samples[offset..offset + take]);
            offset += take;
            drop(g);
            self.cv.notify_all();
        }
        true
    }

    pub fn pop(&self, strategy: PopStrategy) -> Option<Vec<f32>> {
        let mut g = self.lock();
        let take_frames = match strategy {
            PopStrategy::BlockingExact { frames } => {
                let want = frames * self.channels;
                while g.samples.len() < want && !g.closed {
                    g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
                }
                if g.samples.len() < want {
                    return None;
                }
                frames
            }
            PopStrategy::BlockingUpTo { max_frames } => {
                while g.samples.len() < self.channels && !g.closed {
                    g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
                }
                (g.samples.len() / self.channels).min(max_frames)
            }
            PopStrategy::NonBlocking { max_frames } => {
                (g.samples.len() / self.channels).min(max_frames)
            }
        };
        if take_frames == 0 {
            return None;
        }
        let out: Vec<f32> = g.samples.drain(..take_frames * self.channels).collect();
        drop(g);
        self.cv.notify_all();
        Some(out)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
