//! Generation-stamped media event channel.
//!
//! Every `load()` on the output starts a new generation. Events stamped with
//! an older generation are dropped on the receiving side, so a session that is
//! still winding down cannot report into the source that replaced it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};

use crate::output::MediaEvent;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StampedEvent {
    pub generation: u64,
    pub event: MediaEvent,
}

/// Sending half, held by the output and its session threads.
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<StampedEvent>,
    generation: Arc<AtomicU64>,
}

/// Receiving half, polled by whoever drives the controller.
pub struct EventStream {
    rx: Receiver<StampedEvent>,
    generation: Arc<AtomicU64>,
}

pub fn event_channel() -> (EventSink, EventStream) {
    let (tx, rx) = unbounded();
    let generation = Arc::new(AtomicU64::new(0));
    (
        EventSink {
            tx,
            generation: generation.clone(),
        },
        EventStream { rx, generation },
    )
}

impl EventSink {
    pub fn current(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Start a new generation and return it.
    pub fn bump(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Emit under the current generation.
    pub fn emit(&self, event: MediaEvent) {
        self.emit_for(self.current(), event);
    }

    /// Emit under `generation`. Returns false once the stream side is gone.
    pub fn emit_for(&self, generation: u64, event: MediaEvent) -> bool {
        self.tx.send(StampedEvent { generation, event }).is_ok()
    }
}

impl EventStream {
    /// Raw receiver, for use in `select!`. Pass what it yields to
    /// [`EventStream::accept`].
    pub fn receiver(&self) -> &Receiver<StampedEvent> {
        &self.rx
    }

    /// The event, unless it belongs to a superseded generation.
    pub fn accept(&self, stamped: StampedEvent) -> Option<MediaEvent> {
        if stamped.generation == self.generation.load(Ordering::Acquire) {
            Some(stamped.event)
        } else {
            tracing::trace!(
                generation = stamped.generation,
                event = ?stamped.event,
                "dropping stale media event"
            );
            None
        }
    }

    /// Next current event already queued, skipping stale ones.
    pub fn try_next(&self) -> Option<MediaEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(stamped) => {
                    if let Some(event) = self.accept(stamped) {
                        return Some(event);
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_generation_passes() {
        let (sink, stream) = event_channel();
        sink.emit(MediaEvent::Playing);
        assert_eq!(stream.try_next(), Some(MediaEvent::Playing));
        assert_eq!(stream.try_next(), None);
    }

    #[test]
    fn events_before_load_are_dropped() {
        let (sink, stream) = event_channel();
        sink.emit(MediaEvent::Pause);
        let stale = sink.current();
        sink.bump();
        sink.emit_for(stale, MediaEvent::Error("stream ended".into()));
        sink.emit(MediaEvent::Play);
        assert_eq!(stream.try_next(), Some(MediaEvent::Play));
        assert_eq!(stream.try_next(), None);
    }

    #[test]
    fn emit_reports_closed_stream() {
        let (sink, stream) = event_channel();
        drop(stream);
        assert!(!sink.emit_for(0, MediaEvent::Progress));
    }
}
