//! Audio output abstraction.
//!
//! [`AudioOutput`] is the single output element owned by the controller. It is
//! re-pointed at new sources but never recreated. Implementations report what
//! happens asynchronously as [`MediaEvent`]s, which the driver feeds back into
//! [`crate::controller::RadioController::handle_media_event`].

/// Asynchronous notifications from an output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaEvent {
    /// A play request was accepted (not yet audible).
    Play,
    /// Audio is confirmed flowing after a start or resume.
    Playing,
    /// Output paused.
    Pause,
    /// Forward playback progress.
    Progress,
    /// Output is starved and waiting for data.
    Waiting,
    /// Network delivery stalled.
    Stalled,
    /// Unrecoverable error on the current source.
    Error(String),
}

/// Reasons a play request is refused synchronously.
///
/// These are ordinary outcomes, not faults: the controller leaves the player in
/// the not-playing state and waits for another explicit request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlayRejected {
    /// No source bound.
    NoSource,
    /// Output device unavailable or denied.
    Device(String),
}

impl std::fmt::Display for PlayRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayRejected::NoSource => f.write_str("no source bound"),
            PlayRejected::Device(msg) => write!(f, "output unavailable: {msg}"),
        }
    }
}

impl std::error::Error for PlayRejected {}

/// The single output element for a player session.
pub trait AudioOutput {
    /// Bind (or with `None`, unbind) the source URL. Does not start loading.
    fn set_source(&mut self, url: Option<String>);
    /// Currently bound source, if any.
    fn source(&self) -> Option<&str>;
    /// Drop any buffered state for the current source and prepare to fetch it.
    fn load(&mut self);
    /// Start or resume playback of the bound source.
    fn play(&mut self) -> Result<(), PlayRejected>;
    fn pause(&mut self);
    fn is_paused(&self) -> bool;
    /// Volume in `0.0..=1.0`.
    fn set_volume(&mut self, volume: f32);
    fn set_muted(&mut self, muted: bool);
    /// Release every resource held by the output. Called once at session end.
    fn release(&mut self) {
        self.pause();
        self.set_source(None);
        self.load();
    }
}
