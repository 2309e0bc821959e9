//! Player thread.
//!
//! One thread owns the [`RadioController`] and its output. Everything that
//! can change player state arrives on that thread as a command, a media event
//! or a bus signal; timers fire from the same loop.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, select, unbounded};
use radio_player::clock::{Clock, SystemClock};
use radio_player::config::FailoverConfig;
use radio_player::controller::RadioController;
use radio_player::output::AudioOutput;
use radio_player::prefs::{JsonFilePrefs, MemoryPrefs, PreferenceStore};
use radio_player::signals::{RadioSignal, SignalBus};
use radio_player::stream::{EventStream, StreamOutput, StreamOutputConfig};
use radio_types::PlayerStatus;

/// Wake-up period while no timer is armed.
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// Requests from the control surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PlayerCommand {
    Play,
    Pause,
    Toggle,
    SetVolume(f32),
    SetMuted(bool),
    SetExpanded(bool),
    SetVisible(bool),
    Shutdown,
}

pub struct PlayerSetup {
    pub failover: FailoverConfig,
    pub output: StreamOutputConfig,
    pub prefs_path: Option<PathBuf>,
    pub autoplay: bool,
    pub bus: SignalBus,
}

pub struct PlayerHandle {
    pub cmd_tx: Sender<PlayerCommand>,
    pub status: Arc<Mutex<PlayerStatus>>,
    join: JoinHandle<()>,
}

impl PlayerHandle {
    /// Ask the player to dispose itself and wait for the thread to exit.
    pub fn shutdown(self) {
        let _ = self.cmd_tx.send(PlayerCommand::Shutdown);
        if self.join.join().is_err() {
            tracing::warn!("player thread panicked");
        }
    }
}

/// Start the player thread. The CPAL-backed output is created on that thread.
pub fn spawn_player(setup: PlayerSetup) -> PlayerHandle {
    let (cmd_tx, cmd_rx) = unbounded();
    let status = Arc::new(Mutex::new(PlayerStatus {
        primary_url: setup.failover.primary_url.clone(),
        backup_url: setup.failover.backup_url.clone(),
        ..PlayerStatus::default()
    }));
    let status_for_thread = status.clone();

    let join = std::thread::spawn(move || {
        let PlayerSetup {
            failover,
            output,
            prefs_path,
            autoplay,
            bus,
        } = setup;
        let (output, events) = StreamOutput::new(output);
        let clock = SystemClock::shared();
        let signals_rx = bus.subscribe();
        let mut controller =
            RadioController::new(failover, output, clock.clone(), open_prefs(prefs_path), bus);
        if autoplay {
            tracing::info!("autoplay requested");
            controller.play();
        }
        run_loop(
            controller,
            clock,
            LoopInputs {
                commands: cmd_rx,
                events: Some(events),
                signals: signals_rx,
            },
            &status_for_thread,
        );
    });

    PlayerHandle {
        cmd_tx,
        status,
        join,
    }
}

fn open_prefs(path: Option<PathBuf>) -> Box<dyn PreferenceStore> {
    match path.or_else(JsonFilePrefs::default_path) {
        Some(path) => {
            tracing::debug!(path = %path.display(), "preferences file");
            Box::new(JsonFilePrefs::open(path))
        }
        None => {
            tracing::warn!("no preferences location; settings will not persist");
            Box::new(MemoryPrefs::new())
        }
    }
}

pub struct LoopInputs {
    pub commands: Receiver<PlayerCommand>,
    pub events: Option<EventStream>,
    pub signals: Receiver<RadioSignal>,
}

/// Drive `controller` until a shutdown command arrives or every command sender
/// is gone, then dispose it.
pub fn run_loop<O: AudioOutput>(
    mut controller: RadioController<O>,
    clock: Arc<dyn Clock>,
    inputs: LoopInputs,
    status: &Mutex<PlayerStatus>,
) {
    let never = crossbeam_channel::never();
    let events_rx = inputs.events.as_ref().map_or(&never, EventStream::receiver);
    publish_status(&controller, status);

    loop {
        let wait = controller
            .next_deadline()
            .map(|at| Duration::from_millis(at.saturating_sub(clock.now_ms())))
            .unwrap_or(IDLE_WAIT);

        select! {
            recv(inputs.commands) -> msg => match msg {
                Ok(PlayerCommand::Shutdown) | Err(_) => break,
                Ok(cmd) => apply(&mut controller, cmd),
            },
            recv(events_rx) -> msg => {
                if let (Ok(stamped), Some(events)) = (msg, inputs.events.as_ref()) {
                    if let Some(event) = events.accept(stamped) {
                        tracing::trace!(?event, "media event");
                        controller.handle_media_event(event);
                    }
                }
            },
            recv(inputs.signals) -> msg => {
                if let Ok(signal) = msg {
                    controller.handle_signal(signal);
                }
            },
            default(wait) => {}
        }

        controller.advance();
        publish_status(&controller, status);
    }

    controller.shutdown();
    publish_status(&controller, status);
    tracing::info!("player loop stopped");
}

fn apply<O: AudioOutput>(controller: &mut RadioController<O>, cmd: PlayerCommand) {
    tracing::debug!(?cmd, "player command");
    match cmd {
        PlayerCommand::Play => controller.play(),
        PlayerCommand::Pause => controller.pause(),
        PlayerCommand::Toggle => controller.toggle_play(),
        PlayerCommand::SetVolume(v) => controller.set_volume(v),
        PlayerCommand::SetMuted(m) => controller.set_muted(m),
        PlayerCommand::SetExpanded(e) => controller.set_expanded(e),
        PlayerCommand::SetVisible(v) => controller.set_page_visible(v),
        PlayerCommand::Shutdown => {}
    }
}

fn publish_status<O: AudioOutput>(controller: &RadioController<O>, status: &Mutex<PlayerStatus>) {
    if let Ok(mut s) = status.lock() {
        *s = controller.status();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radio_player::clock::ManualClock;
    use radio_player::output::{MediaEvent, PlayRejected};
    use radio_player::stream::event_channel;

    #[derive(Default)]
    struct SilentOutput {
        source: Option<String>,
        paused: bool,
        volume: f32,
    }

    impl AudioOutput for SilentOutput {
        fn set_source(&mut self, url: Option<String>) {
            self.source = url;
        }
        fn source(&self) -> Option<&str> {
            self.source.as_deref()
        }
        fn load(&mut self) {}
        fn play(&mut self) -> Result<(), PlayRejected> {
            self.paused = false;
            Ok(())
        }
        fn pause(&mut self) {
            self.paused = true;
        }
        fn is_paused(&self) -> bool {
            self.paused
        }
        fn set_volume(&mut self, volume: f32) {
            self.volume = volume;
        }
        fn set_muted(&mut self, _muted: bool) {}
    }

    fn controller(bus: SignalBus, clock: Arc<dyn Clock>) -> RadioController<SilentOutput> {
        RadioController::new(
            FailoverConfig::with_urls("http://primary.test/live", "http://backup.test/live"),
            SilentOutput {
                paused: true,
                ..SilentOutput::default()
            },
            clock,
            Box::new(MemoryPrefs::new()),
            bus,
        )
    }

    #[test]
    fn commands_update_status_until_shutdown() {
        let bus = SignalBus::new();
        let clock: Arc<dyn Clock> = ManualClock::new(0);
        let (cmd_tx, cmd_rx) = unbounded();
        let status = Arc::new(Mutex::new(PlayerStatus::default()));
        let ctl = controller(bus.clone(), clock.clone());
        let inputs = LoopInputs {
            commands: cmd_rx,
            events: None,
            signals: bus.subscribe(),
        };

        cmd_tx.send(PlayerCommand::SetVolume(0.4)).unwrap();
        cmd_tx.send(PlayerCommand::SetExpanded(true)).unwrap();
        cmd_tx.send(PlayerCommand::Play).unwrap();
        cmd_tx.send(PlayerCommand::Shutdown).unwrap();
        run_loop(ctl, clock, inputs, &status);

        let s = status.lock().unwrap().clone();
        assert!((s.volume - 0.4).abs() < 1e-6);
        assert!(s.expanded);
        assert!(!s.playing);
        assert_eq!(s.primary_url, "http://primary.test/live");
    }

    #[test]
    fn media_events_and_signals_reach_the_controller() {
        let bus = SignalBus::new();
        let clock: Arc<dyn Clock> = ManualClock::new(0);
        let (cmd_tx, cmd_rx) = unbounded();
        let (sink, events) = event_channel();
        let status = Arc::new(Mutex::new(PlayerStatus::default()));
        let observer = bus.subscribe();
        let ctl = controller(bus.clone(), clock.clone());
        let inputs = LoopInputs {
            commands: cmd_rx,
            events: Some(events),
            signals: bus.subscribe(),
        };

        let handle = std::thread::spawn(move || run_loop(ctl, clock, inputs, &status));
        cmd_tx.send(PlayerCommand::Play).unwrap();
        sink.emit(MediaEvent::Playing);
        let started = observer.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(started, RadioSignal::RadioStarted);

        bus.publish(RadioSignal::VideoStarted);
        cmd_tx.send(PlayerCommand::Shutdown).unwrap();
        handle.join().unwrap();
    }
}
