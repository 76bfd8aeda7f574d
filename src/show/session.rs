use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::audio::timeline::Timeline;
use crate::effects::encoder::EffectEncoder;
use crate::playback::PlaybackDriver;
use crate::protocol::transport::Transport;
use crate::visualizer::tui::{run_visualizer, Frontend};
use crate::visualizer::view::ViewSettings;

use super::dispatcher::{DispatchOutcome, Dispatcher};
use super::state::SharedPlaybackState;

/// Session thread poll cadence
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Total time allowed for the worker threads to stop after cancel
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionReport {
    pub sent: usize,
    pub failed: usize,
    /// Stopped by the user before the timeline ran out
    pub cancelled: bool,
    /// A worker thread had to be detached during shutdown. Whatever it owned
    /// (a terminal frontend, for one) has not been dropped.
    pub detached: bool,
}

/// One playback run: audio output, dispatcher and visualizer sharing a
/// cancel flag and a snapshot channel.
pub struct Session<T: Transport + 'static, P: PlaybackDriver> {
    timeline: Arc<Timeline>,
    encoder: EffectEncoder,
    view: ViewSettings,
    transport: T,
    playback: P,
    latency: f64,
    state: Arc<SharedPlaybackState>,
    cancel: Arc<AtomicBool>,
}

impl<T: Transport + 'static, P: PlaybackDriver> Session<T, P> {
    pub fn new(
        timeline: Arc<Timeline>,
        encoder: EffectEncoder,
        view: ViewSettings,
        transport: T,
        playback: P,
        latency: f64,
    ) -> Self {
        Self {
            timeline,
            encoder,
            view,
            transport,
            playback,
            latency,
            state: Arc::new(SharedPlaybackState::new()),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the session when set from any thread
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Runs until the timeline and the audio are both done or cancel is set.
    /// Playback and transport are released before this returns.
    pub fn run(self, frontend: Option<Box<dyn Frontend>>) -> Result<SessionReport> {
        let Session {
            timeline,
            encoder,
            view,
            transport,
            mut playback,
            latency,
            state,
            cancel,
        } = self;

        let visualizer = match frontend {
            Some(frontend) => {
                let (timeline, state, cancel) = (Arc::clone(&timeline), Arc::clone(&state), Arc::clone(&cancel));
                Some(
                    thread::Builder::new()
                        .name("visualizer".into())
                        .spawn(move || run_visualizer(frontend, timeline, state, view, cancel))
                        .context("Failed to spawn visualizer thread")?,
                )
            }
            None => None,
        };

        if let Err(e) = playback.start() {
            cancel.store(true, Ordering::Relaxed);
            join_bounded(visualizer, Instant::now() + JOIN_TIMEOUT, "visualizer");
            return Err(e.context("Failed to start playback"));
        }
        let start = Instant::now();

        let mut dispatcher = Dispatcher::new(
            Arc::clone(&timeline),
            encoder,
            transport,
            latency,
            Arc::clone(&state),
            Arc::clone(&cancel),
        );
        let dispatch = match thread::Builder::new()
            .name("dispatcher".into())
            .spawn(move || dispatcher.run(start))
        {
            Ok(handle) => handle,
            Err(e) => {
                cancel.store(true, Ordering::Relaxed);
                playback.stop();
                join_bounded(visualizer, Instant::now() + JOIN_TIMEOUT, "visualizer");
                return Err(anyhow::Error::new(e).context("Failed to spawn dispatcher thread"));
            }
        };

        let cancelled = loop {
            if cancel.load(Ordering::Relaxed) {
                break true;
            }
            if dispatch.is_finished() && playback.is_finished() {
                break false;
            }
            thread::sleep(POLL_INTERVAL);
        };
        if cancelled {
            log::info!("Session cancelled at {:.2}s", start.elapsed().as_secs_f64());
        }

        cancel.store(true, Ordering::Relaxed);
        let deadline = Instant::now() + JOIN_TIMEOUT;
        let outcome = join_bounded(Some(dispatch), deadline, "dispatcher");
        let visualizer_detached = match visualizer {
            Some(handle) => join_bounded(Some(handle), deadline, "visualizer").is_none(),
            None => false,
        };
        playback.stop();
        drop(playback);

        let detached = outcome.is_none() || visualizer_detached;
        let outcome = outcome.unwrap_or_else(|| {
            let snap = state.snapshot();
            DispatchOutcome {
                sent: snap.sent,
                failed: snap.failed,
                cancelled: true,
            }
        });

        Ok(SessionReport {
            sent: outcome.sent,
            failed: outcome.failed,
            cancelled: cancelled || outcome.cancelled,
            detached,
        })
    }
}

/// Joins `handle` if it finishes before `deadline`, otherwise detaches it.
fn join_bounded<R>(handle: Option<JoinHandle<R>>, deadline: Instant, name: &str) -> Option<R> {
    let handle = handle?;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            log::warn!("{} thread did not stop in time, detaching it", name);
            return None;
        }
        thread::sleep(Duration::from_millis(5));
    }
    match handle.join() {
        Ok(value) => Some(value),
        Err(_) => {
            log::error!("{} thread panicked", name);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::timeline::{Mode, TimelineEntry};
    use crate::effects::encoder::{EncoderSettings, Thresholds};
    use crate::protocol::transport::TransportError;
    use crate::visualizer::view::View;
    use std::sync::Mutex;

    struct FakeTransport {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        dropped: Arc<AtomicBool>,
    }

    impl Transport for FakeTransport {
        fn send(&mut self, datagram: &[u8]) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(datagram.to_vec());
            Ok(())
        }
    }

    impl Drop for FakeTransport {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::Relaxed);
        }
    }

    struct FakePlayback {
        length: Duration,
        started: Option<Instant>,
        fail_start: bool,
        stopped: Arc<AtomicBool>,
    }

    impl PlaybackDriver for FakePlayback {
        fn start(&mut self) -> Result<()> {
            if self.fail_start {
                anyhow::bail!("device busy");
            }
            self.started = Some(Instant::now());
            Ok(())
        }

        fn is_finished(&self) -> bool {
            self.started.is_some_and(|at| at.elapsed() >= self.length)
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::Relaxed);
        }
    }

    struct Observed {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        transport_dropped: Arc<AtomicBool>,
        playback_stopped: Arc<AtomicBool>,
    }

    fn session(points: &[f64], length: Duration, fail_start: bool) -> (Session<FakeTransport, FakePlayback>, Observed) {
        let entries = points
            .iter()
            .map(|&timestamp| TimelineEntry::Amplitude { timestamp, level: 0.5 })
            .collect();
        let timeline = Arc::new(Timeline::new(Mode::Effects, entries, None).unwrap());
        let observed = Observed {
            sent: Arc::new(Mutex::new(Vec::new())),
            transport_dropped: Arc::new(AtomicBool::new(false)),
            playback_stopped: Arc::new(AtomicBool::new(false)),
        };
        let transport = FakeTransport {
            sent: Arc::clone(&observed.sent),
            dropped: Arc::clone(&observed.transport_dropped),
        };
        let playback = FakePlayback {
            length,
            started: None,
            fail_start,
            stopped: Arc::clone(&observed.playback_stopped),
        };
        let encoder = EffectEncoder::new(
            Mode::Effects,
            EncoderSettings {
                pixel_count: 9,
                thresholds: Thresholds::default(),
                min_brightness: 10,
                max_brightness: 255,
            },
        );
        let view = ViewSettings {
            thresholds: Thresholds::default(),
            pixel_count: 9,
            latency: 0.0,
        };
        let session = Session::new(timeline, encoder, view, transport, playback, 0.0);
        (session, observed)
    }

    #[test]
    fn runs_until_timeline_and_audio_finish() {
        let (session, observed) = session(&[0.0, 0.1, 0.2], Duration::from_millis(300), false);
        let report = session.run(None).unwrap();
        assert_eq!(
            report,
            SessionReport { sent: 3, failed: 0, cancelled: false, detached: false }
        );
        assert_eq!(observed.sent.lock().unwrap().len(), 3);
        assert!(observed.transport_dropped.load(Ordering::Relaxed));
        assert!(observed.playback_stopped.load(Ordering::Relaxed));
    }

    #[test]
    fn cancel_releases_everything_promptly() {
        let (session, observed) = session(&[0.0, 30.0], Duration::from_secs(60), false);
        let cancel = session.cancel_handle();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            cancel.store(true, Ordering::Relaxed);
        });

        let started = Instant::now();
        let report = session.run(None).unwrap();
        canceller.join().unwrap();

        assert!(started.elapsed() < Duration::from_millis(1500));
        assert!(report.cancelled);
        assert!(!report.detached);
        assert_eq!(report.sent, 1);
        assert!(observed.transport_dropped.load(Ordering::Relaxed));
        assert!(observed.playback_stopped.load(Ordering::Relaxed));
    }

    struct StuckFrontend;

    impl Frontend for StuckFrontend {
        fn draw(&mut self, _view: &View) -> Result<()> {
            Ok(())
        }

        fn wait_for_quit(&mut self, _timeout: Duration) -> Result<bool> {
            thread::sleep(Duration::from_secs(3));
            Ok(false)
        }
    }

    #[test]
    fn stuck_visualizer_is_detached_within_bound() {
        let (session, observed) = session(&[0.0], Duration::from_millis(100), false);

        let started = Instant::now();
        let report = session.run(Some(Box::new(StuckFrontend))).unwrap();

        assert!(report.detached);
        assert!(!report.cancelled);
        assert_eq!(report.sent, 1);
        assert!(started.elapsed() < Duration::from_millis(2000));
        assert!(observed.playback_stopped.load(Ordering::Relaxed));
        assert!(observed.transport_dropped.load(Ordering::Relaxed));
    }

    #[test]
    fn playback_failure_sends_nothing() {
        let (session, observed) = session(&[0.0], Duration::ZERO, true);
        let err = session.run(None).unwrap_err();
        assert!(format!("{:#}", err).contains("device busy"));
        assert!(observed.sent.lock().unwrap().is_empty());
        assert!(observed.transport_dropped.load(Ordering::Relaxed));
    }
}
