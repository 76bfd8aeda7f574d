use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::timeline::Timeline;
use crate::effects::encoder::EffectEncoder;
use crate::protocol::transport::Transport;

use super::state::{FeatureReading, PlaybackSnapshot, SharedPlaybackState};

/// Longest single sleep, bounds how late a cancel is noticed during a wait
pub const MAX_SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub sent: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Absolute send instant of an entry: `start + timestamp - latency`.
/// Offsets before `start` are clamped to `start`.
pub fn schedule_target(start: Instant, timestamp: f64, latency: f64) -> Instant {
    let offset = timestamp - latency;
    if offset <= 0.0 {
        return start;
    }
    start + Duration::try_from_secs_f64(offset).unwrap_or(Duration::ZERO)
}

/// Time left until `target`, zero once it has passed
pub fn schedule_wait(target: Instant, now: Instant) -> Duration {
    target.saturating_duration_since(now)
}

/// Replays a timeline against a fixed start instant and transmits one
/// command per entry.
pub struct Dispatcher<T: Transport> {
    timeline: Arc<Timeline>,
    encoder: EffectEncoder,
    transport: T,
    latency: f64,
    state: Arc<SharedPlaybackState>,
    cancel: Arc<AtomicBool>,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(
        timeline: Arc<Timeline>,
        encoder: EffectEncoder,
        transport: T,
        latency: f64,
        state: Arc<SharedPlaybackState>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            timeline,
            encoder,
            transport,
            latency,
            state,
            cancel,
        }
    }

    pub fn run(&mut self, start: Instant) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let mut snapshot = PlaybackSnapshot::default();
        let timeline = Arc::clone(&self.timeline);
        log::info!(
            "Dispatching {} {} entries (latency offset {:.3}s)",
            timeline.len(),
            timeline.mode(),
            self.latency
        );

        for (index, entry) in timeline.entries().iter().enumerate() {
            let target = schedule_target(start, entry.timestamp(), self.latency);
            if !self.wait_until(target) {
                outcome.cancelled = true;
                break;
            }

            snapshot.current_index = Some(index);
            snapshot.current_time = entry.timestamp();
            snapshot.reading = FeatureReading::from(entry);
            self.state.publish(snapshot.clone());

            let effect = self.encoder.encode(entry);
            match self.transport.send_command(&effect.command) {
                Ok(()) => outcome.sent += 1,
                Err(e) => {
                    outcome.failed += 1;
                    log::warn!("Entry {} at {:.3}s ({}) not sent: {}", index, entry.timestamp(), effect.name, e);
                }
            }

            snapshot.effect = Some(effect.name);
            snapshot.sent = outcome.sent;
            snapshot.failed = outcome.failed;
            self.state.publish(snapshot.clone());
        }

        snapshot.finished = true;
        self.state.publish(snapshot);
        log::debug!("Effect counter ended at {}", self.encoder.effect_counter());
        log::info!(
            "Dispatch {}: {} sent, {} failed",
            if outcome.cancelled { "cancelled" } else { "finished" },
            outcome.sent,
            outcome.failed
        );
        outcome
    }

    /// Sleeps until `target` in bounded slices. Returns false if cancelled.
    fn wait_until(&self, target: Instant) -> bool {
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return false;
            }
            let wait = schedule_wait(target, Instant::now());
            if wait.is_zero() {
                return true;
            }
            thread::sleep(wait.min(MAX_SLEEP_SLICE));
        }
    }
}
