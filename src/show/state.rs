use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::audio::timeline::TimelineEntry;

/// Feature values of the entry most recently dispatched
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum FeatureReading {
    #[default]
    None,
    Amplitude { level: f32 },
    Bands { bass: f32, mid: f32, treble: f32 },
    /// 1-based beat number
    Beat { number: usize },
}

impl From<&TimelineEntry> for FeatureReading {
    fn from(entry: &TimelineEntry) -> Self {
        match *entry {
            TimelineEntry::Amplitude { level, .. } => FeatureReading::Amplitude { level },
            TimelineEntry::Bands { bass, mid, treble, .. } => FeatureReading::Bands { bass, mid, treble },
            TimelineEntry::Beat { index, .. } => FeatureReading::Beat { number: index + 1 },
        }
    }
}

/// Immutable view of dispatch progress. Every field has a safe default so
/// a reader that arrives before the first entry sees an idle tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlaybackSnapshot {
    pub current_index: Option<usize>,
    pub current_time: f64,
    pub reading: FeatureReading,
    pub effect: Option<&'static str>,
    pub sent: usize,
    pub failed: usize,
    pub finished: bool,
}

/// Single-writer, many-reader blackboard. Writers publish whole snapshots,
/// readers never observe a half-written one.
pub struct SharedPlaybackState {
    current: ArcSwap<PlaybackSnapshot>,
}

impl SharedPlaybackState {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(PlaybackSnapshot::default()),
        }
    }

    pub fn publish(&self, snapshot: PlaybackSnapshot) {
        self.current.store(Arc::new(snapshot));
    }

    pub fn snapshot(&self) -> Arc<PlaybackSnapshot> {
        self.current.load_full()
    }
}

impl Default for SharedPlaybackState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn readers_start_from_defaults() {
        let state = SharedPlaybackState::new();
        let snap = state.snapshot();
        assert_eq!(snap.current_index, None);
        assert_eq!(snap.reading, FeatureReading::None);
        assert!(!snap.finished);
    }

    #[test]
    fn beat_readings_are_one_based() {
        let entry = TimelineEntry::Beat { timestamp: 1.0, index: 0 };
        assert_eq!(FeatureReading::from(&entry), FeatureReading::Beat { number: 1 });
    }

    #[test]
    fn concurrent_reader_sees_whole_snapshots() {
        let state = Arc::new(SharedPlaybackState::new());
        let reader_state = Arc::clone(&state);

        let reader = thread::spawn(move || {
            for _ in 0..2000 {
                let snap = reader_state.snapshot();
                if let Some(index) = snap.current_index {
                    // writer always publishes index and time together
                    assert_eq!(snap.current_time, index as f64 * 0.5);
                    assert_eq!(snap.sent, index + 1);
                }
            }
        });

        for index in 0..2000 {
            state.publish(PlaybackSnapshot {
                current_index: Some(index),
                current_time: index as f64 * 0.5,
                sent: index + 1,
                ..PlaybackSnapshot::default()
            });
        }
        reader.join().unwrap();
        assert_eq!(state.snapshot().current_index, Some(1999));
    }
}
