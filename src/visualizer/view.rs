use crate::audio::timeline::{Mode, Timeline, TimelineEntry};
use crate::effects::encoder::{lit_pixels, vu_budgets, Thresholds, Tier};
use crate::show::state::{FeatureReading, PlaybackSnapshot};

/// Upcoming entries shown below the status panel
pub const LOOKAHEAD: usize = 30;
/// Slots in the beat pulse row
pub const BEAT_SLOTS: usize = 16;

/// Tuning the view needs besides the snapshot
#[derive(Clone, Copy, Debug)]
pub struct ViewSettings {
    pub thresholds: Thresholds,
    pub pixel_count: usize,
    /// Seconds each command is sent ahead of its timestamp
    pub latency: f64,
}

/// Lit pixels out of one VU section's budget
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VuSection {
    pub lit: usize,
    pub budget: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StatusPanel {
    pub current_time: f64,
    pub duration: f64,
    pub position: Option<usize>,
    pub total: usize,
    pub reading: FeatureReading,
    /// Loudness tier of the current reading, amplitude modes only
    pub tier: Option<Tier>,
    /// Bass, mid and treble sections, VU mode only
    pub vu_sections: Option<[VuSection; 3]>,
    pub effect: Option<&'static str>,
    pub sent: usize,
    pub failed: usize,
    pub finished: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RowDetail {
    Level { level: f32, tier: Tier },
    Bands { bass: f32, mid: f32, treble: f32 },
    Beat { number: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub struct LookaheadRow {
    pub index: usize,
    pub timestamp: f64,
    /// Seconds until this entry, relative to the last dispatched time
    pub offset: f64,
    pub detail: RowDetail,
}

/// Everything a frontend draws for one frame
#[derive(Clone, Debug, PartialEq)]
pub struct View {
    pub mode: Mode,
    pub tempo_bpm: Option<f32>,
    pub latency: f64,
    pub status: StatusPanel,
    pub beat_pulse: Option<[bool; BEAT_SLOTS]>,
    pub lookahead: Vec<LookaheadRow>,
}

impl View {
    /// Fraction of the timeline already played, 0.0-1.0
    pub fn progress(&self) -> f64 {
        if self.status.duration <= 0.0 {
            return if self.status.finished { 1.0 } else { 0.0 };
        }
        (self.status.current_time / self.status.duration).clamp(0.0, 1.0)
    }
}

pub fn build_view(snapshot: &PlaybackSnapshot, timeline: &Timeline, settings: &ViewSettings) -> View {
    let thresholds = &settings.thresholds;
    let tier = match snapshot.reading {
        FeatureReading::Amplitude { level } => Some(Tier::classify(level, thresholds)),
        _ => None,
    };

    let vu_sections = match snapshot.reading {
        FeatureReading::Bands { bass, mid, treble } => {
            let budgets = vu_budgets(settings.pixel_count);
            let values = [bass, mid, treble];
            Some(std::array::from_fn(|i| VuSection {
                lit: lit_pixels(values[i], budgets[i]),
                budget: budgets[i],
            }))
        }
        _ => None,
    };

    let beat_pulse = match (timeline.mode(), snapshot.reading) {
        (Mode::Beat, FeatureReading::Beat { number }) if number > 0 => {
            let mut slots = [false; BEAT_SLOTS];
            slots[(number - 1) % BEAT_SLOTS] = true;
            Some(slots)
        }
        (Mode::Beat, _) => Some([false; BEAT_SLOTS]),
        _ => None,
    };

    let first = snapshot.current_index.map_or(0, |i| i + 1);
    let lookahead = timeline
        .entries()
        .iter()
        .enumerate()
        .skip(first)
        .take(LOOKAHEAD)
        .map(|(index, entry)| LookaheadRow {
            index,
            timestamp: entry.timestamp(),
            offset: entry.timestamp() - snapshot.current_time,
            detail: row_detail(entry, thresholds),
        })
        .collect();

    View {
        mode: timeline.mode(),
        tempo_bpm: timeline.tempo_bpm(),
        latency: settings.latency,
        status: StatusPanel {
            current_time: snapshot.current_time,
            duration: timeline.duration(),
            position: snapshot.current_index,
            total: timeline.len(),
            reading: snapshot.reading,
            tier,
            vu_sections,
            effect: snapshot.effect,
            sent: snapshot.sent,
            failed: snapshot.failed,
            finished: snapshot.finished,
        },
        beat_pulse,
        lookahead,
    }
}

fn row_detail(entry: &TimelineEntry, thresholds: &Thresholds) -> RowDetail {
    match *entry {
        TimelineEntry::Amplitude { level, .. } => RowDetail::Level {
            level,
            tier: Tier::classify(level, thresholds),
        },
        TimelineEntry::Bands { bass, mid, treble, .. } => RowDetail::Bands { bass, mid, treble },
        TimelineEntry::Beat { index, .. } => RowDetail::Beat { number: index + 1 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ViewSettings {
        ViewSettings {
            thresholds: Thresholds::default(),
            pixel_count: 106,
            latency: 0.01,
        }
    }

    fn amplitude_timeline(count: usize) -> Timeline {
        let entries = (0..count)
            .map(|i| TimelineEntry::Amplitude {
                timestamp: i as f64 * 0.1,
                level: (i % 10) as f32 / 10.0,
            })
            .collect();
        Timeline::new(Mode::Effects, entries, None).unwrap()
    }

    #[test]
    fn idle_view_looks_ahead_from_the_start() {
        let timeline = amplitude_timeline(50);
        let view = build_view(&PlaybackSnapshot::default(), &timeline, &settings());

        assert_eq!(view.status.position, None);
        assert_eq!(view.status.tier, None);
        assert_eq!(view.lookahead.len(), LOOKAHEAD);
        assert_eq!(view.lookahead[0].index, 0);
        assert_eq!(view.progress(), 0.0);
        assert!(view.beat_pulse.is_none());
        assert!(view.status.vu_sections.is_none());
        assert_eq!(view.latency, 0.01);
    }

    #[test]
    fn vu_sections_report_lit_pixels_per_budget() {
        let entries = vec![TimelineEntry::Bands { timestamp: 0.0, bass: 1.0, mid: 0.5, treble: 0.0 }];
        let timeline = Timeline::new(Mode::Vu, entries, None).unwrap();
        let snapshot = PlaybackSnapshot {
            current_index: Some(0),
            reading: FeatureReading::Bands { bass: 1.0, mid: 0.5, treble: 0.0 },
            ..PlaybackSnapshot::default()
        };
        let view = build_view(&snapshot, &timeline, &settings());

        assert_eq!(
            view.status.vu_sections,
            Some([
                VuSection { lit: 35, budget: 35 },
                VuSection { lit: 17, budget: 35 },
                VuSection { lit: 0, budget: 36 },
            ])
        );
        assert!(view.status.tier.is_none());
    }

    #[test]
    fn lookahead_offsets_are_relative_to_current_time() {
        let timeline = amplitude_timeline(50);
        let snapshot = PlaybackSnapshot {
            current_index: Some(40),
            current_time: 4.0,
            reading: FeatureReading::Amplitude { level: 0.9 },
            ..PlaybackSnapshot::default()
        };
        let view = build_view(&snapshot, &timeline, &settings());

        assert_eq!(view.status.tier, Some(Tier::Extreme));
        // only nine entries remain after index 40
        assert_eq!(view.lookahead.len(), 9);
        assert_eq!(view.lookahead[0].index, 41);
        assert!((view.lookahead[0].offset - 0.1).abs() < 1e-9);
        assert_eq!(
            view.lookahead[1].detail,
            RowDetail::Level { level: 0.2, tier: Tier::Medium }
        );
    }

    #[test]
    fn beat_pulse_wraps_every_sixteen_beats() {
        let entries = (0..20)
            .map(|index| TimelineEntry::Beat { timestamp: index as f64 * 0.5, index })
            .collect();
        let timeline = Timeline::new(Mode::Beat, entries, Some(120.0)).unwrap();
        let snapshot = PlaybackSnapshot {
            current_index: Some(16),
            current_time: 8.0,
            reading: FeatureReading::Beat { number: 17 },
            ..PlaybackSnapshot::default()
        };
        let view = build_view(&snapshot, &timeline, &settings());

        let pulse = view.beat_pulse.unwrap();
        assert!(pulse[0]);
        assert_eq!(pulse.iter().filter(|lit| **lit).count(), 1);
        assert_eq!(view.tempo_bpm, Some(120.0));
    }
}
