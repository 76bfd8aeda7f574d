use std::fmt;
use std::str::FromStr;

/// How a file is analyzed and how its entries are turned into commands.
/// Fixed for the whole timeline at analysis time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Threshold ladder over overall loudness
    Effects,
    /// Bass/mid/treble level meter across the tree
    Vu,
    /// Cycle through a fixed effect list on every detected beat
    Beat,
    /// Overall loudness mapped to strip brightness
    Brightness,
}

impl Mode {
    pub fn label(self) -> &'static str {
        match self {
            Mode::Effects => "EFFECTS MODE",
            Mode::Vu => "VU METER MODE (Frequency Bands)",
            Mode::Beat => "BEAT MODE",
            Mode::Brightness => "BRIGHTNESS MODE",
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "effects" | "effect" => Ok(Mode::Effects),
            "vu" | "vu_meter" | "meter" => Ok(Mode::Vu),
            "beat" | "beats" | "tempo" => Ok(Mode::Beat),
            "brightness" => Ok(Mode::Brightness),
            other => Err(format!(
                "unknown mode '{}' (valid modes: effects, vu, beat, brightness)",
                other
            )),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Effects => "effects",
            Mode::Vu => "vu",
            Mode::Beat => "beat",
            Mode::Brightness => "brightness",
        };
        f.write_str(name)
    }
}

/// One analyzed point of the audio file. Feature values are already
/// normalized to 0.0-1.0.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimelineEntry {
    Amplitude { timestamp: f64, level: f32 },
    Bands { timestamp: f64, bass: f32, mid: f32, treble: f32 },
    Beat { timestamp: f64, index: usize },
}

impl TimelineEntry {
    pub fn timestamp(&self) -> f64 {
        match *self {
            TimelineEntry::Amplitude { timestamp, .. }
            | TimelineEntry::Bands { timestamp, .. }
            | TimelineEntry::Beat { timestamp, .. } => timestamp,
        }
    }

    fn fits(&self, mode: Mode) -> bool {
        matches!(
            (self, mode),
            (TimelineEntry::Amplitude { .. }, Mode::Effects | Mode::Brightness)
                | (TimelineEntry::Bands { .. }, Mode::Vu)
                | (TimelineEntry::Beat { .. }, Mode::Beat)
        )
    }
}

/// Fully materialized, immutable analysis result for one file.
#[derive(Clone, Debug)]
pub struct Timeline {
    mode: Mode,
    entries: Vec<TimelineEntry>,
    tempo_bpm: Option<f32>,
}

impl Timeline {
    /// Entries must all match `mode` and be ordered by timestamp.
    pub fn new(mode: Mode, entries: Vec<TimelineEntry>, tempo_bpm: Option<f32>) -> anyhow::Result<Self> {
        if let Some(bad) = entries.iter().position(|e| !e.fits(mode)) {
            anyhow::bail!("Timeline entry {} does not belong to {} mode", bad, mode);
        }
        if let Some(bad) = entries
            .iter()
            .position(|e| !e.timestamp().is_finite() || e.timestamp() < 0.0)
        {
            anyhow::bail!("Timeline entry {} has an invalid timestamp", bad);
        }
        if let Some(bad) = entries
            .windows(2)
            .position(|w| w[1].timestamp() < w[0].timestamp())
        {
            anyhow::bail!("Timeline timestamps decrease after entry {}", bad);
        }
        Ok(Self {
            mode,
            entries,
            tempo_bpm,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Detected tempo, beat mode only
    pub fn tempo_bpm(&self) -> Option<f32> {
        self.tempo_bpm
    }

    pub fn duration(&self) -> f64 {
        self.entries.last().map_or(0.0, |e| e.timestamp())
    }
}
