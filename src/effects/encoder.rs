use crate::audio::features::brightness;
use crate::audio::timeline::{Mode, TimelineEntry};
use crate::protocol::command::{Command, Rgb};

use super::palette::{self, BASS_COLOR, DARK, MID_COLOR, TREBLE_COLOR};

/// Lower edges of the medium, loud, very loud and extreme tiers
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    pub quiet: f32,
    pub medium: f32,
    pub loud: f32,
    pub very_loud: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            quiet: 0.15,
            medium: 0.4,
            loud: 0.7,
            very_loud: 0.85,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    Quiet,
    Medium,
    Loud,
    VeryLoud,
    Extreme,
}

impl Tier {
    pub fn classify(level: f32, t: &Thresholds) -> Tier {
        if level < t.quiet {
            Tier::Quiet
        } else if level < t.medium {
            Tier::Medium
        } else if level < t.loud {
            Tier::Loud
        } else if level < t.very_loud {
            Tier::VeryLoud
        } else {
            Tier::Extreme
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Tier::Quiet => "Quiet",
            Tier::Medium => "Medium",
            Tier::Loud => "Loud",
            Tier::VeryLoud => "Very Loud",
            Tier::Extreme => "EXTREME",
        }
    }

    fn effect_name(self) -> &'static str {
        match self {
            Tier::Quiet => "quiet",
            Tier::Medium => "medium",
            Tier::Loud => "loud",
            Tier::VeryLoud => "very_loud",
            Tier::Extreme => "extreme",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EncoderSettings {
    pub pixel_count: usize,
    pub thresholds: Thresholds,
    pub min_brightness: u8,
    pub max_brightness: u8,
}

/// One chosen LED command
#[derive(Clone, Debug, PartialEq)]
pub struct Effect {
    pub name: &'static str,
    pub command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BeatEffect {
    Fill(Rgb),
    Chase(Rgb),
    Alternating,
}

/// Rotation used in beat mode, one step per beat
const BEAT_EFFECTS: [(&str, BeatEffect); 7] = [
    ("red_fill", BeatEffect::Fill(palette::RED)),
    ("green_fill", BeatEffect::Fill(palette::GREEN)),
    ("gold_fill", BeatEffect::Fill(palette::GOLD)),
    ("white_fill", BeatEffect::Fill(palette::WHITE)),
    ("red_chase", BeatEffect::Chase(palette::RED)),
    ("green_chase", BeatEffect::Chase(palette::GREEN)),
    ("alternating", BeatEffect::Alternating),
];

/// Pixel budget of the bass, mid and treble sections. The remainder of
/// the division by three goes to treble.
pub fn vu_budgets(pixel_count: usize) -> [usize; 3] {
    let per_band = pixel_count / 3;
    [per_band, per_band, per_band + pixel_count % 3]
}

/// Lit pixels for a normalized band value, never above `budget`
pub fn lit_pixels(value: f32, budget: usize) -> usize {
    let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
    ((value as f64 * budget as f64).floor() as usize).min(budget)
}

/// Maps timeline entries to commands. Holds the effect counter for one
/// dispatch run.
pub struct EffectEncoder {
    mode: Mode,
    settings: EncoderSettings,
    effect_counter: u64,
}

impl EffectEncoder {
    pub fn new(mode: Mode, settings: EncoderSettings) -> Self {
        Self {
            mode,
            settings,
            effect_counter: 0,
        }
    }

    pub fn effect_counter(&self) -> u64 {
        self.effect_counter
    }

    pub fn encode(&mut self, entry: &TimelineEntry) -> Effect {
        match *entry {
            TimelineEntry::Amplitude { level, .. } if self.mode == Mode::Brightness => {
                let value = brightness(
                    level,
                    self.settings.min_brightness,
                    self.settings.max_brightness,
                );
                Effect {
                    name: "brightness",
                    command: Command::Brightness(value),
                }
            }
            TimelineEntry::Amplitude { level, .. } => self.loudness_effect(level),
            TimelineEntry::Bands { bass, mid, treble, .. } => self.vu_meter(bass, mid, treble),
            TimelineEntry::Beat { .. } => self.beat_effect(),
        }
    }

    // The counter only advances on the two loudest tiers.
    fn loudness_effect(&mut self, level: f32) -> Effect {
        let tier = Tier::classify(level, &self.settings.thresholds);
        let pixels = self.settings.pixel_count;
        let command = match tier {
            Tier::Quiet => Command::FillPattern(palette::cycled(&palette::QUIET_CYCLE, pixels)),
            Tier::Medium => Command::FillPattern(palette::cycled(&palette::MEDIUM_CYCLE, pixels)),
            Tier::Loud => Command::FillPattern(palette::cycled(&palette::LOUD_CYCLE, pixels)),
            Tier::VeryLoud => {
                let color = palette::CHASE_PAIR[(self.effect_counter % 2) as usize];
                self.effect_counter += 1;
                Command::TheaterChase { repeat: true, color }
            }
            Tier::Extreme => {
                let color = palette::PULSE_CYCLE[(self.effect_counter % 4) as usize];
                self.effect_counter += 1;
                Command::FillColor(color)
            }
        };
        Effect {
            name: tier.effect_name(),
            command,
        }
    }

    fn vu_meter(&self, bass: f32, mid: f32, treble: f32) -> Effect {
        let budgets = vu_budgets(self.settings.pixel_count);
        let mut pattern = Vec::with_capacity(self.settings.pixel_count);
        for ((value, budget), color) in [bass, mid, treble]
            .into_iter()
            .zip(budgets)
            .zip([BASS_COLOR, MID_COLOR, TREBLE_COLOR])
        {
            let lit = lit_pixels(value, budget);
            pattern.extend((0..budget).map(|i| if i < lit { color } else { DARK }));
        }
        Effect {
            name: "vu_meter",
            command: Command::FillPattern(pattern),
        }
    }

    fn beat_effect(&mut self) -> Effect {
        let (name, effect) = BEAT_EFFECTS[(self.effect_counter % BEAT_EFFECTS.len() as u64) as usize];
        self.effect_counter += 1;
        let command = match effect {
            BeatEffect::Fill(color) => Command::FillColor(color),
            BeatEffect::Chase(color) => Command::TheaterChase { repeat: true, color },
            BeatEffect::Alternating => Command::FillPattern(palette::cycled(
                &palette::CHASE_PAIR,
                self.settings.pixel_count,
            )),
        };
        Effect { name, command }
    }
}
