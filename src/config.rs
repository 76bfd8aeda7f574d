use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::audio::features::Normalizer;
use crate::effects::encoder::{EncoderSettings, Thresholds};

/// Largest tree whose full fill_pattern fits one datagram
pub const MAX_PIXELS: usize = 170;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("pixel_count must be between 3 and 170, got {0}")]
    PixelCount(usize),
    #[error("window_size must be greater than zero")]
    WindowSize,
    #[error("amplitude_scale must be a positive number, got {0}")]
    AmplitudeScale(f64),
    #[error("noise_floor must be a finite number, got {0}")]
    NoiseFloor(f64),
    #[error("effect thresholds must increase strictly inside (0, 1)")]
    Thresholds,
    #[error("min_brightness {min} is above max_brightness {max}")]
    BrightnessRange { min: u8, max: u8 },
    #[error("latency_offset must be a non-negative number of seconds, got {0}")]
    Latency(f64),
}

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub tree: TreeConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub effects: EffectsConfig,
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct TreeConfig {
    #[serde(default = "default_pixel_count")]
    pub pixel_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_noise_floor")]
    pub noise_floor: f64,
    #[serde(default = "default_amplitude_scale")]
    pub amplitude_scale: f64,
}

#[derive(Debug, Deserialize)]
pub struct DispatchConfig {
    /// Seconds
    #[serde(default = "default_latency_offset")]
    pub latency_offset: f64,
}

#[derive(Debug, Deserialize)]
pub struct EffectsConfig {
    #[serde(default = "default_quiet")]
    pub quiet: f32,
    #[serde(default = "default_medium")]
    pub medium: f32,
    #[serde(default = "default_loud")]
    pub loud: f32,
    #[serde(default = "default_very_loud")]
    pub very_loud: f32,
    #[serde(default = "default_min_brightness")]
    pub min_brightness: u8,
    #[serde(default = "default_max_brightness")]
    pub max_brightness: u8,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            pixel_count: default_pixel_count(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            noise_floor: default_noise_floor(),
            amplitude_scale: default_amplitude_scale(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            latency_offset: default_latency_offset(),
        }
    }
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            quiet: default_quiet(),
            medium: default_medium(),
            loud: default_loud(),
            very_loud: default_very_loud(),
            min_brightness: default_min_brightness(),
            max_brightness: default_max_brightness(),
        }
    }
}

fn default_host() -> String { "192.168.1.200".into() }
fn default_port() -> u16 { 8733 }
fn default_pixel_count() -> usize { 106 }
fn default_window_size() -> usize { 2048 }
fn default_noise_floor() -> f64 { 100.0 }
fn default_amplitude_scale() -> f64 { 5000.0 }
fn default_latency_offset() -> f64 { 0.01 }
fn default_quiet() -> f32 { 0.15 }
fn default_medium() -> f32 { 0.4 }
fn default_loud() -> f32 { 0.7 }
fn default_very_loud() -> f32 { 0.85 }
fn default_min_brightness() -> u8 { 10 }
fn default_max_brightness() -> u8 { 255 }

/// Command-line values that take precedence over the file
#[derive(Debug, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub pixel_count: Option<usize>,
    pub window_size: Option<usize>,
    pub latency_ms: Option<f64>,
}

impl Config {
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(host) = overrides.host {
            self.network.host = host;
        }
        if let Some(port) = overrides.port {
            self.network.port = port;
        }
        if let Some(pixels) = overrides.pixel_count {
            self.tree.pixel_count = pixels;
        }
        if let Some(window) = overrides.window_size {
            self.analysis.window_size = window;
        }
        if let Some(ms) = overrides.latency_ms {
            self.dispatch.latency_offset = ms / 1000.0;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(3..=MAX_PIXELS).contains(&self.tree.pixel_count) {
            return Err(ConfigError::PixelCount(self.tree.pixel_count));
        }
        if self.analysis.window_size == 0 {
            return Err(ConfigError::WindowSize);
        }
        let scale = self.analysis.amplitude_scale;
        if !scale.is_finite() || scale <= 0.0 {
            return Err(ConfigError::AmplitudeScale(scale));
        }
        if !self.analysis.noise_floor.is_finite() {
            return Err(ConfigError::NoiseFloor(self.analysis.noise_floor));
        }
        let e = &self.effects;
        let ladder = [0.0, e.quiet, e.medium, e.loud, e.very_loud, 1.0];
        if ladder.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(ConfigError::Thresholds);
        }
        if e.min_brightness > e.max_brightness {
            return Err(ConfigError::BrightnessRange {
                min: e.min_brightness,
                max: e.max_brightness,
            });
        }
        let latency = self.dispatch.latency_offset;
        if !latency.is_finite() || latency < 0.0 {
            return Err(ConfigError::Latency(latency));
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            quiet: self.effects.quiet,
            medium: self.effects.medium,
            loud: self.effects.loud,
            very_loud: self.effects.very_loud,
        }
    }

    pub fn normalizer(&self) -> Normalizer {
        Normalizer {
            noise_floor: self.analysis.noise_floor,
            amplitude_scale: self.analysis.amplitude_scale,
        }
    }

    pub fn encoder_settings(&self) -> EncoderSettings {
        EncoderSettings {
            pixel_count: self.tree.pixel_count,
            thresholds: self.thresholds(),
            min_brightness: self.effects.min_brightness,
            max_brightness: self.effects.max_brightness,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Explicit path first, then ./treelight.toml, ~/.config/treelight and the
/// platform config directory.
pub fn discover(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("treelight.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("treelight").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("treelight").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

/// Discovered file (or defaults) with overrides applied, validated.
pub fn resolve(explicit: Option<&Path>, overrides: Overrides) -> Result<Config, ConfigError> {
    let mut config = match discover(explicit) {
        Some(path) => {
            let config = load_config(&path)?;
            log::info!("Loaded config from {}", path.display());
            config
        }
        None => Config::default(),
    };
    config.apply(overrides);
    config.validate()?;
    Ok(config)
}
