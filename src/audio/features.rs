use biquad::{Biquad, Coefficients, DirectForm2Transposed, Type};

/// Q values of the two second-order sections of a 4th-order Butterworth filter
const BUTTERWORTH_4_Q: [f64; 2] = [0.541_196_1, 1.306_563];

/// Analysis bands as (low cutoff Hz, high cutoff Hz)
pub const BASS_BAND: (f64, Option<f64>) = (20.0, Some(250.0));
pub const MID_BAND: (f64, Option<f64>) = (250.0, Some(2000.0));
pub const TREBLE_BAND: (f64, Option<f64>) = (2000.0, None);

/// RMS of a block of 16-bit samples, computed in f64.
/// Empty input and any non-finite result yield 0.0.
pub fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    finite_or_zero((sum / samples.len() as f64).sqrt())
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Maps a raw RMS value to 0.0-1.0 after noise-floor subtraction and
/// fixed-scale division.
#[derive(Clone, Copy, Debug)]
pub struct Normalizer {
    pub noise_floor: f64,
    pub amplitude_scale: f64,
}

impl Normalizer {
    pub fn normalize(&self, raw: f64) -> f32 {
        let adjusted = (raw - self.noise_floor).max(0.0);
        let normalized = adjusted / self.amplitude_scale;
        if normalized.is_nan() {
            return 0.0;
        }
        normalized.clamp(0.0, 1.0) as f32
    }
}

/// Raw (un-normalized) RMS per band
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BandLevels {
    pub bass: f64,
    pub mid: f64,
    pub treble: f64,
}

/// Filter designs for the three analysis bands at one sample rate.
/// A band whose lower cutoff is at or above Nyquist has no design and
/// always reports zero energy.
pub struct BandFilterBank {
    bass: Option<Vec<Coefficients<f64>>>,
    mid: Option<Vec<Coefficients<f64>>>,
    treble: Option<Vec<Coefficients<f64>>>,
}

impl BandFilterBank {
    pub fn new(sample_rate: u32) -> Self {
        let fs = sample_rate as f64;
        Self {
            bass: design_band(fs, BASS_BAND),
            mid: design_band(fs, MID_BAND),
            treble: design_band(fs, TREBLE_BAND),
        }
    }

    /// Filters one window from a zeroed filter state and returns the RMS of
    /// each band.
    pub fn energies(&self, window: &[i16]) -> BandLevels {
        BandLevels {
            bass: filtered_rms(self.bass.as_deref(), window),
            mid: filtered_rms(self.mid.as_deref(), window),
            treble: filtered_rms(self.treble.as_deref(), window),
        }
    }
}

/// High-pass sections at the low cutoff, plus low-pass sections at the high
/// cutoff when it lies below Nyquist.
fn design_band(fs: f64, (low, high): (f64, Option<f64>)) -> Option<Vec<Coefficients<f64>>> {
    let nyquist = fs / 2.0;
    if low >= nyquist {
        return None;
    }

    let mut stages = Vec::with_capacity(4);
    stages.extend(butterworth_sections(Type::HighPass, low / nyquist)?);
    if let Some(high) = high.filter(|&h| h < nyquist) {
        stages.extend(butterworth_sections(Type::LowPass, high / nyquist)?);
    }
    Some(stages)
}

/// Two biquad sections of a 4th-order Butterworth. `cutoff` is a fraction of
/// Nyquist; `from_params` would halve it again.
fn butterworth_sections(ty: Type<f64>, cutoff: f64) -> Option<[Coefficients<f64>; 2]> {
    let [q1, q2] = BUTTERWORTH_4_Q;
    Some([
        Coefficients::<f64>::from_normalized_params(ty, cutoff, q1).ok()?,
        Coefficients::<f64>::from_normalized_params(ty, cutoff, q2).ok()?,
    ])
}

fn filtered_rms(stages: Option<&[Coefficients<f64>]>, window: &[i16]) -> f64 {
    let Some(stages) = stages else {
        return 0.0;
    };
    if window.is_empty() {
        return 0.0;
    }

    let mut filters: Vec<DirectForm2Transposed<f64>> = stages
        .iter()
        .cloned()
        .map(DirectForm2Transposed::<f64>::new)
        .collect();

    let mut sum = 0.0f64;
    for &sample in window {
        let mut y = sample as f64;
        for filter in filters.iter_mut() {
            y = filter.run(y);
        }
        sum += y * y;
    }
    finite_or_zero((sum / window.len() as f64).sqrt())
}

/// Strip brightness for a normalized level, clamped to the configured range
pub fn brightness(level: f32, min: u8, max: u8) -> u8 {
    let value = (level as f64 * 255.0).clamp(min as f64, max as f64);
    value as u8
}
