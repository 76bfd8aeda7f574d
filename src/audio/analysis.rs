use anyhow::Result;
use indicatif::ProgressBar;
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

use super::decode::AudioData;
use super::features::{rms, BandFilterBank, Normalizer};
use super::timeline::{Mode, Timeline, TimelineEntry};

const FRAME_SIZE: usize = 1024;
const HOP_SIZE: usize = 256;
/// Onset frames computed per rayon task
const FRAMES_PER_TASK: usize = 256;
const DEFAULT_TEMPO: f32 = 120.0;
/// Seconds per beat considered when estimating tempo (200 down to 60 BPM)
const BEAT_PERIOD_RANGE: (f32, f32) = (0.3, 1.0);
/// Centre of the tempo prior, 120 BPM, and its width in octaves
const PREFERRED_PERIOD: f32 = 0.5;
const PRIOR_OCTAVES: f32 = 1.0;
/// Penalty weight for beat gaps that stray from the period
const TIGHTNESS: f32 = 100.0;

/// Whole-file onset/tempo result
#[derive(Clone, Debug)]
pub struct BeatAnalysis {
    pub beat_times: Vec<f32>,
    pub tempo_bpm: f32,
}

/// Walks decoded audio in fixed windows and produces a Timeline for one mode.
pub struct TimelineBuilder {
    normalizer: Normalizer,
    window_size: usize,
    progress: Option<ProgressBar>,
}

impl TimelineBuilder {
    pub fn new(normalizer: Normalizer, window_size: usize) -> Self {
        Self {
            normalizer,
            window_size: window_size.max(1),
            progress: None,
        }
    }

    /// Ticks `progress` once per analyzed window
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn window_count(&self, audio: &AudioData) -> usize {
        audio.frames().div_ceil(self.window_size)
    }

    pub fn build(&self, audio: &AudioData, mode: Mode) -> Result<Timeline> {
        let mono = audio.mono();
        let sr = audio.sample_rate;

        let timeline = match mode {
            Mode::Effects | Mode::Brightness => {
                log::info!("Analyzing amplitude ({} sample windows)...", self.window_size);
                Timeline::new(mode, self.amplitude_entries(&mono, sr), None)?
            }
            Mode::Vu => {
                log::info!("Analyzing frequency bands (bass, mid, treble)...");
                Timeline::new(mode, self.band_entries(&mono, sr), None)?
            }
            Mode::Beat => {
                log::info!("Detecting beats and tempo...");
                let signal: Vec<f32> = mono.iter().map(|&s| s as f32 / 32768.0).collect();
                let beats = detect_beats(&signal, sr);
                log::info!(
                    "Detected tempo: {:.1} BPM, {} beats",
                    beats.tempo_bpm,
                    beats.beat_times.len()
                );
                let entries = beats
                    .beat_times
                    .iter()
                    .enumerate()
                    .map(|(index, &t)| TimelineEntry::Beat {
                        timestamp: t as f64,
                        index,
                    })
                    .collect();
                Timeline::new(mode, entries, Some(beats.tempo_bpm))?
            }
        };

        if let Some(ref pb) = self.progress {
            pb.finish_and_clear();
        }
        log::info!("Analyzed {} timeline points", timeline.len());
        Ok(timeline)
    }

    fn timestamp(&self, window_idx: usize, sample_rate: u32) -> f64 {
        (window_idx * self.window_size) as f64 / sample_rate as f64
    }

    fn tick(&self) {
        if let Some(ref pb) = self.progress {
            pb.inc(1);
        }
    }

    fn amplitude_entries(&self, mono: &[i16], sample_rate: u32) -> Vec<TimelineEntry> {
        mono.par_chunks(self.window_size)
            .enumerate()
            .map(|(i, window)| {
                let level = self.normalizer.normalize(rms(window));
                self.tick();
                TimelineEntry::Amplitude {
                    timestamp: self.timestamp(i, sample_rate),
                    level,
                }
            })
            .collect()
    }

    fn band_entries(&self, mono: &[i16], sample_rate: u32) -> Vec<TimelineEntry> {
        let bank = BandFilterBank::new(sample_rate);
        mono.par_chunks(self.window_size)
            .enumerate()
            .map(|(i, window)| {
                let raw = bank.energies(window);
                self.tick();
                TimelineEntry::Bands {
                    timestamp: self.timestamp(i, sample_rate),
                    bass: self.normalizer.normalize(raw.bass),
                    mid: self.normalizer.normalize(raw.mid),
                    treble: self.normalizer.normalize(raw.treble),
                }
            })
            .collect()
    }
}

/// Onset envelope, tempo by autocorrelation, then one beat per tempo period
/// chosen by dynamic programming so off-beat transients are passed over.
pub fn detect_beats(samples: &[f32], sample_rate: u32) -> BeatAnalysis {
    let envelope = OnsetEnvelope::compute(samples, sample_rate);
    let Some((centered, scaled)) = envelope.standardized() else {
        return BeatAnalysis {
            beat_times: Vec::new(),
            tempo_bpm: DEFAULT_TEMPO,
        };
    };

    let period = estimate_period(&centered, envelope.frame_rate)
        .unwrap_or(envelope.frame_rate * 60.0 / DEFAULT_TEMPO);
    let tempo_bpm = 60.0 * envelope.frame_rate / period;
    log::debug!(
        "Onset envelope: {} frames at {:.1} fps, beat period {:.2} frames",
        scaled.len(),
        envelope.frame_rate,
        period
    );

    let beat_times = track_beats(&scaled, period)
        .into_iter()
        .map(|frame| envelope.time(frame))
        .collect();

    BeatAnalysis {
        beat_times,
        tempo_bpm,
    }
}

/// Positive spectral change per frame
struct OnsetEnvelope {
    strength: Vec<f32>,
    sample_rate: f32,
    frame_rate: f32,
}

impl OnsetEnvelope {
    fn compute(samples: &[f32], sample_rate: u32) -> Self {
        let fft = FftPlanner::<f32>::new().plan_fft_forward(FRAME_SIZE);
        let taper: Vec<f32> = (0..FRAME_SIZE)
            .map(|i| (PI * i as f32 / FRAME_SIZE as f32).sin().powi(2))
            .collect();
        let spectrum = |start: usize| -> Vec<f32> {
            let mut buffer: Vec<Complex<f32>> = samples[start..start + FRAME_SIZE]
                .iter()
                .zip(&taper)
                .map(|(s, w)| Complex::new(s * w, 0.0))
                .collect();
            fft.process(&mut buffer);
            buffer[..FRAME_SIZE / 2].iter().map(|c| c.norm()).collect()
        };

        let frames = match samples.len().checked_sub(FRAME_SIZE) {
            Some(rest) => rest / HOP_SIZE + 1,
            None => 0,
        };
        let starts: Vec<usize> = (0..frames).map(|f| f * HOP_SIZE).collect();

        // each task reseeds from the frame before its first one; frame 0 is its own seed
        let strength = starts
            .par_chunks(FRAMES_PER_TASK)
            .map(|chunk| {
                let mut previous = spectrum(chunk[0].saturating_sub(HOP_SIZE));
                chunk
                    .iter()
                    .map(|&start| {
                        let current = spectrum(start);
                        let rise: f32 = current
                            .iter()
                            .zip(&previous)
                            .map(|(c, p)| (c - p).max(0.0))
                            .sum();
                        previous = current;
                        if rise.is_finite() { rise } else { 0.0 }
                    })
                    .collect::<Vec<f32>>()
            })
            .collect::<Vec<_>>()
            .concat();

        Self {
            strength,
            sample_rate: sample_rate as f32,
            frame_rate: sample_rate as f32 / HOP_SIZE as f32,
        }
    }

    /// Centre of `frame` in seconds
    fn time(&self, frame: usize) -> f32 {
        (frame * HOP_SIZE + FRAME_SIZE / 2) as f32 / self.sample_rate
    }

    /// Zero-mean and zero-based copies, both in units of the standard
    /// deviation. None when the spectrum never changes.
    fn standardized(&self) -> Option<(Vec<f32>, Vec<f32>)> {
        if self.strength.is_empty() {
            return None;
        }
        let n = self.strength.len() as f32;
        let mean = self.strength.iter().sum::<f32>() / n;
        let variance = self.strength.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;
        let deviation = variance.sqrt();
        if deviation <= f32::EPSILON {
            return None;
        }
        let centered = self.strength.iter().map(|x| (x - mean) / deviation).collect();
        let scaled = self.strength.iter().map(|x| x / deviation).collect();
        Some((centered, scaled))
    }
}

/// Beat period in frames: the autocorrelation peak inside the accepted
/// range, weighted toward `PREFERRED_PERIOD` and refined between frames.
fn estimate_period(centered: &[f32], frame_rate: f32) -> Option<f32> {
    let correlation = |lag: usize| -> f32 {
        centered.iter().zip(&centered[lag..]).map(|(a, b)| a * b).sum()
    };
    let prior = |lag: f32| -> f32 {
        let octaves = (lag / frame_rate / PREFERRED_PERIOD).log2() / PRIOR_OCTAVES;
        (-0.5 * octaves * octaves).exp()
    };
    let weighted = |lag: usize| correlation(lag) * prior(lag as f32);

    let shortest = ((BEAT_PERIOD_RANGE.0 * frame_rate).floor() as usize).max(2);
    let longest = ((BEAT_PERIOD_RANGE.1 * frame_rate).ceil() as usize).min(centered.len().saturating_sub(2));
    if shortest > longest {
        return None;
    }

    let (best, peak) = (shortest..=longest)
        .map(|lag| (lag, weighted(lag)))
        .max_by(|a, b| a.1.total_cmp(&b.1))?;
    if peak <= 0.0 {
        return None;
    }

    let (before, after) = (weighted(best - 1), weighted(best + 1));
    let curvature = before - 2.0 * peak + after;
    let shift = if curvature < 0.0 {
        (0.5 * (before - after) / curvature).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    Some(best as f32 + shift)
}

/// Frames chosen as beats. A frame scores its onset strength plus the best
/// earlier beat within half to twice the period, less `TIGHTNESS` times
/// the squared log-ratio of that gap to the period. A chain whose best
/// predecessor scores at or below zero starts afresh. The beats are the
/// chain behind the highest score.
fn track_beats(onsets: &[f32], period: f32) -> Vec<usize> {
    let shortest = ((period / 2.0).round() as usize).max(1);
    let longest = ((period * 2.0).round() as usize).max(shortest);
    let mut score = vec![0.0f32; onsets.len()];
    let mut chain: Vec<Option<usize>> = vec![None; onsets.len()];

    for frame in 0..onsets.len() {
        let best = frame.checked_sub(shortest).and_then(|nearest| {
            (frame.saturating_sub(longest)..=nearest)
                .map(|earlier| {
                    let ratio = (frame - earlier) as f32 / period;
                    (earlier, score[earlier] - TIGHTNESS * ratio.ln().powi(2))
                })
                .max_by(|a, b| a.1.total_cmp(&b.1))
        });
        score[frame] = onsets[frame];
        if let Some((earlier, carried)) = best {
            if carried > 0.0 {
                score[frame] += carried;
                chain[frame] = Some(earlier);
            }
        }
    }

    // earliest frame wins a tie so silence after the last beat adds nothing
    let Some(last) = (0..score.len()).max_by(|&a, &b| score[a].total_cmp(&score[b]).then(b.cmp(&a))) else {
        return Vec::new();
    };
    if score[last] <= 0.0 {
        return Vec::new();
    }
    let mut beats = vec![last];
    while let Some(earlier) = chain[beats[beats.len() - 1]] {
        beats.push(earlier);
    }
    beats.reverse();
    beats
}
