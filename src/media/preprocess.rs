//! # Reference preprocessing
//!
//! Normalizes an arbitrary recording into the canonical reference clip used
//! for speaker conditioning:
//!
//! 1. decode, downmix to mono and resample to the target rate
//! 2. trim leading/trailing silence (optional)
//! 3. peak-normalize (optional)
//!
//! The result is always mono at exactly the configured rate.

use std::ops::Range;

use log::{debug, info, warn};
use serde::Serialize;

use super::{decode_reference, duration_in_seconds, peak_amplitude, resample, wav, ReferenceAudio};
use crate::config::PreprocessConfig;
use crate::error::Result;

/// Canonical mono reference clip
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalClip {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl CanonicalClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Always 1
    pub fn channels(&self) -> u16 {
        1
    }

    pub fn duration_secs(&self) -> f32 {
        duration_in_seconds(self.samples.len(), self.sample_rate)
    }

    pub fn peak(&self) -> f32 {
        peak_amplitude(&self.samples)
    }

    /// 16-bit PCM mono WAV
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>> {
        wav::encode_pcm16(&self.samples, self.sample_rate)
    }
}

/// What preprocessing did to the clip
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PreprocessReport {
    pub source_sample_rate: u32,
    pub source_channels: u16,
    pub duration_before_trim: f32,
    pub duration_after_trim: f32,
    /// Gain applied by peak normalization, `None` when skipped
    pub normalization_gain: Option<f32>,
}

/// Output of [`ReferencePreprocessor::process`]
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub clip: CanonicalClip,
    pub report: PreprocessReport,
}

/// Runs the preprocessing pipeline with a fixed configuration
#[derive(Debug, Clone)]
pub struct ReferencePreprocessor {
    config: PreprocessConfig,
}

impl ReferencePreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Decode and canonicalize `audio`
    pub fn process(&self, audio: &ReferenceAudio) -> Result<Preprocessed> {
        let decoded = decode_reference(audio)?;
        let target_rate = self.config.target_sample_rate;

        let mut samples = resample::resample_mono(&decoded.samples, decoded.sample_rate, target_rate)?;
        let duration_before_trim = duration_in_seconds(samples.len(), target_rate);

        if self.config.trim_silence {
            let range = trim_range(
                &samples,
                target_rate,
                self.config.top_db,
                self.config.frame_ms,
                self.config.hop_ms,
            );
            if range.start > 0 || range.end < samples.len() {
                debug!(
                    "Trimming silence: keeping samples {}..{} of {}",
                    range.start,
                    range.end,
                    samples.len()
                );
                samples.truncate(range.end);
                samples.drain(..range.start);
            }
        }
        let duration_after_trim = duration_in_seconds(samples.len(), target_rate);

        let normalization_gain = if self.config.normalize {
            normalize_peak(&mut samples, self.config.target_peak)
        } else {
            None
        };

        let report = PreprocessReport {
            source_sample_rate: decoded.sample_rate,
            source_channels: decoded.source_channels,
            duration_before_trim,
            duration_after_trim,
            normalization_gain,
        };

        info!(
            "Reference preprocessed: {} Hz x{} -> {} Hz mono, {:.2}s -> {:.2}s after trim",
            report.source_sample_rate,
            report.source_channels,
            target_rate,
            report.duration_before_trim,
            report.duration_after_trim
        );

        Ok(Preprocessed {
            clip: CanonicalClip::new(samples, target_rate),
            report,
        })
    }
}

/// Range of `samples` left after dropping leading and trailing silence.
///
/// Frames whose RMS lies more than `top_db` below the loudest frame are
/// silent. A clip without any frame above that threshold is kept whole.
pub fn trim_range(
    samples: &[f32],
    sample_rate: u32,
    top_db: f32,
    frame_ms: u32,
    hop_ms: u32,
) -> Range<usize> {
    let full = 0..samples.len();
    if samples.is_empty() {
        return full;
    }

    let frame_len = ((sample_rate as u64 * frame_ms as u64) / 1000).max(1) as usize;
    let hop = ((sample_rate as u64 * hop_ms as u64) / 1000).max(1) as usize;

    let rms: Vec<f32> = (0..samples.len())
        .step_by(hop)
        .map(|start| {
            let end = (start + frame_len).min(samples.len());
            frame_rms(&samples[start..end])
        })
        .collect();

    let loudest = rms.iter().copied().fold(0.0f32, f32::max);
    if loudest <= 0.0 {
        return full;
    }

    let threshold = loudest * 10f32.powf(-top_db / 20.0);
    let first = rms.iter().position(|&r| r > threshold);
    let last = rms.iter().rposition(|&r| r > threshold);

    match (first, last) {
        (Some(first), Some(last)) => {
            let start = first * hop;
            let end = (last * hop + frame_len).min(samples.len());
            start..end
        }
        _ => full,
    }
}

fn frame_rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f32 = frame.iter().map(|&s| s * s).sum();
    (sum / frame.len() as f32).sqrt()
}

/// Scale `samples` so the peak reaches `target_peak`.
///
/// Returns the applied gain, or `None` for a silent clip, which is left as is.
pub fn normalize_peak(samples: &mut [f32], target_peak: f32) -> Option<f32> {
    let peak = peak_amplitude(samples);
    if !peak.is_finite() {
        warn!("Reference clip has a non-finite peak, skipping peak normalization");
        return None;
    }
    if peak == 0.0 {
        warn!("Reference clip is silent, skipping peak normalization");
        return None;
    }

    let gain = target_peak / peak;
    for sample in samples.iter_mut() {
        *sample *= gain;
    }
    debug!("Peak normalization: peak={:.6}, target={:.3}, gain={:.6}", peak, target_peak, gain);
    Some(gain)
}
