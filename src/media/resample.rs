//! Sample-rate conversion with `rubato` sinc interpolation

use log::debug;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::error::{JobError, Result};

const CHUNK_SIZE: usize = 1024;

/// Resample mono `input` from `from_rate` to `to_rate`.
///
/// The output is aligned with the input (the resampler delay is removed) and
/// holds exactly `round(len * to_rate / from_rate)` samples.
pub fn resample_mono(input: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == 0 || to_rate == 0 {
        return Err(JobError::Decode(format!(
            "invalid sample rate conversion {} -> {}",
            from_rate, to_rate
        )));
    }
    if from_rate == to_rate || input.is_empty() {
        return Ok(input.to_vec());
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let expected = (input.len() as f64 * ratio).round() as usize;

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_SIZE, 1)
        .map_err(|e| JobError::Decode(format!("failed to initialise resampler: {}", e)))?;

    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected + delay + CHUNK_SIZE);
    let mut pos = 0;

    while input.len() - pos >= resampler.input_frames_next() {
        let needed = resampler.input_frames_next();
        let frames = resampler
            .process(&[&input[pos..pos + needed]], None)
            .map_err(|e| JobError::Decode(format!("resampling failed: {}", e)))?;
        output.extend_from_slice(&frames[0]);
        pos += needed;
    }

    if pos < input.len() {
        let frames = resampler
            .process_partial(Some(&[&input[pos..]]), None)
            .map_err(|e| JobError::Decode(format!("resampling failed: {}", e)))?;
        output.extend_from_slice(&frames[0]);
    }

    // Flush the filter tail until the delayed signal is complete
    while output.len() < expected + delay {
        let frames = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| JobError::Decode(format!("resampling failed: {}", e)))?;
        if frames[0].is_empty() {
            break;
        }
        output.extend_from_slice(&frames[0]);
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected);

    debug!(
        "Resampled {} samples at {} Hz into {} samples at {} Hz",
        input.len(),
        from_rate,
        output.len(),
        to_rate
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, seconds: f32, rate: u32) -> Vec<f32> {
        let n = (seconds * rate as f32) as usize;
        (0..n)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn same_rate_is_identity() {
        let input = sine(440.0, 0.1, 16_000);
        assert_eq!(resample_mono(&input, 16_000, 16_000).unwrap(), input);
    }

    #[test]
    fn downsampling_hits_exact_length() {
        let input = sine(440.0, 1.0, 44_100);
        let output = resample_mono(&input, 44_100, 16_000).unwrap();
        assert_eq!(output.len(), 16_000);
    }

    #[test]
    fn tone_amplitude_survives_resampling() {
        let input = sine(300.0, 0.5, 48_000);
        let output = resample_mono(&input, 48_000, 16_000).unwrap();
        // Ignore the edges where the filter sees zero padding
        let middle = &output[1_000..output.len() - 1_000];
        let peak = middle.iter().fold(0.0f32, |p, &s| p.max(s.abs()));
        assert!((peak - 0.5).abs() < 0.02, "peak after resampling: {}", peak);
    }

    #[test]
    fn short_input_is_flushed() {
        let input = vec![0.25f32; 100];
        let output = resample_mono(&input, 8_000, 16_000).unwrap();
        assert_eq!(output.len(), 200);
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(resample_mono(&[0.0; 10], 0, 16_000).is_err());
    }
}
