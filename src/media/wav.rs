//! WAV encoding and inspection

use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::{JobError, Result};

/// Basic facts about a WAV container
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Frames per channel
    pub frames: u32,
}

impl WavInfo {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f32 / self.sample_rate as f32
    }
}

/// Encode mono samples as 16-bit PCM WAV
pub fn encode_pcm16(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = WavWriter::new(&mut cursor, spec)
            .map_err(|e| JobError::Io(std::io::Error::other(e.to_string())))?;
        for &sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
            writer
                .write_sample(value)
                .map_err(|e| JobError::Io(std::io::Error::other(e.to_string())))?;
        }
        writer
            .finalize()
            .map_err(|e| JobError::Io(std::io::Error::other(e.to_string())))?;
    }
    Ok(cursor.into_inner())
}

/// Read the header of a WAV container without decoding the samples
pub fn inspect(bytes: &[u8]) -> std::result::Result<WavInfo, hound::Error> {
    let reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    Ok(WavInfo {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
        frames: reader.duration(),
    })
}
