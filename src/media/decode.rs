//! # Reference decoding
//!
//! Turns uploaded bytes into mono `f32` PCM at the source sample rate.
//!
//! - RIFF/WAV goes through `hound` (8/16/24/32-bit integer and 32-bit float)
//! - MP3, AAC/M4A, FLAC and OGG/Vorbis go through `symphonia`
//!
//! Multichannel input is downmixed by averaging the channels of each frame.

use std::io::Cursor;

use hound::{SampleFormat, WavReader};
use log::{debug, info, warn};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::ReferenceAudio;
use crate::error::{JobError, Result};

/// Decoded, downmixed audio
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Mono samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Channel count of the source before downmixing
    pub source_channels: u16,
}

/// Decode a reference recording of any supported container
pub fn decode_reference(audio: &ReferenceAudio) -> Result<DecodedAudio> {
    if audio.bytes.is_empty() {
        return Err(JobError::Decode("reference audio is empty".to_string()));
    }

    let decoded = if is_riff_wave(&audio.bytes) {
        match decode_wav(&audio.bytes) {
            Ok(decoded) => decoded,
            // Compressed WAV payloads (ADPCM etc.) that hound rejects
            Err(wav_err) => {
                debug!("hound rejected WAV payload ({}), trying symphonia", wav_err);
                decode_with_symphonia(&audio.bytes, Some("wav"))?
            }
        }
    } else {
        decode_with_symphonia(&audio.bytes, audio.format_hint())?
    };

    if decoded.samples.is_empty() {
        return Err(JobError::Decode("reference audio contains no samples".to_string()));
    }
    if decoded.sample_rate == 0 {
        return Err(JobError::Decode("reference audio has no sample rate".to_string()));
    }

    info!(
        "Decoded reference: {} samples, {} Hz, {} channel(s)",
        decoded.samples.len(),
        decoded.sample_rate,
        decoded.source_channels
    );
    Ok(decoded)
}

fn is_riff_wave(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Decode a WAV payload with hound
pub fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio> {
    let mut reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|s| s as f32 / 128.0))
            .collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|s| s as f32 / 32768.0))
            .collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|s| s as f32 / 8_388_608.0))
            .collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|s| s as f32 / 2_147_483_648.0))
            .collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        (format, bits) => {
            return Err(JobError::Decode(format!(
                "unsupported WAV sample format: {:?}, {} bit",
                format, bits
            )));
        }
    };

    ensure_finite(&interleaved)?;

    let channels = spec.channels.max(1);
    let mut samples = Vec::with_capacity(interleaved.len() / channels as usize);
    downmix_into(&mut samples, &interleaved, channels as usize);

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
        source_channels: channels,
    })
}

/// Decode any container symphonia can probe
pub fn decode_with_symphonia(bytes: &[u8], extension: Option<&str>) -> Result<DecodedAudio> {
    let cursor = Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| JobError::Decode(format!("unrecognized audio container: {}", e)))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| JobError::Decode("no audio track found".to_string()))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| JobError::Decode(format!("unsupported codec: {}", e)))?;

    let mut samples = Vec::new();
    let mut skipped = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(JobError::Decode(format!("failed to read packet: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count().max(1) as u16;

                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                ensure_finite(buffer.samples())?;
                downmix_into(&mut samples, buffer.samples(), channels as usize);
            }
            Err(SymphoniaError::DecodeError(e)) => {
                skipped += 1;
                warn!("Skipping undecodable packet: {}", e);
            }
            Err(e) => return Err(JobError::Decode(format!("decoder failure: {}", e))),
        }
    }

    if skipped > 0 {
        warn!("{} packet(s) could not be decoded and were skipped", skipped);
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        source_channels: channels,
    })
}

/// NaN or infinite samples poison RMS and peak measurement downstream
fn ensure_finite(samples: &[f32]) -> Result<()> {
    match samples.iter().position(|s| !s.is_finite()) {
        Some(index) => Err(JobError::Decode(format!(
            "reference audio contains a non-finite sample ({}) at index {}",
            samples[index], index
        ))),
        None => Ok(()),
    }
}

/// Average interleaved frames into `out`
fn downmix_into(out: &mut Vec<f32>, interleaved: &[f32], channels: usize) {
    if channels <= 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}
