//! Audio handling for reference clips
//!
//! Decoding of uploaded recordings, resampling, WAV encoding and the
//! reference preprocessing pipeline.

pub mod decode;
pub mod preprocess;
pub mod resample;
pub mod wav;

pub use decode::{decode_reference, DecodedAudio};
pub use preprocess::{CanonicalClip, PreprocessReport, Preprocessed, ReferencePreprocessor};

/// Raw reference recording as received from storage
#[derive(Debug, Clone)]
pub struct ReferenceAudio {
    /// Encoded bytes in whatever container the client uploaded
    pub bytes: Vec<u8>,
    /// Declared MIME type, if known
    pub content_type: Option<String>,
    /// File extension of the source location, if any
    pub extension: Option<String>,
}

impl ReferenceAudio {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            content_type: None,
            extension: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into().to_lowercase());
        self
    }

    /// Container hint derived from the content type, falling back to the extension
    pub fn format_hint(&self) -> Option<&str> {
        let from_mime = self.content_type.as_deref().and_then(|mime| {
            let mime = mime.split(';').next().unwrap_or(mime).trim();
            match mime {
                "audio/wav" | "audio/x-wav" | "audio/wave" | "audio/vnd.wave" => Some("wav"),
                "audio/mpeg" | "audio/mp3" => Some("mp3"),
                "audio/flac" | "audio/x-flac" => Some("flac"),
                "audio/ogg" | "audio/vorbis" => Some("ogg"),
                "audio/mp4" | "audio/x-m4a" | "audio/m4a" => Some("m4a"),
                "audio/aac" => Some("aac"),
                _ => None,
            }
        });
        from_mime.or(self.extension.as_deref())
    }
}

/// Duration in seconds of `sample_count` mono samples
pub fn duration_in_seconds(sample_count: usize, sample_rate: u32) -> f32 {
    if sample_rate == 0 {
        return 0.0;
    }
    sample_count as f32 / sample_rate as f32
}

/// Maximum absolute amplitude
pub fn peak_amplitude(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |peak, &s| peak.max(s.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_calculation() {
        assert_eq!(duration_in_seconds(16_000, 16_000), 1.0);
        assert_eq!(duration_in_seconds(8_000, 16_000), 0.5);
        assert_eq!(duration_in_seconds(0, 16_000), 0.0);
        assert_eq!(duration_in_seconds(100, 0), 0.0);
    }

    #[test]
    fn mime_type_wins_over_extension() {
        let audio = ReferenceAudio::new(Vec::new())
            .with_content_type("audio/mpeg")
            .with_extension("WAV");
        assert_eq!(audio.format_hint(), Some("mp3"));

        let audio = ReferenceAudio::new(Vec::new())
            .with_content_type("application/octet-stream")
            .with_extension("FLAC");
        assert_eq!(audio.format_hint(), Some("flac"));
    }
}
