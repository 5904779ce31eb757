//! # Synthesis engine
//!
//! Bytes in, bytes out: the canonical reference clip and the target text go
//! in, an encoded WAV comes out. The file-based exchange with the model lives
//! in a per-call [`WorkDir`] that is gone once the call returns.

use std::path::PathBuf;
use std::time::Instant;

use log::{debug, info};

use super::model::{InferenceJob, ModelHandle};
use super::Language;
use crate::config::EngineConfig;
use crate::error::{JobError, Result};
use crate::media::{wav, CanonicalClip};
use crate::utils::temp::WorkDir;

const REFERENCE_FILE: &str = "reference.wav";
const OUTPUT_FILE: &str = "output.wav";

/// Encoded synthesis output
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    /// RIFF/WAV bytes as written by the model
    pub wav: Vec<u8>,
    pub sample_rate: u32,
    pub duration_secs: f32,
}

/// Runs inference against a borrowed [`ModelHandle`]
pub struct SynthesisEngine<'m> {
    model: &'m ModelHandle,
    seed: Option<u64>,
    work_dir: Option<PathBuf>,
}

impl<'m> SynthesisEngine<'m> {
    pub fn new(model: &'m ModelHandle, config: &EngineConfig) -> Self {
        match config.seed {
            Some(seed) => info!("Inference seed pinned to {}", seed),
            None => info!("No inference seed configured; output may vary between runs"),
        }
        Self {
            model,
            seed: config.seed,
            work_dir: config.work_dir.clone(),
        }
    }

    /// Reject requests the model must never see
    pub fn validate(&self, text: &str, language: Language) -> Result<()> {
        if text.trim().is_empty() {
            return Err(JobError::Input("text must not be empty".to_string()));
        }
        if !self.model.supports(language) {
            return Err(JobError::Input(format!(
                "language {} is not supported by {}",
                language,
                self.model.name()
            )));
        }
        Ok(())
    }

    /// Synthesize `text` in the voice of `reference`
    pub async fn synthesize(
        &self,
        text: &str,
        reference: &CanonicalClip,
        language: Language,
    ) -> Result<SynthesizedAudio> {
        self.validate(text, language)?;
        let reference_wav = reference.to_wav_bytes()?;
        self.synthesize_wav(text, &reference_wav, language).await
    }

    /// Same as [`synthesize`](Self::synthesize) with an already encoded WAV reference
    pub async fn synthesize_wav(
        &self,
        text: &str,
        reference_wav: &[u8],
        language: Language,
    ) -> Result<SynthesizedAudio> {
        self.validate(text, language)?;
        if reference_wav.is_empty() {
            return Err(JobError::Input("reference audio must not be empty".to_string()));
        }

        let model = self.model.get().await?;

        let work = WorkDir::create(self.work_dir.as_deref())?;
        let reference_path = work.write(REFERENCE_FILE, reference_wav).await?;
        let output_path = work.file(OUTPUT_FILE);

        let job = InferenceJob {
            text,
            language,
            reference_wav: &reference_path,
            output_wav: &output_path,
            seed: self.seed,
        };

        let started = Instant::now();
        debug!("Running inference: {} chars, language {}", text.chars().count(), language);
        model.synthesize_to_file(&job).await?;

        let wav_bytes = tokio::fs::read(&output_path)
            .await
            .map_err(|e| JobError::Synthesis(format!("model produced no output file: {}", e)))?;
        let info = wav::inspect(&wav_bytes)
            .map_err(|e| JobError::Synthesis(format!("model output is not a WAV container: {}", e)))?;
        if info.frames == 0 {
            return Err(JobError::Synthesis("model produced empty audio".to_string()));
        }

        // The audio is already in memory
        work.release();

        info!(
            "Synthesized {:.2}s of audio at {} Hz in {:.1}s",
            info.duration_secs(),
            info.sample_rate,
            started.elapsed().as_secs_f32()
        );

        Ok(SynthesizedAudio {
            wav: wav_bytes,
            sample_rate: info.sample_rate,
            duration_secs: info.duration_secs(),
        })
    }
}
