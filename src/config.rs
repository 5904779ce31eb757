//! Job configuration
//!
//! Configuration is assembled from defaults, an optional JSON file and then
//! environment variables, in that order.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{JobError, Result};
use crate::tts::Language;

/// Reference preprocessing settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Sample rate of the canonical clip in Hz
    pub target_sample_rate: u32,
    /// Trim leading/trailing silence
    pub trim_silence: bool,
    /// Frames quieter than this many dB below the loudest frame are silence
    pub top_db: f32,
    /// Analysis frame length for trimming, in milliseconds
    pub frame_ms: u32,
    /// Hop between analysis frames, in milliseconds
    pub hop_ms: u32,
    /// Peak-normalize the clip
    pub normalize: bool,
    /// Peak ceiling as a fraction of full scale
    pub target_peak: f32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16_000,
            trim_silence: true,
            top_db: 25.0,
            frame_ms: 25,
            hop_ms: 10,
            normalize: true,
            target_peak: 0.97,
        }
    }
}

/// Synthesis engine settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Model identifier understood by the XTTS runtime
    pub model_name: String,
    /// Local checkpoint directory; when unset the runtime resolves `model_name` itself
    pub model_dir: Option<PathBuf>,
    /// Python interpreter that has the `TTS` package installed
    pub python: String,
    /// Prefer the CUDA device when one is available
    pub use_cuda: bool,
    /// Language used when the request does not name one
    pub default_language: Language,
    /// Seed applied before every inference; `None` leaves sampling unpinned
    pub seed: Option<u64>,
    /// Fully qualified classes registered as trusted for checkpoint unpickling
    pub trusted_types: Vec<String>,
    /// Fail the load when a trusted type cannot be registered
    pub strict_trusted_types: bool,
    /// Parent directory for per-call working directories
    pub work_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_name: "tts_models/multilingual/multi-dataset/xtts_v2".to_string(),
            model_dir: None,
            python: "python3".to_string(),
            use_cuda: true,
            default_language: Language::Korean,
            seed: None,
            trusted_types: default_trusted_types(),
            strict_trusted_types: false,
            work_dir: None,
        }
    }
}

/// Config classes referenced by XTTS v2 checkpoints
pub fn default_trusted_types() -> Vec<String> {
    [
        "TTS.tts.configs.xtts_config.XttsConfig",
        "TTS.tts.models.xtts.XttsAudioConfig",
        "TTS.tts.models.xtts.XttsTokenizerConfig",
        "TTS.tts.models.xtts.XttsSpeakerEncoderConfig",
        "TTS.tts.models.xtts.XttsVocoderConfig",
        "TTS.tts.models.xtts.XttsArgs",
        "TTS.config.shared_configs.BaseDatasetConfig",
        "TTS.config.shared_configs.AudioConfig",
        "TTS.config.shared_configs.BaseAudioConfig",
        "TTS.config.shared_configs.CharactersConfig",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Bucket used for locations given as bare object keys
    pub default_bucket: Option<String>,
    /// Override of the Cloud Storage API endpoint (emulators, testing)
    pub gcs_endpoint: Option<String>,
    /// Static bearer token; when unset the metadata server is asked
    pub access_token: Option<String>,
}

/// Bounded retry around the final upload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
        }
    }
}

/// Full job configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct JobConfig {
    pub preprocess: PreprocessConfig,
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    pub upload_retry: RetryConfig,
}

impl JobConfig {
    /// Load from an optional JSON file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            JobError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&json)
            .map_err(|e| JobError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bucket) = lookup("GCS_BUCKET_NAME") {
            self.storage.default_bucket = Some(bucket);
        }
        if let Some(endpoint) = lookup("GCS_ENDPOINT") {
            self.storage.gcs_endpoint = Some(endpoint);
        }
        if let Some(token) = lookup("GCS_ACCESS_TOKEN") {
            self.storage.access_token = Some(token);
        }
        if let Some(flag) = lookup("USE_CUDA") {
            self.engine.use_cuda = flag.trim() == "1" || flag.trim().eq_ignore_ascii_case("true");
        }
        if let Some(code) = lookup("TTS_LANGUAGE") {
            self.engine.default_language = code
                .parse()
                .map_err(|e: JobError| JobError::Config(format!("TTS_LANGUAGE: {}", e)))?;
        }
        if let Some(name) = lookup("TTS_MODEL_NAME") {
            self.engine.model_name = name;
        }
        if let Some(dir) = lookup("XTTS_MODEL_DIR") {
            self.engine.model_dir = Some(PathBuf::from(dir));
        }
        if let Some(python) = lookup("TTS_PYTHON") {
            self.engine.python = python;
        }
        if let Some(seed) = lookup("TTS_SEED") {
            let seed = seed
                .trim()
                .parse::<u64>()
                .map_err(|e| JobError::Config(format!("TTS_SEED must be an integer: {}", e)))?;
            self.engine.seed = Some(seed);
        }
        if let Some(dir) = lookup("TTS_WORK_DIR") {
            self.engine.work_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        let p = &self.preprocess;
        if p.target_sample_rate == 0 {
            return Err(JobError::Config("target_sample_rate must be positive".to_string()));
        }
        if !(p.target_peak > 0.0 && p.target_peak <= 1.0) {
            return Err(JobError::Config(format!(
                "target_peak must be in (0, 1], got {}",
                p.target_peak
            )));
        }
        if p.top_db <= 0.0 {
            return Err(JobError::Config("top_db must be positive".to_string()));
        }
        if p.frame_ms == 0 || p.hop_ms == 0 {
            return Err(JobError::Config("frame_ms and hop_ms must be positive".to_string()));
        }
        if self.upload_retry.max_attempts == 0 {
            return Err(JobError::Config("upload_retry.max_attempts must be at least 1".to_string()));
        }
        if !(self.upload_retry.backoff_multiplier >= 1.0 && self.upload_retry.backoff_multiplier.is_finite()) {
            return Err(JobError::Config("upload_retry.backoff_multiplier must be >= 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = JobConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.preprocess.target_sample_rate, 16_000);
        assert_eq!(config.preprocess.target_peak, 0.97);
        assert_eq!(config.engine.default_language, Language::Korean);
        assert!(config.engine.seed.is_none());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = JobConfig::default();
        config
            .apply_env(env(&[
                ("GCS_BUCKET_NAME", "voices-bucket"),
                ("USE_CUDA", "0"),
                ("TTS_LANGUAGE", "en"),
                ("TTS_SEED", "42"),
            ]))
            .unwrap();
        assert_eq!(config.storage.default_bucket.as_deref(), Some("voices-bucket"));
        assert!(!config.engine.use_cuda);
        assert_eq!(config.engine.default_language, Language::English);
        assert_eq!(config.engine.seed, Some(42));
    }

    #[test]
    fn bad_env_values_are_config_errors() {
        let mut config = JobConfig::default();
        assert!(matches!(
            config.apply_env(env(&[("TTS_SEED", "abc")])),
            Err(JobError::Config(_))
        ));
        assert!(matches!(
            config.apply_env(env(&[("TTS_LANGUAGE", "xx")])),
            Err(JobError::Config(_))
        ));
    }

    #[test]
    fn partial_json_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        std::fs::write(&path, r#"{"preprocess": {"normalize": false}, "engine": {"seed": 7}}"#).unwrap();

        let config = JobConfig::from_file(&path).unwrap();
        assert!(!config.preprocess.normalize);
        assert!(config.preprocess.trim_silence);
        assert_eq!(config.engine.seed, Some(7));
        assert_eq!(config.upload_retry.max_attempts, 3);
    }

    #[test]
    fn trusted_types_cover_xtts_checkpoint_configs() {
        let types = default_trusted_types();
        for name in [
            "TTS.tts.configs.xtts_config.XttsConfig",
            "TTS.tts.models.xtts.XttsAudioConfig",
            "TTS.tts.models.xtts.XttsTokenizerConfig",
            "TTS.tts.models.xtts.XttsSpeakerEncoderConfig",
            "TTS.tts.models.xtts.XttsVocoderConfig",
            "TTS.config.shared_configs.BaseDatasetConfig",
            "TTS.config.shared_configs.AudioConfig",
            "TTS.config.shared_configs.CharactersConfig",
        ] {
            assert!(types.iter().any(|t| t == name), "missing {}", name);
        }
        assert!(!EngineConfig::default().strict_trusted_types);
    }

    #[test]
    fn invalid_peak_is_rejected() {
        let mut config = JobConfig::default();
        config.preprocess.target_peak = 1.5;
        assert!(config.validate().is_err());
    }
}
