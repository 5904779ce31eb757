//! Model boundary
//!
//! A [`ModelLoader`] knows which languages its model supports and how to
//! bring the weights up on a device. [`ModelHandle`] wraps a loader and loads
//! at most once: concurrent callers wait for the same load, later callers
//! reuse the instance, and a failed load is reported again instead of being
//! retried.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use log::{error, info};
use serde::Serialize;
use tokio::sync::OnceCell;

use super::Language;
use crate::error::{JobError, Result};

/// Compute device the weights are bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cuda,
    Cpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::Cpu => "cpu",
        }
    }
}

/// One inference call expressed in files
#[derive(Debug, Clone)]
pub struct InferenceJob<'a> {
    pub text: &'a str,
    pub language: Language,
    pub reference_wav: &'a Path,
    pub output_wav: &'a Path,
    pub seed: Option<u64>,
}

/// A loaded speaker-conditioned TTS model
#[async_trait]
pub trait SpeechModel: Send + Sync {
    fn device(&self) -> Device;

    /// Render `job.text` in the voice of `job.reference_wav` into `job.output_wav`
    async fn synthesize_to_file(&self, job: &InferenceJob<'_>) -> Result<()>;
}

/// Brings a [`SpeechModel`] up
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Human-readable model name for logs
    fn name(&self) -> &str;

    /// Languages the model accepts; known before loading
    fn supported_languages(&self) -> &[Language];

    async fn load(&self) -> Result<Box<dyn SpeechModel>>;
}

type LoadSlot = std::result::Result<Box<dyn SpeechModel>, String>;

/// Lazily loaded, process-lifetime model instance
pub struct ModelHandle {
    loader: Box<dyn ModelLoader>,
    slot: OnceCell<LoadSlot>,
}

impl ModelHandle {
    pub fn new<L: ModelLoader + 'static>(loader: L) -> Self {
        Self::from_boxed(Box::new(loader))
    }

    pub fn from_boxed(loader: Box<dyn ModelLoader>) -> Self {
        Self {
            loader,
            slot: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.loader.name()
    }

    pub fn supported_languages(&self) -> &[Language] {
        self.loader.supported_languages()
    }

    pub fn supports(&self, language: Language) -> bool {
        self.supported_languages().contains(&language)
    }

    /// True once weights have been loaded successfully
    pub fn is_loaded(&self) -> bool {
        matches!(self.slot.get(), Some(Ok(_)))
    }

    /// The loaded model, loading it on first use
    pub async fn get(&self) -> Result<&dyn SpeechModel> {
        let slot = self
            .slot
            .get_or_init(|| async {
                info!("Loading model {}", self.loader.name());
                let started = Instant::now();
                match self.loader.load().await {
                    Ok(model) => {
                        info!(
                            "Model {} loaded on {} in {:.1}s",
                            self.loader.name(),
                            model.device().as_str(),
                            started.elapsed().as_secs_f32()
                        );
                        Ok(model)
                    }
                    Err(err) => {
                        error!("Model {} failed to load: {}", self.loader.name(), err);
                        Err(match err {
                            JobError::ModelLoad(message) => message,
                            other => other.to_string(),
                        })
                    }
                }
            })
            .await;

        match slot {
            Ok(model) => Ok(model.as_ref()),
            Err(message) => Err(JobError::ModelLoad(message.clone())),
        }
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model", &self.loader.name())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
