//! # Batch job driver
//!
//! One invocation, one job: validate the request, fetch the reference
//! recording, preprocess it, synthesize the text in that voice and upload
//! the WAV. Every stage either completes or fails the whole job.

use log::info;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::JobConfig;
use crate::error::{JobError, Result, StorageError};
use crate::media::{PreprocessReport, ReferenceAudio, ReferencePreprocessor};
use crate::progress::{JobStage, JobTracker, StageEvent};
use crate::storage::{store_with_retry, ObjectStore, StorageLocation};
use crate::tts::{Language, ModelHandle, SynthesisEngine, SynthesisRequest};

/// Content type of the uploaded result
pub const RESULT_CONTENT_TYPE: &str = "audio/wav";

/// Marker line the orchestrator looks for on stdout
pub const RESULT_MARKER_PREFIX: &str = "RESULT_URL=";

/// Job input as received from the orchestrator
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub user_id: String,
    pub text: String,
    /// Language code; the configured default when `None`
    pub language: Option<String>,
    /// Location of the reference recording
    pub input: String,
    /// Where to write the synthesized WAV
    pub output: String,
}

/// Outcome of a successful job
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub user_id: String,
    pub language: Language,
    pub result_url: String,
    #[serde(skip)]
    pub result: StorageLocation,
    pub preprocess: PreprocessReport,
    pub output_duration_secs: f32,
    pub stages: Vec<StageEvent>,
}

/// A failed job and the stage it failed in
#[derive(Debug, Error)]
#[error("job {job_id} failed during {stage}: {error}")]
pub struct JobFailure {
    pub job_id: String,
    pub stage: JobStage,
    #[source]
    pub error: JobError,
}

impl JobFailure {
    pub fn exit_code(&self) -> u8 {
        self.error.exit_code()
    }
}

/// The single stdout line reporting the result location
pub fn result_marker(location: &StorageLocation) -> String {
    format!("{}{}", RESULT_MARKER_PREFIX, location)
}

/// Runs jobs against an injected store and model handle
pub struct JobRunner<'a> {
    store: &'a dyn ObjectStore,
    model: &'a ModelHandle,
    config: &'a JobConfig,
}

impl<'a> JobRunner<'a> {
    pub fn new(store: &'a dyn ObjectStore, model: &'a ModelHandle, config: &'a JobConfig) -> Self {
        Self {
            store,
            model,
            config,
        }
    }

    /// Run one job to completion or failure
    pub async fn run(&self, request: &JobRequest) -> std::result::Result<JobReport, JobFailure> {
        let job_id = Uuid::new_v4().to_string();
        let mut tracker = JobTracker::with_logging(job_id.as_str());

        match self.execute(request, &mut tracker).await {
            Ok(mut report) => {
                tracker.enter(JobStage::Done);
                report.stages = tracker.history().to_vec();
                Ok(report)
            }
            Err(error) => {
                let stage = tracker.fail(error.to_string());
                Err(JobFailure {
                    job_id,
                    stage,
                    error,
                })
            }
        }
    }

    async fn execute(&self, request: &JobRequest, tracker: &mut JobTracker) -> Result<JobReport> {
        if request.user_id.trim().is_empty() {
            return Err(JobError::Input("user id must not be empty".to_string()));
        }
        let synthesis = SynthesisRequest::parse(
            &request.text,
            request.language.as_deref(),
            self.config.engine.default_language,
        )?;
        let engine = SynthesisEngine::new(self.model, &self.config.engine);
        engine.validate(&synthesis.text, synthesis.language)?;

        let input = self.location(&request.input, "input")?;
        let output = self.location(&request.output, "output")?;

        info!(
            "[job {}] user {}: {} chars in {}, reference {}",
            tracker.job_id(),
            request.user_id,
            synthesis.text.chars().count(),
            synthesis.language,
            input
        );

        tracker.enter(JobStage::Fetching);
        let object = self.store.fetch(&input).await?;

        tracker.enter(JobStage::Preprocessing);
        let mut reference = ReferenceAudio::new(object.bytes);
        if let Some(content_type) = object.content_type {
            reference = reference.with_content_type(content_type);
        }
        if let Some(extension) = input.extension() {
            reference = reference.with_extension(extension);
        }
        let preprocessor = ReferencePreprocessor::new(self.config.preprocess.clone());
        let preprocessed = tokio::task::spawn_blocking(move || preprocessor.process(&reference))
            .await
            .map_err(|e| JobError::Decode(format!("preprocessing task failed: {}", e)))??;

        tracker.enter(JobStage::Synthesizing);
        let audio = engine
            .synthesize(&synthesis.text, &preprocessed.clip, synthesis.language)
            .await?;

        tracker.enter(JobStage::Uploading);
        let result = store_with_retry(
            self.store,
            &output,
            &audio.wav,
            RESULT_CONTENT_TYPE,
            &self.config.upload_retry,
        )
        .await?;

        Ok(JobReport {
            job_id: tracker.job_id().to_string(),
            user_id: request.user_id.clone(),
            language: synthesis.language,
            result_url: result.to_string(),
            result,
            preprocess: preprocessed.report,
            output_duration_secs: audio.duration_secs,
            stages: Vec::new(),
        })
    }

    fn location(&self, raw: &str, field: &str) -> Result<StorageLocation> {
        StorageLocation::parse(raw, self.config.storage.default_bucket.as_deref()).map_err(|e| match e {
            StorageError::InvalidLocation(msg) => JobError::Input(format!("{} location: {}", field, msg)),
            other => JobError::Storage(other),
        })
    }
}
