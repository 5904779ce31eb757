use std::sync::atomic::Ordering;

use super::fakes::{sine, stereo_reference, wav_bytes, FakeLoader, MemoryStore, OUTPUT_RATE};
use crate::config::JobConfig;
use crate::error::{JobError, StorageError};
use crate::job::{result_marker, JobRequest, JobRunner, RESULT_CONTENT_TYPE};
use crate::media::wav;
use crate::progress::JobStage;
use crate::storage::{store_with_retry, LocalStore, StorageLocation};
use crate::tts::ModelHandle;

fn config() -> JobConfig {
    let mut config = JobConfig::default();
    config.upload_retry.initial_backoff_ms = 1;
    config
}

fn request(text: &str, language: Option<&str>) -> JobRequest {
    JobRequest {
        user_id: "user-42".to_string(),
        text: text.to_string(),
        language: language.map(str::to_string),
        input: "gs://voices/user-42/reference.wav".to_string(),
        output: "gs://voices/user-42/result.wav".to_string(),
    }
}

fn store_with_reference() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert(
        "gs://voices/user-42/reference.wav",
        stereo_reference(1.0, 2.0),
        Some("audio/wav"),
    );
    store
}

#[tokio::test]
async fn successful_job_uploads_wav_and_reports_location() {
    let store = store_with_reference();
    let loader = FakeLoader::new();
    let handle = ModelHandle::new(loader.clone());
    let config = config();

    let report = tokio_test::assert_ok!(
        JobRunner::new(&store, &handle, &config)
            .run(&request("오늘 날씨가 좋네요", None))
            .await
    );

    assert_eq!(result_marker(&report.result), "RESULT_URL=gs://voices/user-42/result.wav");
    assert_eq!(report.result_url, "gs://voices/user-42/result.wav");
    assert_eq!(report.language.code(), "ko");
    assert!((report.preprocess.duration_after_trim - 2.0).abs() < 0.05);

    let uploaded = store.get("gs://voices/user-42/result.wav").unwrap();
    assert_eq!(uploaded.content_type.as_deref(), Some(RESULT_CONTENT_TYPE));
    let info = wav::inspect(&uploaded.bytes).unwrap();
    assert_eq!(info.sample_rate, OUTPUT_RATE);
    assert!(info.frames > 0);

    let stages: Vec<JobStage> = report.stages.iter().map(|e| e.stage).collect();
    assert_eq!(
        stages,
        vec![
            JobStage::Pending,
            JobStage::Fetching,
            JobStage::Preprocessing,
            JobStage::Synthesizing,
            JobStage::Uploading,
            JobStage::Done,
        ]
    );
    assert_eq!(loader.load_count(), 1);
}

#[tokio::test]
async fn local_paths_round_trip_through_local_store() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("ref.wav");
    std::fs::write(&input, wav_bytes(&[sine(180.0, 1.5, 22_050, 0.4)], 22_050)).unwrap();
    let output = dir.path().join("out/result.wav");

    let store = LocalStore::new();
    let handle = ModelHandle::new(FakeLoader::new());
    let config = config();
    let request = JobRequest {
        user_id: "local".to_string(),
        text: "hello world".to_string(),
        language: Some("en".to_string()),
        input: input.display().to_string(),
        output: output.display().to_string(),
    };

    let report = JobRunner::new(&store, &handle, &config).run(&request).await.unwrap();
    assert_eq!(report.result, StorageLocation::Local(output.clone()));
    assert_eq!(result_marker(&report.result), format!("RESULT_URL={}", output.display()));
    let info = wav::inspect(&std::fs::read(&output).unwrap()).unwrap();
    assert!(info.frames > 0);
}

#[tokio::test]
async fn bare_keys_resolve_against_default_bucket() {
    let store = store_with_reference();
    let handle = ModelHandle::new(FakeLoader::new());
    let mut config = config();
    config.storage.default_bucket = Some("voices".to_string());

    let request = JobRequest {
        input: "user-42/reference.wav".to_string(),
        output: "user-42/bare.wav".to_string(),
        ..request("hello", Some("en"))
    };
    let report = JobRunner::new(&store, &handle, &config).run(&request).await.unwrap();
    assert_eq!(report.result_url, "gs://voices/user-42/bare.wav");
    assert!(store.get("gs://voices/user-42/bare.wav").is_some());
}

#[tokio::test]
async fn empty_text_fails_before_anything_runs() {
    let store = store_with_reference();
    let loader = FakeLoader::new();
    let handle = ModelHandle::new(loader.clone());
    let config = config();

    let failure = JobRunner::new(&store, &handle, &config)
        .run(&request("   ", Some("en")))
        .await
        .unwrap_err();

    assert!(matches!(failure.error, JobError::Input(_)));
    assert_eq!(failure.stage, JobStage::Pending);
    assert_eq!(failure.exit_code(), 2);
    assert_eq!(loader.load_count(), 0);
    assert_eq!(store.upload_attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unsupported_language_fails_without_loading() {
    let store = store_with_reference();
    let loader = FakeLoader::new();
    let handle = ModelHandle::new(loader.clone());
    let config = config();

    let failure = JobRunner::new(&store, &handle, &config)
        .run(&request("hello", Some("tlh")))
        .await
        .unwrap_err();

    assert!(matches!(failure.error, JobError::Input(_)));
    assert_eq!(loader.load_count(), 0);
}

#[tokio::test]
async fn missing_reference_is_not_found_without_loading() {
    let store = MemoryStore::new();
    let loader = FakeLoader::new();
    let handle = ModelHandle::new(loader.clone());
    let config = config();

    let failure = JobRunner::new(&store, &handle, &config)
        .run(&request("hello", Some("en")))
        .await
        .unwrap_err();

    assert!(failure.error.is_not_found());
    assert_eq!(failure.stage, JobStage::Fetching);
    assert_eq!(failure.exit_code(), 6);
    assert_eq!(loader.load_count(), 0);
    assert!(store.get("gs://voices/user-42/result.wav").is_none());
}

#[tokio::test]
async fn undecodable_reference_fails_in_preprocessing() {
    let store = MemoryStore::new();
    store.insert("gs://voices/user-42/reference.wav", b"garbage bytes".to_vec(), None);
    let loader = FakeLoader::new();
    let handle = ModelHandle::new(loader.clone());
    let config = config();

    let failure = JobRunner::new(&store, &handle, &config)
        .run(&request("hello", Some("en")))
        .await
        .unwrap_err();

    assert!(matches!(failure.error, JobError::Decode(_)));
    assert_eq!(failure.stage, JobStage::Preprocessing);
    assert_eq!(loader.load_count(), 0);
}

#[tokio::test]
async fn model_load_failure_fails_in_synthesis() {
    let store = store_with_reference();
    let handle = ModelHandle::new(FakeLoader::failing("incompatible checkpoint"));
    let config = config();

    let failure = JobRunner::new(&store, &handle, &config)
        .run(&request("hello", Some("en")))
        .await
        .unwrap_err();

    assert!(matches!(failure.error, JobError::ModelLoad(_)));
    assert_eq!(failure.stage, JobStage::Synthesizing);
    assert!(failure.to_string().contains("incompatible checkpoint"));
}

#[tokio::test]
async fn invalid_output_location_is_input_error() {
    let store = store_with_reference();
    let handle = ModelHandle::new(FakeLoader::new());
    let config = config();

    let request = JobRequest {
        output: "gs://voices".to_string(),
        ..request("hello", Some("en"))
    };
    let failure = JobRunner::new(&store, &handle, &config).run(&request).await.unwrap_err();
    assert!(matches!(failure.error, JobError::Input(_)));
}

#[tokio::test]
async fn upload_retries_transient_failures() {
    let store = store_with_reference();
    store.transient_upload_failures.store(2, Ordering::SeqCst);
    let handle = ModelHandle::new(FakeLoader::new());
    let config = config();

    let report = JobRunner::new(&store, &handle, &config)
        .run(&request("hello", Some("en")))
        .await
        .unwrap();

    assert_eq!(store.upload_attempts.load(Ordering::SeqCst), 3);
    assert!(store.get(&report.result_url).is_some());
}

#[tokio::test]
async fn upload_gives_up_after_max_attempts() {
    let store = store_with_reference();
    store.transient_upload_failures.store(10, Ordering::SeqCst);
    let handle = ModelHandle::new(FakeLoader::new());
    let config = config();

    let failure = JobRunner::new(&store, &handle, &config)
        .run(&request("hello", Some("en")))
        .await
        .unwrap_err();

    assert_eq!(failure.stage, JobStage::Uploading);
    assert!(matches!(failure.error, JobError::Storage(StorageError::Http(_))));
    assert_eq!(store.upload_attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn permanent_upload_errors_are_not_retried() {
    let store = LocalStore::new();
    let location = StorageLocation::Gcs {
        bucket: "voices".into(),
        object: "out.wav".into(),
    };
    let err = store_with_retry(&store, &location, b"RIFF", "audio/wav", &config().upload_retry)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidLocation(_)));
}
