//! # XTTS v2 backend
//!
//! The Coqui XTTS v2 model runs in a Python worker process that loads the
//! weights once and then serves requests over stdin/stdout as
//! newline-delimited JSON. The worker is spawned with `kill_on_drop`, so it
//! never outlives the job.
//!
//! Loading does, in order:
//! - device selection (CUDA when enabled and `nvidia-smi -L` lists a GPU)
//! - checkpoint verification when a local model directory is configured
//! - explicit registration of trusted checkpoint types, each result reported
//! - waiting for the worker's `ready` message

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::model::{Device, InferenceJob, ModelLoader, SpeechModel};
use super::Language;
use crate::config::EngineConfig;
use crate::error::{JobError, Result};

const WORKER_SCRIPT: &str = include_str!("xtts_worker.py");

/// Files a local XTTS v2 checkpoint directory must contain
pub const CHECKPOINT_FILES: [&str; 3] = ["config.json", "model.pth", "vocab.json"];

/// Loader for the XTTS v2 worker
#[derive(Debug, Clone)]
pub struct XttsLoader {
    config: EngineConfig,
}

impl XttsLoader {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ModelLoader for XttsLoader {
    fn name(&self) -> &str {
        &self.config.model_name
    }

    fn supported_languages(&self) -> &[Language] {
        &Language::ALL
    }

    async fn load(&self) -> Result<Box<dyn SpeechModel>> {
        let python = which::which(&self.config.python).map_err(|e| {
            JobError::ModelLoad(format!("python runtime {:?} not found: {}", self.config.python, e))
        })?;

        let device = select_device(self.config.use_cuda).await;

        if let Some(dir) = &self.config.model_dir {
            verify_checkpoint(dir)?;
            info!("Using local checkpoint {}", dir.display());
        }

        info!(
            "Registering {} trusted checkpoint type(s): {}",
            self.config.trusted_types.len(),
            self.config.trusted_types.join(", ")
        );

        let mut command = Command::new(&python);
        command
            .arg("-u")
            .arg("-c")
            .arg(WORKER_SCRIPT)
            .env("XTTS_MODEL_NAME", &self.config.model_name)
            .env("XTTS_DEVICE", device.as_str())
            .env("XTTS_TRUSTED_TYPES", self.config.trusted_types.join(","))
            // The license prompt would otherwise block on stdin
            .env("COQUI_TOS_AGREED", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.model_dir {
            command.env("XTTS_MODEL_DIR", dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| JobError::ModelLoad(format!("failed to start XTTS worker: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| JobError::ModelLoad("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| JobError::ModelLoad("worker stdout unavailable".to_string()))?;

        let mut channel = WorkerChannel::new(stdout, stdin);
        let ready = match channel.await_ready(self.config.strict_trusted_types).await {
            Ok(ready) => ready,
            Err(err) => {
                if let Ok(Some(status)) = child.try_wait() {
                    error!("XTTS worker exited with {}", status);
                }
                return Err(err);
            }
        };

        if ready.device != device.as_str() {
            warn!(
                "Worker reports device {}, requested {}",
                ready.device,
                device.as_str()
            );
        }
        let missing: Vec<&str> = Language::ALL
            .iter()
            .map(Language::code)
            .filter(|code| !ready.languages.is_empty() && !ready.languages.iter().any(|l| l == code))
            .collect();
        if !missing.is_empty() {
            warn!("Loaded model does not list languages: {}", missing.join(", "));
        }

        Ok(Box::new(XttsModel {
            device,
            channel: Mutex::new(channel),
            _child: std::sync::Mutex::new(child),
            next_id: AtomicU64::new(1),
        }))
    }
}

/// Handle to a running, loaded worker
pub struct XttsModel {
    device: Device,
    channel: Mutex<WorkerChannel<ChildStdout, ChildStdin>>,
    _child: std::sync::Mutex<Child>,
    next_id: AtomicU64,
}

#[async_trait]
impl SpeechModel for XttsModel {
    fn device(&self) -> Device {
        self.device
    }

    async fn synthesize_to_file(&self, job: &InferenceJob<'_>) -> Result<()> {
        let request = WorkerRequest {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            text: job.text,
            language: job.language.code(),
            speaker_wav: job.reference_wav,
            out_path: job.output_wav,
            seed: job.seed,
        };
        // The model is not reentrant
        let mut channel = self.channel.lock().await;
        channel.request(&request).await
    }
}

/// Choose CUDA when enabled and present, CPU otherwise
pub async fn select_device(use_cuda: bool) -> Device {
    if !use_cuda {
        info!("CUDA disabled by configuration, using CPU");
        return Device::Cpu;
    }

    let Ok(smi) = which::which("nvidia-smi") else {
        warn!("nvidia-smi not found, falling back to CPU");
        return Device::Cpu;
    };

    match Command::new(smi).arg("-L").output().await {
        Ok(output)
            if output.status.success() && String::from_utf8_lossy(&output.stdout).contains("GPU") =>
        {
            info!("Using CUDA device");
            Device::Cuda
        }
        Ok(output) => {
            warn!(
                "nvidia-smi lists no GPU ({}), falling back to CPU",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            Device::Cpu
        }
        Err(e) => {
            warn!("Failed to run nvidia-smi: {}, falling back to CPU", e);
            Device::Cpu
        }
    }
}

#[derive(Debug, Deserialize)]
struct CheckpointConfig {
    model: Option<String>,
}

/// Check that `dir` holds an XTTS checkpoint this backend can load
pub fn verify_checkpoint(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(JobError::ModelLoad(format!(
            "checkpoint directory {} does not exist",
            dir.display()
        )));
    }

    let missing: Vec<&str> = CHECKPOINT_FILES
        .iter()
        .copied()
        .filter(|name| !dir.join(name).is_file())
        .collect();
    if !missing.is_empty() {
        return Err(JobError::ModelLoad(format!(
            "checkpoint {} is missing {}",
            dir.display(),
            missing.join(", ")
        )));
    }

    let raw = std::fs::read_to_string(dir.join("config.json"))
        .map_err(|e| JobError::ModelLoad(format!("failed to read config.json: {}", e)))?;
    let config: CheckpointConfig = serde_json::from_str(&raw)
        .map_err(|e| JobError::ModelLoad(format!("config.json is not valid JSON: {}", e)))?;

    match config.model.as_deref() {
        Some("xtts") => Ok(()),
        Some(other) => Err(JobError::ModelLoad(format!(
            "checkpoint declares model {:?}, expected \"xtts\"",
            other
        ))),
        None => Err(JobError::ModelLoad(
            "config.json has no \"model\" field".to_string(),
        )),
    }
}

#[derive(Debug, Serialize)]
struct WorkerRequest<'a> {
    id: u64,
    text: &'a str,
    language: &'static str,
    speaker_wav: &'a Path,
    out_path: &'a Path,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WorkerEvent {
    TrustedType {
        name: String,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Ready {
        device: String,
        #[serde(default)]
        languages: Vec<String>,
    },
    Error {
        message: String,
    },
    Result {
        id: u64,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
}

#[derive(Debug, PartialEq)]
struct ReadyInfo {
    device: String,
    languages: Vec<String>,
}

/// Line-oriented JSON channel to the worker
struct WorkerChannel<R, W> {
    lines: Lines<BufReader<R>>,
    writer: W,
}

impl<R, W> WorkerChannel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    fn new(reader: R, writer: W) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    /// Next protocol message; lines that are not protocol JSON are logged and skipped
    async fn next_event(&mut self) -> std::io::Result<Option<WorkerEvent>> {
        while let Some(line) = self.lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<WorkerEvent>(line) {
                Ok(event) => return Ok(Some(event)),
                Err(_) => debug!("worker: {}", line),
            }
        }
        Ok(None)
    }

    async fn await_ready(&mut self, strict_trusted_types: bool) -> Result<ReadyInfo> {
        let mut rejected = Vec::new();
        loop {
            let event = self
                .next_event()
                .await
                .map_err(|e| JobError::ModelLoad(format!("failed to read from worker: {}", e)))?;
            match event {
                Some(WorkerEvent::TrustedType { name, ok: true, .. }) => {
                    debug!("Trusted type registered: {}", name);
                }
                Some(WorkerEvent::TrustedType { name, ok: false, error }) => {
                    let reason = error.unwrap_or_else(|| "unknown error".to_string());
                    warn!("Trusted type {} could not be registered: {}", name, reason);
                    rejected.push(format!("{} ({})", name, reason));
                }
                Some(WorkerEvent::Ready { device, languages }) => {
                    if strict_trusted_types && !rejected.is_empty() {
                        return Err(JobError::ModelLoad(format!(
                            "trusted type registration failed: {}",
                            rejected.join("; ")
                        )));
                    }
                    info!("XTTS worker ready on {}", device);
                    return Ok(ReadyInfo { device, languages });
                }
                Some(WorkerEvent::Error { message }) => {
                    return Err(JobError::ModelLoad(message));
                }
                Some(WorkerEvent::Result { id, .. }) => {
                    warn!("Unexpected result {} before the worker was ready", id);
                }
                None => {
                    return Err(JobError::ModelLoad(
                        "worker exited before the model was ready".to_string(),
                    ));
                }
            }
        }
    }

    async fn request(&mut self, request: &WorkerRequest<'_>) -> Result<()> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| JobError::Synthesis(format!("failed to encode request: {}", e)))?;
        line.push('\n');

        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| JobError::Synthesis(format!("failed to send request to worker: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| JobError::Synthesis(format!("failed to send request to worker: {}", e)))?;

        loop {
            let event = self
                .next_event()
                .await
                .map_err(|e| JobError::Synthesis(format!("failed to read from worker: {}", e)))?;
            match event {
                Some(WorkerEvent::Result { id, ok: true, .. }) if id == request.id => return Ok(()),
                Some(WorkerEvent::Result { id, ok: false, error }) if id == request.id => {
                    return Err(JobError::Synthesis(
                        error.unwrap_or_else(|| "inference failed".to_string()),
                    ));
                }
                Some(WorkerEvent::Error { message }) => return Err(JobError::Synthesis(message)),
                Some(other) => debug!("Ignoring worker event {:?}", other),
                None => {
                    return Err(JobError::Synthesis(
                        "worker exited during inference".to_string(),
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(script: &'static str) -> WorkerChannel<&'static [u8], Vec<u8>> {
        WorkerChannel::new(script.as_bytes(), Vec::new())
    }

    #[tokio::test]
    async fn ready_after_trusted_types() {
        let mut ch = channel(concat!(
            "{\"event\":\"trusted_type\",\"name\":\"TTS.tts.configs.xtts_config.XttsConfig\",\"ok\":true}\n",
            " > loading model\n",
            "{\"event\":\"ready\",\"device\":\"cuda\",\"languages\":[\"en\",\"ko\"]}\n",
        ));
        let ready = ch.await_ready(true).await.unwrap();
        assert_eq!(ready.device, "cuda");
        assert_eq!(ready.languages, vec!["en", "ko"]);
    }

    #[tokio::test]
    async fn rejected_trusted_type_is_fatal_only_when_strict() {
        let script = concat!(
            "{\"event\":\"trusted_type\",\"name\":\"TTS.tts.models.xtts.XttsArgs\",\"ok\":false,\"error\":\"AttributeError\"}\n",
            "{\"event\":\"ready\",\"device\":\"cpu\"}\n",
        );
        assert!(channel(script).await_ready(false).await.is_ok());
        let err = channel(script).await_ready(true).await.unwrap_err();
        assert!(matches!(err, JobError::ModelLoad(ref m) if m.contains("XttsArgs")));
    }

    #[tokio::test]
    async fn load_error_and_early_exit_are_model_load_errors() {
        let err = channel("{\"event\":\"error\",\"message\":\"FileNotFoundError('model.pth')\"}\n")
            .await_ready(false)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::ModelLoad(ref m) if m.contains("model.pth")));

        let err = channel("").await_ready(false).await.unwrap_err();
        assert!(matches!(err, JobError::ModelLoad(_)));
    }

    #[tokio::test]
    async fn request_waits_for_matching_result() {
        let mut ch = channel(concat!(
            "{\"event\":\"result\",\"id\":6,\"ok\":false}\n",
            "{\"event\":\"result\",\"id\":7,\"ok\":true}\n",
        ));
        let request = WorkerRequest {
            id: 7,
            text: "안녕하세요",
            language: "ko",
            speaker_wav: Path::new("/tmp/ref.wav"),
            out_path: Path::new("/tmp/out.wav"),
            seed: Some(3),
        };
        ch.request(&request).await.unwrap();

        let sent = String::from_utf8(ch.writer.clone()).unwrap();
        assert!(sent.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(sent.trim()).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["language"], "ko");
        assert_eq!(value["speaker_wav"], "/tmp/ref.wav");
        assert_eq!(value["seed"], 3);
    }

    #[tokio::test]
    async fn failed_inference_is_synthesis_error() {
        let mut ch = channel("{\"event\":\"result\",\"id\":1,\"ok\":false,\"error\":\"CUDA out of memory\"}\n");
        let request = WorkerRequest {
            id: 1,
            text: "hello",
            language: "en",
            speaker_wav: Path::new("ref.wav"),
            out_path: Path::new("out.wav"),
            seed: None,
        };
        let err = ch.request(&request).await.unwrap_err();
        assert!(matches!(err, JobError::Synthesis(ref m) if m.contains("out of memory")));

        let mut ch = channel("");
        assert!(matches!(ch.request(&request).await, Err(JobError::Synthesis(_))));
    }

    #[test]
    fn checkpoint_with_all_files_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"model": "xtts", "languages": ["en"]}"#).unwrap();
        std::fs::write(dir.path().join("model.pth"), b"weights").unwrap();
        std::fs::write(dir.path().join("vocab.json"), b"{}").unwrap();
        verify_checkpoint(dir.path()).unwrap();
    }

    #[test]
    fn checkpoint_problems_are_model_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"model": "vits"}"#).unwrap();

        let err = verify_checkpoint(dir.path()).unwrap_err();
        assert!(matches!(err, JobError::ModelLoad(ref m) if m.contains("model.pth") && m.contains("vocab.json")));

        std::fs::write(dir.path().join("model.pth"), b"weights").unwrap();
        std::fs::write(dir.path().join("vocab.json"), b"{}").unwrap();
        let err = verify_checkpoint(dir.path()).unwrap_err();
        assert!(matches!(err, JobError::ModelLoad(ref m) if m.contains("vits")));

        assert!(verify_checkpoint(&dir.path().join("nope")).is_err());
    }

    #[tokio::test]
    async fn cuda_disabled_selects_cpu() {
        assert_eq!(select_device(false).await, Device::Cpu);
    }

    #[tokio::test]
    async fn missing_python_fails_load() {
        let loader = XttsLoader::new(EngineConfig {
            python: "definitely-not-a-python-binary-xyz".to_string(),
            use_cuda: false,
            ..EngineConfig::default()
        });
        assert!(matches!(loader.load().await, Err(JobError::ModelLoad(_))));
    }
}
