//! voice-clone-job: one voice-cloning synthesis per invocation
//!
//! Prints exactly one `RESULT_URL=<location>` line on stdout when the job
//! succeeds. Everything else, diagnostics included, goes to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error};

use voice_clone_job::job::JobFailure;
use voice_clone_job::utils::logger::init_logger;
use voice_clone_job::{
    result_marker, JobConfig, JobError, JobReport, JobRequest, JobRunner, ModelHandle,
    StorageRouter, XttsLoader,
};

/// Synthesize text in the voice of a reference recording
#[derive(Parser, Debug)]
#[command(name = "voice-clone-job")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Identifier of the requesting user
    #[arg(long = "user-id", alias = "user_id")]
    user_id: String,

    /// Text to synthesize
    #[arg(long)]
    text: String,

    /// Location of the reference recording (gs://bucket/object, object key or path)
    #[arg(long = "input-voice", alias = "input_voice_gcs")]
    input_voice: String,

    /// Where to write the synthesized WAV
    #[arg(long, alias = "output_gcs")]
    output: String,

    /// Language code; defaults to TTS_LANGUAGE or ko
    #[arg(long)]
    language: Option<String>,

    /// JSON configuration file
    #[arg(long, env = "VOICE_CLONE_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging for this crate
    #[arg(short, long)]
    verbose: bool,
}

/// Exit code for an error raised anywhere in [`run`]
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(failure) = err.downcast_ref::<JobFailure>() {
        return failure.exit_code();
    }
    err.downcast_ref::<JobError>()
        .map(JobError::exit_code)
        .unwrap_or(1)
}

async fn run(cli: Cli) -> Result<JobReport> {
    let config = JobConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("failed to load configuration from {}", path.display()),
        None => "failed to load configuration".to_string(),
    })?;

    let store = StorageRouter::new(&config.storage)
        .map_err(JobError::from)
        .context("failed to set up storage")?;
    let model = ModelHandle::new(XttsLoader::new(config.engine.clone()));

    let request = JobRequest {
        user_id: cli.user_id,
        text: cli.text,
        language: cli.language,
        input: cli.input_voice,
        output: cli.output,
    };

    let report = JobRunner::new(&store, &model, &config).run(&request).await?;
    Ok(report)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match run(cli).await {
        Ok(report) => {
            if let Ok(json) = serde_json::to_string(&report) {
                debug!("Job report: {}", json);
            }
            println!("{}", result_marker(&report.result));
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}
