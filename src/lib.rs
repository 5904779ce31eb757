//! Voice-clone batch job
//!
//! Takes a short reference recording of a speaker and a text, and produces
//! speech of that text in the speaker's voice. The pipeline is:
//! fetch reference → [`media`] preprocessing → [`tts`] synthesis → upload,
//! driven by [`job::JobRunner`].

pub mod config;
pub mod error;
pub mod job;
pub mod media;
pub mod progress;
pub mod storage;
pub mod tts;
pub mod utils;

pub use config::JobConfig;
pub use error::{JobError, Result, StorageError};
pub use job::{result_marker, JobFailure, JobReport, JobRequest, JobRunner};
pub use storage::{ObjectStore, StorageLocation, StorageRouter};
pub use tts::{Language, ModelHandle, XttsLoader};
