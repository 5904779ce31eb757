//! Speaker-conditioned synthesis
//!
//! [`model`] defines the model boundary and the lazily loaded handle,
//! [`engine`] turns (text, reference, language) into WAV bytes and
//! [`xtts`] is the XTTS v2 backend.

pub mod engine;
pub mod model;
pub mod xtts;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::JobError;

pub use engine::{SynthesisEngine, SynthesizedAudio};
pub use model::{Device, InferenceJob, ModelHandle, ModelLoader, SpeechModel};
pub use xtts::XttsLoader;

/// Languages of the multilingual XTTS v2 model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "en")]
    English,
    #[serde(rename = "es")]
    Spanish,
    #[serde(rename = "fr")]
    French,
    #[serde(rename = "de")]
    German,
    #[serde(rename = "it")]
    Italian,
    #[serde(rename = "pt")]
    Portuguese,
    #[serde(rename = "pl")]
    Polish,
    #[serde(rename = "tr")]
    Turkish,
    #[serde(rename = "ru")]
    Russian,
    #[serde(rename = "nl")]
    Dutch,
    #[serde(rename = "cs")]
    Czech,
    #[serde(rename = "ar")]
    Arabic,
    #[serde(rename = "zh-cn")]
    Chinese,
    #[serde(rename = "ja")]
    Japanese,
    #[serde(rename = "hu")]
    Hungarian,
    #[serde(rename = "ko")]
    Korean,
    #[serde(rename = "hi")]
    Hindi,
}

impl Language {
    pub const ALL: [Language; 17] = [
        Language::English,
        Language::Spanish,
        Language::French,
        Language::German,
        Language::Italian,
        Language::Portuguese,
        Language::Polish,
        Language::Turkish,
        Language::Russian,
        Language::Dutch,
        Language::Czech,
        Language::Arabic,
        Language::Chinese,
        Language::Japanese,
        Language::Hungarian,
        Language::Korean,
        Language::Hindi,
    ];

    /// Code passed to the model
    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Spanish => "es",
            Language::French => "fr",
            Language::German => "de",
            Language::Italian => "it",
            Language::Portuguese => "pt",
            Language::Polish => "pl",
            Language::Turkish => "tr",
            Language::Russian => "ru",
            Language::Dutch => "nl",
            Language::Czech => "cs",
            Language::Arabic => "ar",
            Language::Chinese => "zh-cn",
            Language::Japanese => "ja",
            Language::Hungarian => "hu",
            Language::Korean => "ko",
            Language::Hindi => "hi",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_lowercase();
        // "zh" is what most clients send for Mandarin
        let code = if code == "zh" { "zh-cn".to_string() } else { code };
        Language::ALL
            .iter()
            .copied()
            .find(|lang| lang.code() == code)
            .ok_or_else(|| JobError::Input(format!("unsupported language code: {:?}", s)))
    }
}

/// Text and language of one synthesis call
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub language: Language,
}

impl SynthesisRequest {
    /// Check the raw request; `language` falls back to `default` when absent or blank
    pub fn parse(text: &str, language: Option<&str>, default: Language) -> Result<Self, JobError> {
        if text.trim().is_empty() {
            return Err(JobError::Input("text must not be empty".to_string()));
        }
        let language = match language.filter(|code| !code.trim().is_empty()) {
            Some(code) => code.parse()?,
            None => default,
        };
        Ok(Self {
            text: text.to_string(),
            language,
        })
    }
}
