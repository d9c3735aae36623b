//! Transcript acquisition: inline text, then finished analytics sentences, then synchronous
//! speech-to-text. Each tier is tried only when the one before produced nothing.

use crate::config::{Config, OpenAiConfig};
use crate::error::AppError;
use crate::openai_types::WhisperResponse;
use crate::twilio::TwilioClient;

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const WHISPER_TIMEOUT: Duration = Duration::from_secs(60);
const WHISPER_MODEL: &str = "whisper-1";

/// What is known about a recording when a transcript is wanted.
#[derive(Debug, Clone, Default)]
pub struct TranscriptRequest {
    pub inline: Option<String>,
    pub job_id: Option<String>,
    pub recording_sid: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TierAttempt {
    pub tier: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptOutcome {
    pub text: Option<String>,
    pub source: Option<&'static str>,
    pub attempts: Vec<TierAttempt>,
}

#[async_trait]
pub trait TranscriptSource: Send + Sync {
    fn tier(&self) -> &'static str;

    /// Whether this tier has what it needs to run for `req`.
    fn applies(&self, req: &TranscriptRequest) -> bool;

    async fn fetch(&self, req: &TranscriptRequest) -> Result<String, AppError>;
}

pub struct InlineSource;

#[async_trait]
impl TranscriptSource for InlineSource {
    fn tier(&self) -> &'static str {
        "inline"
    }

    fn applies(&self, req: &TranscriptRequest) -> bool {
        req.inline.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    async fn fetch(&self, req: &TranscriptRequest) -> Result<String, AppError> {
        Ok(req.inline.clone().unwrap_or_default())
    }
}

pub struct IntelligenceSource {
    twilio: TwilioClient,
}

impl IntelligenceSource {
    pub fn new(twilio: TwilioClient) -> Self {
        Self { twilio }
    }
}

#[async_trait]
impl TranscriptSource for IntelligenceSource {
    fn tier(&self) -> &'static str {
        "intelligence"
    }

    fn applies(&self, req: &TranscriptRequest) -> bool {
        req.job_id.as_deref().is_some_and(|j| !j.is_empty())
    }

    async fn fetch(&self, req: &TranscriptRequest) -> Result<String, AppError> {
        let job_id = req.job_id.as_deref().unwrap_or_default();
        self.twilio.transcript_sentences(job_id).await
    }
}

pub struct WhisperSource {
    http: reqwest::Client,
    twilio: TwilioClient,
    openai: OpenAiConfig,
}

impl WhisperSource {
    pub fn new(http: reqwest::Client, twilio: TwilioClient, openai: OpenAiConfig) -> Self {
        Self {
            http,
            twilio,
            openai,
        }
    }
}

#[async_trait]
impl TranscriptSource for WhisperSource {
    fn tier(&self) -> &'static str {
        "whisper"
    }

    fn applies(&self, req: &TranscriptRequest) -> bool {
        self.openai.api_key.is_some() && !req.recording_sid.is_empty()
    }

    async fn fetch(&self, req: &TranscriptRequest) -> Result<String, AppError> {
        let key = self.openai.api_key.as_deref().unwrap_or_default();
        let audio = self.twilio.download_recording(&req.recording_sid).await?;
        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(format!("{}.mp3", req.recording_sid))
            .mime_str("audio/mpeg")?;
        let form = reqwest::multipart::Form::new()
            .text("model", WHISPER_MODEL)
            .part("file", part);
        let resp = self
            .http
            .post(format!("{}/audio/transcriptions", self.openai.api_base))
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {key}"))
            .multipart(form)
            .timeout(WHISPER_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let resp = resp.json::<WhisperResponse>().await?;
        Ok(resp.text)
    }
}

pub struct TranscriptEngine {
    sources: Vec<Box<dyn TranscriptSource>>,
    twilio: TwilioClient,
}

impl TranscriptEngine {
    pub fn new(sources: Vec<Box<dyn TranscriptSource>>, twilio: TwilioClient) -> Self {
        Self { sources, twilio }
    }

    pub fn from_config(http: reqwest::Client, config: &Config, twilio: TwilioClient) -> Self {
        let sources: Vec<Box<dyn TranscriptSource>> = vec![
            Box::new(InlineSource),
            Box::new(IntelligenceSource::new(twilio.clone())),
            Box::new(WhisperSource::new(http, twilio.clone(), config.openai.clone())),
        ];
        Self::new(sources, twilio)
    }

    /// Run the tiers in order until one yields non-empty text. Failures are recorded and
    /// skipped; exhaustion leaves `text` empty.
    pub async fn acquire(&self, req: &TranscriptRequest) -> TranscriptOutcome {
        let mut outcome = TranscriptOutcome::default();
        for source in self.sources.iter().filter(|s| s.applies(req)) {
            match source.fetch(req).await {
                Ok(text) if !text.trim().is_empty() => {
                    debug!(tier = source.tier(), len = text.len(), "transcript acquired");
                    outcome.attempts.push(TierAttempt {
                        tier: source.tier(),
                        ok: true,
                        error: None,
                    });
                    outcome.text = Some(text.trim().to_string());
                    outcome.source = Some(source.tier());
                    break;
                }
                Ok(_) => outcome.attempts.push(TierAttempt {
                    tier: source.tier(),
                    ok: false,
                    error: Some("empty".to_string()),
                }),
                Err(e) => {
                    warn!(tier = source.tier(), error = %e, "transcript tier failed");
                    outcome.attempts.push(TierAttempt {
                        tier: source.tier(),
                        ok: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        outcome
    }

    /// Operator-triggered re-run of the remote tiers for one recording.
    pub async fn transcribe_now(&self, recording_sid: &str, job_id: Option<String>) -> TranscriptOutcome {
        let req = TranscriptRequest {
            inline: None,
            job_id,
            recording_sid: recording_sid.to_string(),
        };
        self.acquire(&req).await
    }

    pub fn can_enqueue(&self) -> bool {
        self.twilio.intelligence_enabled()
    }

    /// Start an analytics job; its result comes back on the transcript webhook.
    pub async fn enqueue(&self, recording_sid: &str) -> Result<String, AppError> {
        let job = self.twilio.create_transcript(recording_sid).await?;
        info!(recording = %recording_sid, job = %job, "transcript job enqueued");
        Ok(job)
    }
}
