//! REST calls against the call provider: call details, recording media and the
//! Conversational Intelligence transcript service.

use crate::config::{IntelligenceConfig, TwilioConfig};
use crate::error::AppError;
use crate::twilio_types::{CallDetails, CreatedTranscript, SentencesPage};
use crate::utils::sanitize_id;

use std::time::Duration;
use tracing::{debug, error};

const CALL_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);
const RECORDING_PROXY_TIMEOUT: Duration = Duration::from_secs(20);
const RECORDING_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const INTELLIGENCE_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Clone)]
pub struct TwilioClient {
    http: reqwest::Client,
    twilio: TwilioConfig,
    intelligence: IntelligenceConfig,
}

impl TwilioClient {
    pub fn new(http: reqwest::Client, twilio: TwilioConfig, intelligence: IntelligenceConfig) -> Self {
        Self {
            http,
            twilio,
            intelligence,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.twilio.has_credentials()
    }

    /// Whether transcript jobs can be fetched and enqueued.
    pub fn intelligence_enabled(&self) -> bool {
        self.intelligence.service_sid.is_some() && self.twilio.intelligence_auth().is_some()
    }

    fn account_url(&self, path: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/{path}",
            self.twilio.api_base, self.twilio.account_sid
        )
    }

    fn require_credentials(&self) -> Result<(), AppError> {
        if self.has_credentials() {
            Ok(())
        } else {
            Err(AppError::Auth("call provider credentials not configured".to_string()))
        }
    }

    /// Look up caller/callee for a call whose callback omitted them.
    pub async fn fetch_call(&self, call_sid: &str) -> Result<CallDetails, AppError> {
        self.require_credentials()?;
        let url = self.account_url(&format!("Calls/{}.json", sanitize_id(call_sid)));
        let resp = self
            .http
            .get(url)
            .basic_auth(&self.twilio.account_sid, Some(&self.twilio.auth_token))
            .timeout(CALL_LOOKUP_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json::<CallDetails>().await?)
    }

    pub fn recording_media_url(&self, recording_sid: &str) -> String {
        self.account_url(&format!("Recordings/{}.mp3", sanitize_id(recording_sid)))
    }

    /// Open the provider's mp3 for streaming. The body is left unread.
    pub async fn open_recording(&self, recording_sid: &str) -> Result<reqwest::Response, AppError> {
        self.require_credentials()?;
        let resp = self
            .http
            .get(self.recording_media_url(recording_sid))
            .basic_auth(&self.twilio.account_sid, Some(&self.twilio.auth_token))
            .timeout(RECORDING_PROXY_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp)
    }

    pub async fn download_recording(&self, recording_sid: &str) -> Result<Vec<u8>, AppError> {
        self.require_credentials()?;
        let resp = self
            .http
            .get(self.recording_media_url(recording_sid))
            .basic_auth(&self.twilio.account_sid, Some(&self.twilio.auth_token))
            .timeout(RECORDING_DOWNLOAD_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Err(AppError::Transport("empty recording body".to_string()));
        }
        debug!(sid = %recording_sid, len = bytes.len(), "downloaded recording");
        Ok(bytes.to_vec())
    }

    /// Concatenated sentences of a finished transcript job. Empty when nothing is ready.
    pub async fn transcript_sentences(&self, transcript_sid: &str) -> Result<String, AppError> {
        let (user, secret) = self
            .twilio
            .intelligence_auth()
            .ok_or_else(|| AppError::Auth("intelligence credentials not configured".to_string()))?;
        let url = format!(
            "{}/v2/Transcripts/{}/Sentences",
            self.intelligence.api_base,
            sanitize_id(transcript_sid)
        );
        let page = self
            .http
            .get(url)
            .basic_auth(user, Some(secret))
            .timeout(INTELLIGENCE_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json::<SentencesPage>()
            .await?;
        let text = page
            .sentences
            .iter()
            .filter_map(|s| s.text.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(text)
    }

    /// Ask the intelligence service to transcribe a recording; the result arrives on the
    /// transcript webhook.
    pub async fn create_transcript(&self, recording_sid: &str) -> Result<String, AppError> {
        let service_sid = self
            .intelligence
            .service_sid
            .as_deref()
            .ok_or_else(|| AppError::Auth("intelligence service not configured".to_string()))?;
        let (user, secret) = self
            .twilio
            .intelligence_auth()
            .ok_or_else(|| AppError::Auth("intelligence credentials not configured".to_string()))?;
        let channel = serde_json::json!({
            "media_properties": { "source_sid": sanitize_id(recording_sid) }
        });
        let mut form = vec![
            ("ServiceSid", service_sid.to_string()),
            ("Channel", channel.to_string()),
        ];
        if let Some(webhook) = &self.intelligence.webhook_url {
            form.push(("WebhookUrl", webhook.clone()));
        }
        let created = self
            .http
            .post(format!("{}/v2/Transcripts", self.intelligence.api_base))
            .basic_auth(user, Some(secret))
            .form(&form)
            .timeout(INTELLIGENCE_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json::<CreatedTranscript>()
            .await?;
        match created.sid {
            Some(sid) => {
                debug!(sid = %sid, status = ?created.status, "enqueued transcript job");
                Ok(sid)
            }
            None => {
                error!(recording = %recording_sid, "transcript job reply had no sid");
                Err(AppError::Validation("transcript job reply had no sid".to_string()))
            }
        }
    }
}
