//! Call event to lead: enrichment, transcript, quality gate, extraction, persistence and
//! notification. Every run writes exactly one event log record.

use crate::error::AppError;
use crate::event_log::EventLogRecord;
use crate::leads::{apply_stub_name, LeadOutcome, LeadRequest};
use crate::phone;
use crate::transcript::TranscriptRequest;
use crate::twilio_types::{wrap_twiml, DialStatus, Response, ResponseAction, SayAction};
use crate::types::{AppState, CallEvent, EventKind, SemanticKey, StructuredCustomerData};
use crate::utils::sanitize_id;

use serde::Serialize;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};

const MISSED_CALL_APOLOGY: &str =
    "Sorry we missed your call. We have your number and will call you back shortly.";

/// JSON acknowledgement of an ingestion request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

impl IngestReply {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    pub fn skipped(reason: &'static str) -> Self {
        Self {
            ok: true,
            skipped: Some(reason),
            ..Default::default()
        }
    }

    pub fn error(error: &'static str) -> Self {
        Self {
            ok: false,
            error: Some(error),
            ..Default::default()
        }
    }
}

fn base_record(event: &CallEvent) -> EventLogRecord {
    let mut record = EventLogRecord::new(event.kind.as_str());
    record.call_sid = event.call_sid.clone();
    record.recording_sid = event.recording_sid.clone();
    record.from = event.from.clone();
    record.to = event.to.clone();
    record.duration = event.duration_seconds;
    record
}

/// Fill a missing caller/callee from the provider's call resource.
async fn enrich(state: &AppState, event: &mut CallEvent, record: &mut EventLogRecord) {
    if (!event.from.is_empty() && !event.to.is_empty())
        || event.call_sid.is_empty()
        || !state.twilio.has_credentials()
    {
        return;
    }
    match state.twilio.fetch_call(&event.call_sid).await {
        Ok(details) => {
            if event.from.is_empty() {
                event.from = details.from.unwrap_or_default();
            }
            if event.to.is_empty() {
                event.to = details.to.unwrap_or_default();
            }
            debug!(call = %event.call_sid, "enriched call metadata");
        }
        Err(e) => {
            warn!(call = %event.call_sid, error = %e, "call lookup failed");
            record.detail("enrich_error", e.to_string());
        }
    }
}

/// Operator-facing link for the event's recording.
fn recording_link(state: &AppState, event: &CallEvent) -> String {
    if event.recording_sid.is_empty() {
        event.recording_url.clone()
    } else {
        state.config.playable_recording_url(&event.recording_sid)
    }
}

/// Persist and, unless the lead was merged, alert staff.
async fn persist(
    state: &AppState,
    data: StructuredCustomerData,
    recording_url: String,
    transcript: String,
    bypass_dedupe: bool,
    record: &mut EventLogRecord,
) -> LeadOutcome {
    let request = LeadRequest {
        data,
        recording_url,
        transcript,
        bypass_dedupe,
    };
    let outcome = state.leads.resolve(&request).await;
    record.detail("lead", &outcome);
    if outcome.notifies() {
        let link = outcome.id().and_then(|id| state.config.lead_link(id));
        let sent = state
            .notifier
            .notify(&request.data, &request.recording_url, link.as_deref())
            .await;
        record.detail("notify", &sent);
    }
    outcome
}

/// Lead for a caller we could not learn anything about.
fn stub_data(first_name: &str, from: &str) -> StructuredCustomerData {
    let mut data = StructuredCustomerData::new();
    data.set(SemanticKey::Phone, phone::normalize(from));
    apply_stub_name(&mut data, first_name, from);
    data
}

async fn run(state: &AppState, event: &mut CallEvent, record: &mut EventLogRecord) -> IngestReply {
    enrich(state, event, record).await;

    let request = TranscriptRequest {
        inline: event.transcript.clone(),
        job_id: event.transcript_job_id.clone(),
        recording_sid: event.recording_sid.clone(),
    };
    let acquired = state.transcripts.acquire(&request).await;
    record.detail("transcript_tiers", &acquired.attempts);
    let text = acquired.text.unwrap_or_default();

    if text.is_empty() {
        if !event.has_recording() {
            return IngestReply::skipped("no_transcript");
        }
        if !event.recording_sid.is_empty()
            && event.transcript_job_id.is_none()
            && state.transcripts.can_enqueue()
        {
            match state.transcripts.enqueue(&event.recording_sid).await {
                Ok(job) => {
                    record.detail("transcript_job", job);
                    return IngestReply::skipped("transcript_pending");
                }
                Err(e) => {
                    warn!(recording = %event.recording_sid, error = %e, "could not enqueue transcript");
                    record.detail("enqueue_error", e.to_string());
                }
            }
        }
    }
    record.transcript = text.clone();

    if let Err(AppError::QualityRejection { reason, pattern }) =
        state.quality.check(&text, event.voicemail_detected)
    {
        info!(reason, pattern = ?pattern, "transcript rejected");
        record.detail("quality", serde_json::json!({ "reason": reason, "pattern": pattern }));
        if event.has_recording() {
            let data = stub_data("Unknown", &event.from);
            persist(
                state,
                data,
                recording_link(state, event),
                text,
                event.bypass_dedupe,
                record,
            )
            .await;
        }
        return IngestReply {
            pattern,
            ..IngestReply::skipped(reason)
        };
    }

    let (mut data, source) = state.extractor.extract(&text).await;
    record.detail("extractor", source);
    data.merge_from(&event.hints);
    if !data.has(SemanticKey::Phone) {
        data.set(SemanticKey::Phone, event.from.as_str());
    }
    if let Some(raw) = data.remove(SemanticKey::Phone) {
        data.set(SemanticKey::Phone, phone::normalize(&raw));
    }

    let phone = data.value(SemanticKey::Phone).unwrap_or_default().to_string();
    if !data.has_name() {
        if !phone::is_usable(&phone) {
            record.detail("extracted", &data);
            return IngestReply::skipped("unqualified");
        }
        apply_stub_name(&mut data, "Unknown", &phone);
    }
    record.detail("extracted", &data);

    persist(
        state,
        data,
        recording_link(state, event),
        text,
        event.bypass_dedupe,
        record,
    )
    .await;
    IngestReply::ok()
}

/// Run one event through the pipeline.
pub async fn ingest(state: &AppState, mut event: CallEvent) -> IngestReply {
    let mut record = base_record(&event);
    let reply = run(state, &mut event, &mut record).await;
    record.from = event.from.clone();
    record.to = event.to.clone();
    record.detail("reply", &reply);
    state.event_log.record(&record).await;
    reply
}

/// Missed-call stub for a failed `<Dial>`, answered with TwiML.
pub async fn handle_dial(state: &AppState, mut event: CallEvent) -> String {
    let mut record = base_record(&event);
    enrich(state, &mut event, &mut record).await;

    let failed = event
        .dial_status
        .as_deref()
        .and_then(|s| s.parse::<DialStatus>().ok())
        .is_some_and(|s| s.is_failure());
    record.detail("dial_status", &event.dial_status);

    let response = if failed {
        let mut data = stub_data("Missed", &event.from);
        let at = event.timestamp.format(&Rfc3339).unwrap_or_default();
        data.set(
            SemanticKey::Notes,
            format!("Missed call to {} at {at}", event.to),
        );
        persist(state, data, String::new(), String::new(), true, &mut record).await;
        Response {
            actions: vec![ResponseAction::Say(SayAction {
                text: MISSED_CALL_APOLOGY.to_string(),
                ..Default::default()
            })],
        }
    } else {
        Response { actions: vec![] }
    };
    record.from = event.from.clone();
    record.to = event.to.clone();
    state.event_log.record(&record).await;
    wrap_twiml(xmlserde::xml_serialize(response))
}

/// Result of an operator "transcribe now" request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscribeResult {
    MissingSid,
    Transcribed(IngestReply),
    Enqueued(String),
    Failed(String),
    Unavailable,
}

fn search_string(value: &Value, keys: &[&str]) -> Option<String> {
    match value {
        Value::Object(map) => {
            for key in keys {
                if let Some(Value::String(s)) = map.get(*key) {
                    if !s.trim().is_empty() {
                        return Some(s.trim().to_string());
                    }
                }
            }
            map.values().find_map(|v| search_string(v, keys))
        }
        Value::Array(items) => items.iter().find_map(|v| search_string(v, keys)),
        _ => None,
    }
}

/// Event for the asynchronous transcript webhook. Text and identifiers may sit at any depth.
pub fn event_from_transcript_json(body: &Value) -> CallEvent {
    let mut event = CallEvent::new(EventKind::TranscriptReady);
    event.transcript = search_string(
        body,
        &["transcript", "text", "content", "transcription_text", "media_transcript"],
    );
    event.transcript_job_id = search_string(body, &["transcript_sid", "TranscriptSid"])
        .or_else(|| {
            body.get("sid")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .map(|s| sanitize_id(&s))
        .filter(|s| !s.is_empty());
    event.recording_sid = search_string(body, &["recording_sid", "RecordingSid", "source_sid"])
        .map(|s| sanitize_id(&s))
        .unwrap_or_default();
    event.call_sid = search_string(body, &["call_sid", "CallSid"])
        .map(|s| sanitize_id(&s))
        .unwrap_or_default();
    event.from = search_string(body, &["from", "From"]).unwrap_or_default();
    event.to = search_string(body, &["to", "To"]).unwrap_or_default();
    event
}

/// Run the remote transcript tiers for one recording and feed a result back through
/// [`ingest`]; without speech-to-text, enqueue an analytics job instead.
pub async fn transcribe_recording(state: &AppState, raw_sid: &str) -> TranscribeResult {
    let sid = sanitize_id(raw_sid);
    if sid.is_empty() {
        return TranscribeResult::MissingSid;
    }

    if state.config.openai.api_key.is_some() {
        let outcome = state.transcripts.transcribe_now(&sid, None).await;
        if let Some(text) = outcome.text {
            let mut event = CallEvent::new(EventKind::TranscriptReady);
            event.recording_sid = sid.clone();
            event.transcript = Some(text);
            // carry caller details from what was logged for this recording
            if let Some(prior) = state
                .event_log
                .read_recent(1500)
                .await
                .into_iter()
                .find(|r| r.recording_sid == sid)
            {
                event.call_sid = prior.call_sid;
                event.from = prior.from;
                event.to = prior.to;
                event.duration_seconds = prior.duration;
            }
            return TranscribeResult::Transcribed(ingest(state, event).await);
        }
        if !state.transcripts.can_enqueue() {
            let errors: Vec<String> = outcome
                .attempts
                .into_iter()
                .filter_map(|a| a.error.map(|e| format!("{}: {e}", a.tier)))
                .collect();
            return TranscribeResult::Failed(if errors.is_empty() {
                "no transcript produced".to_string()
            } else {
                errors.join("; ")
            });
        }
    }

    if !state.transcripts.can_enqueue() {
        return TranscribeResult::Unavailable;
    }
    match state.transcripts.enqueue(&sid).await {
        Ok(job) => TranscribeResult::Enqueued(job),
        Err(e) => TranscribeResult::Failed(e.to_string()),
    }
}
