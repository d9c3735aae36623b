use crate::access::{AccessMode, Denial, Gate, Grant, Presented};
use crate::error::AppError;
use crate::event_log::EventLogRecord;
use crate::pages::{self, ListingLinks, ListingRow, LISTING_MAX_ROWS};
use crate::pipeline::{self, IngestReply, TranscribeResult};
use crate::twilio_types::{
    wrap_twiml, CallbackPayload, DialAction, NumberNoun, PauseAction, Response as TwimlResponse,
    ResponseAction, SayAction,
};
use crate::types::AppState;
use crate::utils::{sanitize_id, truthy};

use axum::{
    body::StreamBody,
    extract::{Query, RawQuery, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, trace};

const EVENT_LOG_SCAN_LINES: usize = 1500;
const GREETING: &str = "Connecting you now.";
const DIAL_TIMEOUT_SECS: u16 = 60;

/// Operator command selected by the `action` query parameter. Anything else is ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Recordings,
    Download,
    Transcribe,
    Dial,
    Ingest,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Recordings => "recordings",
            Action::Download => "download",
            Action::Transcribe => "transcribe",
            Action::Dial => "dial",
            Action::Ingest => "ingest",
        }
    }

    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|a| a.trim().to_ascii_lowercase()).as_deref() {
            Some("recordings") => Action::Recordings,
            Some("download") => Action::Download,
            Some("transcribe") => Action::Transcribe,
            Some("dial") => Action::Dial,
            _ => Action::Ingest,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct ActionQuery {
    pub action: Option<String>,
    pub sid: Option<String>,
    pub token: Option<String>,
    pub download: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct PasswordForm {
    password: Option<String>,
}

fn xml_response(twiml: String) -> Response {
    trace!("twiml: '{}'", twiml);
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/xml"));
    (StatusCode::OK, headers, twiml).into_response()
}

/// Audit record for an action that does not go through the pipeline. The sid stays in `detail`
/// so these records never become rows in the recordings listing.
fn action_record(event: &str, sid: &str, status: StatusCode) -> EventLogRecord {
    let mut record = EventLogRecord::new(event);
    if !sid.is_empty() {
        record.detail("sid", sid);
    }
    record.detail("status", status.as_u16());
    record
}

fn with_cookie(grant: Grant, mut response: Response) -> Response {
    if let Some(cookie) = grant.set_cookie.and_then(|c| HeaderValue::from_str(&c).ok()) {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

/// Shared access check for the gateway actions.
fn authorize(
    app_state: &AppState,
    headers: &HeaderMap,
    query: &ActionQuery,
    body: &str,
    listing: bool,
) -> Result<Grant, Denial> {
    let form: PasswordForm = serde_urlencoded::from_str(body).unwrap_or_default();
    let presented = Presented {
        token: query.token.as_deref(),
        password: form.password.as_deref(),
        ..Presented::from_headers(headers)
    };
    let gate = Gate::new(
        AccessMode::from_config(&app_state.config.recordings),
        app_state.sessions.clone(),
    );
    gate.check(&presented, listing).map_err(|denial| {
        debug!(?denial, "gateway access denied");
        denial
    })
}

/// `/voice/recording_callback`: provider callbacks plus the operator actions.
pub async fn recording_callback(
    State(app_state): State<Arc<AppState>>,
    method: Method,
    Query(query): Query<ActionQuery>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    body: String,
) -> Response {
    let action = Action::parse(query.action.as_deref());
    trace!(?action, %method, "recording callback");
    match action {
        Action::Recordings | Action::Download | Action::Transcribe => {
            let listing = action == Action::Recordings;
            match authorize(&app_state, &headers, &query, &body, listing) {
                Ok(grant) => {
                    let response = match action {
                        Action::Recordings => recordings(&app_state).await,
                        Action::Download => download(&app_state, &query).await,
                        _ => transcribe(&app_state, &query).await,
                    };
                    with_cookie(grant, response)
                }
                Err(denial) => {
                    let response = denial.into_response();
                    let sid = sanitize_id(query.sid.as_deref().unwrap_or_default());
                    let record = action_record(
                        &format!("{}_forbidden", action.as_str()),
                        &sid,
                        response.status(),
                    );
                    app_state.event_log.record(&record).await;
                    response
                }
            }
        }
        Action::Dial => {
            let raw = if body.trim().is_empty() {
                raw_query.unwrap_or_default()
            } else {
                body
            };
            let payload: CallbackPayload = serde_urlencoded::from_str(&raw).unwrap_or_default();
            xml_response(pipeline::handle_dial(&app_state, payload.into_event()).await)
        }
        Action::Ingest => {
            if method != Method::POST {
                let reply = IngestReply::skipped("method");
                let mut record = action_record("callback_ignored", "", StatusCode::OK);
                record.detail("method", method.as_str());
                record.detail("reply", &reply);
                app_state.event_log.record(&record).await;
                return Json(reply).into_response();
            }
            let payload = match serde_urlencoded::from_str::<CallbackPayload>(&body) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(error = %e, "failed to deserialize callback payload");
                    let reply = IngestReply::error("invalid_payload");
                    let mut record = action_record("callback_invalid", "", StatusCode::OK);
                    record.detail("error", e.to_string());
                    record.detail("reply", &reply);
                    app_state.event_log.record(&record).await;
                    return Json(reply).into_response();
                }
            };
            let reply = pipeline::ingest(&app_state, payload.into_event()).await;
            Json(reply).into_response()
        }
    }
}

async fn recordings(app_state: &AppState) -> Response {
    let records = app_state.event_log.read_recent(EVENT_LOG_SCAN_LINES).await;
    let rows: Vec<ListingRow> = pages::listing_rows(&records, LISTING_MAX_ROWS);
    let whisper = app_state.config.openai.api_key.is_some();
    let intelligence = app_state.transcripts.can_enqueue();
    let banner = if intelligence {
        "Transcription via Conversational Intelligence is enabled. Recordings without a transcript can be enqueued with \"Transcribe now\"."
    } else if whisper {
        "On-demand transcription via Whisper is available. Use \"Transcribe now\"."
    } else {
        "Transcription is disabled. Recordings can still be played and downloaded."
    };
    let mode = AccessMode::from_config(&app_state.config.recordings);
    let endpoint = app_state.config.callback_url();
    let html = pages::recordings_page(
        &rows,
        &ListingLinks {
            endpoint: &endpoint,
            token: mode.link_token(),
            can_transcribe: whisper || intelligence,
            banner,
        },
    );
    let mut record = action_record("recordings_view", "", StatusCode::OK);
    record.detail("rows", rows.len());
    app_state.event_log.record(&record).await;
    Html(html).into_response()
}

async fn download(app_state: &AppState, query: &ActionQuery) -> Response {
    let sid = sanitize_id(query.sid.as_deref().unwrap_or_default());
    if sid.is_empty() {
        let response = AppError::Validation("missing sid".to_string()).into_response();
        let mut record = action_record("download_error", "", response.status());
        record.detail("error", "missing sid");
        app_state.event_log.record(&record).await;
        return response;
    }
    let upstream = match app_state.twilio.open_recording(&sid).await {
        Ok(resp) => resp,
        Err(e) => {
            error!(sid = %sid, error = %e, "failed to fetch recording");
            let mut record = action_record("download_error", &sid, StatusCode::BAD_GATEWAY);
            record.detail("error", e.to_string());
            app_state.event_log.record(&record).await;
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let attachment = query.download.as_deref().is_some_and(truthy);
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, max-age=0"),
    );
    if attachment {
        if let Ok(v) = HeaderValue::from_str(&format!("attachment; filename=\"{sid}.mp3\"")) {
            headers.insert(header::CONTENT_DISPOSITION, v);
        }
    }
    info!(sid = %sid, "streaming recording");
    let mut record = action_record("download_ok", &sid, StatusCode::OK);
    record.detail("attachment", attachment);
    app_state.event_log.record(&record).await;
    (
        StatusCode::OK,
        headers,
        StreamBody::new(upstream.bytes_stream()),
    )
        .into_response()
}

async fn transcribe(app_state: &AppState, query: &ActionQuery) -> Response {
    let mut back = format!("{}?action=recordings", app_state.config.callback_url());
    if let Some(token) = AccessMode::from_config(&app_state.config.recordings).link_token() {
        back.push('&');
        back.push_str(&serde_urlencoded::to_string([("token", token)]).unwrap_or_default());
    }
    let sid = sanitize_id(query.sid.as_deref().unwrap_or_default());
    let result = pipeline::transcribe_recording(app_state, &sid).await;
    // a completed transcription is logged by the pipeline run it fed
    let logged = match &result {
        TranscribeResult::Transcribed(_) => None,
        TranscribeResult::MissingSid => Some(("transcribe_error", Some("missing sid".to_string()))),
        TranscribeResult::Enqueued(job) => Some(("transcribe_enqueue", Some(job.clone()))),
        TranscribeResult::Failed(reason) => Some(("transcribe_error", Some(reason.clone()))),
        TranscribeResult::Unavailable => Some(("transcribe_unavailable", None)),
    };
    if let Some((event, note)) = logged {
        let mut record = action_record(event, &sid, StatusCode::OK);
        if let Some(note) = note {
            record.detail("result", note);
        }
        app_state.event_log.record(&record).await;
    }
    let (heading, message) = match result {
        TranscribeResult::MissingSid => (
            "Missing Recording SID",
            "Please provide a valid sid parameter.".to_string(),
        ),
        TranscribeResult::Transcribed(reply) => (
            "Transcription complete",
            match reply.skipped {
                Some(reason) => format!("Transcript saved; lead step skipped ({reason})."),
                None => "Transcript saved and the lead was processed.".to_string(),
            },
        ),
        TranscribeResult::Enqueued(job) => (
            "Transcription requested",
            format!("Transcript job {job} was created. Refresh the listing in a minute."),
        ),
        TranscribeResult::Failed(reason) => ("Transcription failed", reason),
        TranscribeResult::Unavailable => (
            "Transcription unavailable",
            "No speech-to-text key or analytics service is configured.".to_string(),
        ),
    };
    Html(pages::transcribe_page(heading, &message, &back)).into_response()
}

/// `/voice/ci_callback`: finished transcripts from the analytics service.
pub async fn transcript_callback(State(app_state): State<Arc<AppState>>, body: String) -> Response {
    let json = match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "transcript webhook body is not json");
            let mut record = action_record("transcript_invalid", "", StatusCode::BAD_REQUEST);
            record.detail("error", e.to_string());
            app_state.event_log.record(&record).await;
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "ok": false, "error": "invalid_json" })),
            )
                .into_response();
        }
    };
    let event = pipeline::event_from_transcript_json(&json);
    Json(pipeline::ingest(&app_state, event).await).into_response()
}

/// `/voice/incoming`: greet, then forward the call with recording on.
pub async fn incoming_call(State(app_state): State<Arc<AppState>>) -> Response {
    let config = &app_state.config;
    let mut actions = vec![ResponseAction::Say(SayAction {
        text: GREETING.to_string(),
        ..Default::default()
    })];
    match &config.twilio.forward_to_number {
        Some(number) => {
            let callback = config.callback_url();
            actions.push(ResponseAction::Pause(PauseAction { length: Some(1) }));
            actions.push(ResponseAction::Dial(DialAction {
                number: NumberNoun {
                    number: number.clone(),
                },
                action: Some(format!("{callback}?action=dial")),
                method: Some("POST".to_string()),
                timeout: Some(DIAL_TIMEOUT_SECS),
                record: Some("record-from-answer".to_string()),
                answer_on_bridge: Some("true".to_string()),
                recording_status_callback: Some(callback),
                recording_status_callback_method: Some("POST".to_string()),
            }));
        }
        None => error!("FORWARD_TO_NUMBER not set; answering without a dial"),
    }
    let mut record = action_record("incoming_call", "", StatusCode::OK);
    record.detail("forwarded", config.twilio.forward_to_number.is_some());
    app_state.event_log.record(&record).await;
    let response = TwimlResponse { actions };
    xml_response(wrap_twiml(xmlserde::xml_serialize(response)))
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_parse_case_insensitively() {
        assert_eq!(Action::parse(Some("Recordings")), Action::Recordings);
        assert_eq!(Action::parse(Some("download")), Action::Download);
        assert_eq!(Action::parse(Some(" transcribe ")), Action::Transcribe);
        assert_eq!(Action::parse(Some("dial")), Action::Dial);
        assert_eq!(Action::parse(Some("other")), Action::Ingest);
        assert_eq!(Action::parse(None), Action::Ingest);
    }
}
