use voice_leads::access::SessionStore;
use voice_leads::config::{Config, RecordingsAccessConfig};
use voice_leads::crm::LeadApi;
use voice_leads::db_types::{ColumnInfo, ColumnValue, FieldLabel};
use voice_leads::error::AppError;
use voice_leads::event_log::EventLog;
use voice_leads::extract::Extractor;
use voice_leads::leads::LeadResolver;
use voice_leads::memory_store::MemoryLeadStore;
use voice_leads::notify::Notifier;
use voice_leads::quality::QualityFilter;
use voice_leads::transcript::TranscriptEngine;
use voice_leads::twilio::TwilioClient;
use voice_leads::types::AppState;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

/// Remote lead API that is always unreachable, so every create goes to the store.
#[derive(Default)]
struct UnreachableApi {
    calls: Mutex<usize>,
}

#[async_trait]
impl LeadApi for UnreachableApi {
    async fn add_item(&self, _fields: &[(i64, String)]) -> Result<Option<i64>, AppError> {
        *self.calls.lock().unwrap() += 1;
        Err(AppError::Transport("connection refused".to_string()))
    }
}

fn column(name: &str, ty: &str, nullable: bool) -> ColumnInfo {
    ColumnInfo {
        name: name.to_string(),
        column_type: ty.to_string(),
        nullable,
        default: None,
        extra: if name == "id" { "auto_increment" } else { "" }.to_string(),
    }
}

fn lead_store() -> Arc<MemoryLeadStore> {
    let labels = [
        (1, "First Name"),
        (2, "Last Name"),
        (3, "Phone"),
        (4, "Year"),
        (5, "Make"),
        (6, "Model"),
        (7, "Notes"),
        (8, "Source Code"),
        (9, "Engine Size"),
    ]
    .into_iter()
    .map(|(id, name)| FieldLabel {
        id,
        name: name.to_string(),
    })
    .collect();
    let columns = vec![
        column("id", "int(11) unsigned", false),
        column("created_by", "int(11)", false),
        column("date_added", "bigint(20)", false),
        column("date_updated", "bigint(20)", true),
        column("parent_item_id", "int(11)", false),
        column("sort_order", "int(11)", false),
        column("field_1", "varchar(255)", true),
        column("field_2", "varchar(255)", true),
        column("field_3", "varchar(64)", false),
        column("field_4", "varchar(8)", true),
        column("field_5", "varchar(64)", true),
        column("field_6", "varchar(64)", true),
        column("field_7", "text", true),
        column("field_8", "int(11)", false),
        column("field_9", "varchar(32)", true),
    ];
    Arc::new(MemoryLeadStore::new(labels, columns))
}

struct Harness {
    app: Router,
    store: Arc<MemoryLeadStore>,
    api: Arc<UnreachableApi>,
    log: EventLog,
    _dir: TempDir,
}

fn harness(recordings: RecordingsAccessConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("voice.log");

    let mut config = Config::empty();
    config.public_base_url = "https://voice.example".to_string();
    config.event_log_path = log_path.clone();
    config.crm.leads_entity_id = 25;
    config.twilio.forward_to_number = Some("+19045550000".to_string());
    config.recordings = recordings;

    let http = reqwest::Client::new();
    let twilio = TwilioClient::new(http.clone(), config.twilio.clone(), config.intelligence.clone());
    let store = lead_store();
    let api = Arc::new(UnreachableApi::default());

    let state = AppState {
        transcripts: TranscriptEngine::from_config(http.clone(), &config, twilio.clone()),
        extractor: Extractor::from_config(http, &config.openai),
        quality: QualityFilter::with_defaults(config.quality.min_chars),
        leads: LeadResolver::new(config.crm.clone(), api.clone(), Some(store.clone())),
        notifier: Notifier::new(Default::default(), vec![]),
        event_log: EventLog::new(log_path.clone()),
        sessions: SessionStore::default(),
        twilio,
        config,
    };
    Harness {
        app: voice_leads::app(Arc::new(state)),
        store,
        api,
        log: EventLog::new(log_path),
        _dir: dir,
    }
}

fn form_post(uri: &str, fields: &[(&str, &str)]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(serde_urlencoded::to_string(fields).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> Response {
    app.clone().oneshot(req).await.unwrap()
}

async fn body_text(resp: Response) -> String {
    let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn log_len(h: &Harness) -> usize {
    h.log.read_recent(10_000).await.len()
}

async fn ingest(app: &Router, fields: &[(&str, &str)]) -> serde_json::Value {
    let resp = send(app, form_post("/voice/recording_callback", fields)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    serde_json::from_str(&body_text(resp).await).unwrap()
}

#[tokio::test]
async fn transcript_event_creates_one_complete_lead() {
    let h = harness(RecordingsAccessConfig::default());
    let reply = ingest(
        &h.app,
        &[
            ("From", "+19045551234"),
            ("RecordingDuration", "42"),
            (
                "TranscriptionText",
                "Hi this is John Smith, my 2015 Ford F150 won't start",
            ),
        ],
    )
    .await;
    assert_eq!(reply, serde_json::json!({ "ok": true }));

    let leads = h.store.leads();
    assert_eq!(leads.len(), 1);
    let lead = &leads[0];
    assert_eq!(lead.text("field_3").as_deref(), Some("+19045551234"));
    assert_eq!(lead.text("field_1").as_deref(), Some("John"));
    assert_eq!(lead.text("field_2").as_deref(), Some("Smith"));
    assert_eq!(lead.text("field_4").as_deref(), Some("2015"));
    assert_eq!(lead.text("field_5").as_deref(), Some("Ford"));
    assert_eq!(lead.text("field_6").as_deref(), Some("F150"));
    // strict column nothing maps to gets a typed placeholder
    assert_eq!(lead.values.get("field_8"), Some(&ColumnValue::Int(0)));
    assert!(lead
        .text("field_7")
        .is_some_and(|notes| notes.contains("Transcript: Hi this is John Smith")));
    assert_eq!(*h.api.calls.lock().unwrap(), 1);

    let records = h.log.read_recent(10).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event, "transcript_ready");
    assert_eq!(records[0].duration, 42);
    assert_eq!(records[0].detail["lead"]["via"], "direct");
}

#[tokio::test]
async fn introduction_beats_stray_label_words() {
    let h = harness(RecordingsAccessConfig::default());
    let reply = ingest(
        &h.app,
        &[
            ("From", "+19045551234"),
            (
                "TranscriptionText",
                "Hi this is Maria Lopez, I was in last week with my 2012 Honda Civic",
            ),
        ],
    )
    .await;
    assert_eq!(reply["ok"], true);
    let leads = h.store.leads();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].text("field_1").as_deref(), Some("Maria"));
    assert_eq!(leads[0].text("field_2").as_deref(), Some("Lopez"));
    assert_eq!(leads[0].text("field_4").as_deref(), Some("2012"));
    assert_eq!(leads[0].text("field_5").as_deref(), Some("Honda"));
    assert_eq!(leads[0].text("field_6").as_deref(), Some("Civic"));
}

#[tokio::test]
async fn place_name_is_not_a_surname_and_vee_engine_is_kept() {
    let h = harness(RecordingsAccessConfig::default());
    ingest(
        &h.app,
        &[
            ("From", "+19045552020"),
            (
                "TranscriptionText",
                "Hi this is Ann from Jacksonville, my 2010 Jeep Wrangler has a V6 that ticks",
            ),
        ],
    )
    .await;
    let leads = h.store.leads();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].text("field_1").as_deref(), Some("Ann"));
    assert_eq!(leads[0].text("field_2"), None);
    assert_eq!(leads[0].text("field_5").as_deref(), Some("Jeep"));
    assert_eq!(leads[0].text("field_9").as_deref(), Some("V6"));
}

#[tokio::test]
async fn spoken_phone_overrides_caller_id() {
    let h = harness(RecordingsAccessConfig::default());
    ingest(
        &h.app,
        &[
            ("From", "+13055550000"),
            (
                "TranscriptionText",
                "my name is carla diaz, 2008 toyota tacoma with the 4.0 liter, phone is 904 555 7788",
            ),
        ],
    )
    .await;
    let leads = h.store.leads();
    assert_eq!(leads.len(), 1);
    let lead = &leads[0];
    assert_eq!(lead.text("field_3").as_deref(), Some("9045557788"));
    assert_eq!(lead.text("field_1").as_deref(), Some("Carla"));
    assert_eq!(lead.text("field_2").as_deref(), Some("Diaz"));
    assert_eq!(lead.text("field_5").as_deref(), Some("Toyota"));
    assert_eq!(lead.text("field_6").as_deref(), Some("Tacoma"));
    assert_eq!(lead.text("field_9").as_deref(), Some("4.0L"));
}

#[tokio::test]
async fn repeat_caller_within_window_is_merged() {
    let h = harness(RecordingsAccessConfig::default());
    ingest(
        &h.app,
        &[
            ("From", "+19045551234"),
            (
                "TranscriptionText",
                "Hi this is John Smith, my 2015 Ford F150 won't start",
            ),
        ],
    )
    .await;
    let reply = ingest(
        &h.app,
        &[
            ("From", "+1 (904) 555-1234"),
            (
                "TranscriptionText",
                "Hi this is Jonathan Doe, my 2018 Toyota Camry needs brakes",
            ),
        ],
    )
    .await;
    assert_eq!(reply["ok"], true);

    let leads = h.store.leads();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].text("field_1").as_deref(), Some("John"));
    assert_eq!(leads[0].text("field_2").as_deref(), Some("Smith"));
    assert_eq!(leads[0].text("field_4").as_deref(), Some("2015"));
    assert_eq!(leads[0].text("field_6").as_deref(), Some("F150"));
    // the merge path never calls the remote api
    assert_eq!(*h.api.calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn bypass_flag_skips_dedupe() {
    let h = harness(RecordingsAccessConfig::default());
    for _ in 0..2 {
        ingest(
            &h.app,
            &[
                ("From", "+19045551234"),
                ("BypassDedupe", "1"),
                (
                    "TranscriptionText",
                    "Hi this is John Smith, my 2015 Ford F150 won't start",
                ),
            ],
        )
        .await;
    }
    assert_eq!(h.store.leads().len(), 2);
}

#[tokio::test]
async fn short_transcript_with_recording_becomes_a_stub() {
    let h = harness(RecordingsAccessConfig::default());
    let reply = ingest(
        &h.app,
        &[
            ("From", "+19045551234"),
            ("RecordingSid", "RE123"),
            ("TranscriptionText", "hello"),
        ],
    )
    .await;
    assert_eq!(
        reply,
        serde_json::json!({ "ok": true, "skipped": "transcript_too_short" })
    );
    let leads = h.store.leads();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].text("field_1").as_deref(), Some("Unknown"));
    assert_eq!(leads[0].text("field_2").as_deref(), Some("Caller 1234"));
    assert!(leads[0]
        .text("field_7")
        .is_some_and(|notes| notes.contains("action=download&sid=RE123")));
}

#[tokio::test]
async fn junk_transcript_without_recording_is_skipped() {
    let h = harness(RecordingsAccessConfig::default());
    let reply = ingest(
        &h.app,
        &[
            ("From", "+19045551234"),
            ("TranscriptionText", "Please leave a message after the tone"),
        ],
    )
    .await;
    assert_eq!(
        reply,
        serde_json::json!({ "ok": true, "skipped": "junk_transcript", "pattern": "system_prompt" })
    );
    assert!(h.store.leads().is_empty());
}

#[tokio::test]
async fn missing_transcript_and_unusable_caller_are_skipped() {
    let h = harness(RecordingsAccessConfig::default());
    let reply = ingest(&h.app, &[("CallSid", "CA1"), ("CallStatus", "completed")]).await;
    assert_eq!(reply["skipped"], "no_transcript");

    let reply = ingest(
        &h.app,
        &[(
            "TranscriptionText",
            "my car makes a loud grinding noise when braking",
        )],
    )
    .await;
    assert_eq!(reply["skipped"], "unqualified");
    assert!(h.store.leads().is_empty());
}

#[tokio::test]
async fn non_post_ingestion_is_acknowledged() {
    let h = harness(RecordingsAccessConfig::default());
    let resp = send(&h.app, get("/voice/recording_callback")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, r#"{"ok":true,"skipped":"method"}"#);

    let records = h.log.read_recent(10).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event, "callback_ignored");
    assert_eq!(records[0].detail["method"], "GET");
}

#[tokio::test]
async fn malformed_callback_is_logged() {
    let h = harness(RecordingsAccessConfig::default());
    let req = Request::builder()
        .method("POST")
        .uri("/voice/recording_callback")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("From=%2B19045551234&From=%2B19045559999"))
        .unwrap();
    let resp = send(&h.app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        body_text(resp).await,
        r#"{"ok":false,"error":"invalid_payload"}"#
    );
    let records = h.log.read_recent(10).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event, "callback_invalid");
    assert!(h.store.leads().is_empty());
}

#[tokio::test]
async fn failed_dial_creates_missed_call_stub() {
    let h = harness(RecordingsAccessConfig::default());
    let resp = send(
        &h.app,
        form_post(
            "/voice/recording_callback?action=dial",
            &[
                ("DialCallStatus", "no-answer"),
                ("From", "+19045551234"),
                ("To", "+19045550000"),
            ],
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/xml"
    );
    assert!(body_text(resp).await.contains("<Say>"));

    let leads = h.store.leads();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].text("field_1").as_deref(), Some("Missed"));
    assert!(leads[0]
        .text("field_7")
        .is_some_and(|notes| notes.starts_with("Missed call to +19045550000 at ")));

    let resp = send(
        &h.app,
        form_post(
            "/voice/recording_callback?action=dial",
            &[("DialCallStatus", "completed"), ("From", "+19045551234")],
        ),
    )
    .await;
    assert!(!body_text(resp).await.contains("<Say>"));
    assert_eq!(h.store.leads().len(), 1);
}

#[tokio::test]
async fn incoming_call_dials_the_forwarding_number() {
    let h = harness(RecordingsAccessConfig::default());
    let resp = send(&h.app, get("/voice/incoming")).await;
    let twiml = body_text(resp).await;
    assert!(twiml.starts_with("<?xml"));
    assert!(twiml.contains("Connecting you now."));
    assert!(twiml.contains("<Number>+19045550000</Number>"));
    assert!(twiml.contains("recordingStatusCallback=\"https://voice.example/voice/recording_callback\""));

    let records = h.log.read_recent(10).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event, "incoming_call");
    assert_eq!(records[0].detail["forwarded"], true);
}

#[tokio::test]
async fn transcript_webhook_rejects_invalid_json() {
    let h = harness(RecordingsAccessConfig::default());
    let req = Request::builder()
        .method("POST")
        .uri("/voice/ci_callback")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = send(&h.app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(body, serde_json::json!({ "ok": false, "error": "invalid_json" }));
    let records = h.log.read_recent(10).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event, "transcript_invalid");
    assert_eq!(records[0].detail["status"], 400);
}

#[tokio::test]
async fn gateway_is_closed_without_an_auth_mode() {
    let h = harness(RecordingsAccessConfig::default());
    let resp = send(&h.app, get("/voice/recording_callback?action=recordings")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let resp = send(&h.app, get("/voice/recording_callback?action=download&sid=RE1")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let records = h.log.read_recent(10).await;
    let events: Vec<&str> = records.iter().map(|r| r.event.as_str()).collect();
    assert_eq!(events, ["download_forbidden", "recordings_forbidden"]);
    assert_eq!(records[0].detail["sid"], "RE1");
    // denied ids never surface as listing rows
    assert!(records.iter().all(|r| r.recording_sid.is_empty()));
}

#[tokio::test]
async fn token_mode_gates_listing_and_download() {
    let h = harness(RecordingsAccessConfig {
        token: Some("s3cret".to_string()),
        ..Default::default()
    });
    ingest(
        &h.app,
        &[
            ("From", "+19045551234"),
            ("RecordingSid", "RE77"),
            (
                "TranscriptionText",
                "Hi this is John Smith, my 2015 Ford F150 won't start",
            ),
        ],
    )
    .await;

    let resp = send(&h.app, get("/voice/recording_callback?action=recordings&token=bad")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(body_text(resp).await.is_empty());

    let resp = send(&h.app, get("/voice/recording_callback?action=recordings&token=s3cret")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let html = body_text(resp).await;
    assert!(html.contains("action=download&amp;sid=RE77&amp;token=s3cret"));
    assert!(html.contains("Hi this is John Smith"));

    let resp = send(&h.app, get("/voice/recording_callback?action=download&token=s3cret")).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    // no provider credentials configured, so the proxy itself fails
    let resp = send(
        &h.app,
        get("/voice/recording_callback?action=download&sid=RE77&token=s3cret"),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    assert_eq!(log_len(&h).await, 5);
    let records = h.log.read_recent(10).await;
    let events: Vec<&str> = records.iter().map(|r| r.event.as_str()).collect();
    assert_eq!(
        events,
        [
            "download_error",
            "download_error",
            "recordings_view",
            "recordings_forbidden",
            "transcript_ready",
        ]
    );
    assert_eq!(records[0].detail["status"], 502);
    assert_eq!(records[1].detail["status"], 400);
    assert_eq!(records[2].detail["rows"], 1);
}

#[tokio::test]
async fn basic_mode_challenges() {
    let h = harness(RecordingsAccessConfig {
        basic_user: Some("ops".to_string()),
        basic_pass: Some("pw".to_string()),
        ..Default::default()
    });
    let resp = send(&h.app, get("/voice/recording_callback?action=recordings")).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        resp.headers().get(header::WWW_AUTHENTICATE).unwrap(),
        "Basic realm=\"Recordings\""
    );

    let req = Request::builder()
        .uri("/voice/recording_callback?action=recordings")
        .header(header::AUTHORIZATION, "Basic b3BzOnB3")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&h.app, req).await.status(), StatusCode::OK);

    let records = h.log.read_recent(10).await;
    let events: Vec<&str> = records.iter().map(|r| r.event.as_str()).collect();
    assert_eq!(events, ["recordings_view", "recordings_forbidden"]);
    assert_eq!(records[1].detail["status"], 401);
}

#[tokio::test]
async fn password_mode_uses_a_session() {
    let h = harness(RecordingsAccessConfig {
        password: Some("letmein".to_string()),
        ..Default::default()
    });
    let resp = send(&h.app, get("/voice/recording_callback?action=recordings")).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(body_text(resp).await.contains("type=\"password\""));

    let resp = send(&h.app, get("/voice/recording_callback?action=transcribe&sid=RE1")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = send(
        &h.app,
        form_post(
            "/voice/recording_callback?action=recordings",
            &[("password", "letmein")],
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = resp
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let req = Request::builder()
        .uri("/voice/recording_callback?action=transcribe&sid=RE1")
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap();
    let resp = send(&h.app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.contains("Transcription unavailable"));

    let records = h.log.read_recent(10).await;
    let events: Vec<&str> = records.iter().map(|r| r.event.as_str()).collect();
    assert_eq!(
        events,
        [
            "transcribe_unavailable",
            "recordings_view",
            "transcribe_forbidden",
            "recordings_forbidden",
        ]
    );
}

#[tokio::test]
async fn health_reports_ok() {
    let h = harness(RecordingsAccessConfig::default());
    let resp = send(&h.app, get("/health")).await;
    assert_eq!(resp.status(), StatusCode::OK);
}
