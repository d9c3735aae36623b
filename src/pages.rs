//! Minimal operator pages for the recording gateway. Every interpolated value is escaped.

use crate::event_log::EventLogRecord;
use crate::utils::html_escape;

use std::collections::HashMap;
use std::fmt::Write;

pub const LISTING_MAX_ROWS: usize = 200;
const PREVIEW_CHARS: usize = 200;

const STYLE: &str = "body{font-family:system-ui,sans-serif;margin:20px;background:#f8fafc;color:#0f172a}\
table{border-collapse:collapse;width:100%;background:#fff}\
th,td{padding:10px;border-bottom:1px solid #e2e8f0;text-align:left}th{background:#f1f5f9}\
a.button{display:inline-block;padding:6px 10px;background:#2563eb;color:#fff;text-decoration:none;border-radius:4px}\
.card{background:#fff;padding:16px;border-radius:10px;max-width:720px}audio{width:240px}";

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{}</title><style>{STYLE}</style></head><body>{body}</body></html>",
        html_escape(title)
    )
}

pub fn login_form() -> String {
    page(
        "Recordings Login",
        "<div class=\"card\"><h1>Enter password</h1>\
         <form method=\"post\"><input type=\"password\" name=\"password\" placeholder=\"Password\" autofocus required>\
         <button type=\"submit\">Continue</button></form></div>",
    )
}

/// One recording in the operator listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingRow {
    pub ts: String,
    pub sid: String,
    pub duration: u32,
    pub from: String,
    pub to: String,
    pub transcript: String,
}

/// Collapse newest-first log records into one row per recording. Later-found values only fill
/// blanks.
pub fn listing_rows(records: &[EventLogRecord], max_rows: usize) -> Vec<ListingRow> {
    let mut rows: Vec<ListingRow> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for record in records {
        if record.recording_sid.is_empty() {
            continue;
        }
        if let Some(&i) = index.get(&record.recording_sid) {
            let row = &mut rows[i];
            for (have, found) in [
                (&mut row.transcript, &record.transcript),
                (&mut row.ts, &record.ts),
                (&mut row.from, &record.from),
                (&mut row.to, &record.to),
            ] {
                if have.is_empty() && !found.is_empty() {
                    *have = found.clone();
                }
            }
            if row.duration == 0 {
                row.duration = record.duration;
            }
            continue;
        }
        if rows.len() >= max_rows {
            continue;
        }
        index.insert(record.recording_sid.clone(), rows.len());
        rows.push(ListingRow {
            ts: record.ts.clone(),
            sid: record.recording_sid.clone(),
            duration: record.duration,
            from: record.from.clone(),
            to: record.to.clone(),
            transcript: record.transcript.clone(),
        });
    }
    rows
}

pub struct ListingLinks<'a> {
    /// Ingestion endpoint url that action links are appended to.
    pub endpoint: &'a str,
    pub token: Option<&'a str>,
    pub can_transcribe: bool,
    pub banner: &'a str,
}

impl ListingLinks<'_> {
    fn action(&self, action: &str, sid: &str) -> String {
        let mut url = format!("{}?action={action}&sid={sid}", self.endpoint);
        if let Some(token) = self.token {
            let encoded: String = serde_urlencoded::to_string([("token", token)]).unwrap_or_default();
            url.push('&');
            url.push_str(&encoded);
        }
        url
    }
}

pub fn recordings_page(rows: &[ListingRow], links: &ListingLinks) -> String {
    let mut body = String::from("<h1>Recent Call Recordings</h1>");
    let _ = write!(body, "<p>{}</p>", html_escape(links.banner));
    body.push_str(
        "<table><thead><tr><th>When</th><th>From</th><th>To</th><th>Duration</th>\
         <th>Play</th><th>Link</th></tr></thead><tbody>",
    );
    for row in rows {
        let download = html_escape(&links.action("download", &row.sid));
        let duration = if row.duration > 0 {
            format!("{}s", row.duration)
        } else {
            "-".to_string()
        };
        let _ = write!(
            body,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{duration}</td>\
             <td><audio controls src=\"{download}\"></audio>",
            html_escape(&row.ts),
            html_escape(&row.from),
            html_escape(&row.to),
        );
        if !row.transcript.is_empty() {
            let full = html_escape(&row.transcript);
            if row.transcript.chars().count() > PREVIEW_CHARS {
                let preview: String = row.transcript.chars().take(PREVIEW_CHARS).collect();
                let _ = write!(
                    body,
                    "<div><strong>Transcript:</strong> {}&hellip; <details><summary>more</summary>{full}</details></div>",
                    html_escape(&preview)
                );
            } else {
                let _ = write!(body, "<div><strong>Transcript:</strong> {full}</div>");
            }
        }
        let _ = write!(
            body,
            "</td><td><a class=\"button\" href=\"{download}&amp;download=1\">Download</a>"
        );
        if links.can_transcribe && row.transcript.is_empty() {
            let _ = write!(
                body,
                " <a class=\"button\" href=\"{}\">Transcribe now</a>",
                html_escape(&links.action("transcribe", &row.sid))
            );
        }
        body.push_str("</td></tr>");
    }
    if rows.is_empty() {
        body.push_str("<tr><td colspan=\"6\">No recordings found.</td></tr>");
    }
    body.push_str("</tbody></table>");
    page("Call Recordings", &body)
}

pub fn transcribe_page(heading: &str, message: &str, back: &str) -> String {
    page(
        "Transcribe Recording",
        &format!(
            "<div class=\"card\"><h2>{}</h2><p>{}</p><a class=\"button\" href=\"{}\">Back to recordings</a></div>",
            html_escape(heading),
            html_escape(message),
            html_escape(back)
        ),
    )
}
