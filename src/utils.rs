use base64::{engine, Engine};
use std::time::Duration;

/// Connect timeout applied to every outbound call.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(8);

/// Shared outbound client. Each request sets its own total timeout.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(Duration::from_secs(60))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Strip everything but ASCII alphanumerics from a provider identifier.
pub fn sanitize_id(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Recording sid from a provider recording url (`.../Recordings/RExxxx`).
pub fn recording_sid_from_url(url: &str) -> Option<String> {
    let (_, tail) = url.rsplit_once("/Recordings/")?;
    let sid = tail.split(['/', '?', '.']).next().unwrap_or_default();
    if sid.is_empty() {
        None
    } else {
        Some(sanitize_id(sid))
    }
}

/// Decode a base64 payload (e.g. the credentials part of a Basic header).
pub fn b64_decode(enc: &str) -> Option<Vec<u8>> {
    engine::general_purpose::STANDARD.decode(enc.trim()).ok()
}

pub fn html_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Length-independent comparison for shared secrets.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= usize::from(x ^ y);
    }
    diff == 0
}

/// Parse a truthy form flag (`1`, `true`, `yes`, `on`).
pub fn truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_non_alphanumerics() {
        assert_eq!(sanitize_id("RE12ab/../x?y=1"), "RE12abxy1");
        assert_eq!(sanitize_id("<script>"), "script");
    }

    #[test]
    fn recording_sid_is_taken_from_url_tail() {
        assert_eq!(
            recording_sid_from_url(
                "https://api.twilio.com/2010-04-01/Accounts/AC1/Recordings/RE123abc"
            )
            .as_deref(),
            Some("RE123abc")
        );
        assert_eq!(
            recording_sid_from_url("https://x/Recordings/RE9.mp3").as_deref(),
            Some("RE9")
        );
        assert_eq!(recording_sid_from_url("https://x/Calls/CA1"), None);
    }

    #[test]
    fn secrets_compare_exactly() {
        assert!(constant_time_eq("s3cret", "s3cret"));
        assert!(!constant_time_eq("s3cret", "s3cre"));
        assert!(!constant_time_eq("", "x"));
        assert!(constant_time_eq("", ""));
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(html_escape("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }
}
