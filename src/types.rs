use crate::access::SessionStore;
use crate::config::Config;
use crate::event_log::EventLog;
use crate::extract::Extractor;
use crate::leads::LeadResolver;
use crate::notify::Notifier;
use crate::quality::QualityFilter;
use crate::transcript::TranscriptEngine;
use crate::twilio::TwilioClient;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// Customer attribute names understood by the extractor and the field mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticKey {
    FirstName,
    LastName,
    Phone,
    Address,
    Year,
    Make,
    Model,
    EngineSize,
    Notes,
    Name,
}

impl SemanticKey {
    pub const ALL: [SemanticKey; 10] = [
        SemanticKey::FirstName,
        SemanticKey::LastName,
        SemanticKey::Phone,
        SemanticKey::Address,
        SemanticKey::Year,
        SemanticKey::Make,
        SemanticKey::Model,
        SemanticKey::EngineSize,
        SemanticKey::Notes,
        SemanticKey::Name,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticKey::FirstName => "first_name",
            SemanticKey::LastName => "last_name",
            SemanticKey::Phone => "phone",
            SemanticKey::Address => "address",
            SemanticKey::Year => "year",
            SemanticKey::Make => "make",
            SemanticKey::Model => "model",
            SemanticKey::EngineSize => "engine_size",
            SemanticKey::Notes => "notes",
            SemanticKey::Name => "name",
        }
    }
}

impl fmt::Display for SemanticKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SemanticKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SemanticKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown semantic key {s}"))
    }
}

/// Partial customer record produced by extraction. Absent keys were not found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuredCustomerData(BTreeMap<SemanticKey, String>);

impl StructuredCustomerData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: SemanticKey) -> Option<&str> {
        self.0.get(&key).map(String::as_str)
    }

    /// Non-empty value for `key`, if any.
    pub fn value(&self, key: SemanticKey) -> Option<&str> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }

    pub fn has(&self, key: SemanticKey) -> bool {
        self.value(key).is_some()
    }

    /// Set `key`; blank values are ignored.
    pub fn set(&mut self, key: SemanticKey, value: impl Into<String>) {
        let value = value.into();
        let value = value.trim();
        if !value.is_empty() {
            self.0.insert(key, value.to_string());
        }
    }

    pub fn set_if_absent(&mut self, key: SemanticKey, value: impl Into<String>) {
        if !self.has(key) {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: SemanticKey) -> Option<String> {
        self.0.remove(&key)
    }

    /// Overlay every value of `other` onto `self`.
    pub fn merge_from(&mut self, other: &StructuredCustomerData) {
        for (k, v) in other.iter() {
            self.set(k, v);
        }
    }

    pub fn has_name(&self) -> bool {
        self.has(SemanticKey::FirstName) || self.has(SemanticKey::LastName) || self.has(SemanticKey::Name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SemanticKey, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Which provider callback produced a [`CallEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CallStatus,
    RecordingComplete,
    TranscriptReady,
    DialResult,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CallStatus => "call_status",
            EventKind::RecordingComplete => "recording_complete",
            EventKind::TranscriptReady => "transcript_ready",
            EventKind::DialResult => "dial_result",
        }
    }
}

/// One normalized webhook delivery.
#[derive(Debug, Clone)]
pub struct CallEvent {
    pub kind: EventKind,
    pub call_sid: String,
    pub recording_sid: String,
    pub recording_url: String,
    pub from: String,
    pub to: String,
    pub duration_seconds: u32,
    pub transcript: Option<String>,
    /// Analytics-service transcript job, when the transcript is still remote.
    pub transcript_job_id: Option<String>,
    pub dial_status: Option<String>,
    pub bypass_dedupe: bool,
    pub voicemail_detected: bool,
    /// Values posted by an upstream operator; they win over extracted ones.
    pub hints: StructuredCustomerData,
    pub timestamp: OffsetDateTime,
}

impl CallEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            call_sid: String::new(),
            recording_sid: String::new(),
            recording_url: String::new(),
            from: String::new(),
            to: String::new(),
            duration_seconds: 0,
            transcript: None,
            transcript_job_id: None,
            dial_status: None,
            bypass_dedupe: false,
            voicemail_detected: false,
            hints: StructuredCustomerData::new(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn has_recording(&self) -> bool {
        !self.recording_sid.is_empty() || !self.recording_url.is_empty()
    }
}

pub struct AppState {
    pub config: Config,
    pub twilio: TwilioClient,
    pub transcripts: TranscriptEngine,
    pub quality: QualityFilter,
    pub extractor: Extractor,
    pub leads: LeadResolver,
    pub notifier: Notifier,
    pub event_log: EventLog,
    // session id => authenticated via the recordings password form
    pub sessions: SessionStore,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_are_not_stored() {
        let mut data = StructuredCustomerData::new();
        data.set(SemanticKey::Make, "  ");
        data.set(SemanticKey::Model, " Civic ");
        assert!(!data.has(SemanticKey::Make));
        assert_eq!(data.get(SemanticKey::Model), Some("Civic"));
    }

    #[test]
    fn set_if_absent_keeps_existing() {
        let mut data = StructuredCustomerData::new();
        data.set(SemanticKey::Year, "2012");
        data.set_if_absent(SemanticKey::Year, "1999");
        assert_eq!(data.get(SemanticKey::Year), Some("2012"));
    }

    #[test]
    fn semantic_keys_round_trip_through_names() {
        for key in SemanticKey::ALL {
            assert_eq!(key.as_str().parse::<SemanticKey>(), Ok(key));
        }
        let json = serde_json::to_string(&{
            let mut d = StructuredCustomerData::new();
            d.set(SemanticKey::EngineSize, "2.4L");
            d
        })
        .unwrap();
        assert_eq!(json, r#"{"engine_size":"2.4L"}"#);
    }
}
