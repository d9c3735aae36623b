pub fn wrap_twiml(twiml: String) -> String {
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>{twiml}")
}

mod twiml {
    use xmlserde_derives::XmlSerialize;

    #[derive(PartialEq, Eq, XmlSerialize)]
    #[xmlserde(root = b"Response")]
    pub struct Response {
        #[xmlserde(ty = "untag")]
        pub actions: Vec<ResponseAction>,
    }

    #[derive(PartialEq, Eq, XmlSerialize)]
    pub enum ResponseAction {
        #[xmlserde(name = b"Say")]
        Say(SayAction),
        #[xmlserde(name = b"Pause")]
        Pause(PauseAction),
        #[xmlserde(name = b"Dial")]
        Dial(DialAction),
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct SayAction {
        #[xmlserde(ty = "text")]
        pub text: String,
        #[xmlserde(name = b"voice", ty = "attr")]
        pub voice: Option<String>,
        #[xmlserde(name = b"language", ty = "attr")]
        pub language: Option<String>,
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct PauseAction {
        #[xmlserde(name = b"length", ty = "attr")]
        pub length: Option<u16>,
    }

    /// A single `<Dial>` to one number, recorded, with status callbacks.
    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct DialAction {
        #[xmlserde(name = b"Number", ty = "child")]
        pub number: NumberNoun,
        #[xmlserde(name = b"action", ty = "attr")]
        pub action: Option<String>,
        #[xmlserde(name = b"method", ty = "attr")]
        pub method: Option<String>,
        #[xmlserde(name = b"timeout", ty = "attr")]
        pub timeout: Option<u16>,
        #[xmlserde(name = b"record", ty = "attr")]
        pub record: Option<String>,
        #[xmlserde(name = b"answerOnBridge", ty = "attr")]
        pub answer_on_bridge: Option<String>,
        #[xmlserde(name = b"recordingStatusCallback", ty = "attr")]
        pub recording_status_callback: Option<String>,
        #[xmlserde(name = b"recordingStatusCallbackMethod", ty = "attr")]
        pub recording_status_callback_method: Option<String>,
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct NumberNoun {
        #[xmlserde(ty = "text")]
        pub number: String,
    }
}
pub use twiml::*;

mod callback {
    use crate::types::{CallEvent, EventKind, SemanticKey, StructuredCustomerData};
    use crate::utils::{recording_sid_from_url, sanitize_id, truthy};

    use serde::Deserialize;
    use std::str::FromStr;

    /// Outcome of a `<Dial>` as reported in `DialCallStatus`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum DialStatus {
        Completed,
        Answered,
        Busy,
        NoAnswer,
        Failed,
        Canceled,
    }

    impl DialStatus {
        pub fn is_failure(&self) -> bool {
            matches!(
                self,
                DialStatus::Busy | DialStatus::NoAnswer | DialStatus::Failed | DialStatus::Canceled
            )
        }
    }

    impl FromStr for DialStatus {
        type Err = ();

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_ascii_lowercase().as_str() {
                "completed" => Ok(DialStatus::Completed),
                "answered" => Ok(DialStatus::Answered),
                "busy" => Ok(DialStatus::Busy),
                "no-answer" => Ok(DialStatus::NoAnswer),
                "failed" => Ok(DialStatus::Failed),
                "canceled" => Ok(DialStatus::Canceled),
                _ => Err(()),
            }
        }
    }

    /// Form body of call-status, recording, transcription and dial callbacks. Every field is
    /// optional because each callback type sends a different subset.
    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "PascalCase")]
    pub struct CallbackPayload {
        pub call_sid: Option<String>,
        pub call_status: Option<String>,
        pub recording_sid: Option<String>,
        pub recording_url: Option<String>,
        pub recording_duration: Option<String>,
        pub from: Option<String>,
        pub caller: Option<String>,
        pub to: Option<String>,
        pub called: Option<String>,
        pub transcription_text: Option<String>,
        pub transcript_sid: Option<String>,
        pub dial_call_status: Option<String>,
        pub bypass_dedupe: Option<String>,
        #[serde(rename = "dedupe")]
        pub dedupe: Option<String>,
        #[serde(rename = "voicemail_detected")]
        pub voicemail_detected: Option<String>,
        #[serde(rename = "first_name")]
        pub first_name: Option<String>,
        #[serde(rename = "last_name")]
        pub last_name: Option<String>,
        #[serde(rename = "name")]
        pub name: Option<String>,
        #[serde(rename = "address")]
        pub address: Option<String>,
        #[serde(rename = "year")]
        pub year: Option<String>,
        #[serde(rename = "make")]
        pub make: Option<String>,
        #[serde(rename = "model")]
        pub model: Option<String>,
        #[serde(rename = "engine_size")]
        pub engine_size: Option<String>,
        #[serde(rename = "notes")]
        pub notes: Option<String>,
    }

    fn non_empty(v: Option<String>) -> Option<String> {
        v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
    }

    impl CallbackPayload {
        fn bypass_requested(&self) -> bool {
            if let Some(v) = &self.bypass_dedupe {
                return truthy(v);
            }
            match &self.dedupe {
                Some(v) => matches!(
                    v.trim().to_ascii_lowercase().as_str(),
                    "off" | "false" | "no" | "0"
                ),
                None => false,
            }
        }

        fn hints(&self) -> StructuredCustomerData {
            let mut hints = StructuredCustomerData::new();
            for (key, value) in [
                (SemanticKey::FirstName, &self.first_name),
                (SemanticKey::LastName, &self.last_name),
                (SemanticKey::Name, &self.name),
                (SemanticKey::Address, &self.address),
                (SemanticKey::Year, &self.year),
                (SemanticKey::Make, &self.make),
                (SemanticKey::Model, &self.model),
                (SemanticKey::EngineSize, &self.engine_size),
                (SemanticKey::Notes, &self.notes),
            ] {
                if let Some(v) = value {
                    hints.set(key, v.as_str());
                }
            }
            hints
        }

        /// Collapse field-name variants (`From`/`Caller`, `To`/`Called`) into one event.
        pub fn into_event(self) -> CallEvent {
            let bypass_dedupe = self.bypass_requested();
            let voicemail_detected = self.voicemail_detected.as_deref().is_some_and(truthy);
            let hints = self.hints();

            let transcript = non_empty(self.transcription_text);
            let transcript_job_id = non_empty(self.transcript_sid).map(|s| sanitize_id(&s));
            let dial_status = non_empty(self.dial_call_status);
            let recording_url = non_empty(self.recording_url).unwrap_or_default();
            let recording_sid = non_empty(self.recording_sid)
                .map(|s| sanitize_id(&s))
                .or_else(|| recording_sid_from_url(&recording_url))
                .unwrap_or_default();

            let kind = if dial_status.is_some() {
                EventKind::DialResult
            } else if transcript.is_some() || transcript_job_id.is_some() {
                EventKind::TranscriptReady
            } else if !recording_sid.is_empty() || !recording_url.is_empty() {
                EventKind::RecordingComplete
            } else {
                EventKind::CallStatus
            };

            let mut event = CallEvent::new(kind);
            event.call_sid = non_empty(self.call_sid)
                .map(|s| sanitize_id(&s))
                .unwrap_or_default();
            event.recording_sid = recording_sid;
            event.recording_url = recording_url;
            event.from = non_empty(self.from).or(non_empty(self.caller)).unwrap_or_default();
            event.to = non_empty(self.to).or(non_empty(self.called)).unwrap_or_default();
            event.duration_seconds = self
                .recording_duration
                .and_then(|d| d.trim().parse().ok())
                .unwrap_or(0);
            event.transcript = transcript;
            event.transcript_job_id = transcript_job_id;
            event.dial_status = dial_status;
            event.bypass_dedupe = bypass_dedupe;
            event.voicemail_detected = voicemail_detected;
            event.hints = hints;
            event
        }
    }

    /// Subset of the REST `Calls/{sid}.json` resource used for enrichment.
    #[derive(Deserialize, Debug, Default)]
    pub struct CallDetails {
        #[serde(default)]
        pub from: Option<String>,
        #[serde(default)]
        pub to: Option<String>,
        #[serde(default)]
        pub status: Option<String>,
    }
}
pub use callback::*;

mod intelligence {
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    pub struct SentencesPage {
        #[serde(default, alias = "data")]
        pub sentences: Vec<Sentence>,
    }

    #[derive(Deserialize, Debug)]
    pub struct Sentence {
        #[serde(default, alias = "transcript")]
        pub text: Option<String>,
    }

    #[derive(Deserialize, Debug)]
    pub struct CreatedTranscript {
        #[serde(default)]
        pub sid: Option<String>,
        #[serde(default)]
        pub status: Option<String>,
    }
}
pub use intelligence::*;
