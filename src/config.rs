use crate::types::SemanticKey;

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is not a valid {kind}: {value}")]
    Invalid {
        name: &'static str,
        kind: &'static str,
        value: String,
    },
    #[error("CRM_FIELD_MAP is not a JSON object of semantic key to field id: {0}")]
    FieldMap(String),
    #[error("quality patterns: {0}")]
    Patterns(String),
}

#[derive(Debug, Clone, Default)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub api_key_sid: Option<String>,
    pub api_key_secret: Option<String>,
    pub forward_to_number: Option<String>,
    pub api_base: String,
}

impl TwilioConfig {
    pub fn has_credentials(&self) -> bool {
        !self.account_sid.is_empty() && !self.auth_token.is_empty()
    }

    /// API key pair when present, else account sid/token.
    pub fn intelligence_auth(&self) -> Option<(String, String)> {
        match (&self.api_key_sid, &self.api_key_secret) {
            (Some(sid), Some(secret)) => Some((sid.clone(), secret.clone())),
            _ if self.has_credentials() => {
                Some((self.account_sid.clone(), self.auth_token.clone()))
            }
            _ => None,
        }
    }
}

/// Transcript analytics service (Twilio Conversational Intelligence).
#[derive(Debug, Clone, Default)]
pub struct IntelligenceConfig {
    pub service_sid: Option<String>,
    pub webhook_url: Option<String>,
    pub api_base: String,
}

#[derive(Debug, Clone, Default)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
}

#[derive(Debug, Clone, Default)]
pub struct CrmConfig {
    pub api_url: Option<String>,
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub leads_entity_id: u32,
    pub created_by_user_id: i64,
    pub field_map: BTreeMap<SemanticKey, i64>,
    pub database_url: Option<String>,
    pub dedupe_window: Duration,
}

#[derive(Debug, Clone)]
pub struct QualityConfig {
    pub min_chars: usize,
    pub patterns_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub secure: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default)]
pub struct NotifyConfig {
    pub email_to: Option<String>,
    pub email_from: Option<String>,
    pub subject: String,
    pub sendgrid_api_key: Option<String>,
    pub sendgrid_api_base: String,
    pub smtp: Option<SmtpConfig>,
    pub sendmail: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingsAccessConfig {
    pub basic_user: Option<String>,
    pub basic_pass: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub public_base_url: String,
    pub log_level: Option<String>,
    pub event_log_path: PathBuf,
    pub twilio: TwilioConfig,
    pub intelligence: IntelligenceConfig,
    pub openai: OpenAiConfig,
    pub crm: CrmConfig,
    pub quality: QualityConfig,
    pub notify: NotifyConfig,
    pub recordings: RecordingsAccessConfig,
}

fn opt_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    opt_env(name).unwrap_or_else(|| default.to_string())
}

fn parse_env<T: std::str::FromStr>(
    name: &'static str,
    kind: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match opt_env(name) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name, kind, value }),
    }
}

/// Parse `{"phone": 12, "first_name": "14"}` style static field maps.
pub fn parse_field_map(raw: &str) -> Result<BTreeMap<SemanticKey, i64>, ConfigError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| ConfigError::FieldMap(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| ConfigError::FieldMap("expected an object".to_string()))?;
    let mut map = BTreeMap::new();
    for (k, v) in obj {
        let key: SemanticKey = k.parse().map_err(ConfigError::FieldMap)?;
        let id = match v {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            serde_json::Value::Null => Some(0),
            _ => None,
        }
        .ok_or_else(|| ConfigError::FieldMap(format!("{k} has no integer id")))?;
        map.insert(key, id);
    }
    Ok(map)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let field_map = match opt_env("CRM_FIELD_MAP") {
            Some(raw) => parse_field_map(&raw)?,
            None => BTreeMap::new(),
        };

        let smtp = match opt_env("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                host,
                port: parse_env("SMTP_PORT", "port", 587)?,
                secure: env_or("SMTP_SECURE", "tls").to_ascii_lowercase(),
                username: env_or("SMTP_USERNAME", ""),
                password: env_or("SMTP_PASSWORD", ""),
            }),
            None => None,
        };

        Ok(Self {
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:3000"),
            public_base_url: env_or("PUBLIC_BASE_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),
            log_level: opt_env("LOG_LEVEL"),
            event_log_path: PathBuf::from(env_or("EVENT_LOG_PATH", "voice.log")),
            twilio: TwilioConfig {
                account_sid: env_or("TWILIO_ACCOUNT_SID", ""),
                auth_token: env_or("TWILIO_AUTH_TOKEN", ""),
                api_key_sid: opt_env("TWILIO_API_KEY_SID"),
                api_key_secret: opt_env("TWILIO_API_KEY_SECRET"),
                forward_to_number: opt_env("FORWARD_TO_NUMBER"),
                api_base: env_or("TWILIO_API_BASE", "https://api.twilio.com"),
            },
            intelligence: IntelligenceConfig {
                service_sid: opt_env("CI_SERVICE_SID"),
                webhook_url: opt_env("CI_WEBHOOK_URL"),
                api_base: env_or("CI_API_BASE", "https://intelligence.twilio.com"),
            },
            openai: OpenAiConfig {
                api_key: opt_env("OPENAI_API_KEY"),
                model: env_or("OPENAI_MODEL", "gpt-3.5-turbo"),
                api_base: env_or("OPENAI_API_BASE", "https://api.openai.com/v1"),
            },
            crm: CrmConfig {
                api_url: opt_env("CRM_API_URL"),
                base_url: opt_env("CRM_BASE_URL").map(|u| u.trim_end_matches('/').to_string()),
                username: opt_env("CRM_USERNAME"),
                password: opt_env("CRM_PASSWORD"),
                api_key: opt_env("CRM_API_KEY"),
                leads_entity_id: parse_env("CRM_LEADS_ENTITY_ID", "entity id", 0)?,
                created_by_user_id: parse_env("CRM_CREATED_BY_USER_ID", "user id", 1)?,
                field_map,
                database_url: opt_env("CRM_DATABASE_URL"),
                dedupe_window: Duration::from_secs(parse_env(
                    "DEDUPE_WINDOW_SECS",
                    "number of seconds",
                    3600,
                )?),
            },
            quality: QualityConfig {
                min_chars: parse_env("QUALITY_MIN_CHARS", "character count", 15)?,
                patterns_file: opt_env("QUALITY_PATTERNS_FILE").map(PathBuf::from),
            },
            notify: NotifyConfig {
                email_to: opt_env("NOTIFY_EMAIL_TO"),
                email_from: opt_env("NOTIFY_EMAIL_FROM"),
                subject: env_or("NOTIFY_EMAIL_SUBJECT", "[New Phone Lead]"),
                sendgrid_api_key: opt_env("SENDGRID_API_KEY"),
                sendgrid_api_base: env_or("SENDGRID_API_BASE", "https://api.sendgrid.com"),
                smtp,
                sendmail: opt_env("NOTIFY_SENDMAIL").is_some_and(|v| crate::utils::truthy(&v)),
            },
            recordings: RecordingsAccessConfig {
                basic_user: opt_env("RECORDINGS_BASIC_USER"),
                basic_pass: opt_env("RECORDINGS_BASIC_PASS"),
                password: opt_env("RECORDINGS_PASSWORD"),
                token: opt_env("RECORDINGS_TOKEN"),
            },
        })
    }

    /// Configuration with every integration switched off; tests fill in what they need.
    pub fn empty() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            public_base_url: "http://localhost".to_string(),
            log_level: None,
            event_log_path: PathBuf::from("voice.log"),
            twilio: TwilioConfig {
                api_base: "https://api.twilio.com".to_string(),
                ..Default::default()
            },
            intelligence: IntelligenceConfig {
                api_base: "https://intelligence.twilio.com".to_string(),
                ..Default::default()
            },
            openai: OpenAiConfig {
                model: "gpt-3.5-turbo".to_string(),
                api_base: "https://api.openai.com/v1".to_string(),
                ..Default::default()
            },
            crm: CrmConfig {
                created_by_user_id: 1,
                dedupe_window: Duration::from_secs(3600),
                ..Default::default()
            },
            quality: QualityConfig {
                min_chars: 15,
                patterns_file: None,
            },
            notify: NotifyConfig {
                subject: "[New Phone Lead]".to_string(),
                sendgrid_api_base: "https://api.sendgrid.com".to_string(),
                ..Default::default()
            },
            recordings: RecordingsAccessConfig::default(),
        }
    }

    /// Public url of the ingestion endpoint.
    pub fn callback_url(&self) -> String {
        format!("{}/voice/recording_callback", self.public_base_url)
    }

    /// Operator-facing download link for a recording.
    pub fn playable_recording_url(&self, recording_sid: &str) -> String {
        format!("{}?action=download&sid={}", self.callback_url(), recording_sid)
    }

    /// Deep link to a lead in the record-keeping system's UI.
    pub fn lead_link(&self, id: i64) -> Option<String> {
        let base = self.crm.base_url.as_ref()?;
        Some(format!(
            "{base}/index.php?module=items/items&path={}&id={id}",
            self.crm.leads_entity_id
        ))
    }
}
