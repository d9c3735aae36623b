//! Turn transcript text into a partial customer record.

use crate::config::OpenAiConfig;
use crate::error::AppError;
use crate::openai_types::{OpenAIBatchResponse, OpenAIMessage, OpenAIPayload};
use crate::phone;
use crate::types::{SemanticKey, StructuredCustomerData};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, warn};

const OPENAI_TIMEOUT: Duration = Duration::from_secs(15);

#[async_trait]
pub trait CustomerDataExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(&self, transcript: &str) -> Result<StructuredCustomerData, AppError>;
}

/// Ordered extractor chain. The first extractor that succeeds wins.
pub struct Extractor {
    chain: Vec<Box<dyn CustomerDataExtractor>>,
}

impl Extractor {
    pub fn new(chain: Vec<Box<dyn CustomerDataExtractor>>) -> Self {
        Self { chain }
    }

    pub fn from_config(http: reqwest::Client, openai: &OpenAiConfig) -> Self {
        let mut chain: Vec<Box<dyn CustomerDataExtractor>> = Vec::new();
        if openai.api_key.is_some() {
            chain.push(Box::new(OpenAiExtractor::new(http, openai.clone())));
        }
        chain.push(Box::new(PatternExtractor));
        Self::new(chain)
    }

    /// Never fails; returns the data and the name of the extractor that produced it.
    pub async fn extract(&self, transcript: &str) -> (StructuredCustomerData, &'static str) {
        for extractor in &self.chain {
            match extractor.extract(transcript).await {
                Ok(data) => {
                    debug!(extractor = extractor.name(), data = ?data, "extracted customer data");
                    return (data, extractor.name());
                }
                Err(e) => warn!(extractor = extractor.name(), error = %e, "extractor failed"),
            }
        }
        (StructuredCustomerData::new(), "none")
    }
}

const EXTRACTION_PROMPT: &str = "You are analyzing a phone call transcript for a mobile mechanic service. \
Extract customer information and return ONLY a JSON object with these exact keys (use null for missing data):

{
  \"first_name\": \"customer's first name\",
  \"last_name\": \"customer's last name\",
  \"phone\": \"phone number in format like 9045551234 (digits only)\",
  \"address\": \"location/address mentioned\",
  \"year\": \"vehicle year (4 digits)\",
  \"make\": \"vehicle make/brand\",
  \"model\": \"vehicle model\",
  \"engine\": \"engine size/type if mentioned\",
  \"notes\": \"problem description or service needed\"
}

Rules:
- Extract actual customer info, not business/agent details
- For phone: digits only, no formatting
- For year: must be 4-digit year between 1990-2030
- For make/model: standardize common brands (Honda, Toyota, etc.)
- For notes: summarize the actual problem/service needed
- Return null for any field that's not clearly stated

Transcript: ";

pub struct OpenAiExtractor {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiExtractor {
    pub fn new(http: reqwest::Client, config: OpenAiConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl CustomerDataExtractor for OpenAiExtractor {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn extract(&self, transcript: &str) -> Result<StructuredCustomerData, AppError> {
        let key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::Auth("openai key not configured".to_string()))?;
        let payload = OpenAIPayload {
            model: self.config.model.clone(),
            messages: vec![OpenAIMessage::user(format!("{EXTRACTION_PROMPT}{transcript}"))],
            temperature: Some(0.1),
            max_tokens: Some(300),
        };
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.config.api_base))
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {key}"))
            .json(&payload)
            .timeout(OPENAI_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let resp = resp.json::<OpenAIBatchResponse>().await?;
        let content = resp
            .first_content()
            .ok_or_else(|| AppError::Validation("openai reply had no choices".to_string()))?;
        parse_ai_reply(content)
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    // drop an info string such as `json`
    match inner.split_once('\n') {
        Some((first, rest)) if !first.trim_start().starts_with('{') => rest.trim(),
        _ => inner.trim(),
    }
}

/// Validate the model's JSON reply. Invalid fields are dropped, never defaulted.
pub fn parse_ai_reply(raw: &str) -> Result<StructuredCustomerData, AppError> {
    let value: serde_json::Value = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| AppError::Validation(format!("ai reply is not json: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| AppError::Validation("ai reply is not an object".to_string()))?;

    let mut data = StructuredCustomerData::new();
    for (field, key) in [
        ("first_name", SemanticKey::FirstName),
        ("last_name", SemanticKey::LastName),
        ("phone", SemanticKey::Phone),
        ("address", SemanticKey::Address),
        ("year", SemanticKey::Year),
        ("make", SemanticKey::Make),
        ("model", SemanticKey::Model),
        ("engine", SemanticKey::EngineSize),
        ("engine_size", SemanticKey::EngineSize),
        ("notes", SemanticKey::Notes),
    ] {
        let value = match obj.get(field) {
            Some(serde_json::Value::String(s)) => s.trim().to_string(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => continue,
        };
        if value.is_empty() || value.eq_ignore_ascii_case("null") {
            continue;
        }
        data.set_if_absent(key, value);
    }

    if let Some(raw_phone) = data.remove(SemanticKey::Phone) {
        let digits: String = raw_phone.chars().filter(char::is_ascii_digit).collect();
        if digits.len() >= 10 {
            data.set(SemanticKey::Phone, digits);
        }
    }
    if let Some(year) = data.remove(SemanticKey::Year) {
        if let Ok(y) = year.parse::<i32>() {
            if (1990..=2030).contains(&y) {
                data.set(SemanticKey::Year, y.to_string());
            }
        }
    }
    Ok(data)
}

/// Labels recognised by the pattern extractor, in priority order.
const LABELS: &[(&str, SemanticKey)] = &[
    ("first name", SemanticKey::FirstName),
    ("last name", SemanticKey::LastName),
    ("first", SemanticKey::FirstName),
    ("last", SemanticKey::LastName),
    ("fname", SemanticKey::FirstName),
    ("lname", SemanticKey::LastName),
    ("name", SemanticKey::Name),
    ("phone", SemanticKey::Phone),
    ("phone number", SemanticKey::Phone),
    ("address", SemanticKey::Address),
    ("year", SemanticKey::Year),
    ("make", SemanticKey::Make),
    ("model", SemanticKey::Model),
    ("engine size", SemanticKey::EngineSize),
    ("notes", SemanticKey::Notes),
    ("special notes", SemanticKey::Notes),
];

struct LabelRule {
    key: SemanticKey,
    start: Regex,
    others: Regex,
}

static LABEL_RULES: Lazy<Vec<LabelRule>> = Lazy::new(|| {
    LABELS
        .iter()
        .filter_map(|(label, key)| {
            let start = Regex::new(&format!(
                r"(?i)\b{}\b\s*(?:is\s*)?[:\-]?\s*",
                regex::escape(label)
            ))
            .ok()?;
            let others = LABELS
                .iter()
                .filter(|(l, _)| l != label)
                .map(|(l, _)| regex::escape(l))
                .collect::<Vec<_>>()
                .join("|");
            let others = Regex::new(&format!(r"(?i)\b(?:{others})\b")).ok()?;
            Some(LabelRule {
                key: *key,
                start,
                others,
            })
        })
        .collect()
});

static OK_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s*\bok\b").unwrap());
static LEADING_FILLER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(is|it|the|a|an)\s+").unwrap());
static YEAR_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").unwrap());
static NATURAL_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:my\s+name\s+is|this\s+is|i\s*am|i'm|it's)\s+([a-z][a-z\-']+)(?:\s+([a-z][a-z\-']+))?")
        .unwrap()
});
static PREPOSITION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(from|in|at|of)$").unwrap());
static BARE_PHONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\+?\d[\d\s\-().]{6,}\d)\b").unwrap());
static VEHICLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b((?:19|20)\d{2})\b\s+([A-Za-z][A-Za-z0-9\-]+)\s+([A-Za-z0-9][A-Za-z0-9\-]+)\b").unwrap()
});
static ENGINE_LITERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(\d\.\d)\s*(l|liter|litre)\b").unwrap());
static ENGINE_VEE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(v6|v8)\s*(\d\.\d)?\b").unwrap());

fn is_label_word(token: &str) -> bool {
    LABELS
        .iter()
        .any(|(label, _)| label.split_whitespace().any(|w| w.eq_ignore_ascii_case(token)))
}

/// Title-case tokens written entirely in lowercase; leave anything else as spoken.
fn title_case(raw: &str) -> String {
    raw.split_whitespace()
        .map(|token| {
            if token.chars().any(|c| c.is_uppercase()) {
                return token.to_string();
            }
            let mut chars = token.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text following a label, up to the next label, `ok`, clause punctuation or end of input.
fn labeled_capture<'t>(rule: &LabelRule, text: &'t str) -> Option<&'t str> {
    let m = rule.start.find(text)?;
    let rest = &text[m.end()..];
    let mut cut = rest.len();
    if let Some(o) = rule.others.find(rest) {
        cut = cut.min(o.start());
    }
    if let Some(o) = OK_WORD.find(rest) {
        cut = cut.min(o.start());
    }
    if let Some(p) = rest.find(['.', ';', ',', '\n', '\r']) {
        cut = cut.min(p);
    }
    Some(rest[..cut].trim())
}

/// Deterministic fallback; never fails.
pub struct PatternExtractor;

impl PatternExtractor {
    pub fn extract_sync(&self, transcript: &str) -> StructuredCustomerData {
        let text = transcript.trim();
        let mut out = StructuredCustomerData::new();

        for rule in LABEL_RULES.iter() {
            let Some(raw) = labeled_capture(rule, text) else {
                continue;
            };
            let mut value = LEADING_FILLER.replace(raw, "").trim().to_string();
            match rule.key {
                SemanticKey::Year => {
                    if let Some(y) = YEAR_TOKEN.find(&value) {
                        value = y.as_str().to_string();
                    }
                }
                SemanticKey::FirstName | SemanticKey::LastName | SemanticKey::Name => {
                    value = title_case(&value);
                }
                SemanticKey::Phone => value = phone::normalize(&value),
                _ => {}
            }
            out.set_if_absent(rule.key, value);
        }

        if !out.has(SemanticKey::Name) {
            if let Some(caps) = NATURAL_NAME.captures(text) {
                let first = caps.get(1).map(|m| title_case(m.as_str())).unwrap_or_default();
                let last = caps
                    .get(2)
                    .map(|m| m.as_str())
                    .filter(|t| !PREPOSITION.is_match(t))
                    .map(title_case)
                    .unwrap_or_default();
                // a self-introduction beats stray `first`/`last` label captures
                if !first.is_empty() && !last.is_empty() {
                    out.set(SemanticKey::Name, format!("{first} {last}"));
                    out.set(SemanticKey::FirstName, first);
                    out.set(SemanticKey::LastName, last);
                } else if !first.is_empty() {
                    out.set(SemanticKey::Name, first.clone());
                    out.set(SemanticKey::FirstName, first);
                }
            }
        }

        if !out.has(SemanticKey::FirstName) && !out.has(SemanticKey::LastName) {
            if let Some(name) = out.value(SemanticKey::Name).map(str::to_string) {
                let mut parts = name.split_whitespace();
                if let Some(first) = parts.next() {
                    out.set(SemanticKey::FirstName, title_case(first));
                }
                let rest = parts.collect::<Vec<_>>().join(" ");
                out.set(SemanticKey::LastName, title_case(&rest));
            }
        }

        let labeled_phone_ok = out
            .value(SemanticKey::Phone)
            .is_some_and(|p| phone::digit_count(p) >= phone::MIN_USABLE_DIGITS);
        if !labeled_phone_ok {
            out.remove(SemanticKey::Phone);
            if let Some(caps) = BARE_PHONE.captures(text) {
                out.set(SemanticKey::Phone, phone::normalize(&caps[1]));
            }
        }

        // "2012 Honda Civic" outranks single-word label captures such as "make it quick"
        if let Some(caps) = VEHICLE.captures(text) {
            if !is_label_word(&caps[2]) && !is_label_word(&caps[3]) {
                out.set(SemanticKey::Year, &caps[1]);
                out.set(SemanticKey::Make, title_case(&caps[2]));
                out.set(SemanticKey::Model, title_case(&caps[3]));
            }
        }

        if !out.has(SemanticKey::EngineSize) {
            if let Some(caps) = ENGINE_LITERS.captures(text) {
                out.set(SemanticKey::EngineSize, format!("{}L", &caps[1]));
            } else if let Some(caps) = ENGINE_VEE.captures(text) {
                let vee = caps[1].to_ascii_uppercase();
                let size = match caps.get(2) {
                    Some(liters) => format!("{vee} {}L", liters.as_str()),
                    None => vee,
                };
                out.set(SemanticKey::EngineSize, size);
            }
        }

        out
    }
}

#[async_trait]
impl CustomerDataExtractor for PatternExtractor {
    fn name(&self) -> &'static str {
        "pattern"
    }

    async fn extract(&self, transcript: &str) -> Result<StructuredCustomerData, AppError> {
        Ok(self.extract_sync(transcript))
    }
}
