//! Remote lead creation through the record-keeping system's REST endpoint.

use crate::config::CrmConfig;
use crate::error::AppError;

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const CRM_TIMEOUT: Duration = Duration::from_secs(15);

#[async_trait]
pub trait LeadApi: Send + Sync {
    /// Create a lead from `(field id, value)` pairs. Returns the new id when the reply has one.
    async fn add_item(&self, fields: &[(i64, String)]) -> Result<Option<i64>, AppError>;
}

#[derive(Deserialize, Debug, Default)]
struct ApiReply {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl ApiReply {
    fn is_error(&self) -> bool {
        self.status.as_deref() == Some("error")
    }

    fn error_text(&self) -> String {
        self.error_message
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "rejected".to_string())
    }

    fn token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| {
                self.data
                    .as_ref()
                    .and_then(|d| d.get("token"))
                    .and_then(|t| t.as_str())
                    .map(str::to_string)
            })
            .filter(|t| !t.is_empty())
    }

    fn id(&self) -> Option<i64> {
        let id = self.data.as_ref()?.get("id")?;
        id.as_i64().or_else(|| id.as_str()?.trim().parse().ok())
    }
}

enum Credential {
    Token(String),
    Key(String),
}

pub struct RestLeadApi {
    http: reqwest::Client,
    config: CrmConfig,
}

impl RestLeadApi {
    pub fn new(http: reqwest::Client, config: CrmConfig) -> Self {
        Self { http, config }
    }

    fn api_url(&self) -> Result<&str, AppError> {
        self.config
            .api_url
            .as_deref()
            .ok_or_else(|| AppError::Transport("lead api url not configured".to_string()))
    }

    /// Login for a session token; a static key is the fallback.
    async fn credential(&self) -> Option<Credential> {
        let key = self.config.api_key.clone();
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            match self.login(user, pass, key.as_deref().unwrap_or_default()).await {
                Ok(token) => return Some(Credential::Token(token)),
                Err(e) => warn!(error = %e, "lead api login failed"),
            }
        }
        key.map(Credential::Key)
    }

    async fn login(&self, user: &str, pass: &str, key: &str) -> Result<String, AppError> {
        let form = [
            ("action", "login"),
            ("username", user),
            ("password", pass),
            ("key", key),
        ];
        let reply = self
            .http
            .post(self.api_url()?)
            .form(&form)
            .timeout(CRM_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json::<ApiReply>()
            .await?;
        if reply.is_error() {
            return Err(AppError::Auth(reply.error_text()));
        }
        reply
            .token()
            .ok_or_else(|| AppError::Auth("login reply had no token".to_string()))
    }
}

/// Form body for `add_item`.
pub fn add_item_form(
    entity_id: u32,
    credential: Option<(&str, &str)>,
    fields: &[(i64, String)],
) -> Vec<(String, String)> {
    let mut form = vec![
        ("action".to_string(), "add_item".to_string()),
        ("entity_id".to_string(), entity_id.to_string()),
    ];
    if let Some((name, value)) = credential {
        form.push((name.to_string(), value.to_string()));
    }
    for (id, value) in fields {
        if *id > 0 && !value.is_empty() {
            form.push((format!("fields[field_{id}]"), value.clone()));
        }
    }
    form
}

#[async_trait]
impl LeadApi for RestLeadApi {
    async fn add_item(&self, fields: &[(i64, String)]) -> Result<Option<i64>, AppError> {
        let url = self.api_url()?.to_string();
        let credential = self.credential().await;
        let credential = match &credential {
            Some(Credential::Token(t)) => Some(("token", t.as_str())),
            Some(Credential::Key(k)) => Some(("key", k.as_str())),
            None => None,
        };
        let form = add_item_form(self.config.leads_entity_id, credential, fields);
        let resp = self
            .http
            .post(url)
            .form(&form)
            .timeout(CRM_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let body = resp.text().await?;
        match serde_json::from_str::<ApiReply>(&body) {
            Ok(reply) if reply.is_error() => Err(AppError::Auth(reply.error_text())),
            Ok(reply) => {
                debug!(id = ?reply.id(), "lead api accepted item");
                Ok(reply.id())
            }
            Err(e) => {
                warn!(error = %e, "lead api reply was not json");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_attaches_credential_and_mapped_fields() {
        let form = add_item_form(
            25,
            Some(("token", "abc")),
            &[(12, "+19045551234".to_string()), (0, "x".to_string()), (14, String::new())],
        );
        assert_eq!(
            form,
            vec![
                ("action".to_string(), "add_item".to_string()),
                ("entity_id".to_string(), "25".to_string()),
                ("token".to_string(), "abc".to_string()),
                ("fields[field_12]".to_string(), "+19045551234".to_string()),
            ]
        );
    }

    #[test]
    fn reply_ids_and_tokens() {
        let reply: ApiReply =
            serde_json::from_str(r#"{"status":"success","data":{"id":"77"}}"#).unwrap();
        assert_eq!(reply.id(), Some(77));
        let reply: ApiReply = serde_json::from_str(r#"{"status":"success","token":"t1"}"#).unwrap();
        assert_eq!(reply.token().as_deref(), Some("t1"));
        let reply: ApiReply =
            serde_json::from_str(r#"{"status":"error","error_message":"bad key"}"#).unwrap();
        assert!(reply.is_error());
        assert_eq!(reply.error_text(), "bad key");
    }

    #[tokio::test]
    async fn missing_url_is_a_transport_failure() {
        let api = RestLeadApi::new(reqwest::Client::new(), CrmConfig::default());
        let err = api.add_item(&[]).await.unwrap_err();
        assert!(err.falls_through());
    }
}
