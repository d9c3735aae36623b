//! Staff alert for new leads. The first configured transport is used; there is no failover.

use crate::config::{NotifyConfig, SmtpConfig};
use crate::error::AppError;
use crate::phone;
use crate::types::{SemanticKey, StructuredCustomerData};

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::{Credentials, Mechanism},
    AsyncSendmailTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info};

const SENDGRID_TIMEOUT: Duration = Duration::from_secs(15);
const SMTP_TIMEOUT: Duration = Duration::from_secs(10);
const FALLBACK_SENDER: &str = "no-reply@localhost";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl MailMessage {
    fn to_lettre(&self) -> Result<Message, AppError> {
        let parse = |addr: &str| {
            addr.parse::<Mailbox>()
                .map_err(|e| AppError::Validation(format!("mail address {addr}: {e}")))
        };
        let mut builder = Message::builder()
            .from(parse(&self.from)?)
            .subject(self.subject.clone())
            .header(ContentType::TEXT_PLAIN);
        for to in &self.to {
            builder = builder.to(parse(to)?);
        }
        builder
            .body(self.body.clone())
            .map_err(|e| AppError::Validation(e.to_string()))
    }
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, message: &MailMessage) -> Result<(), AppError>;
}

pub struct SendGridTransport {
    http: reqwest::Client,
    api_key: String,
    api_base: String,
}

impl SendGridTransport {
    pub fn new(http: reqwest::Client, api_key: String, api_base: String) -> Self {
        Self {
            http,
            api_key,
            api_base,
        }
    }
}

#[async_trait]
impl MailTransport for SendGridTransport {
    fn name(&self) -> &'static str {
        "sendgrid"
    }

    async fn send(&self, message: &MailMessage) -> Result<(), AppError> {
        let to: Vec<_> = message.to.iter().map(|e| json!({ "email": e })).collect();
        let body = json!({
            "personalizations": [{ "to": to }],
            "from": { "email": message.from },
            "subject": message.subject,
            "content": [{ "type": "text/plain", "value": message.body }],
        });
        self.http
            .post(format!("{}/v3/mail/send", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(SENDGRID_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

pub struct SmtpTransport {
    config: SmtpConfig,
}

impl SmtpTransport {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, AppError> {
        let host = self.config.host.as_str();
        let smtp_err = |e: lettre::transport::smtp::Error| AppError::Transport(e.to_string());
        let builder = match self.config.secure.as_str() {
            "ssl" => AsyncSmtpTransport::<Tokio1Executor>::relay(host).map_err(smtp_err)?,
            "none" | "" => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
            _ => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host).map_err(smtp_err)?,
        };
        let mut builder = builder.port(self.config.port).timeout(Some(SMTP_TIMEOUT));
        if !self.config.username.is_empty() {
            builder = builder
                .credentials(Credentials::new(
                    self.config.username.clone(),
                    self.config.password.clone(),
                ))
                .authentication(vec![Mechanism::Login]);
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, message: &MailMessage) -> Result<(), AppError> {
        let email = message.to_lettre()?;
        self.transport()?.send(email).await.map_err(|e| {
            if e.is_permanent() {
                AppError::Auth(format!("smtp: {e}"))
            } else {
                AppError::Transport(e.to_string())
            }
        })?;
        Ok(())
    }
}

/// Local mail submission through the system `sendmail` binary.
pub struct SendmailTransport;

#[async_trait]
impl MailTransport for SendmailTransport {
    fn name(&self) -> &'static str {
        "sendmail"
    }

    async fn send(&self, message: &MailMessage) -> Result<(), AppError> {
        let email = message.to_lettre()?;
        AsyncSendmailTransport::<Tokio1Executor>::new()
            .send(email)
            .await
            .map_err(|e| AppError::Transport(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotifyOutcome {
    Disabled,
    NoTransport,
    Sent { transport: &'static str },
    Failed { transport: &'static str, error: String },
}

pub struct Notifier {
    config: NotifyConfig,
    transports: Vec<Box<dyn MailTransport>>,
}

impl Notifier {
    pub fn new(config: NotifyConfig, transports: Vec<Box<dyn MailTransport>>) -> Self {
        Self { config, transports }
    }

    /// Transports in priority order: SendGrid, SMTP, sendmail.
    pub fn from_config(http: reqwest::Client, config: NotifyConfig) -> Self {
        let mut transports: Vec<Box<dyn MailTransport>> = Vec::new();
        if let Some(key) = &config.sendgrid_api_key {
            transports.push(Box::new(SendGridTransport::new(
                http,
                key.clone(),
                config.sendgrid_api_base.clone(),
            )));
        }
        if let Some(smtp) = &config.smtp {
            transports.push(Box::new(SmtpTransport::new(smtp.clone())));
        }
        if config.sendmail {
            transports.push(Box::new(SendmailTransport));
        }
        Self::new(config, transports)
    }

    pub fn enabled(&self) -> bool {
        self.config.email_to.is_some()
    }

    fn sender(&self) -> String {
        self.config
            .email_from
            .clone()
            .or_else(|| {
                self.config
                    .smtp
                    .as_ref()
                    .map(|s| s.username.clone())
                    .filter(|u| u.contains('@'))
            })
            .unwrap_or_else(|| FALLBACK_SENDER.to_string())
    }

    /// Build the alert for one lead. `None` when notifications are off.
    pub fn compose(
        &self,
        data: &StructuredCustomerData,
        recording_url: &str,
        lead_link: Option<&str>,
    ) -> Option<MailMessage> {
        let to: Vec<String> = self
            .config
            .email_to
            .as_deref()?
            .split(',')
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        if to.is_empty() {
            return None;
        }

        let name = data.value(SemanticKey::Name).map(str::to_string).unwrap_or_else(|| {
            let first = data.value(SemanticKey::FirstName).unwrap_or_default();
            let last = data.value(SemanticKey::LastName).unwrap_or_default();
            format!("{first} {last}").trim().to_string()
        });
        let phone = data.value(SemanticKey::Phone).unwrap_or_default();
        let subject = self
            .config
            .subject
            .replace("{{name}}", &name)
            .replace("{{phone}}", phone);

        let mut lines = vec![
            "New phone lead received:".to_string(),
            format!("Name: {}", if name.is_empty() { "(unknown)" } else { name.as_str() }),
            format!(
                "Phone: {}",
                if phone.is_empty() {
                    "(missing)".to_string()
                } else {
                    phone::display(phone)
                }
            ),
        ];
        for (key, label) in [
            (SemanticKey::Year, "Year"),
            (SemanticKey::Make, "Make"),
            (SemanticKey::Model, "Model"),
            (SemanticKey::EngineSize, "Engine"),
            (SemanticKey::Address, "Address"),
            (SemanticKey::Notes, "Notes"),
        ] {
            if let Some(v) = data.value(key) {
                lines.push(format!("{label}: {v}"));
            }
        }
        if !recording_url.is_empty() {
            lines.push(format!("Recording: {recording_url}"));
        }
        if let Some(link) = lead_link {
            lines.push(format!("Open in CRM: {link}"));
        }

        Some(MailMessage {
            from: self.sender(),
            to,
            subject,
            body: lines.join("\n") + "\n",
        })
    }

    pub async fn notify(
        &self,
        data: &StructuredCustomerData,
        recording_url: &str,
        lead_link: Option<&str>,
    ) -> NotifyOutcome {
        let Some(message) = self.compose(data, recording_url, lead_link) else {
            return NotifyOutcome::Disabled;
        };
        let Some(transport) = self.transports.first() else {
            return NotifyOutcome::NoTransport;
        };
        match transport.send(&message).await {
            Ok(()) => {
                info!(transport = transport.name(), "lead notification sent");
                NotifyOutcome::Sent {
                    transport: transport.name(),
                }
            }
            Err(e) => {
                error!(transport = transport.name(), error = %e, "lead notification failed");
                NotifyOutcome::Failed {
                    transport: transport.name(),
                    error: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Outbox(Arc<Mutex<Vec<MailMessage>>>);

    struct RecordingTransport {
        name: &'static str,
        outbox: Outbox,
        fail: bool,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn send(&self, message: &MailMessage) -> Result<(), AppError> {
            if self.fail {
                return Err(AppError::Transport("refused".into()));
            }
            self.outbox.0.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn config() -> NotifyConfig {
        NotifyConfig {
            email_to: Some("shop@example.com, owner@example.com".to_string()),
            subject: "[Lead] {{name}} {{phone}}".to_string(),
            ..Default::default()
        }
    }

    fn lead() -> StructuredCustomerData {
        let mut data = StructuredCustomerData::new();
        data.set(SemanticKey::FirstName, "John");
        data.set(SemanticKey::LastName, "Smith");
        data.set(SemanticKey::Phone, "+19045551234");
        data.set(SemanticKey::Year, "2015");
        data.set(SemanticKey::Make, "Ford");
        data
    }

    #[test]
    fn message_lists_known_fields_and_link() {
        let notifier = Notifier::new(config(), vec![]);
        let msg = notifier
            .compose(&lead(), "https://x/rec", Some("https://crm/item/5"))
            .unwrap();
        assert_eq!(msg.subject, "[Lead] John Smith +19045551234");
        assert_eq!(msg.to, vec!["shop@example.com", "owner@example.com"]);
        assert_eq!(msg.from, FALLBACK_SENDER);
        assert_eq!(
            msg.body,
            "New phone lead received:\nName: John Smith\nPhone: (904) 555-1234\nYear: 2015\n\
             Make: Ford\nRecording: https://x/rec\nOpen in CRM: https://crm/item/5\n"
        );
    }

    #[tokio::test]
    async fn only_the_first_transport_is_tried() {
        let outbox = Outbox::default();
        let notifier = Notifier::new(
            config(),
            vec![
                Box::new(RecordingTransport {
                    name: "primary",
                    outbox: outbox.clone(),
                    fail: true,
                }),
                Box::new(RecordingTransport {
                    name: "secondary",
                    outbox: outbox.clone(),
                    fail: false,
                }),
            ],
        );
        let outcome = notifier.notify(&lead(), "", None).await;
        assert!(matches!(outcome, NotifyOutcome::Failed { transport: "primary", .. }));
        assert!(outbox.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn disabled_without_recipient() {
        let notifier = Notifier::new(NotifyConfig::default(), vec![]);
        assert_eq!(notifier.notify(&lead(), "", None).await, NotifyOutcome::Disabled);
        let notifier = Notifier::new(config(), vec![]);
        assert_eq!(notifier.notify(&lead(), "", None).await, NotifyOutcome::NoTransport);
    }

    #[test]
    fn lettre_message_builds_for_plain_addresses() {
        let notifier = Notifier::new(config(), vec![]);
        let msg = notifier.compose(&lead(), "", None).unwrap();
        assert!(msg.to_lettre().is_ok());
    }
}
