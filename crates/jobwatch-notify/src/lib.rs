//! Report delivery: SendGrid HTTP API first, SMTP relay as fallback.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "jobwatch-notify";

pub const SENDGRID_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";

/// Delivery settings, resolved once at process start.
#[derive(Clone, Default)]
pub struct NotifierConfig {
    pub sendgrid_api_key: Option<String>,
    pub recipients: Vec<String>,
    pub from_address: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
}

impl std::fmt::Debug for NotifierConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifierConfig")
            .field("sendgrid_api_key", &self.sendgrid_api_key.as_ref().map(|_| "<redacted>"))
            .field("recipients", &self.recipients)
            .field("from_address", &self.from_address)
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_user", &self.smtp_user)
            .field("smtp_pass", &self.smtp_pass.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl NotifierConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let recipients: Vec<String> = non_empty("TO_EMAIL")
            .map(|list| {
                list.split(',')
                    .map(|addr| addr.trim().to_string())
                    .filter(|addr| !addr.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            sendgrid_api_key: non_empty("SENDGRID_API_KEY"),
            from_address: non_empty("FROM_EMAIL").or_else(|| recipients.first().cloned()),
            recipients,
            smtp_host: non_empty("SMTP_HOST"),
            smtp_port: non_empty("SMTP_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(587),
            smtp_user: non_empty("SMTP_USER"),
            smtp_pass: non_empty("SMTP_PASS"),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("sendgrid request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("sendgrid returned http {status}: {body}")]
    SendGridStatus { status: u16, body: String },
    #[error("invalid message: {0}")]
    Message(String),
    #[error("smtp delivery failed: {0}")]
    Smtp(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    pub attachments: Vec<Attachment>,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, mail: &OutgoingMail) -> Result<(), NotifyError>;
}

pub struct SendGridTransport {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl SendGridTransport {
    pub fn new(api_key: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: SENDGRID_ENDPOINT.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// v3 mail/send body; text/plain must precede text/html.
pub fn sendgrid_payload(mail: &OutgoingMail) -> JsonValue {
    let to: Vec<JsonValue> = mail.to.iter().map(|addr| json!({ "email": addr })).collect();
    let mut payload = json!({
        "personalizations": [{ "to": to }],
        "from": { "email": mail.from },
        "subject": mail.subject,
        "content": [
            { "type": "text/plain", "value": mail.text_body },
            { "type": "text/html", "value": mail.html_body },
        ],
    });
    if !mail.attachments.is_empty() {
        payload["attachments"] = mail
            .attachments
            .iter()
            .map(|a| {
                json!({
                    "content": BASE64.encode(&a.bytes),
                    "type": a.mime_type,
                    "filename": a.filename,
                    "disposition": "attachment",
                })
            })
            .collect();
    }
    payload
}

#[async_trait]
impl MailTransport for SendGridTransport {
    fn name(&self) -> &'static str {
        "sendgrid"
    }

    async fn deliver(&self, mail: &OutgoingMail) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&sendgrid_payload(mail))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::SendGridStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    /// STARTTLS relay; credentials are optional for open relays.
    pub fn new(
        host: &str,
        port: u16,
        user: Option<String>,
        pass: Option<String>,
    ) -> Result<Self, NotifyError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| NotifyError::Smtp(e.to_string()))?
            .port(port);
        if let (Some(user), Some(pass)) = (user, pass) {
            builder = builder.credentials(Credentials::new(user, pass));
        }
        Ok(Self {
            mailer: builder.build(),
        })
    }
}

pub fn build_message(mail: &OutgoingMail) -> Result<Message, NotifyError> {
    let parse_mailbox = |addr: &str| {
        addr.parse::<Mailbox>()
            .map_err(|e| NotifyError::Message(format!("bad address {addr:?}: {e}")))
    };

    let mut builder = Message::builder()
        .from(parse_mailbox(&mail.from)?)
        .subject(mail.subject.clone());
    for addr in &mail.to {
        builder = builder.to(parse_mailbox(addr)?);
    }

    let mut body = MultiPart::mixed().multipart(MultiPart::alternative_plain_html(
        mail.text_body.clone(),
        mail.html_body.clone(),
    ));
    for attachment in &mail.attachments {
        let content_type = ContentType::parse(&attachment.mime_type)
            .map_err(|e| NotifyError::Message(format!("bad mime type {:?}: {e}", attachment.mime_type)))?;
        body = body.singlepart(
            MailAttachment::new(attachment.filename.clone()).body(attachment.bytes.clone(), content_type),
        );
    }

    builder
        .multipart(body)
        .map_err(|e| NotifyError::Message(e.to_string()))
}

#[async_trait]
impl MailTransport for SmtpTransport {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn deliver(&self, mail: &OutgoingMail) -> Result<(), NotifyError> {
        let message = build_message(mail)?;
        self.mailer
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| NotifyError::Smtp(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Primary { transport: String },
    Fallback { transport: String, primary_error: String },
    Skipped { reason: String },
    Failed { errors: Vec<String> },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Primary { .. } | Self::Fallback { .. })
    }
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary { transport } => write!(f, "sent via {transport}"),
            Self::Fallback { transport, .. } => write!(f, "sent via {transport} (fallback)"),
            Self::Skipped { reason } => write!(f, "skipped ({reason})"),
            Self::Failed { errors } => write!(f, "failed ({})", errors.join("; ")),
        }
    }
}

/// Primary transport, then the fallback only if the primary failed.
pub struct Notifier {
    from_address: Option<String>,
    recipients: Vec<String>,
    primary: Option<Box<dyn MailTransport>>,
    fallback: Option<Box<dyn MailTransport>>,
}

impl Notifier {
    pub fn new(
        from_address: Option<String>,
        recipients: Vec<String>,
        primary: Option<Box<dyn MailTransport>>,
        fallback: Option<Box<dyn MailTransport>>,
    ) -> Self {
        Self {
            from_address,
            recipients,
            primary,
            fallback,
        }
    }

    /// Transports whose settings are missing are left out, not reported as errors.
    pub fn from_config(config: &NotifierConfig) -> anyhow::Result<Self> {
        let primary: Option<Box<dyn MailTransport>> = match &config.sendgrid_api_key {
            Some(key) => Some(Box::new(SendGridTransport::new(key.clone())?)),
            None => None,
        };
        let fallback: Option<Box<dyn MailTransport>> = match &config.smtp_host {
            Some(host) => Some(Box::new(SmtpTransport::new(
                host,
                config.smtp_port,
                config.smtp_user.clone(),
                config.smtp_pass.clone(),
            )?)),
            None => None,
        };
        Ok(Self::new(
            config.from_address.clone(),
            config.recipients.clone(),
            primary,
            fallback,
        ))
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Never returns an error; the outcome says what happened.
    pub async fn send(
        &self,
        recipients: &[String],
        subject: &str,
        html_body: &str,
        text_body: &str,
        attachments: Vec<Attachment>,
    ) -> DeliveryOutcome {
        if recipients.is_empty() {
            return DeliveryOutcome::Skipped {
                reason: "no recipients configured".to_string(),
            };
        }
        let Some(from) = self.from_address.clone().or_else(|| recipients.first().cloned()) else {
            return DeliveryOutcome::Skipped {
                reason: "no sender address".to_string(),
            };
        };
        if self.primary.is_none() && self.fallback.is_none() {
            return DeliveryOutcome::Skipped {
                reason: "no transport configured".to_string(),
            };
        }

        let mail = OutgoingMail {
            from,
            to: recipients.to_vec(),
            subject: subject.to_string(),
            html_body: html_body.to_string(),
            text_body: text_body.to_string(),
            attachments,
        };

        let mut errors = Vec::new();
        if let Some(primary) = &self.primary {
            match primary.deliver(&mail).await {
                Ok(()) => {
                    info!(transport = primary.name(), recipients = mail.to.len(), "report delivered");
                    return DeliveryOutcome::Primary {
                        transport: primary.name().to_string(),
                    };
                }
                Err(e) => {
                    warn!(transport = primary.name(), error = %e, "primary transport failed");
                    errors.push(format!("{}: {e}", primary.name()));
                }
            }
        }
        if let Some(fallback) = &self.fallback {
            match fallback.deliver(&mail).await {
                Ok(()) => {
                    info!(transport = fallback.name(), recipients = mail.to.len(), "report delivered");
                    return match errors.pop() {
                        Some(primary_error) => DeliveryOutcome::Fallback {
                            transport: fallback.name().to_string(),
                            primary_error,
                        },
                        None => DeliveryOutcome::Primary {
                            transport: fallback.name().to_string(),
                        },
                    };
                }
                Err(e) => {
                    warn!(transport = fallback.name(), error = %e, "fallback transport failed");
                    errors.push(format!("{}: {e}", fallback.name()));
                }
            }
        }
        warn!(errors = ?errors, "report not delivered");
        DeliveryOutcome::Failed { errors }
    }
}
