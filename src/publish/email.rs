use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials as SmtpLogin;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
#[cfg(test)]
use mockall::automock;
use pulldown_cmark::{html, Options, Parser};
use std::sync::Arc;
use tracing::info;

use super::{PublishMetadata, PublishReceipt, Publisher};
use crate::config::SmtpCredentials;
use crate::error::{Error, Result};

const SERVICE: &str = "smtp";

/// Delivers a finished message.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: Message) -> Result<()>;
}

/// STARTTLS SMTP relay with username/password login.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(host: &str, port: u16, username: &str, password: &str) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| Error::configuration(format!("invalid SMTP host {host}: {e}")))?
            .port(port)
            .credentials(SmtpLogin::new(username.to_string(), password.to_string()))
            .build();
        Ok(Self { transport })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, message: Message) -> Result<()> {
        self.transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| Error::transient(SERVICE, e.to_string()))
    }
}

/// Settings that passed validation.
struct Validated<'a> {
    host: &'a str,
    port: u16,
    username: &'a str,
    password: &'a str,
}

pub struct EmailPublisher {
    credentials: SmtpCredentials,
    transport: Option<Arc<dyn MailTransport>>,
}

impl EmailPublisher {
    pub fn new(credentials: SmtpCredentials) -> Self {
        Self {
            credentials,
            transport: None,
        }
    }

    /// Uses `transport` instead of dialing the configured SMTP host.
    pub fn with_transport(credentials: SmtpCredentials, transport: Arc<dyn MailTransport>) -> Self {
        Self {
            credentials,
            transport: Some(transport),
        }
    }

    fn validate(&self) -> Result<Validated<'_>> {
        let c = &self.credentials;
        let mut missing = Vec::new();
        if c.host.is_none() {
            missing.push("SMTP_HOST");
        }
        if c.port.is_none() {
            missing.push("SMTP_PORT");
        }
        if c.username.is_none() {
            missing.push("SMTP_USER");
        }
        if c.password.is_none() {
            missing.push("SMTP_PASSWORD");
        }
        if c.recipients.is_empty() {
            missing.push("EMAIL_RECIPIENTS");
        }
        match (&c.host, c.port, &c.username, &c.password) {
            (Some(host), Some(port), Some(username), Some(password)) if missing.is_empty() => {
                Ok(Validated {
                    host,
                    port,
                    username,
                    password,
                })
            }
            _ => Err(Error::configuration(format!(
                "email settings missing: {}",
                missing.join(", ")
            ))),
        }
    }

    fn build_message(&self, from: &str, version: &str, document: &str) -> Result<Message> {
        let from: Mailbox = from
            .parse()
            .map_err(|e| Error::configuration(format!("SMTP_USER is not an address: {e}")))?;
        let mut builder = Message::builder()
            .from(from)
            .subject(format!("Release Notes - {version}"));
        for recipient in &self.credentials.recipients {
            let mailbox: Mailbox = recipient.parse().map_err(|e| {
                Error::configuration(format!("invalid recipient {recipient}: {e}"))
            })?;
            builder = builder.to(mailbox);
        }
        builder
            .multipart(MultiPart::alternative_plain_html(
                document.to_string(),
                markdown_to_html(document),
            ))
            .map_err(|e| Error::configuration(format!("cannot build email: {e}")))
    }
}

/// Renders markdown as a standalone HTML body.
pub fn markdown_to_html(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, Options::all());
    let mut body = String::new();
    html::push_html(&mut body, parser);
    format!("<html><body>\n{body}</body></html>\n")
}

#[async_trait]
impl Publisher for EmailPublisher {
    fn display_name(&self) -> &'static str {
        "Email"
    }

    fn is_configured(&self) -> bool {
        self.validate().is_ok()
    }

    fn required_env(&self) -> &'static [&'static str] {
        &[
            "SMTP_HOST",
            "SMTP_PORT",
            "SMTP_USER",
            "SMTP_PASSWORD",
            "EMAIL_RECIPIENTS",
        ]
    }

    async fn publish(
        &self,
        version: &str,
        document: &str,
        _metadata: &PublishMetadata,
    ) -> Result<PublishReceipt> {
        let settings = self.validate()?;
        let message = self.build_message(settings.username, version, document)?;

        match &self.transport {
            Some(transport) => transport.send(message).await?,
            None => {
                SmtpMailer::new(settings.host, settings.port, settings.username, settings.password)?
                    .send(message)
                    .await?
            }
        }

        let count = self.credentials.recipients.len();
        info!(recipients = count, "release notes emailed");
        Ok(PublishReceipt {
            identifier: Some(count.to_string()),
            title: Some(format!("Release Notes - {version}")),
            message: Some(format!("Sent to {count} recipients")),
            ..PublishReceipt::default()
        })
    }
}
