//! Notifications
//!
//! Mutating handlers hand messages to a [`NotificationQueue`] and move on.
//! A worker task delivers each message through the configured
//! [`NotificationDispatcher`] under a timeout. Delivery failures are logged
//! and never reach the request that caused them.

use crate::config::{NotificationConfig, NotificationDriver};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    AlbumInvitation,
    AccountSignup,
    Subscription,
    PasswordReset,
    DeactivateAccount,
    DeleteAccount,
    TwoFactorAuth,
    TwoFactorLogin,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::AlbumInvitation => "album-invitation",
            NotificationKind::AccountSignup => "account-signup",
            NotificationKind::Subscription => "subscription",
            NotificationKind::PasswordReset => "password-reset",
            NotificationKind::DeactivateAccount => "deactivate-account",
            NotificationKind::DeleteAccount => "delete-account",
            NotificationKind::TwoFactorAuth => "two-factor-auth",
            NotificationKind::TwoFactorLogin => "two-factor-login",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationMessage {
    pub to: String,
    pub subject: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Recipient display name
    pub name: String,
    pub body: String,
    pub metadata: BTreeMap<String, String>,
}

impl NotificationMessage {
    pub fn new(kind: NotificationKind, to: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            kind,
            name: String::new(),
            body: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn meta(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Plain-text rendering used by the mail dispatcher
    pub fn render_text(&self) -> String {
        let mut text = String::new();
        if !self.name.is_empty() {
            text.push_str(&format!("Hi {},\n\n", self.name));
        }
        text.push_str(&self.body);
        for (key, value) in &self.metadata {
            text.push_str(&format!("\n{}: {}", key, value));
        }
        text
    }
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, message: &NotificationMessage) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Writes messages to the log only
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send(&self, message: &NotificationMessage) -> Result<()> {
        tracing::info!(
            to = %message.to,
            kind = %message.kind,
            "Notification: {}",
            message.subject
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// POSTs the message as JSON to a notification service
pub struct HttpDispatcher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDispatcher {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl NotificationDispatcher for HttpDispatcher {
    async fn send(&self, message: &NotificationMessage) -> Result<()> {
        self.client
            .post(&self.endpoint)
            .json(message)
            .send()
            .await
            .context("Notification request failed")?
            .error_for_status()
            .context("Notification service rejected message")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Sends plain-text mail through an SMTP relay
pub struct SmtpDispatcher {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpDispatcher {
    pub fn from_config(config: &NotificationConfig) -> Result<Self> {
        let smtp = &config.smtp;
        if smtp.host.is_empty() {
            return Err(anyhow!("SMTP host not configured"));
        }
        let from: Mailbox = format!("{} <{}>", config.platform_name, smtp.from)
            .parse()
            .map_err(|e| anyhow!("Invalid from address: {}", e))?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
            .map_err(|e| anyhow!("Failed to create SMTP transport: {}", e))?
            .credentials(Credentials::new(smtp.username.clone(), smtp.password.clone()))
            .port(smtp.port)
            .build();

        Ok(Self { mailer, from })
    }
}

#[async_trait]
impl NotificationDispatcher for SmtpDispatcher {
    async fn send(&self, message: &NotificationMessage) -> Result<()> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(message
                .to
                .parse()
                .map_err(|e| anyhow!("Invalid recipient address: {}", e))?)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(message.render_text())
            .map_err(|e| anyhow!("Failed to build email: {}", e))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| anyhow!("Failed to send email: {}", e))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

pub fn dispatcher_from_config(config: &NotificationConfig) -> Result<Arc<dyn NotificationDispatcher>> {
    let dispatcher: Arc<dyn NotificationDispatcher> = match config.driver {
        NotificationDriver::Log => Arc::new(LogDispatcher),
        NotificationDriver::Http => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or_else(|| anyhow!("notification.endpoint is required for the http driver"))?;
            Arc::new(HttpDispatcher::new(
                endpoint,
                Duration::from_secs(config.timeout_secs),
            )?)
        }
        NotificationDriver::Smtp => Arc::new(SmtpDispatcher::from_config(config)?),
    };
    Ok(dispatcher)
}

/// Fire-and-forget handle onto the delivery worker
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::UnboundedSender<NotificationMessage>,
}

impl NotificationQueue {
    /// Spawn the worker. It exits once every queue clone is dropped.
    pub fn start(dispatcher: Arc<dyn NotificationDispatcher>, timeout: Duration) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<NotificationMessage>();

        let worker = tokio::spawn(async move {
            tracing::info!("Notification worker started ({} dispatcher)", dispatcher.name());
            while let Some(message) = rx.recv().await {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    match tokio::time::timeout(timeout, dispatcher.send(&message)).await {
                        Ok(Ok(())) => {
                            tracing::debug!("Delivered {} notification to {}", message.kind, message.to)
                        }
                        Ok(Err(e)) => tracing::warn!(
                            "Failed to deliver {} notification to {}: {:#}",
                            message.kind,
                            message.to,
                            e
                        ),
                        Err(_) => tracing::warn!(
                            "Timed out delivering {} notification to {}",
                            message.kind,
                            message.to
                        ),
                    }
                });
            }
            tracing::info!("Notification worker stopped");
        });

        (Self { tx }, worker)
    }

    pub fn submit(&self, message: NotificationMessage) {
        if let Err(e) = self.tx.send(message) {
            tracing::warn!("Notification queue closed, dropping {} message", e.0.kind);
        }
    }
}
