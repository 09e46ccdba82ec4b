use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::templates::RenderedEmail;
use crate::config::Config;
use crate::error::{Error, Result};

const USER_AGENT: &str = concat!("coursedesk/", env!("CARGO_PKG_VERSION"));

/// Final delivery hop for rendered emails. Returns the provider message id.
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, to: &str, email: &RenderedEmail) -> Result<String>;
}

/// Development mailer: logs instead of sending.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, email: &RenderedEmail) -> Result<String> {
        let message_id = Uuid::new_v4().to_string();
        tracing::info!(%to, subject = %email.subject, %message_id, "email (not sent, log mailer)");
        Ok(message_id)
    }
}

#[derive(Serialize)]
struct OutgoingMail<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

#[derive(Deserialize)]
struct MailAccepted {
    #[serde(default, alias = "messageId")]
    id: Option<String>,
}

/// Posts emails as JSON to an HTTP mail relay.
#[derive(Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    from: String,
}

impl HttpMailer {
    pub fn new(url: String, token: Option<String>, from: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("mail client: {e}")))?;
        Ok(Self {
            client,
            url,
            token,
            from,
        })
    }

    /// HTTP relay in production, the log mailer everywhere else.
    pub fn from_config(config: &Config) -> Result<Box<dyn Mailer>> {
        match config.mail_relay() {
            Some(url) => Ok(Box::new(Self::new(
                url.to_string(),
                config.mail.api_token.clone(),
                config.mail.from.clone(),
                config.send_timeout,
            )?)),
            None => Ok(Box::new(LogMailer)),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, to: &str, email: &RenderedEmail) -> Result<String> {
        let mut req = self.client.post(&self.url).json(&OutgoingMail {
            from: &self.from,
            to,
            subject: &email.subject,
            html: &email.html,
        });
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("mail relay: {e}"))
            } else {
                Error::Delivery(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Delivery(format!("mail relay returned {status}: {body}")));
        }

        let accepted: MailAccepted = resp.json().await.unwrap_or(MailAccepted { id: None });
        let message_id = accepted.id.unwrap_or_else(|| "accepted".to_string());
        tracing::debug!(%to, %message_id, "email handed to relay");
        Ok(message_id)
    }
}
