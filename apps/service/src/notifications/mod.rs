//! Fan-out of alerts and digests to email, push and chat.
//!
//! Each channel runs on its own and reports a [`ChannelOutcome`]; a failing
//! channel is logged and never stops the others or reaches the caller.

pub mod chat;
pub mod email;
pub mod message;
pub mod push;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::database::SettingsStore;
use crate::database::models::NotificationSettings;

pub use chat::TelegramTransport;
pub use email::SmtpEmailTransport;
pub use message::{Notification, NotificationKind};
pub use push::ExpoPushTransport;

/// Largest number of messages sent to the push provider in one request.
pub const PUSH_CHUNK_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is not configured")]
    NotConfigured,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("provider rejected the message: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for ChannelError {
    fn from(err: reqwest::Error) -> Self {
        ChannelError::Transport(err.to_string())
    }
}

/// One message addressed to a single push token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushMessage {
    pub to: String,
    pub title: String,
    pub body: String,
    pub sound: &'static str,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    fn is_configured(&self) -> bool {
        true
    }

    /// Send one message to every address in `to`.
    async fn send(&self, to: &[String], subject: &str, html: &str) -> Result<(), ChannelError>;
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    fn is_configured(&self) -> bool {
        true
    }

    fn validate(&self, token: &str) -> bool {
        push::is_expo_push_token(token)
    }

    fn chunk(&self, messages: Vec<PushMessage>) -> Vec<Vec<PushMessage>> {
        push::chunk_messages(messages, PUSH_CHUNK_SIZE)
    }

    async fn send(&self, chunk: &[PushMessage]) -> Result<(), ChannelError>;
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    fn is_configured(&self) -> bool {
        true
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<(), ChannelError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Email,
    Push,
    Chat,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Channel::Email => "email",
            Channel::Push => "push",
            Channel::Chat => "chat",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    Sent,
    Skipped(&'static str),
    Failed(String),
}

impl ChannelOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, ChannelOutcome::Sent)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ChannelOutcome::Failed(_))
    }
}

/// Per-channel result of one [`NotificationDispatcher::notify`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub email: ChannelOutcome,
    pub push: ChannelOutcome,
    pub chat: ChannelOutcome,
}

pub struct NotificationDispatcher {
    settings: Arc<dyn SettingsStore>,
    email: Arc<dyn EmailTransport>,
    push: Arc<dyn PushTransport>,
    chat: Arc<dyn ChatTransport>,
}

fn failed(channel: Channel, user_id: Uuid, err: impl fmt::Display) -> ChannelOutcome {
    warn!(%channel, %user_id, error = %err, "notification channel failed");
    ChannelOutcome::Failed(err.to_string())
}

impl NotificationDispatcher {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        email: Arc<dyn EmailTransport>,
        push: Arc<dyn PushTransport>,
        chat: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            settings,
            email,
            push,
            chat,
        }
    }

    /// Deliver `notification` on every channel configured for `user_id`.
    pub async fn notify(&self, user_id: Uuid, notification: &Notification) -> DispatchReport {
        let settings = match self.settings.get_settings(user_id).await {
            Ok(settings) => Ok(settings.unwrap_or_else(|| NotificationSettings::empty(user_id))),
            Err(err) => {
                error!(%user_id, error = %err, "failed to load notification settings");
                Err(err.to_string())
            }
        };

        let (email, push, chat) = tokio::join!(
            self.send_email(user_id, settings.as_ref(), notification),
            self.send_push(user_id, notification),
            self.send_chat(user_id, settings.as_ref(), notification),
        );

        let report = DispatchReport { email, push, chat };
        debug!(%user_id, kind = %notification.kind, ?report, "notification dispatched");
        report
    }

    async fn send_email(
        &self,
        user_id: Uuid,
        settings: Result<&NotificationSettings, &String>,
        notification: &Notification,
    ) -> ChannelOutcome {
        let settings = match settings {
            Ok(settings) => settings,
            Err(err) => return failed(Channel::Email, user_id, err),
        };
        if settings.email_recipients.is_empty() {
            return ChannelOutcome::Skipped("no recipients");
        }
        if !self.email.is_configured() {
            return ChannelOutcome::Skipped("transport not configured");
        }

        let recipients: Vec<String> = settings.email_recipients.iter().cloned().collect();
        match self.email.send(&recipients, &notification.subject, &notification.html).await {
            Ok(()) => ChannelOutcome::Sent,
            Err(err) => failed(Channel::Email, user_id, err),
        }
    }

    async fn send_push(&self, user_id: Uuid, notification: &Notification) -> ChannelOutcome {
        let Some(content) = &notification.push else {
            return ChannelOutcome::Skipped("no push content");
        };
        if !self.push.is_configured() {
            return ChannelOutcome::Skipped("transport not configured");
        }

        let tokens = match self.settings.push_tokens(user_id).await {
            Ok(tokens) => tokens,
            Err(err) => return failed(Channel::Push, user_id, err),
        };

        let messages: Vec<PushMessage> = tokens
            .into_iter()
            .filter(|token| {
                let valid = self.push.validate(token);
                if !valid {
                    warn!(%user_id, token = %token, "skipping invalid push token");
                }
                valid
            })
            .map(|to| PushMessage {
                to,
                title: content.title.clone(),
                body: content.body.clone(),
                sound: "default",
            })
            .collect();

        if messages.is_empty() {
            return ChannelOutcome::Skipped("no valid devices");
        }

        let chunks = self.push.chunk(messages);
        let total = chunks.len();
        let mut failures = Vec::new();
        for (index, chunk) in chunks.iter().enumerate() {
            if let Err(err) = self.push.send(chunk).await {
                warn!(%user_id, chunk = index, size = chunk.len(), error = %err, "push chunk failed");
                failures.push(err.to_string());
            }
        }

        if failures.is_empty() {
            ChannelOutcome::Sent
        } else {
            ChannelOutcome::Failed(format!("{} of {} chunks failed: {}", failures.len(), total, failures.join("; ")))
        }
    }

    async fn send_chat(
        &self,
        user_id: Uuid,
        settings: Result<&NotificationSettings, &String>,
        notification: &Notification,
    ) -> ChannelOutcome {
        let Some(text) = &notification.chat_text else {
            return ChannelOutcome::Skipped("no chat content");
        };
        let settings = match settings {
            Ok(settings) => settings,
            Err(err) => return failed(Channel::Chat, user_id, err),
        };
        let Some(chat_id) = &settings.telegram_chat_id else {
            return ChannelOutcome::Skipped("no linked chat");
        };
        if !self.chat.is_configured() {
            return ChannelOutcome::Skipped("transport not configured");
        }

        match self.chat.send(chat_id, text).await {
            Ok(()) => ChannelOutcome::Sent,
            Err(err) => failed(Channel::Chat, user_id, err),
        }
    }
}
