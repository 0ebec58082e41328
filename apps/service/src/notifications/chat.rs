use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{ChannelError, ChatTransport};
use crate::config::TelegramConfig;

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Telegram Bot API sender. Without a bot token it reports itself unconfigured.
/// Every request is bounded by the configured timeout.
pub struct TelegramTransport {
    client: Client,
    api_base: String,
    bot_token: Option<String>,
}

impl TelegramTransport {
    pub fn new(config: &TelegramConfig) -> Result<Self, ChannelError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone().filter(|token| !token.trim().is_empty()),
        })
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    fn is_configured(&self) -> bool {
        self.bot_token.is_some()
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let token = self.bot_token.as_deref().ok_or(ChannelError::NotConfigured)?;
        let api_url = format!("{}/bot{token}/sendMessage", self.api_base);

        let response = self
            .client
            .post(&api_url)
            .json(&TelegramMessage { chat_id, text })
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(ChannelError::Rejected(format!(
                "Telegram API returned non-success status: {status}. Body: {error_body}"
            )));
        }

        Ok(())
    }
}
