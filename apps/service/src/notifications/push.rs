use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{ChannelError, PushMessage, PushTransport};
use crate::config::PushConfig;

fn is_bracketed_token(token: &str, prefix: &str) -> bool {
    token
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(']'))
        .is_some_and(|inner| !inner.is_empty())
}

fn is_hyphenated_id(token: &str) -> bool {
    let groups: Vec<&str> = token.split('-').collect();
    groups.len() == 5
        && groups
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(group, len)| group.len() == len && group.chars().all(|c| c.is_ascii_alphanumeric()))
}

/// Accepts `ExponentPushToken[..]`, `ExpoPushToken[..]` and bare hyphenated device ids.
pub fn is_expo_push_token(token: &str) -> bool {
    is_bracketed_token(token, "ExponentPushToken[") || is_bracketed_token(token, "ExpoPushToken[") || is_hyphenated_id(token)
}

pub fn chunk_messages(messages: Vec<PushMessage>, size: usize) -> Vec<Vec<PushMessage>> {
    messages.chunks(size.max(1)).map(<[PushMessage]>::to_vec).collect()
}

#[derive(Debug, Deserialize)]
struct PushTicket {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    #[serde(default)]
    data: Vec<PushTicket>,
}

/// Collect per-message errors from an Expo push response body.
fn ticket_errors(body: &str) -> Vec<String> {
    match serde_json::from_str::<PushResponse>(body) {
        Ok(response) => response
            .data
            .into_iter()
            .filter(|ticket| ticket.status == "error")
            .map(|ticket| ticket.message.unwrap_or_else(|| "unknown push error".into()))
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Expo push service client
pub struct ExpoPushTransport {
    client: Client,
    endpoint: String,
    access_token: Option<String>,
}

impl ExpoPushTransport {
    pub fn new(config: &PushConfig) -> Result<Self, ChannelError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            access_token: config.access_token.clone(),
        })
    }
}

#[async_trait]
impl PushTransport for ExpoPushTransport {
    async fn send(&self, chunk: &[PushMessage]) -> Result<(), ChannelError> {
        if chunk.is_empty() {
            return Ok(());
        }

        let mut request = self.client.post(&self.endpoint).json(chunk);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read response body".to_string());

        if !status.is_success() {
            return Err(ChannelError::Rejected(format!("push API returned {status}: {body}")));
        }

        let errors = ticket_errors(&body);
        if !errors.is_empty() {
            return Err(ChannelError::Rejected(errors.join("; ")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{spawn_json_server, spawn_silent_server};

    fn transport(endpoint: String, access_token: Option<&str>, timeout_ms: u64) -> ExpoPushTransport {
        ExpoPushTransport::new(&PushConfig {
            endpoint,
            access_token: access_token.map(str::to_string),
            timeout_ms,
        })
        .unwrap()
    }

    fn message(to: &str) -> PushMessage {
        PushMessage {
            to: to.into(),
            title: "Service down".into(),
            body: "api is not responding".into(),
            sound: "default",
        }
    }

    #[test]
    fn token_validation() {
        assert!(is_expo_push_token("ExponentPushToken[xxxxxxxxxxxxxxxxxxxxxx]"));
        assert!(is_expo_push_token("ExpoPushToken[abc]"));
        assert!(is_expo_push_token("F5741A13-BCDA-434B-A316-5DC0E6FFA94F"));
        assert!(!is_expo_push_token("ExponentPushToken[]"));
        assert!(!is_expo_push_token("ExponentPushToken[abc"));
        assert!(!is_expo_push_token("hello"));
        assert!(!is_expo_push_token("F5741A13-BCDA-434B-A316"));
    }

    #[test]
    fn chunks_respect_size() {
        let messages: Vec<_> = (0..250).map(|n| message(&format!("ExpoPushToken[{n}]"))).collect();
        let chunks = chunk_messages(messages, 100);
        let sizes: Vec<_> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[test]
    fn ticket_errors_are_extracted() {
        let body = r#"{"data":[{"status":"ok","id":"1"},{"status":"error","message":"DeviceNotRegistered"}]}"#;
        assert_eq!(ticket_errors(body), vec!["DeviceNotRegistered".to_string()]);
        assert!(ticket_errors("not json").is_empty());
    }

    #[tokio::test]
    async fn provider_rejection_is_an_error() {
        let addr = spawn_json_server(400, r#"{"errors":[{"code":"VALIDATION_ERROR"}]}"#).await;
        let transport = transport(format!("http://{addr}/push"), None, 5_000);

        let err = transport.send(&[message("ExpoPushToken[a]")]).await.unwrap_err();
        assert!(matches!(err, ChannelError::Rejected(ref msg) if msg.contains("VALIDATION_ERROR")), "{err}");
    }

    #[tokio::test]
    async fn accepted_chunk_is_ok() {
        let addr = spawn_json_server(200, r#"{"data":[{"status":"ok","id":"1"}]}"#).await;
        let transport = transport(format!("http://{addr}/push"), Some("secret"), 5_000);

        transport.send(&[message("ExpoPushToken[a]")]).await.unwrap();
    }

    #[tokio::test]
    async fn unresponsive_service_times_out() {
        let addr = spawn_silent_server().await;
        let transport = transport(format!("http://{addr}/push"), None, 200);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            transport.send(&[message("ExpoPushToken[a]")]),
        )
        .await
        .expect("send should give up on its own");
        assert!(matches!(result, Err(ChannelError::Transport(_))), "{result:?}");
    }
}
