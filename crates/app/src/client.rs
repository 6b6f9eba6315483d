use anyhow::Context;
use async_trait::async_trait;

use crate::protocol::SendMessage;

/// Outbound side of the transport: delivers one text message to one conversation.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> anyhow::Result<()>;
}

/// Bot API client. Errors are stripped of the request URL, which embeds the token.
pub struct TelegramClient {
    http: reqwest::Client,
    endpoint: String,
}

impl TelegramClient {
    pub fn new(api_base: &str, bot_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: send_message_endpoint(api_base, bot_token),
        }
    }
}

#[async_trait]
impl MessageSink for TelegramClient {
    async fn send_message(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        self.http
            .post(&self.endpoint)
            .json(&SendMessage { chat_id, text })
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("sendMessage request failed")?
            .error_for_status()
            .map_err(reqwest::Error::without_url)
            .context("sendMessage rejected")?;
        Ok(())
    }
}

fn send_message_endpoint(api_base: &str, bot_token: &str) -> String {
    format!("{}/bot{bot_token}/sendMessage", api_base.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        assert_eq!(
            send_message_endpoint("https://api.telegram.org/", "123:abc"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
        assert_eq!(
            send_message_endpoint("http://127.0.0.1:8081", "t"),
            "http://127.0.0.1:8081/bott/sendMessage"
        );
    }
}
