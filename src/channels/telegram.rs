use super::traits::Channel;
use crate::config::TelegramConfig;
use anyhow::Context;
use async_trait::async_trait;

const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Telegram's maximum message length for text messages.
const MAX_MESSAGE_LENGTH: usize = 4096;

/// Split a message into chunks that respect Telegram's length limit,
/// preferring newline then space boundaries over hard splits.
fn split_message(message: &str) -> Vec<String> {
    if message.chars().count() <= MAX_MESSAGE_LENGTH {
        return vec![message.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = message;
    while !remaining.is_empty() {
        if remaining.chars().count() <= MAX_MESSAGE_LENGTH {
            chunks.push(remaining.to_string());
            break;
        }
        let hard_split = remaining
            .char_indices()
            .nth(MAX_MESSAGE_LENGTH)
            .map_or(remaining.len(), |(idx, _)| idx);
        let search_area = &remaining[..hard_split];
        let chunk_end = match search_area.rfind('\n') {
            // A break too close to the start wastes a chunk; fall through to
            // spaces, then a hard split.
            Some(pos) if search_area[..pos].chars().count() >= MAX_MESSAGE_LENGTH / 2 => pos + 1,
            _ => search_area
                .rfind(' ')
                .map(|pos| pos + 1)
                .unwrap_or(hard_split),
        };
        chunks.push(remaining[..chunk_end].to_string());
        remaining = &remaining[chunk_end..];
    }
    chunks
}

/// Telegram Bot API sender.
pub struct TelegramChannel {
    client: reqwest::Client,
    bot_token: String,
    api_url: String,
}

impl TelegramChannel {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: config.bot_token.clone(),
            api_url: config
                .api_url
                .clone()
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        }
    }

    fn method_url(&self, api_method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.api_url.trim_end_matches('/'),
            self.bot_token,
            api_method
        )
    }

    async fn call(&self, api_method: &str, body: serde_json::Value) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(self.method_url(api_method))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Telegram {api_method} request failed"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_body = resp.text().await.unwrap_or_default();
            tracing::error!("Telegram {api_method} failed: {status} — {error_body}");
            anyhow::bail!("Telegram API error: {status}");
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send_text(&self, to: &str, text: &str) -> anyhow::Result<()> {
        for chunk in split_message(text) {
            self.call(
                "sendMessage",
                serde_json::json!({ "chat_id": to, "text": chunk }),
            )
            .await?;
        }
        Ok(())
    }

    async fn send_media(&self, to: &str, text: &str, media_url: &str) -> anyhow::Result<()> {
        let mut body = serde_json::json!({ "chat_id": to, "photo": media_url });
        if !text.is_empty() {
            body["caption"] = serde_json::Value::String(text.to_string());
        }
        self.call("sendPhoto", body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel(server: &MockServer) -> TelegramChannel {
        TelegramChannel::new(&TelegramConfig {
            bot_token: "42:abc".into(),
            api_url: Some(server.uri()),
        })
    }

    #[test]
    fn short_messages_stay_whole() {
        assert_eq!(split_message("hi"), vec!["hi".to_string()]);
    }

    #[test]
    fn long_messages_split_within_limit() {
        let long = "word ".repeat(2000);
        let chunks = split_message(&long);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4096));
        assert_eq!(chunks.concat(), long);
    }

    #[test]
    fn prefers_newline_boundaries() {
        let mut long = "a".repeat(3000);
        long.push('\n');
        long.push_str(&"b".repeat(3000));
        let chunks = split_message(&long);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].ends_with('\n'));
    }

    #[tokio::test]
    async fn sends_text_through_bot_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot42:abc/sendMessage"))
            .and(body_partial_json(serde_json::json!({
                "chat_id": "777",
                "text": "hello"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        channel(&server).send_text("777", "hello").await.unwrap();
    }

    #[tokio::test]
    async fn sends_photo_with_caption() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot42:abc/sendPhoto"))
            .and(body_partial_json(serde_json::json!({
                "chat_id": "777",
                "photo": "https://x/a.png",
                "caption": "look"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        channel(&server)
            .send_media("777", "look", "https://x/a.png")
            .await
            .unwrap();
    }
}
