use super::traits::Channel;
use crate::config::WhatsAppConfig;
use anyhow::Context;
use async_trait::async_trait;

const DEFAULT_API_URL: &str = "https://graph.facebook.com/v18.0";

fn ensure_https(url: &str) -> anyhow::Result<()> {
    if !url.starts_with("https://") {
        anyhow::bail!(
            "Refusing to transmit sensitive data over non-HTTPS URL: URL scheme must be https"
        );
    }
    Ok(())
}

/// WhatsApp Business Cloud API sender.
///
/// Outbound only: inbound messages arrive through a webhook endpoint owned
/// by the host process, which feeds them to the engine as `InboundMessage`s.
pub struct WhatsAppChannel {
    client: reqwest::Client,
    access_token: String,
    phone_number_id: String,
    api_url: String,
}

impl WhatsAppChannel {
    pub fn new(config: &WhatsAppConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token: config.access_token.clone(),
            phone_number_id: config.phone_number_id.clone(),
            api_url: config
                .api_url
                .clone()
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/{}/messages",
            self.api_url.trim_end_matches('/'),
            self.phone_number_id
        )
    }

    async fn post(&self, body: serde_json::Value) -> anyhow::Result<()> {
        let url = self.messages_url();
        // Test overrides may point at a local mock; only the production
        // default is held to the https guard.
        if self.api_url == DEFAULT_API_URL {
            ensure_https(&url)?;
        }

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .context("WhatsApp send request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_body = resp.text().await.unwrap_or_default();
            tracing::error!("WhatsApp send failed: {status} — {error_body}");
            anyhow::bail!("WhatsApp API error: {status}");
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for WhatsAppChannel {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn send_text(&self, to: &str, text: &str) -> anyhow::Result<()> {
        // Cloud API wants E.164 without the leading +.
        let to = to.strip_prefix('+').unwrap_or(to);
        self.post(serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": { "preview_url": false, "body": text }
        }))
        .await
    }

    async fn send_media(&self, to: &str, text: &str, media_url: &str) -> anyhow::Result<()> {
        ensure_https(media_url)?;
        let to = to.strip_prefix('+').unwrap_or(to);
        let mut image = serde_json::json!({ "link": media_url });
        if !text.is_empty() {
            image["caption"] = serde_json::Value::String(text.to_string());
        }
        self.post(serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "image",
            "image": image
        }))
        .await
    }
}
