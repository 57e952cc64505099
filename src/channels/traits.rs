use async_trait::async_trait;

/// Outbound side of a messaging platform. Inbound delivery is the host's
/// concern; the engine only ever needs to send replies somewhere.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable channel name, also recorded as `last_channel` on sessions.
    fn name(&self) -> &str;

    /// Send a plain text message.
    async fn send_text(&self, to: &str, text: &str) -> anyhow::Result<()>;

    /// Send a media attachment with optional caption text. Default falls
    /// back to sending the caption and the URL as text.
    async fn send_media(&self, to: &str, text: &str, media_url: &str) -> anyhow::Result<()> {
        let body = if text.is_empty() {
            media_url.to_string()
        } else {
            format!("{text}\n{media_url}")
        };
        self.send_text(to, &body).await
    }
}
