//! Channel adapters and payload delivery.

pub mod cli;
pub mod telegram;
pub mod traits;
pub mod whatsapp;

pub use cli::CliChannel;
pub use telegram::TelegramChannel;
pub use traits::Channel;
pub use whatsapp::WhatsAppChannel;

use crate::agent::ReplyPayload;

/// Deliver a batch of reply payloads through a channel, fanning each payload
/// out to its media URLs. Payloads with neither text nor media are skipped.
pub async fn deliver(
    channel: &dyn Channel,
    to: &str,
    payloads: &[ReplyPayload],
) -> anyhow::Result<()> {
    for payload in payloads {
        let text = payload.text.as_deref().unwrap_or("");
        let mut media: Vec<&str> = payload.media_url.as_deref().into_iter().collect();
        media.extend(payload.media_urls.iter().map(String::as_str));

        if media.is_empty() {
            if !text.is_empty() {
                channel.send_text(to, text).await?;
            }
            continue;
        }
        // Caption goes with the first attachment only.
        for (i, url) in media.iter().enumerate() {
            let caption = if i == 0 { text } else { "" };
            channel.send_media(to, caption, url).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send_text(&self, to: &str, text: &str) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(format!("text:{to}:{text}"));
            Ok(())
        }

        async fn send_media(&self, to: &str, text: &str, media_url: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push(format!("media:{to}:{text}:{media_url}"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivers_text_and_media_payloads() {
        let channel = RecordingChannel::default();
        let payloads = vec![
            ReplyPayload::text("hello"),
            ReplyPayload {
                text: Some("caption".into()),
                media_url: Some("https://x/a.png".into()),
                media_urls: vec!["https://x/b.png".into()],
            },
        ];
        deliver(&channel, "alice", &payloads).await.unwrap();

        let sent = channel.sent.lock().unwrap();
        assert_eq!(
            *sent,
            vec![
                "text:alice:hello".to_string(),
                "media:alice:caption:https://x/a.png".to_string(),
                "media:alice::https://x/b.png".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn empty_payloads_send_nothing() {
        let channel = RecordingChannel::default();
        deliver(&channel, "alice", &[ReplyPayload::default()])
            .await
            .unwrap();
        assert!(channel.sent.lock().unwrap().is_empty());
    }
}
