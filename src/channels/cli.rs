use super::traits::Channel;
use async_trait::async_trait;

/// Local stdout channel backing the interactive `start` command.
pub struct CliChannel;

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn send_text(&self, _to: &str, text: &str) -> anyhow::Result<()> {
        println!("{text}");
        Ok(())
    }

    async fn send_media(&self, _to: &str, text: &str, media_url: &str) -> anyhow::Result<()> {
        if text.is_empty() {
            println!("[media] {media_url}");
        } else {
            println!("{text}\n[media] {media_url}");
        }
        Ok(())
    }
}
