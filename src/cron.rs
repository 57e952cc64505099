//! Scheduled turns.
//!
//! A scheduled job runs a prepared prompt against an existing session key and
//! routes whatever the agent says to the last channel that key was seen on.
//! Keys with no recorded delivery target log the reply instead of guessing.

use crate::channels::{self, Channel};
use crate::engine::Engine;
use std::sync::Arc;

pub async fn run_scheduled_turn(
    engine: &Engine,
    channels: &[Arc<dyn Channel>],
    key: &str,
    prompt: &str,
) -> anyhow::Result<()> {
    let (payloads, target) = engine.run_cron_turn(key, prompt).await?;
    if payloads.is_empty() {
        tracing::debug!(key, "Scheduled turn produced no reply");
        return Ok(());
    }

    let Some((channel_name, to)) = target else {
        tracing::warn!(key, "No delivery target recorded for key; dropping reply");
        return Ok(());
    };
    let Some(channel) = channels.iter().find(|c| c.name() == channel_name) else {
        tracing::warn!(key, channel = %channel_name, "Recorded channel not configured");
        return Ok(());
    };

    channels::deliver(channel.as_ref(), &to, &payloads).await
}
