//! External agent runtime contract.
//!
//! The courier never runs model inference itself. Each conversation turn is
//! delegated to an agent runtime through [`AgentRuntime`]; the default
//! implementation speaks JSON over HTTP to a configured endpoint. Voice notes
//! are handed to a [`Transcriber`] before the turn pipeline sees them.

use crate::directives::{ThinkLevel, VerboseLevel};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One delegated turn.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRunRequest {
    pub session_id: String,
    pub prompt: String,
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub think_level: Option<ThinkLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose_level: Option<VerboseLevel>,
    /// Budget the runtime should honor; the courier also enforces it locally.
    pub timeout_secs: u64,
    /// Context injected ahead of the user prompt (group intro, system events,
    /// prior-abort hint).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_system_prompt: Option<String>,
}

/// Token usage reported by the runtime, all fields optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_read_tokens: Option<u64>,
    pub cache_write_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

/// Turn metadata reported alongside the payloads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentMeta {
    pub model: Option<String>,
    pub usage: Option<Usage>,
}

/// One outbound reply unit. `media_urls` supplements `media_url` for
/// runtimes that emit several attachments per payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyPayload {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_urls: Vec<String>,
}

impl ReplyPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

/// Result of one delegated turn.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentRunOutcome {
    #[serde(default)]
    pub payloads: Vec<ReplyPayload>,
    /// The runtime stopped early on an abort signal it observed itself.
    #[serde(default)]
    pub aborted: bool,
    #[serde(default)]
    pub meta: AgentMeta,
}

/// The external agent runtime boundary.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn run(&self, request: AgentRunRequest) -> Result<AgentRunOutcome>;
}

/// Speech-to-text boundary for inbound voice notes.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_url: &str) -> Result<String>;
}

/// HTTP adapter posting [`AgentRunRequest`] as JSON to a runtime endpoint.
pub struct HttpAgentRuntime {
    client: reqwest::Client,
    endpoint_url: String,
}

impl HttpAgentRuntime {
    pub fn new(endpoint_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build agent runtime HTTP client")?;
        Ok(Self {
            client,
            endpoint_url: endpoint_url.into(),
        })
    }
}

#[async_trait]
impl AgentRuntime for HttpAgentRuntime {
    async fn run(&self, request: AgentRunRequest) -> Result<AgentRunOutcome> {
        let response = self
            .client
            .post(&self.endpoint_url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Agent runtime request failed: {}", self.endpoint_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Agent runtime error {}: {}",
                status,
                crate::util::truncate_with_ellipsis(&body, 300)
            );
        }

        response
            .json::<AgentRunOutcome>()
            .await
            .context("Agent runtime returned malformed JSON")
    }
}
