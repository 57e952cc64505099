//! Persisted session state.
//!
//! The store is a single JSON document mapping session key → [`SessionRecord`].
//! It is the sole source of truth for conversation continuity: every mutation
//! is a whole-document read-modify-write serialized behind an internal lock,
//! so a concurrent reader never observes a torn update and concurrent writers
//! on different keys never clobber each other's field changes.

use crate::directives::{GroupActivation, ThinkLevel, VerboseLevel};
use crate::util::now_ms;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// Persisted state for one session key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Opaque identifier, stable for the life of a session.
    pub session_id: String,
    /// Timestamp of last write (epoch ms) — the freshness clock.
    pub updated_at: i64,
    /// Whether the initial system/context preamble has been delivered.
    #[serde(default)]
    pub system_sent: bool,
    /// Sticky flag consumed by the next turn.
    #[serde(default)]
    pub aborted_last_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_level: Option<ThinkLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose_level: Option<VerboseLevel>,
    /// Persisted model selection, validated against the allow-list on every read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_override: Option<String>,
    /// Group-chat only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_activation: Option<GroupActivation>,
    /// One-shot: deliver an intro about the activation change on the next turn.
    #[serde(default)]
    pub group_activation_needs_system_intro: bool,
    // Last-known usage snapshot, advisory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Cached capability listing, recomputed only when absent or the session is new.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills_snapshot: Option<String>,
    /// Last delivery target, used by the scheduled-turn "reply to last channel" policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_to: Option<String>,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            updated_at: now_ms(),
            system_sent: false,
            aborted_last_run: false,
            thinking_level: None,
            verbose_level: None,
            model_override: None,
            provider_override: None,
            group_activation: None,
            group_activation_needs_system_intro: false,
            input_tokens: None,
            output_tokens: None,
            total_tokens: None,
            context_tokens: None,
            model: None,
            skills_snapshot: None,
            last_channel: None,
            last_to: None,
        }
    }

    /// Advance the freshness clock.
    pub fn touch(&mut self) {
        self.updated_at = now_ms();
    }
}

/// JSON-document session store with whole-document read-modify-write.
pub struct SessionStore {
    path: PathBuf,
    /// Serializes all document writes. Readers go straight to disk; the
    /// document is rewritten atomically (write-then-rename) so they never
    /// see a partial file.
    write_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    async fn load_all(&self) -> Result<HashMap<String, SessionRecord>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<HashMap<String, SessionRecord>> {
            if !path.exists() {
                return Ok(HashMap::new());
            }
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read session store: {}", path.display()))?;
            if raw.trim().is_empty() {
                return Ok(HashMap::new());
            }
            match serde_json::from_str(&raw) {
                Ok(map) => Ok(map),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        "Malformed session store, starting empty: {e}"
                    );
                    Ok(HashMap::new())
                }
            }
        })
        .await
        .context("Session store read task panicked")?
    }

    async fn save_all(&self, map: &HashMap<String, SessionRecord>) -> Result<()> {
        let path = self.path.clone();
        let data = serde_json::to_string_pretty(map).context("Failed to encode session store")?;
        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create store directory: {}", parent.display())
                })?;
            }
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, data)
                .with_context(|| format!("Failed to write {}", tmp.display()))?;
            std::fs::rename(&tmp, &path)
                .with_context(|| format!("Failed to replace {}", path.display()))?;
            Ok(())
        })
        .await
        .context("Session store write task panicked")?
    }

    /// Read one record.
    pub async fn get(&self, key: &str) -> Result<Option<SessionRecord>> {
        let mut map = self.load_all().await?;
        Ok(map.remove(key))
    }

    /// Scan all records for one carrying the given session id. Supports
    /// "resume by id" even when the deriving identity differs.
    pub async fn find_by_session_id(&self, id: &str) -> Result<Option<(String, SessionRecord)>> {
        let map = self.load_all().await?;
        Ok(map
            .into_iter()
            .find(|(_, record)| record.session_id == id))
    }

    /// All records, sorted by recency (most recently updated first).
    pub async fn list(&self) -> Result<Vec<(String, SessionRecord)>> {
        let map = self.load_all().await?;
        let mut entries: Vec<_> = map.into_iter().collect();
        entries.sort_by(|a, b| b.1.updated_at.cmp(&a.1.updated_at));
        Ok(entries)
    }

    /// Whole-document read-modify-write for one key. The document is
    /// re-loaded under the write lock immediately before mutation, so field
    /// changes committed by other keys (or an earlier turn on this key) are
    /// merged rather than clobbered from a stale read.
    pub async fn upsert<F>(&self, key: &str, f: F) -> Result<SessionRecord>
    where
        F: FnOnce(Option<SessionRecord>) -> SessionRecord + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load_all().await?;
        let mut record = f(map.remove(key));
        record.touch();
        map.insert(key.to_string(), record.clone());
        self.save_all(&map).await?;
        Ok(record)
    }
}
