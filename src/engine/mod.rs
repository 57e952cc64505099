//! Conversation turn orchestration.
//!
//! [`Engine::handle_message`] runs one inbound message through a fixed-order
//! pipeline: transcription, session resolution, directive handling, access
//! control, special commands, abort, context injection, delegation to the
//! agent runtime, post-processing. The stage order is a tested contract;
//! every persisted mutation is committed through the store before the stage
//! that depends on it, and pre-delegation writes stay committed even when the
//! delegation itself fails.
//!
//! Concurrency: at most one in-flight turn per session key. A racing second
//! message is parked in a pending buffer that the in-flight turn drains
//! right before delegating, so it joins the same agent call instead of
//! producing a separate reply. Cross-key turns run in parallel under a
//! semaphore.

pub mod abort;
pub mod status;

use crate::agent::{AgentRunRequest, AgentRuntime, ReplyPayload, Transcriber};
use crate::catalog::{ModelCatalog, ModelSelection};
use crate::config::Config;
use crate::directives::{
    self, DirectiveScan, GroupActivation, InvalidDirective, ModelDirective, VerboseLevel,
};
use crate::session::{
    evaluate, resolve_session_key, ChannelIdentity, ChatType, SessionRecord, SessionState,
    SessionStore, MAIN_SESSION_KEY,
};
use crate::util::now_ms;
use abort::AbortRegistry;
use anyhow::anyhow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const ABORT_ACK: &str = "🛑 Stopped. Send a new message to continue.";
const EMPTY_BODY_REPLY: &str = "Sorry, I couldn't find any text in that message.";
const RESTART_ACK: &str = "♻️ Restarting the agent runtime…";
const NEW_SESSION_BANNER: &str = "✨ Started a new session.\n\n";
const BOOTSTRAP_PROMPT: &str =
    "A new session just started. Greet the user briefly and ask what they'd like to do.";

/// One message entering the engine from any channel.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel: String,
    pub sender: String,
    pub recipient: String,
    pub chat_type: ChatType,
    pub content: String,
    /// Explicit session routing; wins over identity-derived keys.
    pub session_id: Option<String>,
    /// Voice note to transcribe when the body is empty.
    pub audio_url: Option<String>,
    /// Whether the agent was addressed directly (group chats).
    pub was_mentioned: bool,
}

impl InboundMessage {
    /// Direct-chat message with no extras, the common case.
    pub fn direct(
        channel: impl Into<String>,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender: sender.into(),
            recipient: recipient.into(),
            chat_type: ChatType::Direct,
            content: content.into(),
            session_id: None,
            audio_url: None,
            was_mentioned: true,
        }
    }
}

/// The outcome of a handled turn.
#[derive(Debug, Clone, Default)]
pub struct TurnReply {
    pub payloads: Vec<ReplyPayload>,
    /// Set by `/restart`; the host process decides how to act on it.
    pub restart_requested: bool,
}

impl TurnReply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            payloads: vec![ReplyPayload::text(text)],
            restart_requested: false,
        }
    }
}

/// Errors that cross the engine boundary. Validation and access-control
/// outcomes never do; they resolve to replies or silent drops inside.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("turn cancelled")]
    Cancelled,
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

/// Where a session identity came from, resolved in stage 2.
struct ResolvedSession {
    key: String,
    record: Option<SessionRecord>,
    session_id: String,
    is_new: bool,
}

pub struct Engine {
    config: Config,
    store: Arc<SessionStore>,
    catalog: ModelCatalog,
    agent: Arc<dyn AgentRuntime>,
    transcriber: Option<Arc<dyn Transcriber>>,
    aborts: AbortRegistry,
    key_locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    pending: StdMutex<HashMap<String, Vec<String>>>,
    system_events: StdMutex<Vec<String>>,
    turn_permits: Arc<Semaphore>,
}

impl Engine {
    pub fn new(config: Config, store: Arc<SessionStore>, agent: Arc<dyn AgentRuntime>) -> Self {
        let catalog = ModelCatalog::from_config(&config);
        let permits = config.routing.max_concurrent_turns.max(1);
        Self {
            config,
            store,
            catalog,
            agent,
            transcriber: None,
            aborts: AbortRegistry::new(),
            key_locks: StdMutex::new(HashMap::new()),
            pending: StdMutex::new(HashMap::new()),
            system_events: StdMutex::new(Vec::new()),
            turn_permits: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Queue a line injected into the context of the next new `main` session.
    pub fn queue_system_event(&self, line: impl Into<String>) {
        self.system_events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.into());
    }

    /// Handle one inbound message end to end. `Ok(None)` is an intentional
    /// silent outcome: access denied, non-mention in a mention-gated group,
    /// or the message was parked behind an in-flight turn on the same key.
    pub async fn handle_message(
        &self,
        msg: InboundMessage,
        cancel: CancellationToken,
    ) -> Result<Option<TurnReply>, TurnError> {
        // Stage 1: transcription.
        let mut content = msg.content.clone();
        if content.trim().is_empty() {
            if let (Some(url), Some(transcriber)) = (&msg.audio_url, &self.transcriber) {
                content = transcriber.transcribe(url).await?;
            }
        }

        let scan = directives::scan(&content);

        // Stage 2: key + freshness.
        let resolved = self.resolve_session(&msg, &scan).await?;
        let key = resolved.key.clone();

        // One in-flight turn per key. A racing message is parked; the turn
        // holding the lock drains it before delegating.
        let lock = self.key_lock(&key);
        let Ok(_key_guard) = lock.try_lock_owned() else {
            tracing::debug!(key = %key, "Turn in flight; parking message");
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .entry(key)
                .or_default()
                .push(content);
            return Ok(None);
        };
        let _permit = self
            .turn_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| anyhow!("Turn semaphore closed"))?;

        // Stage 3: directive extraction and pure-command turns.
        if let Some(invalid) = scan.first_invalid() {
            return Ok(Some(TurnReply::text(correction_reply(&invalid))));
        }
        if scan.is_directive_only() && !scan.reset.triggered {
            if let Some(reply) = self.handle_pure_command(&msg, &resolved, &scan).await? {
                return Ok(Some(reply));
            }
        }

        // Stage 4: allow-list check; a persisted override that fell off the
        // allow-list is cleared durably before anything else runs on it.
        let (mut selection, cleared) = self.catalog.resolve(resolved.record.as_ref());
        if cleared {
            let session_id = resolved.session_id.clone();
            self.store
                .upsert(&resolved.key, move |prev| {
                    let mut record = prev.unwrap_or_else(|| SessionRecord::new(session_id));
                    record.model_override = None;
                    record.provider_override = None;
                    record
                })
                .await?;
            tracing::info!(key = %resolved.key, "Cleared disallowed model override");
        }
        if let Some(ModelDirective::Select(wanted)) = &scan.model.value {
            // Same validation as the directive-only path: an unknown
            // selector is rejected outright, message text and all.
            match self.catalog.select(wanted) {
                Some(chosen) => selection = chosen,
                None => return Ok(Some(TurnReply::text(model_unavailable_reply(wanted)))),
            }
        }

        // Stage 5: access control. Denials are silent by design.
        if !self.sender_allowed(&msg) {
            tracing::debug!(sender = %msg.sender, "Sender not in allow_from; dropping");
            return Ok(None);
        }
        if msg.chat_type == ChatType::Group && !self.group_activated(&msg, resolved.record.as_ref())
        {
            return Ok(None);
        }

        // Stage 6: special commands.
        if scan.status {
            let text = status::render_status(
                &resolved.key,
                resolved.record.as_ref(),
                &selection,
                &self.config,
                now_ms(),
            );
            return Ok(Some(TurnReply::text(text)));
        }
        if scan.restart {
            if !self.owner_gated_allowed(&msg) {
                return Ok(None);
            }
            let mut reply = TurnReply::text(RESTART_ACK);
            reply.restart_requested = true;
            return Ok(Some(reply));
        }
        if let Some(mode) = scan.activation.value {
            return self.handle_activation(&msg, &resolved, mode).await;
        }

        // Stage 7: abort.
        if scan.abort {
            if resolved.record.is_some() {
                let session_id = resolved.session_id.clone();
                self.store
                    .upsert(&resolved.key, move |prev| {
                        let mut record = prev.unwrap_or_else(|| SessionRecord::new(session_id));
                        record.aborted_last_run = true;
                        record
                    })
                    .await?;
            } else {
                let fallback =
                    AbortRegistry::fallback_key(&msg.channel, &msg.sender, &msg.recipient);
                self.aborts.mark(&fallback);
            }
            return Ok(Some(TurnReply::text(ABORT_ACK)));
        }

        // Stage 8: empty-body guard.
        let reset_only = scan.reset.triggered && scan.reset.remainder.is_none();
        if scan.cleaned.is_empty() && !scan.reset.triggered {
            return Ok(Some(TurnReply::text(EMPTY_BODY_REPLY)));
        }

        // Stage 9: context injection.
        let prior_abort = resolved
            .record
            .as_ref()
            .map(|r| r.aborted_last_run)
            .unwrap_or_else(|| {
                self.aborts.take(&AbortRegistry::fallback_key(
                    &msg.channel,
                    &msg.sender,
                    &msg.recipient,
                ))
            });
        let skills_snapshot = self.skills_snapshot(resolved.record.as_ref(), resolved.is_new);
        let extra_system_prompt =
            self.build_context(&msg, &resolved, prior_abort, skills_snapshot.as_deref());

        // Commit every pre-delegation mutation; these stay committed even
        // when the agent call below fails.
        let record = {
            let scan = scan.clone();
            let session_id = resolved.session_id.clone();
            let selection = selection.clone();
            let catalog_default = self.catalog.default_selection();
            let skills_snapshot = skills_snapshot.clone();
            let channel = msg.channel.clone();
            let reply_to = self.reply_target(&msg);
            self.store
                .upsert(&resolved.key, move |prev| {
                    let mut record = prev.unwrap_or_else(|| SessionRecord::new(session_id.clone()));
                    // The resolved id is authoritative: a rotation or an
                    // explicitly supplied id replaces whatever the record
                    // carried; continuing turns write the same id back.
                    record.session_id = session_id;
                    apply_setting_directives(&mut record, &scan, &selection, &catalog_default);
                    record.aborted_last_run = false;
                    record.system_sent = true;
                    record.skills_snapshot = skills_snapshot;
                    record.last_channel = Some(channel);
                    record.last_to = Some(reply_to);
                    record
                })
                .await?
        };

        // Drain messages parked while this turn was being prepared.
        let parked = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&resolved.key)
            .unwrap_or_default();

        let mut prompt = if reset_only {
            BOOTSTRAP_PROMPT.to_string()
        } else if let Some(remainder) = &scan.reset.remainder {
            remainder.clone()
        } else {
            scan.cleaned.clone()
        };
        if !parked.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&parked.join("\n"));
        }

        // Stage 10: delegation.
        let request = AgentRunRequest {
            session_id: record.session_id.clone(),
            prompt,
            provider: selection.provider.clone(),
            model: selection.model.clone(),
            think_level: record.thinking_level.or(self.config.agent.think_default),
            verbose_level: record.verbose_level.or(self.config.agent.verbose_default),
            timeout_secs: self.config.effective_timeout_secs(),
            extra_system_prompt,
        };
        let budget = Duration::from_secs(self.config.effective_timeout_secs());
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(TurnError::Cancelled),
            result = tokio::time::timeout(budget, self.agent.run(request)) => match result {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => return Err(TurnError::Upstream(e)),
                Err(_) => {
                    return Err(TurnError::Upstream(anyhow!(
                        "Agent runtime timed out after {}s",
                        budget.as_secs()
                    )))
                }
            }
        };

        // Stage 11: post-processing.
        let runtime_aborted = outcome.aborted;
        let meta = outcome.meta.clone();
        let post_session_id = record.session_id.clone();
        self.store
            .upsert(&resolved.key, move |prev| {
                let mut record = prev.unwrap_or_else(|| SessionRecord::new(post_session_id));
                if let Some(usage) = &meta.usage {
                    record.input_tokens = usage.input_tokens;
                    record.output_tokens = usage.output_tokens;
                    record.total_tokens = usage.total_tokens;
                    let cached = usage.cache_read_tokens.unwrap_or(0)
                        + usage.cache_write_tokens.unwrap_or(0);
                    record.context_tokens = usage
                        .input_tokens
                        .map(|input| input + cached)
                        .or(record.context_tokens);
                }
                if let Some(model) = &meta.model {
                    record.model = Some(model.clone());
                }
                record.group_activation_needs_system_intro = false;
                if runtime_aborted {
                    record.aborted_last_run = true;
                }
                record
            })
            .await?;

        let mut payloads = outcome.payloads;
        let verbose = record
            .verbose_level
            .or(self.config.agent.verbose_default)
            .map(|v| v == VerboseLevel::On)
            .unwrap_or(false);
        if resolved.is_new && verbose {
            match payloads.first_mut() {
                Some(first) => {
                    let text = first.text.take().unwrap_or_default();
                    first.text = Some(format!("{NEW_SESSION_BANNER}{text}"));
                }
                None => payloads.push(ReplyPayload::text(NEW_SESSION_BANNER.trim_end())),
            }
        }

        Ok(Some(TurnReply {
            payloads,
            restart_requested: false,
        }))
    }

    /// Scheduled-turn entry point: delegate a prepared prompt on an existing
    /// key, no directive handling. Returns the payloads plus the last
    /// delivery target recorded for the key.
    pub async fn run_cron_turn(
        &self,
        key: &str,
        prompt: &str,
    ) -> Result<(Vec<ReplyPayload>, Option<(String, String)>), TurnError> {
        let lock = self.key_lock(key);
        let _key_guard = lock.lock_owned().await;
        let _permit = self
            .turn_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| anyhow!("Turn semaphore closed"))?;

        let record = self.store.get(key).await?;
        let state = evaluate(record, now_ms(), self.config.effective_idle_minutes());
        let (session_id, fresh_record) = match state {
            SessionState::Fresh(record) => (record.session_id.clone(), Some(record)),
            SessionState::Stale(_) | SessionState::Absent => {
                (Uuid::new_v4().to_string(), None)
            }
        };
        let (selection, _) = self.catalog.resolve(fresh_record.as_ref());

        let request = AgentRunRequest {
            session_id: session_id.clone(),
            prompt: prompt.to_string(),
            provider: selection.provider,
            model: selection.model,
            think_level: fresh_record
                .as_ref()
                .and_then(|r| r.thinking_level)
                .or(self.config.agent.think_default),
            verbose_level: None,
            timeout_secs: self.config.effective_timeout_secs(),
            extra_system_prompt: None,
        };

        let record = self
            .store
            .upsert(key, move |prev| {
                let mut record = prev.unwrap_or_else(|| SessionRecord::new(session_id.clone()));
                if fresh_record.is_none() {
                    record.session_id = session_id;
                }
                record
            })
            .await?;

        let budget = Duration::from_secs(self.config.effective_timeout_secs());
        let outcome = tokio::time::timeout(budget, self.agent.run(request))
            .await
            .map_err(|_| anyhow!("Agent runtime timed out after {}s", budget.as_secs()))??;

        let target = record
            .last_channel
            .as_ref()
            .zip(record.last_to.as_ref())
            .map(|(c, t)| (c.clone(), t.clone()));
        Ok((outcome.payloads, target))
    }

    /// Status text for the CLI `status` subcommand.
    pub async fn status_text(&self, key: &str) -> Result<String, TurnError> {
        let record = self.store.get(key).await?;
        let (selection, _) = self.catalog.resolve(record.as_ref());
        Ok(status::render_status(
            key,
            record.as_ref(),
            &selection,
            &self.config,
            now_ms(),
        ))
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    // ── Stage helpers ─────────────────────────────────────────────

    async fn resolve_session(
        &self,
        msg: &InboundMessage,
        scan: &DirectiveScan,
    ) -> Result<ResolvedSession, TurnError> {
        // Explicit id wins, freshness not re-checked.
        if let Some(id) = &msg.session_id {
            if let Some((key, record)) = self.store.find_by_session_id(id).await? {
                return Ok(ResolvedSession {
                    key,
                    session_id: record.session_id.clone(),
                    record: Some(record),
                    is_new: false,
                });
            }
            // No match: the id is still used verbatim and the turn is not
            // new; a record carrying it is created lazily on first write.
            let key = self.derived_key(msg);
            return Ok(ResolvedSession {
                key,
                record: None,
                session_id: id.clone(),
                is_new: false,
            });
        }

        let key = self.derived_key(msg);
        let record = self.store.get(&key).await?;

        if scan.reset.triggered {
            return Ok(ResolvedSession {
                key,
                record,
                session_id: Uuid::new_v4().to_string(),
                is_new: true,
            });
        }

        match evaluate(record, now_ms(), self.config.effective_idle_minutes()) {
            SessionState::Fresh(record) => Ok(ResolvedSession {
                key,
                session_id: record.session_id.clone(),
                record: Some(record),
                is_new: false,
            }),
            SessionState::Stale(record) => Ok(ResolvedSession {
                key,
                record: Some(record),
                session_id: Uuid::new_v4().to_string(),
                is_new: true,
            }),
            SessionState::Absent => Ok(ResolvedSession {
                key,
                record: None,
                session_id: Uuid::new_v4().to_string(),
                is_new: true,
            }),
        }
    }

    fn derived_key(&self, msg: &InboundMessage) -> String {
        resolve_session_key(
            &ChannelIdentity {
                sender: &msg.sender,
                recipient: &msg.recipient,
                chat_type: msg.chat_type,
            },
            self.config.session.scope,
        )
    }

    fn key_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.key_locks.lock().unwrap_or_else(|e| e.into_inner());
        // Entries whose Arc is held only by the map have no turn in flight
        // or waiting; sweeping them here keeps the map proportional to the
        // set of active conversations.
        locks.retain(|k, lock| k == key || Arc::strong_count(lock) > 1);
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn sender_allowed(&self, msg: &InboundMessage) -> bool {
        let allow = &self.config.routing.allow_from;
        // Self-chat (writing to your own address) always passes.
        allow.is_empty() || allow.iter().any(|a| a == &msg.sender) || msg.sender == msg.recipient
    }

    fn group_activated(&self, msg: &InboundMessage, record: Option<&SessionRecord>) -> bool {
        let activation = record
            .and_then(|r| r.group_activation)
            .unwrap_or(GroupActivation::Mention);
        match activation {
            GroupActivation::Always => true,
            GroupActivation::Mention => msg.was_mentioned,
        }
    }

    fn owner_gated_allowed(&self, msg: &InboundMessage) -> bool {
        if msg.chat_type != ChatType::Group {
            return true;
        }
        match &self.config.routing.owner {
            Some(owner) => owner == &msg.sender,
            None => false,
        }
    }

    fn reply_target(&self, msg: &InboundMessage) -> String {
        match msg.chat_type {
            ChatType::Direct => msg.sender.clone(),
            ChatType::Group => msg.recipient.clone(),
        }
    }

    async fn handle_pure_command(
        &self,
        msg: &InboundMessage,
        resolved: &ResolvedSession,
        scan: &DirectiveScan,
    ) -> Result<Option<TurnReply>, TurnError> {
        let mut acks: Vec<String> = Vec::new();
        let mut persist = false;

        if let Some(level) = scan.think.value {
            acks.push(format!("Thinking level set to {}.", level.as_str()));
            persist = true;
        }
        if let Some(level) = scan.verbose.value {
            acks.push(format!("Verbose replies turned {}.", level.as_str()));
            persist = true;
        }
        match &scan.model.value {
            Some(ModelDirective::List) => {
                let (current, _) = self.catalog.resolve(resolved.record.as_ref());
                acks.push(self.catalog.render_listing(&current));
            }
            Some(ModelDirective::Select(wanted)) => match self.catalog.select(wanted) {
                Some(chosen) => {
                    let default = self.catalog.default_selection();
                    if chosen.provider == default.provider && chosen.model == default.model {
                        acks.push(format!(
                            "Model reset to default ({}/{}).",
                            default.provider, default.model
                        ));
                    } else {
                        acks.push(format!("Model set to {}/{}.", chosen.provider, chosen.model));
                    }
                    persist = true;
                }
                None => {
                    acks.push(model_unavailable_reply(wanted));
                }
            },
            None => {}
        }

        // Status/restart/abort/activation resolve in later stages.
        if acks.is_empty() {
            return Ok(None);
        }

        if persist {
            let scan = scan.clone();
            let session_id = resolved.session_id.clone();
            // The selection handed to the mutation must reflect the selector
            // from this very turn, not the record's previous state.
            let selection = match &scan.model.value {
                Some(ModelDirective::Select(wanted)) => self
                    .catalog
                    .select(wanted)
                    .unwrap_or_else(|| self.catalog.resolve(resolved.record.as_ref()).0),
                _ => self.catalog.resolve(resolved.record.as_ref()).0,
            };
            let catalog_default = self.catalog.default_selection();
            let channel = msg.channel.clone();
            let reply_to = self.reply_target(msg);
            self.store
                .upsert(&resolved.key, move |prev| {
                    let mut record = prev.unwrap_or_else(|| SessionRecord::new(session_id));
                    apply_setting_directives(&mut record, &scan, &selection, &catalog_default);
                    record.last_channel = Some(channel);
                    record.last_to = Some(reply_to);
                    record
                })
                .await?;
        }

        Ok(Some(TurnReply::text(acks.join("\n"))))
    }

    async fn handle_activation(
        &self,
        msg: &InboundMessage,
        resolved: &ResolvedSession,
        mode: GroupActivation,
    ) -> Result<Option<TurnReply>, TurnError> {
        if msg.chat_type != ChatType::Group {
            return Ok(Some(TurnReply::text(
                "Activation only applies to group chats.",
            )));
        }
        if !self.owner_gated_allowed(msg) {
            return Ok(None);
        }
        let session_id = resolved.session_id.clone();
        self.store
            .upsert(&resolved.key, move |prev| {
                let mut record = prev.unwrap_or_else(|| SessionRecord::new(session_id));
                record.group_activation = Some(mode);
                record.group_activation_needs_system_intro = true;
                record
            })
            .await?;
        Ok(Some(TurnReply::text(format!(
            "Group activation set to {}.",
            mode.as_str()
        ))))
    }

    fn build_context(
        &self,
        msg: &InboundMessage,
        resolved: &ResolvedSession,
        prior_abort: bool,
        skills_snapshot: Option<&str>,
    ) -> Option<String> {
        let mut lines: Vec<String> = Vec::new();

        if msg.chat_type == ChatType::Group {
            let needs_intro = resolved
                .record
                .as_ref()
                .map(|r| r.group_activation_needs_system_intro)
                .unwrap_or(false);
            if resolved.is_new || needs_intro {
                lines.push(format!(
                    "You are replying inside the group chat {}. Address the group, not one member.",
                    msg.recipient
                ));
                if needs_intro {
                    let mode = resolved
                        .record
                        .as_ref()
                        .and_then(|r| r.group_activation)
                        .unwrap_or(GroupActivation::Mention);
                    lines.push(format!(
                        "Group activation was just changed to `{}`.",
                        mode.as_str()
                    ));
                }
            }
        }

        // System events and the provider snapshot go to the first turn of a
        // new main session only.
        if resolved.is_new && resolved.key == MAIN_SESSION_KEY {
            let events: Vec<String> = std::mem::take(
                &mut *self
                    .system_events
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()),
            );
            lines.extend(events);
            let default = self.catalog.default_selection();
            lines.push(format!(
                "Default model: {}/{}.",
                default.provider, default.model
            ));
        }

        if prior_abort {
            lines.push("Note: the user aborted your previous run before it finished.".to_string());
        }

        if let Some(snapshot) = skills_snapshot {
            lines.push(snapshot.to_string());
        }

        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }

    /// Reuse the cached capability listing; recompute only for new sessions
    /// or records that never had one.
    fn skills_snapshot(&self, record: Option<&SessionRecord>, is_new: bool) -> Option<String> {
        if !is_new {
            if let Some(snapshot) = record.and_then(|r| r.skills_snapshot.clone()) {
                return Some(snapshot);
            }
        }
        let dir = match &self.config.agent.skills_dir {
            Some(raw) => std::path::PathBuf::from(shellexpand::tilde(raw).into_owned()),
            None => self.config.workspace_dir.join("skills"),
        };
        let entries = std::fs::read_dir(&dir).ok()?;
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect();
        if names.is_empty() {
            return None;
        }
        names.sort();
        Some(format!("Available skills: {}.", names.join(", ")))
    }
}

/// Apply valid setting directives from a scan onto a record. Selecting the
/// default model clears the override instead of persisting it.
fn apply_setting_directives(
    record: &mut SessionRecord,
    scan: &DirectiveScan,
    selection: &ModelSelection,
    catalog_default: &ModelSelection,
) {
    if let Some(level) = scan.think.value {
        record.thinking_level = Some(level);
    }
    if let Some(level) = scan.verbose.value {
        record.verbose_level = Some(level);
    }
    if let Some(ModelDirective::Select(_)) = &scan.model.value {
        if selection.provider == catalog_default.provider
            && selection.model == catalog_default.model
        {
            record.model_override = None;
            record.provider_override = None;
        } else if !selection.is_default {
            record.provider_override = Some(selection.provider.clone());
            record.model_override = Some(selection.model.clone());
        }
    }
}

fn model_unavailable_reply(wanted: &str) -> String {
    format!("Model `{wanted}` is not available. Send /model to see the options.")
}

fn correction_reply(invalid: &InvalidDirective) -> String {
    let keyword = invalid.kind.keyword();
    let values = invalid.kind.valid_values().join(", ");
    match &invalid.raw {
        Some(raw) => format!("Invalid {keyword} value `{raw}`. Valid values: {values}."),
        None => format!("Usage: {keyword} <value>. Valid values: {values}."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRunOutcome;
    use crate::directives::DirectiveKind;

    struct NullAgent;

    #[async_trait::async_trait]
    impl AgentRuntime for NullAgent {
        async fn run(&self, _request: AgentRunRequest) -> anyhow::Result<AgentRunOutcome> {
            Ok(AgentRunOutcome::default())
        }
    }

    #[tokio::test]
    async fn idle_key_locks_are_swept() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.workspace_dir = dir.path().to_path_buf();
        let store = Arc::new(SessionStore::new(config.session_store_path()));
        let engine = Engine::new(config, store, Arc::new(NullAgent));

        for i in 0..16 {
            drop(engine.key_lock(&format!("user:{i}")));
        }
        let held = engine.key_lock("user:active");
        let remaining = engine.key_locks.lock().unwrap().len();
        assert!(remaining <= 2, "idle lock entries linger: {remaining}");
        drop(held);
    }

    #[test]
    fn correction_reply_with_rejected_token() {
        let text = correction_reply(&InvalidDirective {
            kind: DirectiveKind::Think,
            raw: Some("ultra".into()),
        });
        assert_eq!(
            text,
            "Invalid /think value `ultra`. Valid values: off, minimal, low, medium, high."
        );
    }

    #[test]
    fn correction_reply_bare_keyword() {
        let text = correction_reply(&InvalidDirective {
            kind: DirectiveKind::Verbose,
            raw: None,
        });
        assert_eq!(text, "Usage: /verbose <value>. Valid values: on, off.");
    }

    #[test]
    fn selecting_default_model_clears_override() {
        let mut record = SessionRecord::new("s");
        record.provider_override = Some("a".into());
        record.model_override = Some("m2".into());
        let scan = directives::scan("/model m1");
        let default = ModelSelection {
            provider: "a".into(),
            model: "m1".into(),
            is_default: true,
        };
        apply_setting_directives(&mut record, &scan, &default, &default);
        assert!(record.model_override.is_none());
        assert!(record.provider_override.is_none());
    }

    #[test]
    fn selecting_non_default_model_persists_override() {
        let mut record = SessionRecord::new("s");
        let scan = directives::scan("/model m2");
        let selection = ModelSelection {
            provider: "a".into(),
            model: "m2".into(),
            is_default: false,
        };
        let default = ModelSelection {
            provider: "a".into(),
            model: "m1".into(),
            is_default: true,
        };
        apply_setting_directives(&mut record, &scan, &selection, &default);
        assert_eq!(record.model_override.as_deref(), Some("m2"));
        assert_eq!(record.provider_override.as_deref(), Some("a"));
    }
}
