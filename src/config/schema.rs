use crate::directives::{ThinkLevel, VerboseLevel};
use crate::session::SessionScope;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Floor for the per-turn agent delegation timeout.
const MIN_TURN_TIMEOUT_SECS: u64 = 30;

// ── Top-level config ──────────────────────────────────────────────

/// Top-level chatcourier configuration, loaded from `config.toml`.
///
/// Resolution order: `CHATCOURIER_CONFIG_DIR` env → `~/.chatcourier/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Workspace directory - computed from home, not serialized
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Agent runtime defaults and endpoint (`[agent]`).
    #[serde(default)]
    pub agent: AgentConfig,

    /// Session scoping and freshness policy (`[session]`).
    #[serde(default)]
    pub session: SessionConfig,

    /// Model catalog and allow-list (`[models]`).
    #[serde(default)]
    pub models: ModelsConfig,

    /// Inbound routing policy: sender allow-list, owner, concurrency (`[routing]`).
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Channel sender configurations (`[channels_config]`).
    #[serde(default)]
    pub channels_config: ChannelsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::new(),
            config_path: PathBuf::new(),
            agent: AgentConfig::default(),
            session: SessionConfig::default(),
            models: ModelsConfig::default(),
            routing: RoutingConfig::default(),
            channels_config: ChannelsConfig::default(),
        }
    }
}

impl Config {
    /// Path of the persisted session store document.
    pub fn session_store_path(&self) -> PathBuf {
        match &self.session.store_path {
            Some(raw) => PathBuf::from(shellexpand::tilde(raw).into_owned()),
            None => self.workspace_dir.join("sessions.json"),
        }
    }

    /// Per-turn delegation timeout, clamped to a sane floor.
    pub fn effective_timeout_secs(&self) -> u64 {
        self.agent.timeout_secs.max(MIN_TURN_TIMEOUT_SECS)
    }

    /// Idle window in minutes, clamped to a minimum of 1.
    pub fn effective_idle_minutes(&self) -> u64 {
        self.session.idle_minutes.max(1)
    }
}

// ── Agent runtime ─────────────────────────────────────────────────

/// Defaults handed to the external agent runtime (`[agent]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Default provider ID (e.g. `"anthropic"`). Overridden per-session via `/model`.
    pub provider: Option<String>,
    /// Default model, optionally provider-prefixed (e.g. `"anthropic/claude-sonnet-4-5"`).
    pub model: Option<String>,
    /// HTTP endpoint of the agent runtime. When unset, `start` runs without delegation.
    pub endpoint_url: Option<String>,
    /// Default thinking level when the session has no persisted override.
    #[serde(default)]
    pub think_default: Option<ThinkLevel>,
    /// Default verbosity when the session has no persisted override.
    #[serde(default)]
    pub verbose_default: Option<VerboseLevel>,
    /// Per-turn delegation timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Directory scanned for skill entries when refreshing a session's
    /// capability snapshot. Defaults to `<workspace>/skills`.
    pub skills_dir: Option<String>,
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            endpoint_url: None,
            think_default: None,
            verbose_default: None,
            timeout_secs: default_timeout_secs(),
            skills_dir: None,
        }
    }
}

// ── Session policy ────────────────────────────────────────────────

/// Session scoping and freshness policy (`[session]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Key scoping policy: `per-sender`, `per-group`, or `global`.
    #[serde(default)]
    pub scope: SessionScope,
    /// Idle window in minutes after which a session is considered stale.
    #[serde(default = "default_idle_minutes")]
    pub idle_minutes: u64,
    /// Override for the session store location (tilde-expanded).
    pub store_path: Option<String>,
}

fn default_idle_minutes() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scope: SessionScope::default(),
            idle_minutes: default_idle_minutes(),
            store_path: None,
        }
    }
}

// ── Models ────────────────────────────────────────────────────────

/// One provider/model pair offered for selection (`[[models.catalog]]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntryConfig {
    pub provider: String,
    pub model: String,
    /// Display name shown in the `/model` listing.
    pub label: Option<String>,
}

/// Model catalog and allow-list (`[models]`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Allow-list of `provider/model` strings narrowing the catalog.
    /// An empty (or fully invalid) allow-list means "allow all".
    #[serde(default)]
    pub allowed: Vec<String>,
    /// Valid provider/model pairs with display metadata.
    #[serde(default)]
    pub catalog: Vec<CatalogEntryConfig>,
}

// ── Routing ───────────────────────────────────────────────────────

/// Inbound routing policy (`[routing]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Sender addresses permitted to reach the agent. Empty = allow all.
    /// A sender writing to their own address (self-chat) always passes.
    #[serde(default)]
    pub allow_from: Vec<String>,
    /// Owner address. In group chats, `/restart` and `/activation` are
    /// accepted from the owner only.
    pub owner: Option<String>,
    /// Maximum number of turns processed in parallel across session keys.
    #[serde(default = "default_max_concurrent_turns")]
    pub max_concurrent_turns: usize,
}

fn default_max_concurrent_turns() -> usize {
    4
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            allow_from: Vec::new(),
            owner: None,
            max_concurrent_turns: default_max_concurrent_turns(),
        }
    }
}

// ── Channels ──────────────────────────────────────────────────────

/// Channel sender configurations (`[channels_config]`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    pub whatsapp: Option<WhatsAppConfig>,
    pub telegram: Option<TelegramConfig>,
}

/// WhatsApp Business Cloud API sender (`[channels_config.whatsapp]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    pub access_token: String,
    pub phone_number_id: String,
    /// API base override, used in tests. Defaults to the Meta Graph API.
    pub api_url: Option<String>,
}

/// Telegram Bot API sender (`[channels_config.telegram]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// API base override, used in tests. Defaults to `https://api.telegram.org`.
    pub api_url: Option<String>,
}
