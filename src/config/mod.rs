pub mod schema;

pub use schema::{
    AgentConfig, CatalogEntryConfig, ChannelsConfig, Config, ModelsConfig, RoutingConfig,
    SessionConfig, TelegramConfig, WhatsAppConfig,
};

use anyhow::{Context, Result};
use directories::UserDirs;
use std::path::PathBuf;

/// Resolve the config directory: `CHATCOURIER_CONFIG_DIR` env → `~/.chatcourier`.
fn resolve_config_dir() -> Result<PathBuf> {
    if let Ok(custom) = std::env::var("CHATCOURIER_CONFIG_DIR") {
        let custom = custom.trim();
        if !custom.is_empty() {
            return Ok(PathBuf::from(shellexpand::tilde(custom).into_owned()));
        }
    }
    let user_dirs = UserDirs::new().context("Could not determine home directory")?;
    Ok(user_dirs.home_dir().join(".chatcourier"))
}

impl Config {
    /// Load `config.toml` from the resolved config directory, falling back to
    /// defaults when the file does not exist. The workspace directory is
    /// created on first use.
    pub fn load_or_init() -> Result<Self> {
        let dir = resolve_config_dir()?;
        let config_path = dir.join("config.toml");
        let workspace_dir = dir.join("workspace");

        let mut config = if config_path.exists() {
            let raw = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str::<Config>(&raw)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            tracing::info!(
                path = %config_path.display(),
                "No config file found; using defaults"
            );
            Config::default()
        };

        config.config_path = config_path;
        config.workspace_dir = workspace_dir;
        std::fs::create_dir_all(&config.workspace_dir).with_context(|| {
            format!(
                "Failed to create workspace directory: {}",
                config.workspace_dir.display()
            )
        })?;

        config.validate_soft();
        Ok(config)
    }

    /// Non-fatal sanity checks. Misconfiguration is reported but never blocks
    /// startup; the allow-list in particular fails open by design.
    fn validate_soft(&self) {
        if !self.models.allowed.is_empty() && self.models.catalog.is_empty() {
            tracing::warn!(
                "models.allowed is set but models.catalog is empty; \
                 the allow-list will have no effect (fail-open)"
            );
        }
        for entry in &self.models.allowed {
            if !entry.contains('/') {
                tracing::warn!(
                    entry = %entry,
                    "models.allowed entries should be provider/model strings"
                );
            }
        }
        if self.routing.max_concurrent_turns == 0 {
            tracing::warn!("routing.max_concurrent_turns = 0; clamping to 1 at runtime");
        }
    }
}
