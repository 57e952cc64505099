//! Model catalog, allow-list, and per-session model resolution.
//!
//! Selection precedence: persisted session override (when still allowed) →
//! configured default → built-in fallback. Overrides are validated on every
//! read, so narrowing the allow-list retroactively invalidates persisted
//! choices without touching the store eagerly.

use crate::config::Config;
use crate::session::SessionRecord;

const FALLBACK_PROVIDER: &str = "anthropic";
const FALLBACK_MODEL: &str = "claude-sonnet-4-5";

/// One selectable provider/model pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub provider: String,
    pub model: String,
    pub label: Option<String>,
}

impl CatalogEntry {
    fn id(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

/// The effective model for a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub provider: String,
    pub model: String,
    /// True when the selection came from config defaults rather than a
    /// session override.
    pub is_default: bool,
}

/// In-memory view of the configured catalog plus defaults.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    entries: Vec<CatalogEntry>,
    allowed: Vec<String>,
    default_provider: String,
    default_model: String,
}

impl ModelCatalog {
    pub fn from_config(config: &Config) -> Self {
        let (default_provider, default_model) = default_pair(config);
        Self {
            entries: config
                .models
                .catalog
                .iter()
                .map(|e| CatalogEntry {
                    provider: e.provider.clone(),
                    model: e.model.clone(),
                    label: e.label.clone(),
                })
                .collect(),
            allowed: config.models.allowed.clone(),
            default_provider,
            default_model,
        }
    }

    /// Catalog entries narrowed by the allow-list. An empty allow-list, or
    /// one whose every entry misses the catalog, yields the full catalog
    /// (fail-open: misconfiguration must not brick model selection).
    pub fn allowed_entries(&self) -> Vec<&CatalogEntry> {
        if self.allowed.is_empty() {
            return self.entries.iter().collect();
        }
        let narrowed: Vec<&CatalogEntry> = self
            .entries
            .iter()
            .filter(|e| self.allowed.iter().any(|a| a == &e.id()))
            .collect();
        if narrowed.is_empty() {
            tracing::warn!(
                "models.allowed matches nothing in the catalog; allowing all entries"
            );
            self.entries.iter().collect()
        } else {
            narrowed
        }
    }

    /// Whether a provider/model pair is currently selectable.
    pub fn is_allowed(&self, provider: &str, model: &str) -> bool {
        self.allowed_entries()
            .iter()
            .any(|e| e.provider == provider && e.model == model)
    }

    /// Look up a catalog entry by `provider/model` id, bare model name, or
    /// display label (case-insensitive for the latter two).
    pub fn find(&self, wanted: &str) -> Option<&CatalogEntry> {
        let wanted_lower = wanted.to_lowercase();
        self.allowed_entries().into_iter().find(|e| {
            e.id() == wanted
                || e.model.to_lowercase() == wanted_lower
                || e.label
                    .as_deref()
                    .is_some_and(|l| l.to_lowercase() == wanted_lower)
        })
    }

    /// Resolve a `/model` selector token to a selection. `default` is a
    /// reserved token for the configured default pair; anything else goes
    /// through the catalog lookup.
    pub fn select(&self, wanted: &str) -> Option<ModelSelection> {
        if wanted.eq_ignore_ascii_case("default") {
            return Some(self.default_selection());
        }
        self.find(wanted).map(|entry| ModelSelection {
            provider: entry.provider.clone(),
            model: entry.model.clone(),
            is_default: false,
        })
    }

    pub fn default_selection(&self) -> ModelSelection {
        ModelSelection {
            provider: self.default_provider.clone(),
            model: self.default_model.clone(),
            is_default: true,
        }
    }

    /// Resolve the effective model for a session record. Returns the
    /// selection plus a flag indicating the record carries an override that
    /// is no longer allowed and should be cleared by the caller.
    pub fn resolve(&self, record: Option<&SessionRecord>) -> (ModelSelection, bool) {
        let Some(record) = record else {
            return (self.default_selection(), false);
        };
        let Some(model) = record.model_override.as_deref() else {
            return (self.default_selection(), false);
        };
        let provider = record
            .provider_override
            .as_deref()
            .unwrap_or(&self.default_provider);
        // Overrides predating the catalog config stay valid only while the
        // catalog knows them.
        if self.entries.is_empty() || self.is_allowed(provider, model) {
            (
                ModelSelection {
                    provider: provider.to_string(),
                    model: model.to_string(),
                    is_default: false,
                },
                false,
            )
        } else {
            (self.default_selection(), true)
        }
    }

    /// Human-readable listing for the `/model` directive.
    pub fn render_listing(&self, current: &ModelSelection) -> String {
        let entries = self.allowed_entries();
        if entries.is_empty() {
            return format!(
                "No models configured. Using {}/{}.",
                current.provider, current.model
            );
        }
        let mut out = String::from("Available models:\n");
        for entry in entries {
            let marker = if entry.provider == current.provider && entry.model == current.model {
                "* "
            } else {
                "  "
            };
            match &entry.label {
                Some(label) => {
                    out.push_str(&format!("{marker}{} ({})\n", entry.id(), label));
                }
                None => out.push_str(&format!("{marker}{}\n", entry.id())),
            }
        }
        out.push_str("\nSend /model <name> to switch, or /model default to reset.");
        out
    }
}

/// Derive the default provider/model pair from config. `agent.model` may be
/// provider-prefixed ("anthropic/claude-sonnet-4-5"); a bare model name pairs
/// with `agent.provider`.
fn default_pair(config: &Config) -> (String, String) {
    match config.agent.model.as_deref() {
        Some(raw) => match raw.split_once('/') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                (provider.to_string(), model.to_string())
            }
            _ => (
                config
                    .agent
                    .provider
                    .clone()
                    .unwrap_or_else(|| FALLBACK_PROVIDER.to_string()),
                raw.to_string(),
            ),
        },
        None => (
            config
                .agent
                .provider
                .clone()
                .unwrap_or_else(|| FALLBACK_PROVIDER.to_string()),
            FALLBACK_MODEL.to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogEntryConfig;

    fn config_with(catalog: Vec<(&str, &str)>, allowed: Vec<&str>) -> Config {
        let mut config = Config::default();
        config.models.catalog = catalog
            .into_iter()
            .map(|(p, m)| CatalogEntryConfig {
                provider: p.to_string(),
                model: m.to_string(),
                label: None,
            })
            .collect();
        config.models.allowed = allowed.into_iter().map(String::from).collect();
        config
    }

    #[test]
    fn built_in_fallback_when_nothing_configured() {
        let catalog = ModelCatalog::from_config(&Config::default());
        let selection = catalog.default_selection();
        assert_eq!(selection.provider, "anthropic");
        assert_eq!(selection.model, "claude-sonnet-4-5");
        assert!(selection.is_default);
    }

    #[test]
    fn provider_prefixed_default_model() {
        let mut config = Config::default();
        config.agent.model = Some("openai/gpt-4o".into());
        let catalog = ModelCatalog::from_config(&config);
        let selection = catalog.default_selection();
        assert_eq!(selection.provider, "openai");
        assert_eq!(selection.model, "gpt-4o");
    }

    #[test]
    fn empty_allow_list_allows_all() {
        let config = config_with(vec![("a", "m1"), ("a", "m2")], vec![]);
        let catalog = ModelCatalog::from_config(&config);
        assert_eq!(catalog.allowed_entries().len(), 2);
    }

    #[test]
    fn allow_list_narrows_catalog() {
        let config = config_with(vec![("a", "m1"), ("a", "m2")], vec!["a/m2"]);
        let catalog = ModelCatalog::from_config(&config);
        let entries = catalog.allowed_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].model, "m2");
    }

    #[test]
    fn fully_invalid_allow_list_fails_open() {
        let config = config_with(vec![("a", "m1")], vec!["typo/nope"]);
        let catalog = ModelCatalog::from_config(&config);
        assert_eq!(catalog.allowed_entries().len(), 1);
        assert!(catalog.is_allowed("a", "m1"));
    }

    #[test]
    fn resolve_prefers_valid_override() {
        let config = config_with(vec![("a", "m1"), ("a", "m2")], vec![]);
        let catalog = ModelCatalog::from_config(&config);
        let mut record = SessionRecord::new("s");
        record.provider_override = Some("a".into());
        record.model_override = Some("m2".into());
        let (selection, cleared) = catalog.resolve(Some(&record));
        assert_eq!(selection.model, "m2");
        assert!(!selection.is_default);
        assert!(!cleared);
    }

    #[test]
    fn resolve_flags_disallowed_override_for_clearing() {
        let config = config_with(vec![("a", "m1"), ("a", "m2")], vec!["a/m1"]);
        let catalog = ModelCatalog::from_config(&config);
        let mut record = SessionRecord::new("s");
        record.provider_override = Some("a".into());
        record.model_override = Some("m2".into());
        let (selection, cleared) = catalog.resolve(Some(&record));
        assert!(selection.is_default);
        assert!(cleared);
    }

    #[test]
    fn override_survives_empty_catalog() {
        let catalog = ModelCatalog::from_config(&Config::default());
        let mut record = SessionRecord::new("s");
        record.model_override = Some("anything".into());
        let (selection, cleared) = catalog.resolve(Some(&record));
        assert_eq!(selection.model, "anything");
        assert!(!cleared);
    }

    #[test]
    fn find_matches_id_name_and_label() {
        let mut config = config_with(vec![("a", "m1")], vec![]);
        config.models.catalog[0].label = Some("Fast".into());
        let catalog = ModelCatalog::from_config(&config);
        assert!(catalog.find("a/m1").is_some());
        assert!(catalog.find("M1").is_some());
        assert!(catalog.find("fast").is_some());
        assert!(catalog.find("m2").is_none());
    }

    #[test]
    fn select_reserves_the_default_token() {
        let mut config = config_with(vec![("a", "m1"), ("a", "m2")], vec![]);
        config.agent.provider = Some("a".into());
        config.agent.model = Some("m1".into());
        let catalog = ModelCatalog::from_config(&config);

        let selection = catalog.select("Default").unwrap();
        assert_eq!(selection.provider, "a");
        assert_eq!(selection.model, "m1");
        assert!(selection.is_default);

        let selection = catalog.select("m2").unwrap();
        assert!(!selection.is_default);
        assert!(catalog.select("nope").is_none());
    }

    #[test]
    fn listing_marks_current_selection() {
        let config = config_with(vec![("a", "m1"), ("a", "m2")], vec![]);
        let catalog = ModelCatalog::from_config(&config);
        let current = ModelSelection {
            provider: "a".into(),
            model: "m2".into(),
            is_default: false,
        };
        let listing = catalog.render_listing(&current);
        assert!(listing.contains("* a/m2"));
        assert!(listing.contains("  a/m1"));
    }
}
