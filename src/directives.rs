//! Inline directive parsing.
//!
//! Directives are command tokens embedded in inbound message text that mutate
//! session configuration instead of being forwarded to the agent. Extraction
//! is pure text work: it never touches session state, and it is idempotent —
//! re-scanning the cleaned output finds no further directive of the same kind.
//!
//! Priority order (fixed, relied on by the orchestrator): think → verbose →
//! model → activation → status → restart → abort → reset.

use serde::{Deserialize, Serialize};

/// Thinking effort handed to the agent runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkLevel {
    Off,
    Minimal,
    Low,
    Medium,
    High,
}

impl ThinkLevel {
    pub const VALUES: [&'static str; 5] = ["off", "minimal", "low", "medium", "high"];

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Some(Self::Off),
            "minimal" => Some(Self::Minimal),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Reply verbosity toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerboseLevel {
    Off,
    On,
}

impl VerboseLevel {
    pub const VALUES: [&'static str; 2] = ["on", "off"];

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::On => "on",
        }
    }
}

/// How a group chat activates the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupActivation {
    Mention,
    Always,
}

impl GroupActivation {
    pub const VALUES: [&'static str; 2] = ["mention", "always"];

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mention" => Some(Self::Mention),
            "always" => Some(Self::Always),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mention => "mention",
            Self::Always => "always",
        }
    }
}

/// `/model` either lists the catalog or selects an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelDirective {
    List,
    Select(String),
}

/// Result of extracting one directive kind from message text.
///
/// `has_directive && value.is_none()` means the keyword was recognized but
/// its argument was not — a user-facing correction, distinct from "no
/// directive at all".
#[derive(Debug, Clone)]
pub struct Parsed<T> {
    pub value: Option<T>,
    /// The rejected argument token, when one was present.
    pub raw: Option<String>,
    pub has_directive: bool,
}

impl<T> Parsed<T> {
    fn none() -> Self {
        Self {
            value: None,
            raw: None,
            has_directive: false,
        }
    }

    pub fn is_invalid(&self) -> bool {
        self.has_directive && self.value.is_none()
    }
}

/// Reset trigger match. A prefix match carries the remainder, which becomes
/// the first message of the new session.
#[derive(Debug, Clone, Default)]
pub struct ResetDirective {
    pub triggered: bool,
    pub remainder: Option<String>,
}

/// Full scan of one inbound message body.
#[derive(Debug, Clone)]
pub struct DirectiveScan {
    pub think: Parsed<ThinkLevel>,
    pub verbose: Parsed<VerboseLevel>,
    pub model: Parsed<ModelDirective>,
    pub activation: Parsed<GroupActivation>,
    pub status: bool,
    pub restart: bool,
    pub abort: bool,
    pub reset: ResetDirective,
    /// Body with extracted directives removed, trimmed.
    pub cleaned: String,
}

impl DirectiveScan {
    /// True when any directive kind was recognized (valid or not).
    pub fn any_directive(&self) -> bool {
        self.think.has_directive
            || self.verbose.has_directive
            || self.model.has_directive
            || self.activation.has_directive
            || self.status
            || self.restart
            || self.abort
            || self.reset.triggered
    }

    /// First recognized-but-invalid directive, in priority order.
    pub fn first_invalid(&self) -> Option<InvalidDirective> {
        if self.think.is_invalid() {
            return Some(InvalidDirective {
                kind: DirectiveKind::Think,
                raw: self.think.raw.clone(),
            });
        }
        if self.verbose.is_invalid() {
            return Some(InvalidDirective {
                kind: DirectiveKind::Verbose,
                raw: self.verbose.raw.clone(),
            });
        }
        if self.activation.is_invalid() {
            return Some(InvalidDirective {
                kind: DirectiveKind::Activation,
                raw: self.activation.raw.clone(),
            });
        }
        None
    }

    /// True when, after directive and structural-noise removal, nothing of
    /// the body remains — a pure command turn that must not reach the agent.
    pub fn is_directive_only(&self) -> bool {
        self.any_directive() && strip_structural_noise(&self.cleaned).is_empty()
    }
}

/// A recognized keyword whose argument failed validation.
#[derive(Debug, Clone)]
pub struct InvalidDirective {
    pub kind: DirectiveKind,
    pub raw: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    Think,
    Verbose,
    Activation,
}

impl DirectiveKind {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Think => "/think",
            Self::Verbose => "/verbose",
            Self::Activation => "/activation",
        }
    }

    pub fn valid_values(self) -> &'static [&'static str] {
        match self {
            Self::Think => &ThinkLevel::VALUES,
            Self::Verbose => &VerboseLevel::VALUES,
            Self::Activation => &GroupActivation::VALUES,
        }
    }
}

// Longest alias first, so a one-letter alias never shadows a longer keyword
// sharing its prefix.
const THINK_ALIASES: &[&str] = &["/thinking", "/think", "/t"];
const VERBOSE_ALIASES: &[&str] = &["/verbose", "/v"];
const MODEL_ALIASES: &[&str] = &["/model"];
const ACTIVATION_ALIASES: &[&str] = &["/activation"];
const STATUS_COMMAND: &str = "/status";
const RESTART_COMMAND: &str = "/restart";
const RESET_TRIGGERS: &[&str] = &["/new", "/reset"];
const ABORT_KEYWORDS: &[&str] = &["stop", "cancel", "abort", "wait", "exit", "halt"];

/// Scan a raw inbound body for every directive kind.
pub fn scan(raw: &str) -> DirectiveScan {
    let body = raw.trim();
    let struct_cleaned = strip_structural_noise(body);

    let mut text = body.to_string();
    let think = extract_leveled(&mut text, THINK_ALIASES, ThinkLevel::parse);
    let verbose = extract_leveled(&mut text, VERBOSE_ALIASES, VerboseLevel::parse);
    let model = extract_model(&mut text);
    let activation = extract_leveled(&mut text, ACTIVATION_ALIASES, GroupActivation::parse);

    let status = struct_cleaned.eq_ignore_ascii_case(STATUS_COMMAND);
    let restart = struct_cleaned.eq_ignore_ascii_case(RESTART_COMMAND);

    let normalized = body.to_ascii_lowercase();
    let abort = ABORT_KEYWORDS.contains(&normalized.as_str());

    let reset = match_reset(body).or_else(|| match_reset(&struct_cleaned));
    let reset = reset.unwrap_or_default();

    DirectiveScan {
        think,
        verbose,
        model,
        activation,
        status,
        restart,
        abort,
        reset,
        cleaned: text.trim().to_string(),
    }
}

fn match_reset(body: &str) -> Option<ResetDirective> {
    let lower = body.to_ascii_lowercase();
    for trigger in RESET_TRIGGERS {
        if lower == *trigger {
            return Some(ResetDirective {
                triggered: true,
                remainder: None,
            });
        }
        let prefix = format!("{trigger} ");
        if lower.starts_with(&prefix) {
            let remainder = body[prefix.len()..].trim();
            return Some(ResetDirective {
                triggered: true,
                remainder: (!remainder.is_empty()).then(|| remainder.to_string()),
            });
        }
    }
    None
}

/// Strip structural wrapper noise injected by upstream formatting: leading
/// `@mention` tokens and bracketed `[timestamp/label]` prefixes.
pub fn strip_structural_noise(text: &str) -> String {
    let mut rest = text.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix('@') {
            let end = after
                .find(char::is_whitespace)
                .map_or(after.len(), |idx| idx);
            rest = after[end..].trim_start();
            continue;
        }
        if rest.starts_with('[') {
            if let Some(close) = rest.find(']') {
                rest = rest[close + 1..].trim_start();
                continue;
            }
        }
        break;
    }
    rest.trim().to_string()
}

/// Byte ranges of whitespace-separated words.
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, idx));
            }
        } else if start.is_none() {
            start = Some(idx);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

/// Rebuild `text` with the word spans at `drop` removed, preserving the
/// surrounding layout of everything kept.
fn remove_word_spans(text: &str, spans: &[(usize, usize)], drop: &[usize]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for (i, &(start, end)) in spans.iter().enumerate() {
        if drop.contains(&i) {
            out.push_str(&text[cursor..start]);
            cursor = end;
        }
    }
    out.push_str(&text[cursor..]);
    out
}

/// Does `word` invoke one of `aliases`? Returns the inline `:arg` when the
/// separator form was used (`/think:high`).
fn match_alias<'a>(word: &'a str, aliases: &[&str]) -> Option<Option<&'a str>> {
    let lower = word.to_ascii_lowercase();
    for alias in aliases {
        if lower == *alias {
            return Some(None);
        }
        if let Some(rest) = lower.strip_prefix(alias) {
            if rest.starts_with(':') {
                // Slice the original word so the argument keeps its case for
                // error reporting; parsing itself is case-insensitive.
                return Some(Some(&word[alias.len() + 1..]));
            }
        }
    }
    None
}

/// Token charset accepted as a directive argument.
fn is_argument_token(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.' | ':' | '/'))
}

/// Extract a keyword directive whose argument is a closed level set.
/// Consumes the keyword and, when present, its argument token.
fn extract_leveled<T>(
    text: &mut String,
    aliases: &[&str],
    parse: impl Fn(&str) -> Option<T>,
) -> Parsed<T> {
    let spans = word_spans(text);
    for (i, &(start, end)) in spans.iter().enumerate() {
        let word = &text[start..end];
        let Some(inline_arg) = match_alias(word, aliases) else {
            continue;
        };

        let (arg, mut drop) = match inline_arg {
            Some(arg) => (Some(arg.to_string()), vec![i]),
            None => match spans.get(i + 1) {
                Some(&(s, e)) => (Some(text[s..e].to_string()), vec![i, i + 1]),
                None => (None, vec![i]),
            },
        };

        let parsed = match &arg {
            Some(token) => {
                let value = parse(token);
                if value.is_none() && inline_arg.is_none() && !is_argument_token(token) {
                    // The next word is ordinary prose, not an attempted
                    // argument; consume the keyword alone and report a bare
                    // keyword rather than a rejected token.
                    drop.truncate(1);
                    Parsed {
                        value: None,
                        raw: None,
                        has_directive: true,
                    }
                } else {
                    Parsed {
                        value,
                        raw: arg.clone(),
                        has_directive: true,
                    }
                }
            }
            None => Parsed {
                value: None,
                raw: None,
                has_directive: true,
            },
        };

        *text = remove_word_spans(text, &spans, &drop);
        return parsed;
    }
    Parsed::none()
}

/// Extract `/model [selector]`. A bare keyword (or one followed by ordinary
/// prose) lists the catalog instead of changing state.
fn extract_model(text: &mut String) -> Parsed<ModelDirective> {
    let spans = word_spans(text);
    for (i, &(start, end)) in spans.iter().enumerate() {
        let word = &text[start..end];
        let Some(inline_arg) = match_alias(word, MODEL_ALIASES) else {
            continue;
        };

        let (value, drop) = match inline_arg {
            Some(arg) if is_argument_token(arg) => {
                (ModelDirective::Select(arg.to_string()), vec![i])
            }
            Some(_) | None => match spans.get(i + 1) {
                Some(&(s, e)) if is_argument_token(&text[s..e]) => {
                    (ModelDirective::Select(text[s..e].to_string()), vec![i, i + 1])
                }
                _ => (ModelDirective::List, vec![i]),
            },
        };

        *text = remove_word_spans(text, &spans, &drop);
        return Parsed {
            value: Some(value),
            raw: None,
            has_directive: true,
        };
    }
    Parsed::none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn think_directive_with_space_argument() {
        let scan = scan("/think high what is the weather");
        assert_eq!(scan.think.value, Some(ThinkLevel::High));
        assert_eq!(scan.cleaned, "what is the weather");
    }

    #[test]
    fn think_directive_with_colon_separator() {
        let scan = scan("/think:medium hello");
        assert_eq!(scan.think.value, Some(ThinkLevel::Medium));
        assert_eq!(scan.cleaned, "hello");
    }

    #[test]
    fn think_short_alias() {
        let scan = scan("/t low tell me a joke");
        assert_eq!(scan.think.value, Some(ThinkLevel::Low));
        assert_eq!(scan.cleaned, "tell me a joke");
    }

    #[test]
    fn longest_alias_wins_over_shared_prefix() {
        let scan = scan("/thinking high");
        assert_eq!(scan.think.value, Some(ThinkLevel::High));
        assert!(scan.cleaned.is_empty());
    }

    #[test]
    fn case_insensitive_keyword_and_level() {
        let scan = scan("/THINK HIGH");
        assert_eq!(scan.think.value, Some(ThinkLevel::High));
    }

    #[test]
    fn invalid_level_is_recognized_but_invalid() {
        let scan = scan("/think ultra");
        assert!(scan.think.has_directive);
        assert!(scan.think.value.is_none());
        assert_eq!(scan.think.raw.as_deref(), Some("ultra"));
        assert!(scan.first_invalid().is_some());
    }

    #[test]
    fn bare_keyword_is_invalid_not_absent() {
        let scan = scan("/think");
        assert!(scan.think.is_invalid());
        assert!(scan.think.raw.is_none());
    }

    #[test]
    fn keyword_followed_by_prose_consumes_keyword_only() {
        // "summarize," carries punctuation, so it is prose rather than an
        // attempted argument; only the keyword itself is stripped.
        let scan = scan("/verbose summarize, please");
        assert!(scan.verbose.is_invalid());
        assert!(scan.verbose.raw.is_none());
        assert_eq!(scan.cleaned, "summarize, please");
    }

    #[test]
    fn keyword_followed_by_tokenish_word_reports_rejected_argument() {
        let scan = scan("/verbose loud hi");
        assert!(scan.verbose.is_invalid());
        assert_eq!(scan.verbose.raw.as_deref(), Some("loud"));
        assert_eq!(scan.cleaned, "hi");
    }

    #[test]
    fn parsing_is_idempotent() {
        let first = scan("/think high /verbose on /model anthropic/claude-sonnet-4-5 hi");
        assert!(first.think.has_directive);
        assert!(first.verbose.has_directive);
        assert!(first.model.has_directive);

        let second = scan(&first.cleaned);
        assert!(!second.think.has_directive);
        assert!(!second.verbose.has_directive);
        assert!(!second.model.has_directive);
        assert_eq!(second.cleaned, "hi");
    }

    #[test]
    fn model_without_argument_lists_catalog() {
        let scan = scan("/model");
        assert_eq!(scan.model.value, Some(ModelDirective::List));
    }

    #[test]
    fn model_with_selector() {
        let scan = scan("/model openai/gpt-5.2");
        assert_eq!(
            scan.model.value,
            Some(ModelDirective::Select("openai/gpt-5.2".into()))
        );
        assert!(scan.cleaned.is_empty());
    }

    #[test]
    fn directive_only_detection() {
        assert!(scan("/think high").is_directive_only());
        assert!(scan("@courier /think high").is_directive_only());
        assert!(!scan("/think high and also hello").is_directive_only());
        assert!(!scan("hello").is_directive_only());
    }

    #[test]
    fn status_matches_through_mention_and_timestamp_noise() {
        assert!(scan("/status").status);
        assert!(scan("@courier /status").status);
        assert!(scan("[2026-08-24 10:00] /status").status);
        assert!(!scan("/status please").status);
    }

    #[test]
    fn abort_keywords_exact_match_only() {
        assert!(scan("stop").abort);
        assert!(scan("Stop").abort);
        assert!(scan("cancel").abort);
        assert!(!scan("stop the presses").abort);
    }

    #[test]
    fn reset_full_match() {
        let scan = scan("/new");
        assert!(scan.reset.triggered);
        assert!(scan.reset.remainder.is_none());
    }

    #[test]
    fn reset_prefix_keeps_remainder() {
        let scan = scan("/new plan my week");
        assert!(scan.reset.triggered);
        assert_eq!(scan.reset.remainder.as_deref(), Some("plan my week"));
    }

    #[test]
    fn reset_matches_mention_stripped_variant() {
        let scan = scan("@courier /reset");
        assert!(scan.reset.triggered);
    }

    #[test]
    fn reset_not_triggered_by_embedded_mention() {
        assert!(!scan("I will /new this later").reset.triggered);
    }

    #[test]
    fn activation_directive() {
        let scan = scan("/activation always");
        assert_eq!(scan.activation.value, Some(GroupActivation::Always));
        assert!(scan.is_directive_only());
    }

    #[test]
    fn structural_noise_stripping() {
        assert_eq!(strip_structural_noise("@bot hello"), "hello");
        assert_eq!(strip_structural_noise("[12:30] @bot hi"), "hi");
        assert_eq!(strip_structural_noise("  plain "), "plain");
    }

    #[test]
    fn verbose_short_alias_does_not_capture_longer_words() {
        // "/v" must not match "/verbose"'s tail or arbitrary /v-prefixed words.
        let scan = scan("/verbose on hi");
        assert_eq!(scan.verbose.value, Some(VerboseLevel::On));
        assert_eq!(scan.cleaned, "hi");
    }
}
