//! Status text rendering.
//!
//! Pure functions of record + config + clock, so the `/status` reply and the
//! `status` CLI subcommand share one formatter and stay trivially testable.

use crate::catalog::ModelSelection;
use crate::config::Config;
use crate::session::SessionRecord;

/// Render the `/status` reply for one session.
pub fn render_status(
    key: &str,
    record: Option<&SessionRecord>,
    selection: &ModelSelection,
    config: &Config,
    now_ms: i64,
) -> String {
    let idle_minutes = config.effective_idle_minutes();
    let mut out = format!("Session: {key}\n");

    match record {
        Some(record) => {
            out.push_str(&format!("Id: {}\n", record.session_id));
            let age_minutes = ((now_ms - record.updated_at).max(0)) / 60_000;
            let freshness = if age_minutes as u64 <= idle_minutes {
                "fresh"
            } else {
                "stale"
            };
            out.push_str(&format!(
                "Age: {age_minutes}m ({freshness}, window {idle_minutes}m)\n"
            ));
            out.push_str(&format!(
                "Model: {}/{}{}\n",
                selection.provider,
                selection.model,
                if selection.is_default { " (default)" } else { "" }
            ));
            if let Some(level) = record.thinking_level {
                out.push_str(&format!("Thinking: {}\n", level.as_str()));
            }
            if let Some(level) = record.verbose_level {
                out.push_str(&format!("Verbose: {}\n", level.as_str()));
            }
            if let Some(activation) = record.group_activation {
                out.push_str(&format!("Activation: {}\n", activation.as_str()));
            }
            if let Some(total) = record.total_tokens {
                let input = record.input_tokens.unwrap_or(0);
                let output = record.output_tokens.unwrap_or(0);
                out.push_str(&format!(
                    "Usage: {total} tokens ({input} in / {output} out)\n"
                ));
            }
            if let Some(context) = record.context_tokens {
                out.push_str(&format!("Context: {context} tokens\n"));
            }
        }
        None => {
            out.push_str("No active session. The next message starts one.\n");
            out.push_str(&format!(
                "Model: {}/{} (default)\n",
                selection.provider, selection.model
            ));
        }
    }

    out.trim_end().to_string()
}
