//! Pre-session abort fallback registry.
//!
//! An abort keyword can arrive before any session record exists for the
//! sender. Those aborts are remembered here, keyed by channel identity, and
//! consumed on the next turn. The map is best-effort and bounded; the moment
//! a session record exists, `aborted_last_run` on the record supersedes it.

use crate::util::now_ms;
use std::collections::HashMap;
use std::sync::Mutex;

const MAX_ENTRIES: usize = 256;

/// Bounded process-wide map of pending pre-session aborts.
pub struct AbortRegistry {
    entries: Mutex<HashMap<String, i64>>,
}

impl Default for AbortRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Stable key for a channel identity without a session record.
    pub fn fallback_key(channel: &str, sender: &str, recipient: &str) -> String {
        format!("{channel}:{sender}:{recipient}")
    }

    /// Record an abort. When full, the oldest entry is evicted.
    pub fn mark(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= MAX_ENTRIES && !entries.contains_key(key) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, &at)| at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(key.to_string(), now_ms());
    }

    /// Consume a pending abort, if any.
    pub fn take(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key).is_some()
    }
}
