//! Session freshness policy.
//!
//! A stored session is reused only while it is fresh: its last update lies
//! within the configured idle window. The boundary is inclusive, so a message
//! arriving exactly at the window edge still continues the session.

use super::store::SessionRecord;

/// Outcome of the freshness check for one key.
#[derive(Debug, Clone)]
pub enum SessionState {
    /// No record stored under the key.
    Absent,
    /// A record exists but its idle window has elapsed.
    Stale(SessionRecord),
    /// The record is within its idle window and will be continued.
    Fresh(SessionRecord),
}

impl SessionState {
    pub fn is_fresh(&self) -> bool {
        matches!(self, SessionState::Fresh(_))
    }
}

/// Classify a stored record against the idle window. `idle_minutes` is
/// clamped to a minimum of 1; a clock that went backwards (negative age)
/// counts as fresh.
pub fn evaluate(record: Option<SessionRecord>, now_ms: i64, idle_minutes: u64) -> SessionState {
    let Some(record) = record else {
        return SessionState::Absent;
    };
    let window_ms = idle_minutes.max(1) as i64 * 60_000;
    let age_ms = now_ms - record.updated_at;
    if age_ms <= window_ms {
        SessionState::Fresh(record)
    } else {
        SessionState::Stale(record)
    }
}
