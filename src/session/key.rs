//! Session key derivation.
//!
//! A session key is a stable identifier for one conversation, derived from
//! channel identity under the configured scoping policy. Identical identity
//! under the same policy always yields the same key.

use serde::{Deserialize, Serialize};

/// Key scoping policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionScope {
    /// Direct chats keyed by sender; each group is its own conversation.
    #[default]
    PerSender,
    /// Group chats keyed by group; all direct traffic shares the main key.
    PerGroup,
    /// Everything shares the single main key.
    Global,
}

/// Kind of chat a message arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatType {
    Direct,
    Group,
}

/// The single shared conversation key.
pub const MAIN_SESSION_KEY: &str = "main";
/// Bucket for messages whose identity could not be resolved. Never used for
/// continuity decisions that require freshness.
pub const UNKNOWN_SESSION_KEY: &str = "unknown";

/// Channel identity fields of one inbound message.
#[derive(Debug, Clone, Copy)]
pub struct ChannelIdentity<'a> {
    pub sender: &'a str,
    pub recipient: &'a str,
    pub chat_type: ChatType,
}

/// Derive the session key for a message under the given scope.
pub fn resolve_session_key(identity: &ChannelIdentity<'_>, scope: SessionScope) -> String {
    match (scope, identity.chat_type) {
        (SessionScope::Global, _) => MAIN_SESSION_KEY.to_string(),
        (_, ChatType::Group) => {
            if identity.recipient.is_empty() {
                UNKNOWN_SESSION_KEY.to_string()
            } else {
                format!("group:{}", identity.recipient)
            }
        }
        (SessionScope::PerGroup, ChatType::Direct) => MAIN_SESSION_KEY.to_string(),
        (SessionScope::PerSender, ChatType::Direct) => {
            if identity.sender.is_empty() {
                UNKNOWN_SESSION_KEY.to_string()
            } else {
                format!("user:{}", identity.sender)
            }
        }
    }
}
