//! Session identity, freshness, and persistence.

pub mod freshness;
pub mod key;
pub mod store;

pub use freshness::{evaluate, SessionState};
pub use key::{
    resolve_session_key, ChannelIdentity, ChatType, SessionScope, MAIN_SESSION_KEY,
    UNKNOWN_SESSION_KEY,
};
pub use store::{SessionRecord, SessionStore};
