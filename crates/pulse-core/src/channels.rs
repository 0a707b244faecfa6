//! Logical channel names and broadcast scopes.
//!
//! Channel names are the stable identifiers clients integrate against. A
//! scope selects which subscribers receive a publish: everyone (`global`)
//! or the clients attached to one session (`session:<id>`).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::ids::SessionId;

// Composite global pull; carried in `SnapshotMeta.channel`.
pub const GLOBAL_SNAPSHOT: &str = "global";
pub const GLOBAL_SYSTEM: &str = "global.system";
pub const GLOBAL_SESSIONS: &str = "global.sessions";
pub const GLOBAL_SETTINGS: &str = "global.settings";
pub const SESSION_SNAPSHOT: &str = "session.snapshot";
pub const SESSION: &str = "session.state";
pub const SESSION_SDK_MESSAGES: &str = "session.sdkMessages";

// Lightweight notice channels.
pub const SESSION_CREATED: &str = "session.created";
pub const SESSION_DELETED: &str = "session.deleted";
pub const CONTEXT_UPDATED: &str = "context.updated";

/// Incremental variant of a channel, e.g. `global.sessions.delta`.
pub fn delta(base: &str) -> String {
    format!("{base}.delta")
}

/// Broadcast scope: all clients, or clients attached to one session.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Session(SessionId),
}

impl Scope {
    pub fn session(id: impl Into<SessionId>) -> Self {
        Self::Session(id.into())
    }
}

impl From<SessionId> for Scope {
    fn from(id: SessionId) -> Self {
        Self::Session(id)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Session(id) => write!(f, "session:{id}"),
        }
    }
}

impl Serialize for Scope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "global" => Ok(Self::Global),
            other => match other.strip_prefix("session:") {
                Some(id) => Ok(Self::Session(SessionId::from_raw(id))),
                None => Err(serde::de::Error::custom(format!("invalid scope: {other}"))),
            },
        }
    }
}
