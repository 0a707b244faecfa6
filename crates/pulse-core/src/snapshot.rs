//! Immutable snapshot and delta payloads published to clients.
//!
//! Every payload carries the version freshly issued for its channel, so
//! receivers can detect staleness and gaps. Snapshots are built once per
//! request or broadcast and never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::{
    ApiConnectionStatus, AuthStatus, ContextInfo, GlobalSettings, HealthInfo, ProcessingState,
    SessionData, SlashCommand,
};

/// System-wide view: versions, config, auth, health, API connectivity.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemView {
    pub protocol_version: String,
    pub server_version: String,
    pub default_model: String,
    pub max_sessions: usize,
    pub storage_path: String,
    pub auth: AuthStatus,
    pub health: HealthInfo,
    pub api_connection: ApiConnectionStatus,
    pub timestamp: DateTime<Utc>,
    pub version: u64,
}

/// Filtered session list. `has_archived_sessions` is computed from the
/// unfiltered list so the UI can offer to reveal hidden sessions.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionsView {
    pub sessions: Vec<SessionData>,
    pub has_archived_sessions: bool,
    pub timestamp: DateTime<Utc>,
    pub version: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    pub settings: GlobalSettings,
    pub timestamp: DateTime<Utc>,
    pub version: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    pub channel: String,
    pub timestamp: DateTime<Utc>,
}

/// Composite of all global views, recomputed per request (never cached).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSnapshot {
    pub sessions: SessionsView,
    pub system: SystemView,
    pub settings: SettingsView,
    pub meta: SnapshotMeta,
}

/// Last error recorded for a session. Owned by the coordinator, not by the
/// session runtime.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionErrorInfo {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Full per-session view: runtime state merged with coordinator-owned
/// fields (last error).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session: SessionData,
    pub agent_state: ProcessingState,
    pub commands: Vec<SlashCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextInfo>,
    pub error: Option<SessionErrorInfo>,
    pub timestamp: DateTime<Utc>,
    pub version: u64,
}

/// Incremental update relative to the previous snapshot on the same channel.
// serde would otherwise infer a `T: Default` bound from the field defaults.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: serde::de::DeserializeOwned"))]
pub struct Delta<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added: Option<Vec<T>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<Vec<T>>,
    pub timestamp: DateTime<Utc>,
    pub version: u64,
}

impl<T> Delta<T> {
    fn empty() -> Self {
        Self {
            added: None,
            removed: None,
            updated: None,
            timestamp: Utc::now(),
            version: 0,
        }
    }

    pub fn added(items: Vec<T>) -> Self {
        Self {
            added: Some(items),
            ..Self::empty()
        }
    }

    pub fn removed(ids: Vec<String>) -> Self {
        Self {
            removed: Some(ids),
            ..Self::empty()
        }
    }

    pub fn updated(items: Vec<T>) -> Self {
        Self {
            updated: Some(items),
            ..Self::empty()
        }
    }

    /// Consume the delta, stamping the version issued for its channel.
    pub fn stamped(mut self, version: u64) -> Self {
        self.version = version;
        self
    }
}
