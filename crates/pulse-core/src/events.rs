//! Domain events consumed by the broadcast coordinator.
//!
//! Every event source in the process (session directory, auth, settings,
//! session runtimes) emits these on a shared broadcast channel. The tagged
//! enum keeps each listener's payload shape checked at compile time instead
//! of routing free-form string-keyed payloads.

use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::session::{
    ApiConnectionStatus, ContextInfo, ProcessingState, SessionData, SessionStatus, SlashCommand,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StateEvent {
    #[serde(rename = "session.created")]
    SessionCreated { session: SessionData },

    #[serde(rename = "session.updated")]
    SessionUpdated {
        session_id: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<SessionStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        processing_state: Option<ProcessingState>,
    },

    #[serde(rename = "session.deleted")]
    SessionDeleted { session_id: SessionId },

    #[serde(rename = "auth.changed")]
    AuthChanged,

    #[serde(rename = "settings.updated")]
    SettingsUpdated,

    #[serde(rename = "sessions.filterChanged")]
    SessionsFilterChanged,

    #[serde(rename = "commands.updated")]
    CommandsUpdated {
        session_id: SessionId,
        commands: Vec<SlashCommand>,
    },

    #[serde(rename = "context.updated")]
    ContextUpdated {
        session_id: SessionId,
        context: ContextInfo,
    },

    #[serde(rename = "session.error")]
    SessionError {
        session_id: SessionId,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },

    #[serde(rename = "session.errorClear")]
    SessionErrorClear { session_id: SessionId },

    #[serde(rename = "api.connection")]
    ApiConnection { status: ApiConnectionStatus },
}

impl StateEvent {
    /// The session an event targets, if it is session-scoped.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::SessionCreated { session } => Some(&session.id),
            Self::SessionUpdated { session_id, .. }
            | Self::SessionDeleted { session_id }
            | Self::CommandsUpdated { session_id, .. }
            | Self::ContextUpdated { session_id, .. }
            | Self::SessionError { session_id, .. }
            | Self::SessionErrorClear { session_id } => Some(session_id),
            Self::AuthChanged
            | Self::SettingsUpdated
            | Self::SessionsFilterChanged
            | Self::ApiConnection { .. } => None,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionCreated { .. } => "session.created",
            Self::SessionUpdated { .. } => "session.updated",
            Self::SessionDeleted { .. } => "session.deleted",
            Self::AuthChanged => "auth.changed",
            Self::SettingsUpdated => "settings.updated",
            Self::SessionsFilterChanged => "sessions.filterChanged",
            Self::CommandsUpdated { .. } => "commands.updated",
            Self::ContextUpdated { .. } => "context.updated",
            Self::SessionError { .. } => "session.error",
            Self::SessionErrorClear { .. } => "session.errorClear",
            Self::ApiConnection { .. } => "api.connection",
        }
    }
}
