//! Session, auth, and settings value types shared across the workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Archived,
}

/// Session metadata as reported by the session directory.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub id: SessionId,
    pub title: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionData {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            title: title.into(),
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Idle,
    Queued,
    Processing,
    WaitingForInput,
    Interrupted,
}

/// Agent processing state for one session, with phase-specific fields.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingState {
    pub status: ProcessingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl ProcessingState {
    pub fn idle() -> Self {
        Self {
            status: ProcessingStatus::Idle,
            current_tool: None,
            queue_position: None,
            prompt: None,
        }
    }

    pub fn processing(tool: impl Into<String>) -> Self {
        Self {
            status: ProcessingStatus::Processing,
            current_tool: Some(tool.into()),
            queue_position: None,
            prompt: None,
        }
    }
}

impl Default for ProcessingState {
    fn default() -> Self {
        Self::idle()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlashCommand {
    pub name: String,
    pub description: String,
}

/// Context-window usage summary for one session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfo {
    pub used_tokens: u64,
    pub max_tokens: u64,
    pub percent_used: f64,
}

impl ContextInfo {
    pub fn new(used_tokens: u64, max_tokens: u64) -> Self {
        let percent_used = if max_tokens == 0 {
            0.0
        } else {
            used_tokens as f64 / max_tokens as f64 * 100.0
        };
        Self {
            used_tokens,
            max_tokens,
            percent_used,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub is_authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl AuthStatus {
    /// Degraded value used when the auth provider cannot be reached.
    pub fn unknown() -> Self {
        Self {
            is_authenticated: false,
            method: None,
        }
    }
}

/// Global settings as owned by the settings manager. Unknown keys are kept
/// verbatim in `extra` so this subsystem never drops fields it does not
/// understand.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    #[serde(default)]
    pub show_archived: bool,
    #[serde(default)]
    pub setting_sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiConnectionStatus {
    pub status: String,
    #[serde(default)]
    pub retry_count: u32,
}

impl Default for ApiConnectionStatus {
    fn default() -> Self {
        Self {
            status: "connected".to_string(),
            retry_count: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthInfo {
    pub status: String,
    pub active_sessions: usize,
    pub total_sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_data_starts_active() {
        let session = SessionData::new("debugging");
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.title, "debugging");
        assert_eq!(session.created_at, session.updated_at);
    }

    #[test]
    fn processing_status_snake_case() {
        let json = serde_json::to_string(&ProcessingStatus::WaitingForInput).unwrap();
        assert_eq!(json, "\"waiting_for_input\"");
    }

    #[test]
    fn processing_state_omits_absent_fields() {
        let json = serde_json::to_value(ProcessingState::idle()).unwrap();
        assert_eq!(json["status"], "idle");
        assert!(json.get("currentTool").is_none());

        let json = serde_json::to_value(ProcessingState::processing("bash")).unwrap();
        assert_eq!(json["currentTool"], "bash");
    }

    #[test]
    fn context_info_percentage() {
        let ctx = ContextInfo::new(50_000, 200_000);
        assert!((ctx.percent_used - 25.0).abs() < f64::EPSILON);
        assert_eq!(ContextInfo::new(10, 0).percent_used, 0.0);
    }

    #[test]
    fn settings_preserve_unknown_keys() {
        let json = serde_json::json!({
            "showArchived": true,
            "theme": "dark",
        });
        let settings: GlobalSettings = serde_json::from_value(json).unwrap();
        assert!(settings.show_archived);
        assert_eq!(settings.extra["theme"], "dark");

        let back = serde_json::to_value(&settings).unwrap();
        assert_eq!(back["theme"], "dark");
    }

    #[test]
    fn api_connection_default_is_connected() {
        let conn = ApiConnectionStatus::default();
        assert_eq!(conn.status, "connected");
        assert_eq!(conn.retry_count, 0);
    }
}
