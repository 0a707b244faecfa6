//! In-process collaborators: session directory, settings store, and auth.
//!
//! These own the mutable domain state and emit `StateEvent`s on the shared
//! broadcast channel whenever something changes. The coordinator only ever
//! reads them through the `pulse_core::providers` traits.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;

use pulse_core::errors::ProviderError;
use pulse_core::events::StateEvent;
use pulse_core::ids::SessionId;
use pulse_core::providers::{
    AuthProvider, LiveSession, SessionDirectory, SettingsProvider,
};
use pulse_core::session::{
    AuthStatus, ContextInfo, GlobalSettings, ProcessingState, SessionData, SessionStatus,
    SlashCommand,
};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Session limit reached ({0} max)")]
    Full(usize),
}

/// Live runtime for one session. Fields are independently lockable so a
/// processing-state update never contends with an sdk-message append.
pub struct MemoryLiveSession {
    data: RwLock<SessionData>,
    processing: RwLock<ProcessingState>,
    commands: RwLock<Vec<SlashCommand>>,
    context: RwLock<Option<ContextInfo>>,
    messages: RwLock<Vec<serde_json::Value>>,
}

impl MemoryLiveSession {
    fn new(data: SessionData) -> Self {
        Self {
            data: RwLock::new(data),
            processing: RwLock::new(ProcessingState::idle()),
            commands: RwLock::new(Vec::new()),
            context: RwLock::new(None),
            messages: RwLock::new(Vec::new()),
        }
    }

    pub fn set_processing(&self, state: ProcessingState) {
        *self.processing.write() = state;
    }

    pub fn set_commands(&self, commands: Vec<SlashCommand>) {
        *self.commands.write() = commands;
    }

    pub fn set_context(&self, context: ContextInfo) {
        *self.context.write() = Some(context);
    }

    pub fn push_sdk_message(&self, message: serde_json::Value) {
        self.messages.write().push(message);
    }
}

#[async_trait]
impl LiveSession for MemoryLiveSession {
    fn session_data(&self) -> SessionData {
        self.data.read().clone()
    }

    fn processing_state(&self) -> ProcessingState {
        self.processing.read().clone()
    }

    async fn slash_commands(&self) -> Result<Vec<SlashCommand>, ProviderError> {
        Ok(self.commands.read().clone())
    }

    fn context_info(&self) -> Option<ContextInfo> {
        self.context.read().clone()
    }

    fn sdk_messages(&self) -> Vec<serde_json::Value> {
        self.messages.read().clone()
    }
}

/// Directory of all sessions in this process.
pub struct MemorySessionDirectory {
    sessions: DashMap<SessionId, Arc<MemoryLiveSession>>,
    events: broadcast::Sender<StateEvent>,
    max_sessions: usize,
}

impl MemorySessionDirectory {
    pub fn new(events: broadcast::Sender<StateEvent>, max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            events,
            max_sessions,
        }
    }

    pub fn create(&self, title: impl Into<String>) -> Result<SessionData, DirectoryError> {
        if self.sessions.len() >= self.max_sessions {
            return Err(DirectoryError::Full(self.max_sessions));
        }

        let data = SessionData::new(title);
        self.sessions
            .insert(data.id.clone(), Arc::new(MemoryLiveSession::new(data.clone())));

        tracing::info!(session_id = %data.id, title = %data.title, "Session created");
        self.emit(StateEvent::SessionCreated {
            session: data.clone(),
        });
        Ok(data)
    }

    pub fn update(
        &self,
        id: &SessionId,
        title: Option<String>,
        status: Option<SessionStatus>,
    ) -> Result<SessionData, DirectoryError> {
        let live = self
            .sessions
            .get(id)
            .ok_or_else(|| DirectoryError::NotFound(id.to_string()))?;

        let updated = {
            let mut data = live.data.write();
            if let Some(title) = &title {
                data.title = title.clone();
            }
            if let Some(status) = status {
                data.status = status;
            }
            data.updated_at = Utc::now();
            data.clone()
        };
        drop(live);

        self.emit(StateEvent::SessionUpdated {
            session_id: id.clone(),
            title,
            status,
            processing_state: None,
        });
        Ok(updated)
    }

    pub fn delete(&self, id: &SessionId) -> Result<(), DirectoryError> {
        if self.sessions.remove(id).is_none() {
            return Err(DirectoryError::NotFound(id.to_string()));
        }

        tracing::info!(session_id = %id, "Session deleted");
        self.emit(StateEvent::SessionDeleted {
            session_id: id.clone(),
        });
        Ok(())
    }

    pub fn live(&self, id: &SessionId) -> Option<Arc<MemoryLiveSession>> {
        self.sessions.get(id).map(|e| Arc::clone(e.value()))
    }

    fn emit(&self, event: StateEvent) {
        // No receivers is fine before the coordinator starts.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl SessionDirectory for MemorySessionDirectory {
    fn active_sessions(&self) -> usize {
        self.sessions
            .iter()
            .filter(|e| e.value().data.read().status == SessionStatus::Active)
            .count()
    }

    fn total_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn list_sessions(&self) -> Vec<SessionData> {
        let mut sessions: Vec<SessionData> = self
            .sessions
            .iter()
            .map(|e| e.value().data.read().clone())
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    async fn get_session(&self, id: &SessionId) -> Option<Arc<dyn LiveSession>> {
        self.sessions
            .get(id)
            .map(|e| Arc::clone(e.value()) as Arc<dyn LiveSession>)
    }
}

/// Global settings with shallow-patch updates.
pub struct MemorySettingsStore {
    settings: RwLock<GlobalSettings>,
    events: broadcast::Sender<StateEvent>,
}

impl MemorySettingsStore {
    pub fn new(events: broadcast::Sender<StateEvent>) -> Self {
        Self {
            settings: RwLock::new(GlobalSettings::default()),
            events,
        }
    }

    /// Merge a patch object into the current settings, top-level key by
    /// top-level key. Emits `settings.updated`, and `sessions.filterChanged`
    /// as well when the archive filter flipped.
    pub fn update(&self, patch: serde_json::Value) -> Result<GlobalSettings, serde_json::Error> {
        let serde_json::Value::Object(patch) = patch else {
            return Ok(self.global_settings());
        };

        let (updated, filter_changed) = {
            let mut settings = self.settings.write();
            let before_filter = settings.show_archived;

            let mut merged = serde_json::to_value(&*settings)?;
            if let Some(obj) = merged.as_object_mut() {
                for (key, value) in patch {
                    obj.insert(key, value);
                }
            }
            *settings = serde_json::from_value(merged)?;

            (settings.clone(), settings.show_archived != before_filter)
        };

        let _ = self.events.send(StateEvent::SettingsUpdated);
        if filter_changed {
            let _ = self.events.send(StateEvent::SessionsFilterChanged);
        }
        Ok(updated)
    }
}

impl SettingsProvider for MemorySettingsStore {
    fn global_settings(&self) -> GlobalSettings {
        self.settings.read().clone()
    }
}

/// Auth provider with a fixed answer. Stands in for the credential manager
/// until one is wired up.
pub struct StaticAuthProvider {
    status: AuthStatus,
}

impl StaticAuthProvider {
    pub fn new(status: AuthStatus) -> Self {
        Self { status }
    }

    pub fn authenticated(method: impl Into<String>) -> Self {
        Self::new(AuthStatus {
            is_authenticated: true,
            method: Some(method.into()),
        })
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn auth_status(&self) -> Result<AuthStatus, ProviderError> {
        Ok(self.status.clone())
    }
}
