//! Contracts for the external collaborators this subsystem reads from.
//!
//! The coordinator never mutates collaborator-owned state; it only queries
//! these interfaces and reacts to the events they emit.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::ProviderError;
use crate::ids::SessionId;
use crate::session::{AuthStatus, ContextInfo, GlobalSettings, ProcessingState, SessionData, SlashCommand};

/// Directory of all known sessions and their live runtimes.
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    fn active_sessions(&self) -> usize;
    fn total_sessions(&self) -> usize;
    fn list_sessions(&self) -> Vec<SessionData>;
    async fn get_session(&self, id: &SessionId) -> Option<Arc<dyn LiveSession>>;
}

/// Runtime handle for one active session, queried for real-time state.
#[async_trait]
pub trait LiveSession: Send + Sync {
    fn session_data(&self) -> SessionData;
    fn processing_state(&self) -> ProcessingState;
    /// May fail independently of the rest of a snapshot; callers degrade the
    /// commands field instead of aborting.
    async fn slash_commands(&self) -> Result<Vec<SlashCommand>, ProviderError>;
    fn context_info(&self) -> Option<ContextInfo>;
    fn sdk_messages(&self) -> Vec<serde_json::Value>;
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn auth_status(&self) -> Result<AuthStatus, ProviderError>;
}

pub trait SettingsProvider: Send + Sync {
    fn global_settings(&self) -> GlobalSettings;
}
