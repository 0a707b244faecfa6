//! Snapshot assembly for each scope.
//!
//! Aggregators are deterministic over their inputs and have no side effects
//! beyond reading the collaborators. Version stamping is the caller's job;
//! every method takes the pre-issued version for the view it builds.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use pulse_core::config::StaticConfig;
use pulse_core::errors::SyncError;
use pulse_core::ids::SessionId;
use pulse_core::providers::{AuthProvider, SessionDirectory, SettingsProvider};
use pulse_core::session::{ApiConnectionStatus, AuthStatus, HealthInfo, SessionStatus};
use pulse_core::snapshot::{SessionSnapshot, SessionsView, SettingsView, SystemView};
use pulse_core::PROTOCOL_VERSION;

use crate::cache::SessionStateCache;

/// The read-only collaborators snapshots are assembled from.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn SessionDirectory>,
    pub auth: Arc<dyn AuthProvider>,
    pub settings: Arc<dyn SettingsProvider>,
}

pub struct Aggregator {
    collab: Collaborators,
    config: StaticConfig,
    // Updated only via explicit api.connection reports.
    api_connection: RwLock<ApiConnectionStatus>,
}

impl Aggregator {
    pub fn new(collab: Collaborators, config: StaticConfig) -> Self {
        Self {
            collab,
            config,
            api_connection: RwLock::new(ApiConnectionStatus::default()),
        }
    }

    pub fn directory(&self) -> &Arc<dyn SessionDirectory> {
        &self.collab.directory
    }

    pub fn api_connection(&self) -> ApiConnectionStatus {
        self.api_connection.read().clone()
    }

    pub fn set_api_connection(&self, status: ApiConnectionStatus) {
        *self.api_connection.write() = status;
    }

    /// Best-effort system view. An auth provider failure degrades the auth
    /// field to unknown instead of failing the snapshot.
    pub async fn system_view(&self, version: u64) -> SystemView {
        let auth = match self.collab.auth.auth_status().await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(error = %e, "Auth status unavailable, reporting unknown");
                AuthStatus::unknown()
            }
        };

        let active = self.collab.directory.active_sessions();
        let total = self.collab.directory.total_sessions();

        SystemView {
            protocol_version: PROTOCOL_VERSION.to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            default_model: self.config.default_model.clone(),
            max_sessions: self.config.max_sessions,
            storage_path: self.config.storage_path.to_string_lossy().into_owned(),
            auth,
            health: HealthInfo {
                status: "healthy".to_string(),
                active_sessions: active,
                total_sessions: total,
            },
            api_connection: self.api_connection(),
            timestamp: Utc::now(),
            version,
        }
    }

    /// Session list with archive filtering. When `show_archived` is not
    /// passed explicitly, the effective value comes from global settings.
    /// `has_archived_sessions` always reflects the unfiltered list.
    pub fn sessions_view(&self, show_archived: Option<bool>, version: u64) -> SessionsView {
        let show_archived = show_archived
            .unwrap_or_else(|| self.collab.settings.global_settings().show_archived);

        let all = self.collab.directory.list_sessions();
        let has_archived_sessions = all.iter().any(|s| s.status == SessionStatus::Archived);

        let sessions = if show_archived {
            all
        } else {
            all.into_iter()
                .filter(|s| s.status != SessionStatus::Archived)
                .collect()
        };

        SessionsView {
            sessions,
            has_archived_sessions,
            timestamp: Utc::now(),
            version,
        }
    }

    pub fn settings_view(&self, version: u64) -> SettingsView {
        SettingsView {
            settings: self.collab.settings.global_settings(),
            timestamp: Utc::now(),
            version,
        }
    }

    /// Full view of one session, merging the live runtime with
    /// coordinator-owned cached fields (last error, stale commands).
    ///
    /// Fails only when the id does not resolve to a live session. A slash
    /// command fetch failure degrades to the cached list, or empty.
    pub async fn session_snapshot(
        &self,
        id: &SessionId,
        cache: &SessionStateCache,
        version: u64,
    ) -> Result<SessionSnapshot, SyncError> {
        let live = self
            .collab
            .directory
            .get_session(id)
            .await
            .ok_or_else(|| SyncError::SessionNotFound(id.to_string()))?;

        let cached = cache.get(id);

        let commands = match live.slash_commands().await {
            Ok(commands) => commands,
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "Slash command fetch failed, using cached list");
                cached
                    .as_ref()
                    .and_then(|c| c.commands.clone())
                    .unwrap_or_default()
            }
        };

        let context = live
            .context_info()
            .or_else(|| cached.as_ref().and_then(|c| c.context.clone()));
        let error = cached.as_ref().and_then(|c| c.error.clone());

        Ok(SessionSnapshot {
            session: live.session_data(),
            agent_state: live.processing_state(),
            commands,
            context,
            error,
            timestamp: Utc::now(),
            version,
        })
    }
}
