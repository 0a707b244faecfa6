//! Broadcast coordinator — owns the version ledger and session state cache,
//! serves pull requests, and turns domain events into versioned pushes.
//!
//! Event listeners never let an error escape: a handler failure is logged
//! and the next event is processed normally. Only the pull path for a
//! single session surfaces a hard `SessionNotFound` to the caller.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use pulse_core::channels::{self, Scope};
use pulse_core::config::StaticConfig;
use pulse_core::errors::SyncError;
use pulse_core::events::StateEvent;
use pulse_core::ids::SessionId;
use pulse_core::session::{ApiConnectionStatus, SessionData};
use pulse_core::snapshot::{
    Delta, GlobalSnapshot, SessionErrorInfo, SessionSnapshot, SessionsView, SettingsView,
    SnapshotMeta, SystemView,
};

use crate::aggregate::{Aggregator, Collaborators};
use crate::cache::{SessionStateCache, SessionStatePatch};
use crate::ledger::VersionLedger;
use crate::publisher::Publisher;

pub struct StateCoordinator {
    ledger: VersionLedger,
    cache: SessionStateCache,
    aggregator: Aggregator,
    publisher: Arc<dyn Publisher>,
}

impl StateCoordinator {
    pub fn new(
        collab: Collaborators,
        config: StaticConfig,
        publisher: Arc<dyn Publisher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            ledger: VersionLedger::new(),
            cache: SessionStateCache::new(),
            aggregator: Aggregator::new(collab, config),
            publisher,
        })
    }

    /// Spawn the listener loop over the domain event stream. One bad event
    /// never stops subsequent event processing.
    pub fn start(self: &Arc<Self>, mut rx: broadcast::Receiver<StateEvent>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let event_type = event.event_type();
                        if let Err(e) = coordinator.handle_event(event).await {
                            tracing::error!(event = event_type, error = %e, "Event broadcast failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "State event stream lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("State event stream closed");
                        break;
                    }
                }
            }
        })
    }

    // ── Pull operations ──

    /// Composite of all global views. Always recomputed, never cached.
    pub async fn global_snapshot(&self) -> GlobalSnapshot {
        let sessions = self.sessions_state(None);
        let settings = self.settings_state();
        let system = self.system_state().await;
        GlobalSnapshot {
            sessions,
            system,
            settings,
            meta: SnapshotMeta {
                channel: channels::GLOBAL_SNAPSHOT.to_string(),
                timestamp: Utc::now(),
            },
        }
    }

    pub fn sessions_state(&self, show_archived: Option<bool>) -> SessionsView {
        let version = self.ledger.next(channels::GLOBAL_SESSIONS);
        self.aggregator.sessions_view(show_archived, version)
    }

    pub async fn system_state(&self) -> SystemView {
        let version = self.ledger.next(channels::GLOBAL_SYSTEM);
        self.aggregator.system_view(version).await
    }

    pub fn settings_state(&self) -> SettingsView {
        let version = self.ledger.next(channels::GLOBAL_SETTINGS);
        self.aggregator.settings_view(version)
    }

    /// The one pull path that fails hard: the caller asked for this session
    /// by id, so a vanished session is an explicit error.
    pub async fn session_snapshot(&self, id: &SessionId) -> Result<SessionSnapshot, SyncError> {
        let version = self
            .ledger
            .next(&session_key(channels::SESSION_SNAPSHOT, id));
        self.aggregator.session_snapshot(id, &self.cache, version).await
    }

    // ── Event intake ──

    pub async fn handle_event(self: &Arc<Self>, event: StateEvent) -> Result<(), SyncError> {
        match event {
            StateEvent::SessionCreated { session } => {
                self.cache.upsert(
                    &session.id,
                    SessionStatePatch {
                        session: Some(session.clone()),
                        ..Default::default()
                    },
                );
                self.broadcast_sessions_delta(Delta::added(vec![session.clone()]))?;
                self.publish_notice(channels::SESSION_CREATED, &session.id, &session)
            }

            StateEvent::SessionUpdated {
                session_id,
                title,
                status,
                processing_state,
            } => {
                self.cache.upsert(
                    &session_id,
                    SessionStatePatch {
                        title,
                        status,
                        processing_state,
                        ..Default::default()
                    },
                );
                self.broadcast_session_state_change(&session_id).await
            }

            StateEvent::SessionDeleted { session_id } => {
                self.cache.remove(&session_id);
                self.broadcast_sessions_delta(Delta::removed(vec![session_id.to_string()]))?;
                self.publish_notice(
                    channels::SESSION_DELETED,
                    &session_id,
                    &serde_json::json!({ "sessionId": session_id }),
                )
            }

            StateEvent::AuthChanged => self.broadcast_system_change().await,

            StateEvent::SettingsUpdated => self.broadcast_settings_change(),

            StateEvent::SessionsFilterChanged => self.broadcast_sessions_change(None),

            StateEvent::CommandsUpdated {
                session_id,
                commands,
            } => {
                self.cache.upsert(
                    &session_id,
                    SessionStatePatch {
                        commands: Some(commands),
                        ..Default::default()
                    },
                );
                self.broadcast_session_state_change(&session_id).await
            }

            StateEvent::ContextUpdated {
                session_id,
                context,
            } => {
                self.cache.upsert(
                    &session_id,
                    SessionStatePatch {
                        context: Some(context.clone()),
                        ..Default::default()
                    },
                );
                // Raw payload, not wrapped in a full snapshot.
                let scope = Scope::Session(session_id.clone());
                let version = self
                    .ledger
                    .next(&session_key(channels::CONTEXT_UPDATED, &session_id));
                self.publisher.publish(
                    channels::CONTEXT_UPDATED,
                    &scope,
                    serde_json::json!({
                        "sessionId": session_id,
                        "context": context,
                        "timestamp": Utc::now(),
                        "version": version,
                    }),
                )
            }

            StateEvent::SessionError {
                session_id,
                message,
                details,
            } => {
                self.cache.upsert(
                    &session_id,
                    SessionStatePatch {
                        error: Some(Some(SessionErrorInfo {
                            message,
                            details,
                            timestamp: Utc::now(),
                        })),
                        ..Default::default()
                    },
                );
                self.broadcast_session_state_change(&session_id).await
            }

            StateEvent::SessionErrorClear { session_id } => {
                self.cache.upsert(
                    &session_id,
                    SessionStatePatch {
                        error: Some(None),
                        ..Default::default()
                    },
                );
                self.broadcast_session_state_change(&session_id).await
            }

            StateEvent::ApiConnection { status } => {
                self.report_api_connection(status);
                Ok(())
            }
        }
    }

    // ── Public broadcast methods ──

    /// Full sessions-state broadcast, recomputed with the current filter.
    pub fn broadcast_sessions_change(&self, show_archived: Option<bool>) -> Result<(), SyncError> {
        let view = self.sessions_state(show_archived);
        self.publish_global(channels::GLOBAL_SESSIONS, &view)
    }

    pub fn broadcast_sessions_delta(&self, delta: Delta<SessionData>) -> Result<(), SyncError> {
        let channel = channels::delta(channels::GLOBAL_SESSIONS);
        let version = self.ledger.next(&channel);
        self.publish_global(&channel, &delta.stamped(version))
    }

    pub async fn broadcast_system_change(&self) -> Result<(), SyncError> {
        let view = self.system_state().await;
        self.publish_global(channels::GLOBAL_SYSTEM, &view)
    }

    pub fn broadcast_settings_change(&self) -> Result<(), SyncError> {
        let view = self.settings_state();
        self.publish_global(channels::GLOBAL_SETTINGS, &view)
    }

    /// Push the full session state to the session's subscribers. Unlike the
    /// pull path, an unknown session degrades to a logged no-op: the target
    /// may have been deleted while a client was still subscribed.
    pub async fn broadcast_session_state_change(&self, id: &SessionId) -> Result<(), SyncError> {
        let version = self.ledger.next(&session_key(channels::SESSION, id));
        match self.aggregator.session_snapshot(id, &self.cache, version).await {
            Ok(snapshot) => self.publish_session(channels::SESSION, id, &snapshot),
            Err(SyncError::SessionNotFound(_)) => {
                tracing::warn!(session_id = %id, "Skipping state broadcast for unknown session");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn broadcast_sdk_messages_change(&self, id: &SessionId) -> Result<(), SyncError> {
        let Some(live) = self.aggregator_directory().get_session(id).await else {
            tracing::warn!(session_id = %id, "Skipping SDK message broadcast for unknown session");
            return Ok(());
        };
        let version = self
            .ledger
            .next(&session_key(channels::SESSION_SDK_MESSAGES, id));
        self.publisher.publish(
            channels::SESSION_SDK_MESSAGES,
            &Scope::Session(id.clone()),
            serde_json::json!({
                "sessionId": id,
                "messages": live.sdk_messages(),
                "timestamp": Utc::now(),
                "version": version,
            }),
        )
    }

    pub fn broadcast_sdk_messages_delta(
        &self,
        id: &SessionId,
        delta: Delta<serde_json::Value>,
    ) -> Result<(), SyncError> {
        let channel = channels::delta(channels::SESSION_SDK_MESSAGES);
        let version = self.ledger.next(&session_key(&channel, id));
        self.publish_session(&channel, id, &delta.stamped(version))
    }

    /// Record a connection status report and push a system-state broadcast
    /// in the background. Fire-and-forget: the caller returns immediately,
    /// a broadcast failure is logged, never surfaced.
    pub fn report_api_connection(self: &Arc<Self>, status: ApiConnectionStatus) {
        self.aggregator.set_api_connection(status);
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = coordinator.broadcast_system_change().await {
                tracing::warn!(error = %e, "Connection status broadcast failed");
            }
        });
    }

    // ── Internals ──

    fn publish_global<T: Serialize>(&self, channel: &str, payload: &T) -> Result<(), SyncError> {
        self.publisher
            .publish(channel, &Scope::Global, to_payload(payload)?)
    }

    fn publish_session<T: Serialize>(
        &self,
        channel: &str,
        id: &SessionId,
        payload: &T,
    ) -> Result<(), SyncError> {
        self.publisher
            .publish(channel, &Scope::Session(id.clone()), to_payload(payload)?)
    }

    /// Lightweight global notice with its own versioned channel.
    fn publish_notice<T: Serialize>(
        &self,
        channel: &str,
        id: &SessionId,
        body: &T,
    ) -> Result<(), SyncError> {
        let version = self.ledger.next(channel);
        self.publisher.publish(
            channel,
            &Scope::Global,
            serde_json::json!({
                "sessionId": id,
                "data": to_payload(body)?,
                "timestamp": Utc::now(),
                "version": version,
            }),
        )
    }

    fn aggregator_directory(&self) -> &Arc<dyn pulse_core::providers::SessionDirectory> {
        self.aggregator.directory()
    }

    #[cfg(test)]
    pub(crate) fn cache(&self) -> &SessionStateCache {
        &self.cache
    }
}

/// Per-session broadcast streams get their own ledger key so each session's
/// channel is independently monotonic.
fn session_key(channel: &str, id: &SessionId) -> String {
    format!("{channel}:{id}")
}

fn to_payload<T: Serialize>(value: &T) -> Result<serde_json::Value, SyncError> {
    serde_json::to_value(value).map_err(|e| SyncError::Publish(e.to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use async_trait::async_trait;
    use dashmap::DashMap;
    use parking_lot::Mutex;

    use pulse_core::errors::ProviderError;
    use pulse_core::providers::{
        AuthProvider, LiveSession, SessionDirectory, SettingsProvider,
    };
    use pulse_core::session::{
        AuthStatus, ContextInfo, GlobalSettings, ProcessingState, SessionStatus, SlashCommand,
    };

    // ── Mock collaborators ──

    pub struct MockLiveSession {
        data: Mutex<SessionData>,
        commands_fail: bool,
        messages: Vec<serde_json::Value>,
    }

    impl MockLiveSession {
        fn new(data: SessionData) -> Self {
            Self {
                data: Mutex::new(data),
                commands_fail: false,
                messages: Vec::new(),
            }
        }

        fn failing_commands(data: SessionData) -> Self {
            Self {
                commands_fail: true,
                ..Self::new(data)
            }
        }
    }

    #[async_trait]
    impl LiveSession for MockLiveSession {
        fn session_data(&self) -> SessionData {
            self.data.lock().clone()
        }

        fn processing_state(&self) -> ProcessingState {
            ProcessingState::idle()
        }

        async fn slash_commands(&self) -> Result<Vec<SlashCommand>, ProviderError> {
            if self.commands_fail {
                Err(ProviderError::Unavailable("command fetch timed out".into()))
            } else {
                Ok(vec![SlashCommand {
                    name: "compact".into(),
                    description: "Compact context".into(),
                }])
            }
        }

        fn context_info(&self) -> Option<ContextInfo> {
            Some(ContextInfo::new(1000, 200_000))
        }

        fn sdk_messages(&self) -> Vec<serde_json::Value> {
            self.messages.clone()
        }
    }

    #[derive(Default)]
    pub struct MockDirectory {
        sessions: DashMap<SessionId, Arc<MockLiveSession>>,
    }

    impl MockDirectory {
        fn insert(&self, session: SessionData) -> SessionId {
            let id = session.id.clone();
            self.sessions.insert(id.clone(), Arc::new(MockLiveSession::new(session)));
            id
        }

        fn insert_failing(&self, session: SessionData) -> SessionId {
            let id = session.id.clone();
            self.sessions
                .insert(id.clone(), Arc::new(MockLiveSession::failing_commands(session)));
            id
        }
    }

    #[async_trait]
    impl SessionDirectory for MockDirectory {
        fn active_sessions(&self) -> usize {
            self.sessions
                .iter()
                .filter(|e| e.value().session_data().status == SessionStatus::Active)
                .count()
        }

        fn total_sessions(&self) -> usize {
            self.sessions.len()
        }

        fn list_sessions(&self) -> Vec<SessionData> {
            let mut sessions: Vec<_> =
                self.sessions.iter().map(|e| e.value().session_data()).collect();
            sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            sessions
        }

        async fn get_session(&self, id: &SessionId) -> Option<Arc<dyn LiveSession>> {
            self.sessions
                .get(id)
                .map(|e| Arc::clone(e.value()) as Arc<dyn LiveSession>)
        }
    }

    struct MockAuth {
        fail: bool,
    }

    #[async_trait]
    impl AuthProvider for MockAuth {
        async fn auth_status(&self) -> Result<AuthStatus, ProviderError> {
            if self.fail {
                Err(ProviderError::Auth("keychain locked".into()))
            } else {
                Ok(AuthStatus {
                    is_authenticated: true,
                    method: Some("oauth".into()),
                })
            }
        }
    }

    struct MockSettings {
        show_archived: bool,
    }

    impl SettingsProvider for MockSettings {
        fn global_settings(&self) -> GlobalSettings {
            GlobalSettings {
                show_archived: self.show_archived,
                setting_sources: vec!["global".into()],
                ..Default::default()
            }
        }
    }

    #[derive(Default)]
    pub struct RecordingPublisher {
        records: Mutex<Vec<(String, String, serde_json::Value)>>,
    }

    impl RecordingPublisher {
        fn all(&self) -> Vec<(String, String, serde_json::Value)> {
            self.records.lock().clone()
        }

        fn on_channel(&self, channel: &str) -> Vec<(String, serde_json::Value)> {
            self.records
                .lock()
                .iter()
                .filter(|(c, _, _)| c == channel)
                .map(|(_, s, p)| (s.clone(), p.clone()))
                .collect()
        }
    }

    impl Publisher for RecordingPublisher {
        fn publish(
            &self,
            channel: &str,
            scope: &Scope,
            payload: serde_json::Value,
        ) -> Result<(), SyncError> {
            self.records
                .lock()
                .push((channel.to_string(), scope.to_string(), payload));
            Ok(())
        }
    }

    // ── Harness ──

    struct Harness {
        coordinator: Arc<StateCoordinator>,
        directory: Arc<MockDirectory>,
        publisher: Arc<RecordingPublisher>,
    }

    fn harness() -> Harness {
        harness_with(false, false)
    }

    fn harness_with(auth_fails: bool, show_archived: bool) -> Harness {
        let directory = Arc::new(MockDirectory::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let collab = Collaborators {
            directory: Arc::clone(&directory) as Arc<dyn SessionDirectory>,
            auth: Arc::new(MockAuth { fail: auth_fails }),
            settings: Arc::new(MockSettings { show_archived }),
        };
        let coordinator = StateCoordinator::new(
            collab,
            StaticConfig::default(),
            Arc::clone(&publisher) as Arc<dyn Publisher>,
        );
        Harness {
            coordinator,
            directory,
            publisher,
        }
    }

    // ── Version ledger behavior through the coordinator ──

    #[tokio::test]
    async fn broadcast_versions_are_monotonic_per_channel() {
        let h = harness();
        h.coordinator.broadcast_settings_change().unwrap();
        h.coordinator.broadcast_settings_change().unwrap();
        h.coordinator.broadcast_system_change().await.unwrap();

        let settings = h.publisher.on_channel(channels::GLOBAL_SETTINGS);
        assert_eq!(settings.len(), 2);
        let v1 = settings[0].1["version"].as_u64().unwrap();
        let v2 = settings[1].1["version"].as_u64().unwrap();
        assert!(v2 > v1);

        // Independent counter: the system channel starts over at 1.
        let system = h.publisher.on_channel(channels::GLOBAL_SYSTEM);
        assert_eq!(system[0].1["version"], 1);
    }

    // ── Pulls ──

    #[tokio::test]
    async fn global_snapshot_is_idempotent_in_content() {
        let h = harness();
        h.directory.insert(SessionData::new("one"));

        let a = h.coordinator.global_snapshot().await;
        let b = h.coordinator.global_snapshot().await;

        assert_eq!(a.meta.channel, "global");
        assert_eq!(b.meta.channel, "global");
        assert_eq!(a.sessions.sessions, b.sessions.sessions);
        assert_eq!(a.settings.settings, b.settings.settings);
        assert_eq!(a.system.auth, b.system.auth);
        // A pull also stamps a version, so versions differ.
        assert!(b.sessions.version > a.sessions.version);
    }

    #[tokio::test]
    async fn archive_filter_hides_archived_but_reports_presence() {
        let h = harness();
        h.directory.insert(SessionData::new("a"));
        let mut archived = SessionData::new("b");
        archived.status = SessionStatus::Archived;
        h.directory.insert(archived);
        h.directory.insert(SessionData::new("c"));

        let hidden = h.coordinator.sessions_state(Some(false));
        assert_eq!(hidden.sessions.len(), 2);
        assert!(hidden.sessions.iter().all(|s| s.status == SessionStatus::Active));
        assert!(hidden.has_archived_sessions);

        let shown = h.coordinator.sessions_state(Some(true));
        assert_eq!(shown.sessions.len(), 3);
        assert!(shown.has_archived_sessions);
    }

    #[tokio::test]
    async fn archive_filter_defaults_to_settings() {
        let h = harness_with(false, true);
        let mut archived = SessionData::new("b");
        archived.status = SessionStatus::Archived;
        h.directory.insert(archived);

        let view = h.coordinator.sessions_state(None);
        assert_eq!(view.sessions.len(), 1);
    }

    #[tokio::test]
    async fn session_snapshot_rejects_unknown_session() {
        let h = harness();
        let err = h
            .coordinator
            .session_snapshot(&SessionId::from_raw("does-not-exist"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Session not found"));
    }

    #[tokio::test]
    async fn auth_failure_degrades_system_view_to_unknown() {
        let h = harness_with(true, false);
        let view = h.coordinator.system_state().await;
        assert_eq!(view.auth, AuthStatus::unknown());
        assert_eq!(view.health.status, "healthy");
    }

    #[tokio::test]
    async fn command_fetch_failure_degrades_to_cached_list() {
        let h = harness();
        let id = h.directory.insert_failing(SessionData::new("flaky"));

        // No cached commands yet: degrades to empty.
        let snapshot = h.coordinator.session_snapshot(&id).await.unwrap();
        assert!(snapshot.commands.is_empty());

        // Seed the cache via a commands.updated event, then re-pull.
        h.coordinator
            .handle_event(StateEvent::CommandsUpdated {
                session_id: id.clone(),
                commands: vec![SlashCommand {
                    name: "clear".into(),
                    description: "Clear context".into(),
                }],
            })
            .await
            .unwrap();
        let snapshot = h.coordinator.session_snapshot(&id).await.unwrap();
        assert_eq!(snapshot.commands.len(), 1);
        assert_eq!(snapshot.commands[0].name, "clear");
    }

    // ── Push / event listeners ──

    #[tokio::test]
    async fn session_created_emits_delta_and_notice() {
        let h = harness();
        let session = SessionData::new("fresh");
        h.coordinator
            .handle_event(StateEvent::SessionCreated {
                session: session.clone(),
            })
            .await
            .unwrap();

        let deltas = h
            .publisher
            .on_channel(&channels::delta(channels::GLOBAL_SESSIONS));
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].0, "global");
        assert_eq!(deltas[0].1["added"][0]["title"], "fresh");

        let notices = h.publisher.on_channel(channels::SESSION_CREATED);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].1["sessionId"], session.id.as_str());

        assert!(h.coordinator.cache().get(&session.id).is_some());
    }

    #[tokio::test]
    async fn lifecycle_survives_missing_live_handle() {
        let h = harness();
        let session = SessionData::new("ghost");
        let id = session.id.clone();

        // Created and updated without any live handle in the directory:
        // both must succeed, the update is a logged skip.
        h.coordinator
            .handle_event(StateEvent::SessionCreated { session })
            .await
            .unwrap();
        h.coordinator
            .handle_event(StateEvent::SessionUpdated {
                session_id: id.clone(),
                title: Some("renamed".into()),
                status: None,
                processing_state: None,
            })
            .await
            .unwrap();
        assert!(h.publisher.on_channel(channels::SESSION).is_empty());

        h.coordinator
            .handle_event(StateEvent::SessionDeleted {
                session_id: id.clone(),
            })
            .await
            .unwrap();

        let deltas = h
            .publisher
            .on_channel(&channels::delta(channels::GLOBAL_SESSIONS));
        let removed = &deltas.last().unwrap().1["removed"];
        assert_eq!(removed[0], id.as_str());
        assert!(h.coordinator.cache().get(&id).is_none());
    }

    #[tokio::test]
    async fn state_broadcast_for_unknown_session_publishes_nothing() {
        let h = harness();
        h.coordinator
            .broadcast_session_state_change(&SessionId::from_raw("sess_gone"))
            .await
            .unwrap();
        assert!(h.publisher.all().is_empty());
    }

    #[tokio::test]
    async fn session_update_broadcasts_to_session_scope() {
        let h = harness();
        let id = h.directory.insert(SessionData::new("live"));

        h.coordinator
            .handle_event(StateEvent::SessionUpdated {
                session_id: id.clone(),
                title: None,
                status: None,
                processing_state: Some(ProcessingState::processing("bash")),
            })
            .await
            .unwrap();

        let pushes = h.publisher.on_channel(channels::SESSION);
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].0, format!("session:{id}"));
        assert_eq!(pushes[0].1["session"]["title"], "live");
    }

    #[tokio::test]
    async fn error_set_then_clear_broadcasts_twice() {
        let h = harness();
        let id = h.directory.insert(SessionData::new("errs"));

        h.coordinator
            .handle_event(StateEvent::SessionError {
                session_id: id.clone(),
                message: "tool crashed".into(),
                details: Some(serde_json::json!({"tool": "bash"})),
            })
            .await
            .unwrap();
        h.coordinator
            .handle_event(StateEvent::SessionErrorClear {
                session_id: id.clone(),
            })
            .await
            .unwrap();

        let pushes = h.publisher.on_channel(channels::SESSION);
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[0].1["error"]["message"], "tool crashed");
        assert!(pushes[1].1["error"].is_null());
        let v1 = pushes[0].1["version"].as_u64().unwrap();
        let v2 = pushes[1].1["version"].as_u64().unwrap();
        assert!(v2 > v1);
    }

    #[tokio::test]
    async fn context_update_publishes_raw_payload() {
        let h = harness();
        let id = h.directory.insert(SessionData::new("ctx"));

        h.coordinator
            .handle_event(StateEvent::ContextUpdated {
                session_id: id.clone(),
                context: ContextInfo::new(42_000, 200_000),
            })
            .await
            .unwrap();

        let pushes = h.publisher.on_channel(channels::CONTEXT_UPDATED);
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].0, format!("session:{id}"));
        assert_eq!(pushes[0].1["context"]["usedTokens"], 42_000);
        // Not wrapped in a full session snapshot.
        assert!(pushes[0].1.get("agentState").is_none());
    }

    #[tokio::test]
    async fn settings_update_broadcasts_settings_state() {
        let h = harness();
        h.coordinator
            .handle_event(StateEvent::SettingsUpdated)
            .await
            .unwrap();
        let pushes = h.publisher.on_channel(channels::GLOBAL_SETTINGS);
        assert_eq!(pushes.len(), 1);
        assert!(pushes[0].1["settings"].is_object());
    }

    #[tokio::test]
    async fn filter_change_rebroadcasts_sessions_state() {
        let h = harness();
        h.directory.insert(SessionData::new("a"));
        h.coordinator
            .handle_event(StateEvent::SessionsFilterChanged)
            .await
            .unwrap();
        let pushes = h.publisher.on_channel(channels::GLOBAL_SESSIONS);
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].1["sessions"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn api_connection_is_fire_and_forget() {
        let h = harness();
        h.coordinator
            .handle_event(StateEvent::ApiConnection {
                status: ApiConnectionStatus {
                    status: "disconnected".into(),
                    retry_count: 3,
                },
            })
            .await
            .unwrap();

        // The broadcast runs in a spawned task; give it a moment.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let pushes = h.publisher.on_channel(channels::GLOBAL_SYSTEM);
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].1["apiConnection"]["status"], "disconnected");
        assert_eq!(pushes[0].1["apiConnection"]["retryCount"], 3);
    }

    #[tokio::test]
    async fn sdk_message_broadcasts_skip_unknown_sessions() {
        let h = harness();
        h.coordinator
            .broadcast_sdk_messages_change(&SessionId::from_raw("sess_gone"))
            .await
            .unwrap();
        assert!(h.publisher.all().is_empty());

        let id = h.directory.insert(SessionData::new("msgs"));
        h.coordinator.broadcast_sdk_messages_change(&id).await.unwrap();
        let pushes = h.publisher.on_channel(channels::SESSION_SDK_MESSAGES);
        assert_eq!(pushes.len(), 1);
        assert!(pushes[0].1["messages"].is_array());
    }

    #[tokio::test]
    async fn sdk_message_delta_is_stamped_per_session() {
        let h = harness();
        let a = h.directory.insert(SessionData::new("a"));
        let b = h.directory.insert(SessionData::new("b"));

        h.coordinator
            .broadcast_sdk_messages_delta(&a, Delta::added(vec![serde_json::json!({"n": 1})]))
            .unwrap();
        h.coordinator
            .broadcast_sdk_messages_delta(&b, Delta::added(vec![serde_json::json!({"n": 2})]))
            .unwrap();

        let channel = channels::delta(channels::SESSION_SDK_MESSAGES);
        let pushes = h.publisher.on_channel(&channel);
        // Each session's stream starts at version 1 independently.
        assert_eq!(pushes[0].1["version"], 1);
        assert_eq!(pushes[1].1["version"], 1);
    }

    #[tokio::test]
    async fn listener_loop_processes_events_and_survives_bad_targets() {
        let h = harness();
        let (tx, rx) = broadcast::channel(64);
        let handle = h.coordinator.start(rx);

        let id = h.directory.insert(SessionData::new("looped"));
        // An event for a nonexistent session must not stop the loop.
        tx.send(StateEvent::SessionUpdated {
            session_id: SessionId::from_raw("sess_gone"),
            title: None,
            status: None,
            processing_state: None,
        })
        .unwrap();
        tx.send(StateEvent::CommandsUpdated {
            session_id: id.clone(),
            commands: vec![],
        })
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let pushes = h.publisher.on_channel(channels::SESSION);
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].0, format!("session:{id}"));

        drop(tx);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(handle.is_finished());
    }
}
