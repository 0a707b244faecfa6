use chrono::{DateTime, Utc};
use dashmap::DashMap;

use pulse_core::ids::SessionId;
use pulse_core::session::{ContextInfo, ProcessingState, SessionData, SessionStatus, SlashCommand};
use pulse_core::snapshot::SessionErrorInfo;

/// Last-known aggregated view of one session, populated lazily and updated
/// field-by-field by whichever event supplies new information.
#[derive(Clone, Debug, Default)]
pub struct CachedSessionState {
    pub session: Option<SessionData>,
    pub processing_state: Option<ProcessingState>,
    pub commands: Option<Vec<SlashCommand>>,
    pub context: Option<ContextInfo>,
    pub error: Option<SessionErrorInfo>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Shallow patch: only fields explicitly present overwrite the cached
/// record. `error` uses a nested Option so callers can distinguish
/// "leave untouched" (None) from "clear" (Some(None)).
#[derive(Debug, Default)]
pub struct SessionStatePatch {
    pub session: Option<SessionData>,
    pub title: Option<String>,
    pub status: Option<SessionStatus>,
    pub processing_state: Option<ProcessingState>,
    pub commands: Option<Vec<SlashCommand>>,
    pub context: Option<ContextInfo>,
    pub error: Option<Option<SessionErrorInfo>>,
}

/// In-memory map from session id to cached state. All operations are total
/// over the identifier space; a miss never errors.
#[derive(Debug, Default)]
pub struct SessionStateCache {
    entries: DashMap<SessionId, CachedSessionState>,
}

impl SessionStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &SessionId) -> Option<CachedSessionState> {
        self.entries.get(id).map(|e| e.clone())
    }

    /// Merge a partial update, creating the record on first reference.
    pub fn upsert(&self, id: &SessionId, patch: SessionStatePatch) {
        let mut entry = self.entries.entry(id.clone()).or_default();

        if let Some(session) = patch.session {
            entry.session = Some(session);
        }
        if let Some(title) = patch.title {
            if let Some(ref mut session) = entry.session {
                session.title = title;
            }
        }
        if let Some(status) = patch.status {
            if let Some(ref mut session) = entry.session {
                session.status = status;
            }
        }
        if let Some(state) = patch.processing_state {
            entry.processing_state = Some(state);
        }
        if let Some(commands) = patch.commands {
            entry.commands = Some(commands);
        }
        if let Some(context) = patch.context {
            entry.context = Some(context);
        }
        if let Some(error) = patch.error {
            entry.error = error;
        }
        entry.updated_at = Some(Utc::now());
    }

    /// Delete the record. Broadcasts addressed to the session afterwards
    /// simply carry no cached data.
    pub fn remove(&self, id: &SessionId) {
        self.entries.remove(id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
