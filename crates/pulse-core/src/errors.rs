/// Failures surfaced by external collaborators (auth, session runtimes).
#[derive(Clone, Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("auth provider failed: {0}")]
    Auth(String),
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("internal: {0}")]
    Internal(String),
}

/// Errors of the coordination subsystem itself.
///
/// `SessionNotFound` is the one category that propagates to callers as a
/// hard failure, and only on the pull path. Everything else is degraded or
/// logged at the listener boundary.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("publish failed: {0}")]
    Publish(String),
}

impl SyncError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_the_session() {
        let err = SyncError::SessionNotFound("sess_gone".into());
        assert!(err.to_string().contains("Session not found"));
        assert!(err.to_string().contains("sess_gone"));
        assert!(err.is_not_found());
    }

    #[test]
    fn provider_errors_convert() {
        let err: SyncError = ProviderError::Auth("token expired".into()).into();
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("token expired"));
    }
}
