use pulse_core::channels::Scope;
use pulse_core::errors::SyncError;

/// Outbound side of the transport boundary. Implementations fan a payload
/// out to every subscriber of the scope; they perform no business logic.
pub trait Publisher: Send + Sync {
    fn publish(&self, channel: &str, scope: &Scope, payload: serde_json::Value)
        -> Result<(), SyncError>;
}

/// Discards everything. Useful when running the coordinator pull-only.
#[derive(Debug, Default)]
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish(&self, _: &str, _: &Scope, _: serde_json::Value) -> Result<(), SyncError> {
        Ok(())
    }
}
