//! State coordination and broadcast subsystem.
//!
//! Assembles consistent snapshots on demand (pull), reacts to domain events
//! by pushing versioned updates to subscribers (push), and guarantees a
//! monotonically increasing version per logical channel.

pub mod aggregate;
pub mod cache;
pub mod coordinator;
pub mod ledger;
pub mod publisher;

pub use aggregate::{Aggregator, Collaborators};
pub use cache::{CachedSessionState, SessionStateCache, SessionStatePatch};
pub use coordinator::StateCoordinator;
pub use ledger::VersionLedger;
pub use publisher::{NullPublisher, Publisher};
