//! Shared vocabulary for the Pulse state coordinator: identifiers, channel
//! names, domain events, snapshot types, and collaborator contracts.

pub mod channels;
pub mod config;
pub mod errors;
pub mod events;
pub mod ids;
pub mod providers;
pub mod session;
pub mod snapshot;

/// Wire protocol version reported in system views.
pub const PROTOCOL_VERSION: &str = "1";
