//! WebSocket transport boundary: client registry, RPC dispatch, and the
//! publisher implementation the coordinator pushes through.

pub mod client;
pub mod directory;
pub mod handlers;
pub mod rpc;
pub mod server;

pub use client::{ClientRegistry, RegistryPublisher};
pub use server::{start, ServerConfig, ServerHandle};
