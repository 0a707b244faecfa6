//! Connected WebSocket clients and scope-based fan-out.
//!
//! Every client receives `global`-scoped publishes; a client additionally
//! receives `session:<id>` publishes for the one session it is attached to
//! via `client.subscribe`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;

use pulse_core::channels::Scope;
use pulse_core::errors::SyncError;
use pulse_core::ids::{ClientId, SessionId};
use pulse_sync::Publisher;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// One connected client. The sender is cloned for pushes, so broadcasts
/// never block on per-client locks.
pub struct ClientConnection {
    pub id: ClientId,
    tx: mpsc::Sender<String>,
    subscription: RwLock<Option<SessionId>>,
    connected: AtomicBool,
    last_pong: AtomicU64,
}

impl ClientConnection {
    fn new(id: ClientId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            subscription: RwLock::new(None),
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn subscription(&self) -> Option<SessionId> {
        self.subscription.read().clone()
    }

    fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < CLIENT_TIMEOUT.as_secs()
    }

    fn in_scope(&self, scope: &Scope) -> bool {
        match scope {
            Scope::Global => true,
            Scope::Session(id) => self.subscription.read().as_ref() == Some(id),
        }
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected WebSocket clients.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<ClientConnection>>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new client and return its id plus the outbound receiver.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.clients
            .insert(id.clone(), Arc::new(ClientConnection::new(id.clone(), tx)));
        (id, rx)
    }

    pub fn unregister(&self, id: &ClientId) {
        if let Some((_, client)) = self.clients.remove(id) {
            client.connected.store(false, Ordering::Relaxed);
        }
    }

    /// Attach a client to a session scope, replacing any previous one.
    pub fn attach_session(&self, client_id: &ClientId, session_id: SessionId) -> bool {
        match self.clients.get(client_id) {
            Some(client) => {
                *client.subscription.write() = Some(session_id);
                true
            }
            None => false,
        }
    }

    pub fn detach_session(&self, client_id: &ClientId) {
        if let Some(client) = self.clients.get(client_id) {
            *client.subscription.write() = None;
        }
    }

    /// Send a message to a specific client. A full queue drops the message
    /// with a warn; the next broadcast carries a fresher version anyway.
    pub fn send_to(&self, client_id: &ClientId, message: String) -> bool {
        let Some(client) = self.clients.get(client_id) else {
            return false;
        };
        match client.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    client_id = %client_id,
                    msg_len = msg.len(),
                    "Send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Fan a message out to every connected client in the scope.
    pub fn broadcast(&self, scope: &Scope, message: &str) -> usize {
        let mut delivered = 0;
        for entry in self.clients.iter() {
            let client = entry.value();
            if client.is_connected() && client.in_scope(scope) {
                if client.tx.try_send(message.to_string()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Remove clients that have not answered pings within the timeout.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive())
            .map(|entry| entry.value().id.clone())
            .collect();

        let removed = dead.len();
        for id in dead {
            self.unregister(&id);
            tracing::info!(client_id = %id, "Cleaned up dead client");
        }
        removed
    }

    fn get(&self, id: &ClientId) -> Option<Arc<ClientConnection>> {
        self.clients.get(id).map(|e| Arc::clone(e.value()))
    }
}

/// Wire envelope for pushed state updates.
#[derive(Debug, Serialize)]
struct PushEnvelope<'a> {
    channel: &'a str,
    scope: &'a Scope,
    payload: serde_json::Value,
}

/// Publisher implementation backed by the client registry. Scope routing is
/// the registry's job; the envelope carries the scope so clients can route
/// on their side too.
pub struct RegistryPublisher {
    registry: Arc<ClientRegistry>,
}

impl RegistryPublisher {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }
}

impl Publisher for RegistryPublisher {
    fn publish(
        &self,
        channel: &str,
        scope: &Scope,
        payload: serde_json::Value,
    ) -> Result<(), SyncError> {
        let envelope = PushEnvelope {
            channel,
            scope,
            payload,
        };
        let message = serde_json::to_string(&envelope)
            .map_err(|e| SyncError::Publish(e.to_string()))?;
        let delivered = self.registry.broadcast(scope, &message);
        tracing::trace!(channel, %scope, delivered, "Published state update");
        Ok(())
    }
}

/// Handle a WebSocket connection: reader/writer split with heartbeat pings
/// and pong-based liveness tracking.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    on_message: mpsc::Sender<(ClientId, String)>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = client_id.clone();
    let writer_registry = Arc::clone(&registry);
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }

        if let Some(client) = writer_registry.get(&writer_cid) {
            client.connected.store(false, Ordering::Relaxed);
        }
    });

    let reader_cid = client_id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let _ = on_message.send((reader_cid.clone(), text.to_string())).await;
                }
                WsMessage::Pong(_) => {
                    if let Some(client) = reader_registry.get(&reader_cid) {
                        client.record_pong();
                    }
                }
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {} // axum answers pings automatically
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    registry.unregister(&client_id);
}

/// Periodically sweep out clients that stopped answering pings.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                tracing::info!(removed, "Dead client cleanup");
            }
        }
    })
}
