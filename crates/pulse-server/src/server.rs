//! HTTP/WebSocket server assembly.
//!
//! Wires the in-memory collaborators, the coordinator, and the client
//! registry together, then serves `/ws` for RPC + pushes and `/health` for
//! liveness probes.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use pulse_core::config::StaticConfig;
use pulse_core::events::StateEvent;
use pulse_core::ids::ClientId;
use pulse_core::session::AuthStatus;
use pulse_sync::{Collaborators, StateCoordinator};

use crate::client::{self, ClientRegistry, RegistryPublisher};
use crate::directory::{MemorySessionDirectory, MemorySettingsStore, StaticAuthProvider};
use crate::handlers::{self, HandlerState};
use crate::rpc::{RpcRequest, RpcResponse};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4600,
            max_send_queue: 256,
        }
    }
}

struct AppState {
    registry: Arc<ClientRegistry>,
    inbound_tx: mpsc::Sender<(ClientId, String)>,
}

/// Running server plus handles to the wired components. Dropping the handle
/// leaves the tasks running; call `shutdown` to stop them.
pub struct ServerHandle {
    pub port: u16,
    pub coordinator: Arc<StateCoordinator>,
    pub directory: Arc<MemorySessionDirectory>,
    pub settings: Arc<MemorySettingsStore>,
    pub registry: Arc<ClientRegistry>,
    pub events: broadcast::Sender<StateEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub async fn start(config: ServerConfig, static_config: StaticConfig) -> std::io::Result<ServerHandle> {
    let (events, _) = broadcast::channel::<StateEvent>(EVENT_CHANNEL_CAPACITY);

    let registry = Arc::new(ClientRegistry::new(config.max_send_queue));
    let directory = Arc::new(MemorySessionDirectory::new(
        events.clone(),
        static_config.max_sessions,
    ));
    let settings = Arc::new(MemorySettingsStore::new(events.clone()));
    let auth = Arc::new(StaticAuthProvider::new(AuthStatus {
        is_authenticated: true,
        method: Some("api_key".to_string()),
    }));

    let coordinator = StateCoordinator::new(
        Collaborators {
            directory: directory.clone(),
            auth,
            settings: settings.clone(),
        },
        static_config,
        Arc::new(RegistryPublisher::new(Arc::clone(&registry))),
    );
    let coordinator_task = coordinator.start(events.subscribe());

    let handler_state = HandlerState {
        coordinator: Arc::clone(&coordinator),
        directory: Arc::clone(&directory),
        settings: Arc::clone(&settings),
        registry: Arc::clone(&registry),
    };

    let (inbound_tx, inbound_rx) = mpsc::channel::<(ClientId, String)>(256);
    let rpc_task = spawn_rpc_loop(handler_state, inbound_rx);
    let cleanup_task = client::start_cleanup_task(Arc::clone(&registry), CLEANUP_INTERVAL);

    let app_state = Arc::new(AppState {
        registry: Arc::clone(&registry),
        inbound_tx,
    });
    let router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(("127.0.0.1", config.port)).await?;
    let port = listener.local_addr()?.port();
    tracing::info!(port, "Server listening");

    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Server terminated");
        }
    });

    Ok(ServerHandle {
        port,
        coordinator,
        directory,
        settings,
        registry,
        events,
        tasks: vec![coordinator_task, rpc_task, cleanup_task, server_task],
    })
}

/// Deserialize each inbound frame, dispatch it, and send the response back
/// on the originating client's queue.
fn spawn_rpc_loop(
    state: HandlerState,
    mut inbound_rx: mpsc::Receiver<(ClientId, String)>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((client_id, text)) = inbound_rx.recv().await {
            let response = match serde_json::from_str::<RpcRequest>(&text) {
                Ok(req) => {
                    tracing::debug!(client_id = %client_id, method = %req.method, "RPC request");
                    handlers::dispatch(&state, Some(&client_id), &req.method, req.params, req.id)
                        .await
                }
                Err(e) => {
                    tracing::warn!(client_id = %client_id, error = %e, "Unparseable RPC frame");
                    RpcResponse::parse_error()
                }
            };

            match serde_json::to_string(&response) {
                Ok(json) => {
                    state.registry.send_to(&client_id, json);
                }
                Err(e) => {
                    tracing::error!(client_id = %client_id, error = %e, "Response serialization failed");
                }
            }
        }
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let (client_id, rx) = state.registry.register();
        tracing::info!(client_id = %client_id, "Client connected");

        client::handle_ws_connection(
            socket,
            client_id.clone(),
            rx,
            Arc::clone(&state.registry),
            state.inbound_tx.clone(),
        )
        .await;

        tracing::info!(client_id = %client_id, "Client disconnected");
    })
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "clients": state.registry.count(),
    }))
}
