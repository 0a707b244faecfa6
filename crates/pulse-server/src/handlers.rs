//! RPC method dispatch.
//!
//! Pulls go through the coordinator; mutations go to the owning collaborator
//! and come back to clients as pushed broadcasts via the event stream.

use std::sync::Arc;

use pulse_core::errors::SyncError;
use pulse_core::ids::{ClientId, SessionId};
use pulse_core::providers::LiveSession;
use pulse_core::session::{ApiConnectionStatus, SessionStatus};
use pulse_sync::StateCoordinator;

use crate::client::ClientRegistry;
use crate::directory::{DirectoryError, MemorySessionDirectory, MemorySettingsStore};
use crate::rpc::{optional_bool, optional_str, optional_u32, require_str, RpcCode, RpcResponse};

#[derive(Clone)]
pub struct HandlerState {
    pub coordinator: Arc<StateCoordinator>,
    pub directory: Arc<MemorySessionDirectory>,
    pub settings: Arc<MemorySettingsStore>,
    pub registry: Arc<ClientRegistry>,
}

type Id = Option<serde_json::Value>;

pub async fn dispatch(
    state: &HandlerState,
    client_id: Option<&ClientId>,
    method: &str,
    params: Option<serde_json::Value>,
    id: Id,
) -> RpcResponse {
    let params = params.unwrap_or(serde_json::Value::Null);

    match method {
        "state.getGlobal" => {
            let snapshot = state.coordinator.global_snapshot().await;
            respond(id, &snapshot)
        }

        "state.getSessions" => {
            let view = state
                .coordinator
                .sessions_state(optional_bool(&params, "showArchived"));
            respond(id, &view)
        }

        "state.getSystem" => {
            let view = state.coordinator.system_state().await;
            respond(id, &view)
        }

        "state.getSettings" => {
            let view = state.coordinator.settings_state();
            respond(id, &view)
        }

        "state.getSession" => {
            let session_id = match session_id_param(&params) {
                Ok(sid) => sid,
                Err(msg) => return RpcResponse::invalid_params(id, msg),
            };
            match state.coordinator.session_snapshot(&session_id).await {
                Ok(snapshot) => respond(id, &snapshot),
                Err(e) => sync_error(id, e),
            }
        }

        "state.getSdkMessages" => {
            let session_id = match session_id_param(&params) {
                Ok(sid) => sid,
                Err(msg) => return RpcResponse::invalid_params(id, msg),
            };
            match state.directory.live(&session_id) {
                Some(live) => RpcResponse::success(
                    id,
                    serde_json::json!({
                        "sessionId": session_id,
                        "messages": live.sdk_messages(),
                    }),
                ),
                None => RpcResponse::error(
                    id,
                    RpcCode::SessionNotFound,
                    format!("Session not found: {session_id}"),
                ),
            }
        }

        "session.create" => {
            let title = optional_str(&params, "title").unwrap_or("New session");
            match state.directory.create(title) {
                Ok(session) => respond(id, &session),
                Err(e) => directory_error(id, e),
            }
        }

        "session.update" => {
            let session_id = match session_id_param(&params) {
                Ok(sid) => sid,
                Err(msg) => return RpcResponse::invalid_params(id, msg),
            };
            let status = match optional_str(&params, "status") {
                Some("active") => Some(SessionStatus::Active),
                Some("archived") => Some(SessionStatus::Archived),
                Some(other) => {
                    return RpcResponse::invalid_params(id, format!("Unknown status: {other}"))
                }
                None => None,
            };
            let title = optional_str(&params, "title").map(String::from);
            match state.directory.update(&session_id, title, status) {
                Ok(session) => respond(id, &session),
                Err(e) => directory_error(id, e),
            }
        }

        "session.delete" => {
            let session_id = match session_id_param(&params) {
                Ok(sid) => sid,
                Err(msg) => return RpcResponse::invalid_params(id, msg),
            };
            match state.directory.delete(&session_id) {
                Ok(()) => RpcResponse::success(id, serde_json::json!({"deleted": true})),
                Err(e) => directory_error(id, e),
            }
        }

        "session.archive" | "session.unarchive" => {
            let session_id = match session_id_param(&params) {
                Ok(sid) => sid,
                Err(msg) => return RpcResponse::invalid_params(id, msg),
            };
            let status = if method == "session.archive" {
                SessionStatus::Archived
            } else {
                SessionStatus::Active
            };
            match state.directory.update(&session_id, None, Some(status)) {
                Ok(session) => respond(id, &session),
                Err(e) => directory_error(id, e),
            }
        }

        "settings.update" => match state.settings.update(params) {
            Ok(settings) => respond(id, &settings),
            Err(e) => RpcResponse::internal_error(id, e.to_string()),
        },

        // Acknowledged immediately; the system broadcast happens in the
        // background.
        "connection.report" => {
            let status = optional_str(&params, "status").unwrap_or("connected").to_string();
            let retry_count = optional_u32(&params, "retryCount").unwrap_or(0);
            state
                .coordinator
                .report_api_connection(ApiConnectionStatus { status, retry_count });
            RpcResponse::success(id, serde_json::json!({"acknowledged": true}))
        }

        "client.subscribe" => {
            let Some(client_id) = client_id else {
                return RpcResponse::error(
                    id,
                    RpcCode::InvalidRequest,
                    "Subscription requires a connected client",
                );
            };
            let session_id = match session_id_param(&params) {
                Ok(sid) => sid,
                Err(msg) => return RpcResponse::invalid_params(id, msg),
            };
            if !state.registry.attach_session(client_id, session_id.clone()) {
                return RpcResponse::internal_error(id, "Client not registered");
            }
            // Return the current snapshot so the subscriber starts from a
            // known version instead of waiting for the next push.
            match state.coordinator.session_snapshot(&session_id).await {
                Ok(snapshot) => respond(id, &snapshot),
                Err(e) => sync_error(id, e),
            }
        }

        "client.unsubscribe" => {
            let Some(client_id) = client_id else {
                return RpcResponse::error(
                    id,
                    RpcCode::InvalidRequest,
                    "Subscription requires a connected client",
                );
            };
            state.registry.detach_session(client_id);
            RpcResponse::success(id, serde_json::json!({"unsubscribed": true}))
        }

        "system.ping" => RpcResponse::success(
            id,
            serde_json::json!({"pong": true, "timestamp": chrono::Utc::now()}),
        ),

        "system.health" => RpcResponse::success(
            id,
            serde_json::json!({
                "status": "healthy",
                "clients": state.registry.count(),
            }),
        ),

        _ => RpcResponse::method_not_found(id, method),
    }
}

fn respond<T: serde::Serialize>(id: Id, value: &T) -> RpcResponse {
    match serde_json::to_value(value) {
        Ok(v) => RpcResponse::success(id, v),
        Err(e) => RpcResponse::internal_error(id, e.to_string()),
    }
}

fn session_id_param(params: &serde_json::Value) -> Result<SessionId, String> {
    require_str(params, "sessionId").map(SessionId::from_raw)
}

fn sync_error(id: Id, e: SyncError) -> RpcResponse {
    if e.is_not_found() {
        RpcResponse::error(id, RpcCode::SessionNotFound, e.to_string())
    } else {
        RpcResponse::internal_error(id, e.to_string())
    }
}

fn directory_error(id: Id, e: DirectoryError) -> RpcResponse {
    match e {
        DirectoryError::NotFound(_) => {
            RpcResponse::error(id, RpcCode::SessionNotFound, e.to_string())
        }
        DirectoryError::Full(_) => RpcResponse::internal_error(id, e.to_string()),
    }
}
