//! WebSocket handler for Axum
//!
//! Handles authentication, admission into the presence registry, and the
//! per-socket read loop.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{stream::StreamExt, SinkExt};
use parley_shared::{ClientEvent, ServerEvent, UserId};
use serde::Deserialize;

use crate::auth::{authenticate, extract_token, AuthState, AuthUser};
use crate::error::ApiError;
use crate::state::AppState;

use super::connection::Connection;

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    token: Option<String>,
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    Query(params): Query<WebSocketQuery>,
    headers: HeaderMap,
) -> Response {
    let user = match admit(&app_state.auth_state(), params.token, &headers).await {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket admission refused");
            return e.into_response();
        }
    };

    tracing::info!(user_id = %user.user_id, "WebSocket connection upgrade requested");

    ws.on_upgrade(move |socket| handle_socket(socket, user.user_id, app_state))
}

/// Resolve the identity allowed to open a live connection.
///
/// Browsers cannot set headers on the upgrade request, so the `token` query
/// parameter takes precedence over the `Authorization` header and `jwt`
/// cookie. Unresolvable identities get 401; accounts that are not verified
/// and onboarded get 403.
pub async fn admit(
    auth: &AuthState,
    query_token: Option<String>,
    headers: &HeaderMap,
) -> Result<AuthUser, ApiError> {
    let token = query_token
        .filter(|t| !t.is_empty())
        .or_else(|| extract_token(headers))
        .ok_or(ApiError::Unauthorized)?;

    let user = authenticate(auth, &token).await?;
    if !user.profile.can_connect() {
        tracing::warn!(user_id = %user.user_id, "Account not verified or onboarded");
        return Err(ApiError::Forbidden);
    }

    Ok(user)
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: UserId, app_state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Bounded queue drained by the writer task below
    let (conn, mut rx) = Connection::channel(user_id);
    let session_id = conn.session_id;

    // Queued ahead of the roster that registration sends
    let _ = conn.send(ServerEvent::Connected { session_id });

    let registry = app_state.registry.clone();
    let conn = registry.register(conn).await;

    // Spawn task to send messages to client
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                }
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(error = ?e, session_id = %session_id, "WebSocket read error");
                break;
            }
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(ClientEvent::Ping) => {
                    let _ = conn.send(ServerEvent::Pong);
                }
                Err(e) => {
                    tracing::warn!(error = ?e, session_id = %session_id, "Failed to parse client event");
                    let _ = conn.send(ServerEvent::Error {
                        message: "Invalid event format".to_string(),
                    });
                }
            },
            Message::Close(_) => {
                tracing::info!(session_id = %session_id, "WebSocket close frame received");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Axum handles ping/pong automatically
            }
            Message::Binary(_) => {}
        }
    }

    // Cleanup on disconnect
    tracing::info!(session_id = %session_id, user_id = %user_id, "WebSocket connection closing");
    registry.unregister(user_id, session_id).await;

    send_task.abort();
}
