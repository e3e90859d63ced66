//! Stream channel: WebSocket handshake and per-client loop
//!
//! The bearer token is presented at the handshake: `Authorization` header
//! or `?token=` query for browser WebSocket clients, which cannot set
//! headers. Verification failure rejects the upgrade; nothing streams
//! unauthenticated.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::auth::token::strip_bearer;
use crate::auth::Claims;
use crate::broker::protocol::ClientMessage;
use crate::broker::SessionBroker;
use crate::error::ApiError;

use super::AppState;

/// GET /ws
pub async fn upgrade(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
) -> Response {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(strip_bearer)
        .map(str::to_string)
        .or_else(|| params.get("token").cloned());

    let claims = match token.and_then(|t| state.tokens.verify(&t).ok()) {
        Some(claims) => claims,
        None => {
            debug!("Stream handshake rejected for {}", addr);
            return ApiError::Unauthorized.into_response();
        }
    };

    info!("Stream channel opened for user {} from {}", claims.sub, addr);
    ws.on_upgrade(move |socket| client_stream(state, claims, socket))
}

/// One task per client channel: a writer draining the broker's outbound
/// queue, and this read loop feeding frames into the broker in order.
async fn client_stream(state: AppState, claims: Claims, socket: WebSocket) {
    let user_id = claims.sub;

    let (broker, mut out_rx) = SessionBroker::new(
        user_id.clone(),
        state.manager.clone(),
        state.profiles.clone(),
        state.sessions.clone(),
        state.queries.clone(),
        state.assistant.clone(),
        state.vault.clone(),
    );
    let broker = Arc::new(broker);

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Outbound frame serialization failed: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => broker.handle(message).await,
                Err(e) => {
                    debug!("Rejected frame from user {}: {}", user_id, e);
                    broker.protocol_error(format!("Unrecognized message: {}", e));
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {
                // Binary/ping/pong frames carry nothing in this protocol
            }
            Err(e) => {
                debug!("Stream read error for user {}: {}", user_id, e);
                break;
            }
        }
    }

    // Channel closed: tear down every owned session, then stop the writer.
    broker.shutdown().await;
    writer.abort();
    info!("Stream channel closed for user {}", user_id);
}
