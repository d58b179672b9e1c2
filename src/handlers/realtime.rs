//! Realtime push channel.
//!
//! Clients open `/ws?token=<access token>` and receive every committed
//! change as a `{"event": ..., "data": ...}` text frame.

use crate::{auth::AuthError, events::RealtimeFrame, handlers::AppState};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
pub struct RealtimeQuery {
    pub token: Option<String>,
}

/// Authenticates the query token before upgrading the connection.
pub async fn realtime_handler(
    State(state): State<AppState>,
    Query(query): Query<RealtimeQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, AuthError> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingAuth)?;
    let user = state.auth.authenticate(&token).await?;

    info!(user_id = %user.user_id, "realtime subscriber connected");
    let receiver = state.realtime.subscribe();
    Ok(ws.on_upgrade(move |socket| forward_frames(socket, receiver, user.user_id)))
}

async fn forward_frames(
    socket: WebSocket,
    mut frames: broadcast::Receiver<RealtimeFrame>,
    user_id: String,
) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(error = %err, "failed to encode realtime frame");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%user_id, skipped, "realtime subscriber lagging; frames dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Ping(payload))) => {
                    if sink.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(%user_id, error = %err, "realtime socket error");
                    break;
                }
            },
        }
    }

    info!(%user_id, "realtime subscriber disconnected");
}
