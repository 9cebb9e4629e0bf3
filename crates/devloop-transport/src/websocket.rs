//! Axum WebSocket plumbing for the session gateway.

use std::sync::Arc;

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth::verify_session_token;
use crate::protocol::ServerMessage;
use crate::session::{Gateway, Session};

#[derive(Debug, Deserialize)]
struct ConnectParams {
    token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// The session token is verified before the upgrade; a bad or missing
/// token is answered with `401` and no socket is opened.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(gateway): State<Arc<Gateway>>,
) -> Response {
    let sid = match verify_session_token(params.token.as_deref(), &gateway.jwt_secret) {
        Ok(sid) => sid,
        Err(e) => {
            tracing::warn!(error = %e, "rejecting connection");
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, sid, gateway))
}

async fn handle_socket(socket: WebSocket, sid: String, gateway: Arc<Gateway>) {
    tracing::info!(%sid, "client connected");
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Spawn task to forward messages to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session::new(sid, gateway, tx);

    // Handle incoming messages
    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s.into(),
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        session.handle_text(&text).await;
    }

    session.disconnect();
    send_task.abort();
}

/// Create the gateway router.
///
/// # Example
/// ```ignore
/// let app = Router::new().merge(router(gateway));
/// ```
#[must_use]
pub fn router(gateway: Arc<Gateway>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(gateway)
}
