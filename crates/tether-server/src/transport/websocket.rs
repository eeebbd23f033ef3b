//! Full-duplex adapter. The socket is the session: it is created on
//! upgrade, never registered for lookup, and closed when the socket ends.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tracing::{debug, info, instrument, warn};

use super::{DetachGuard, TransportKind, session_path};
use crate::router::SessionRouter;
use crate::session::{ConnectionInfo, Handler, Session};

/// `GET /{server}/{session}/websocket`
pub(crate) async fn upgrade(
    State(router): State<Arc<SessionRouter>>,
    Path((server, session)): Path<(String, String)>,
    info: ConnectionInfo,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(e) = session_path(&server, &session) {
        return e.into_response();
    }
    let max = router.settings().max_message_size;
    ws.max_message_size(max)
        .on_upgrade(move |socket| run_websocket(socket, router, info))
}

/// Drive one WebSocket connection until either side closes it.
#[instrument(skip_all, fields(session_id))]
pub(crate) async fn run_websocket(socket: WebSocket, router: Arc<SessionRouter>, info: ConnectionInfo) {
    let session = router.create_session(None, false);
    let _ = tracing::Span::current().record("session_id", session.id().as_str());
    info!(ip = ?info.ip, "websocket connected");
    counter!("tether_ws_connections_total").increment(1);
    gauge!("tether_ws_connections_active").increment(1.0);

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (handler, mut send_rx) = Handler::new(TransportKind::Websocket, router.settings());
    let handler_id = handler.id();

    // Forward frames until the session lets go of the handler.
    let mut outbound = tokio::spawn(async move {
        while let Some(text) = send_rx.recv().await {
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    if let Err(rejected) = session.attach(handler, info) {
        rejected.respond();
    }
    let guard = DetachGuard::new(router.registry().clone(), session.clone(), handler_id);

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                if !handle_inbound(&session, msg) {
                    break;
                }
            }
            _ = &mut outbound => break,
        }
    }

    drop(guard);
    outbound.abort();
    gauge!("tether_ws_connections_active").decrement(1.0);
    info!("websocket disconnected");
}

/// Returns `false` when the connection should end.
fn handle_inbound(session: &Arc<Session>, msg: Message) -> bool {
    let text = match msg {
        Message::Text(t) => t.as_str().to_owned(),
        Message::Binary(data) => match String::from_utf8(data.to_vec()) {
            Ok(s) => s,
            Err(_) => {
                debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                return true;
            }
        },
        Message::Close(_) => return false,
        Message::Ping(_) | Message::Pong(_) => return true,
    };
    if text.is_empty() {
        return true;
    }
    match tether_core::decode_payload(&text) {
        Ok(messages) => {
            session.on_messages(messages);
            true
        }
        Err(e) => {
            warn!(error = %e, "broken JSON on websocket");
            false
        }
    }
}
