//! One signaling connection: read frames, route them, drain the outbound queue.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, trace, warn};

use crate::api::AppState;
use crate::connection::ConnectionHandle;

/// How long queued frames may take to flush once the reader has stopped.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn serve_connection(socket: WebSocket, addr: SocketAddr, state: AppState) {
    let AppState {
        router,
        metrics,
        config,
        mut shutdown,
    } = state;

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (handle, mut rx) = ConnectionHandle::channel(config.outbound_queue_len);
    let connection = handle.id();

    metrics.connections_open.inc();
    info!(%connection, peer = %addr, "signaling connection opened");

    // Writer task: ends once every clone of the handle is gone or the socket fails.
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                return;
            }
        }
        let _ = ws_tx.close().await;
    });

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let outcome = router.handle_frame(&handle, &text);
                        trace!(%connection, ?outcome, "frame handled");
                    }
                    Some(Ok(Message::Binary(data))) => {
                        router.handle_binary(&handle, data.len());
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(%connection, error = %e, "websocket read failed");
                        break;
                    }
                }
            }
            _ = &mut writer => {
                debug!(%connection, "writer stopped");
                break;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    // The single cleanup point for this connection.
    if let Some(entry) = router.unregister(connection) {
        info!(%connection, role = %entry.role, session = %entry.id, "session released");
    }
    drop(handle);

    if !writer.is_finished() && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        warn!(%connection, "outbound queue did not drain, aborting writer");
        writer.abort();
    }

    metrics.connections_open.dec();
    info!(%connection, peer = %addr, "signaling connection closed");
}
