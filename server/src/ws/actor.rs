use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};

use crate::config::ChatSettings;
use crate::db::UserId;
use crate::state::AppState;
use crate::ws::hub::WorkerHandle;
use crate::ws::protocol::{self, Inbound};
use crate::ws::router::route_private_message;

/// Close code sent when the registry closes this connection
/// (replaced by a newer connection, evicted, or server shutdown).
const CLOSE_GOING_AWAY: u16 = 1001;

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: sole owner of the sink; drains the bounded outbound queue
///   and sends a ping every `ping_interval`
/// - Reader loop: reads one frame at a time under the read deadline,
///   decodes it and hands private messages to the router
///
/// Either side ending closes the worker; teardown deregisters it.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: UserId) {
    let settings = state.chat.clone();
    let (ws_sender, ws_receiver) = socket.split();
    let (worker, rx) = WorkerHandle::channel(user_id, settings.outbound_queue_capacity);
    let conn_id = worker.conn_id();

    if let Err(e) = state.hub.register(worker.clone()).await {
        tracing::warn!(user_id, error = %e, "Registry unavailable, dropping connection");
        return;
    }

    tracing::info!(user_id, conn_id, "WebSocket actor started");

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx, worker.clone(), settings.clone()));

    reader_loop(ws_receiver, &state, &worker, &settings).await;

    // Removes the entry only if it is still ours; also closes the queue.
    if let Err(e) = state.hub.deregister(&worker).await {
        tracing::debug!(user_id, error = %e, "Registry gone during teardown");
    }
    worker.close();
    let _ = writer_handle.await;

    tracing::info!(user_id, conn_id, "WebSocket actor stopped");
}

async fn reader_loop(
    mut ws_receiver: SplitStream<WebSocket>,
    state: &AppState,
    worker: &WorkerHandle,
    settings: &ChatSettings,
) {
    let user_id = worker.user_id();
    let pong_wait = Duration::from_secs(settings.pong_wait_secs);

    loop {
        // Every received frame, pongs included, refreshes the deadline.
        let next = tokio::select! {
            _ = worker.closed() => {
                tracing::debug!(user_id, "Worker closed, stopping reader");
                break;
            }
            next = timeout(pong_wait, ws_receiver.next()) => next,
        };

        let msg = match next {
            Err(_) => {
                tracing::info!(user_id, "Read deadline exceeded, closing connection");
                break;
            }
            Ok(None) => {
                tracing::info!(user_id, "WebSocket stream ended");
                break;
            }
            Ok(Some(Err(e))) => {
                tracing::warn!(user_id, error = %e, "WebSocket receive error");
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => handle_text_frame(text.as_str(), state, worker).await,
            Message::Binary(data) => {
                tracing::debug!(user_id, len = data.len(), "Ignoring binary frame");
            }
            Message::Ping(data) => {
                let _ = worker.try_enqueue(Message::Pong(data));
            }
            Message::Pong(_) => {}
            Message::Close(frame) => {
                tracing::info!(user_id, reason = ?frame, "Client initiated close");
                break;
            }
        }
    }
}

/// Malformed or unknown frames are logged and skipped; the connection stays open.
async fn handle_text_frame(text: &str, state: &AppState, worker: &WorkerHandle) {
    let user_id = worker.user_id();

    match protocol::decode_inbound(text) {
        Ok(Inbound::PrivateMessage(request)) => {
            let recipient_id = request.recipient_id;
            if let Err(e) = route_private_message(&state.db, &state.hub, worker, request).await {
                tracing::warn!(user_id, recipient_id, error = %e, "Failed to route private message");
            }
        }
        Err(e) => {
            tracing::warn!(
                user_id,
                error = %e,
                frame = %text.chars().take(100).collect::<String>(),
                "Skipping inbound frame"
            );
        }
    }
}

/// Writer task: the only writer on the socket.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
    worker: WorkerHandle,
    settings: ChatSettings,
) {
    let user_id = worker.user_id();
    let write_wait = Duration::from_secs(settings.write_wait_secs);
    let ping_period = Duration::from_secs(settings.ping_interval_secs);
    let mut ping_timer = interval_at(Instant::now() + ping_period, ping_period);

    loop {
        let outgoing = tokio::select! {
            biased;
            _ = worker.closed() => {
                let close = Message::Close(Some(CloseFrame {
                    code: CLOSE_GOING_AWAY,
                    reason: "Connection closed".into(),
                }));
                let _ = timeout(write_wait, ws_sender.send(close)).await;
                break;
            }
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            _ = ping_timer.tick() => Message::Ping(Vec::new().into()),
        };

        match timeout(write_wait, ws_sender.send(outgoing)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(user_id, error = %e, "WebSocket send failed");
                break;
            }
            Err(_) => {
                tracing::info!(user_id, "Write deadline exceeded");
                break;
            }
        }
    }

    // Writer gone means the connection is gone; stop the reader too.
    worker.close();
    let _ = ws_sender.close().await;
}
