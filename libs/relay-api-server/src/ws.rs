use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use relay_api::{BrokerMessage, OverflowPolicy};

use super::AppState;
use super::session::{ClientSession, ServerFrame};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

// ═══════════════════════════════════════════════════════════════
//  WebSocket: /ws
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_ws(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(socket, state))
}

// ═══════════════════════════════════════════════════════════════
//  Connection handler
// ═══════════════════════════════════════════════════════════════

async fn ws_connection(mut socket: WebSocket, state: AppState) {
    let conn = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    tracing::info!(conn, "client connected");

    let (mux_tx, mut mux_rx) = mpsc::channel::<BrokerMessage>(state.ws_buffer);
    let forwarder = spawn_forwarder(conn, state.inbound.subscribe(), mux_tx, state.ws_overflow);
    let mut session = ClientSession::new(state.broker.clone());

    loop {
        tokio::select! {
            biased;

            _ = state.shutdown.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }

            msg = socket.recv() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    _ => break,
                };

                let text = match msg {
                    Message::Text(t) => t,
                    Message::Close(_) => break,
                    _ => continue,
                };

                let reply = session.handle_text(text.as_str()).await;
                if !send_frame(&mut socket, &reply).await {
                    break;
                }
            }

            inbound = mux_rx.recv() => {
                match inbound {
                    Some(msg) => {
                        if !session.wants(&msg.topic) {
                            continue;
                        }
                        if !send_frame(&mut socket, &ServerFrame::message(&msg)).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    forwarder.abort();
    tracing::info!(conn, "client disconnected");
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "frame serialization failed");
            true
        }
    }
}

/// Broker broadcast → this connection's queue.
///
/// A lagging broadcast receiver loses the oldest messages. With
/// [`OverflowPolicy::Drop`] a full queue keeps only the newest waiting
/// message, so a slow client skips ahead instead of falling behind;
/// with [`OverflowPolicy::BackPressure`] the forwarder waits for room and
/// the broadcast lag does the dropping.
fn spawn_forwarder(
    conn: u64,
    mut inbound: broadcast::Receiver<BrokerMessage>,
    tx: mpsc::Sender<BrokerMessage>,
    overflow: OverflowPolicy,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending: Option<BrokerMessage> = None;
        loop {
            tokio::select! {
                permit = tx.reserve(), if pending.is_some() => {
                    let Ok(permit) = permit else { break };
                    if let Some(msg) = pending.take() {
                        permit.send(msg);
                    }
                }

                recv = inbound.recv() => {
                    let msg = match recv {
                        Ok(msg) => msg,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(conn, skipped, "client lagging, oldest broker messages dropped");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    };

                    match overflow {
                        OverflowPolicy::Drop => {
                            if let Some(stale) = pending.replace(msg) {
                                tracing::warn!(conn, topic = %stale.topic, "client queue full, dropping");
                                continue;
                            }
                            if let Some(msg) = pending.take() {
                                match tx.try_send(msg) {
                                    Ok(()) => {}
                                    Err(mpsc::error::TrySendError::Full(msg)) => pending = Some(msg),
                                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                                }
                            }
                        }
                        OverflowPolicy::BackPressure => {
                            if tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
    })
}
