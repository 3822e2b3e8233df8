//! Relay WebSocket handler

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, Interval};
use tracing::{debug, error, info, warn};

use crate::api::server::AppState;
use crate::config::ConnectionPolicy;
use crate::hub::{ConnectionEvent, ConnectionId, Hub};

/// WebSocket handler for relay peers
pub async fn relay_ws(
    ws: WebSocketUpgrade,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    ws.on_upgrade(move |socket| handle_relay_ws(socket, peer, state))
}

/// Run one connection from accept to removal
async fn handle_relay_ws(socket: WebSocket, peer: Option<SocketAddr>, state: AppState) {
    let hub = state.hub;
    let policy = state.connection;

    let (sender, receiver) = socket.split();
    let (id, outbound) = hub.accept(peer);

    let mut send_task = tokio::spawn(write_loop(sender, outbound, policy.ping_interval));
    let mut receive_task = tokio::spawn(read_loop(receiver, hub.clone(), id, policy));

    // Wait for either side to finish
    tokio::select! {
        result = &mut send_task => {
            if let Ok(Some(reason)) = result {
                hub.on_error(id, &reason);
            }
        }
        _ = &mut receive_task => {}
    }

    send_task.abort();
    receive_task.abort();
    let _ = tokio::join!(send_task, receive_task);

    // No-op when the reader already removed the connection
    hub.on_close(id);
    debug!(connection = %id, "Relay WebSocket task finished");
}

/// Drain the outbound queue into the socket in order.
///
/// Returns the transport error that ended the loop, if any. The queue closes
/// once the hub drops the connection.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Message>,
    ping_interval: Option<Duration>,
) -> Option<String> {
    let mut ping = ping_interval.map(|period| interval_at(Instant::now() + period, period));

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    return None;
                };
                if let Err(e) = sender.send(frame).await {
                    return Some(e.to_string());
                }
            }
            _ = next_tick(&mut ping) => {
                if let Err(e) = sender.send(Message::Ping(Vec::new())).await {
                    return Some(e.to_string());
                }
            }
        }
    }
}

async fn next_tick(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Read inbound frames and dispatch them to the hub until the connection ends
async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    hub: Hub,
    id: ConnectionId,
    policy: ConnectionPolicy,
) {
    loop {
        match next_event(&mut receiver, policy.idle_timeout).await {
            ConnectionEvent::Message(raw) => match hub.on_message(id, raw) {
                Ok(_) => {}
                Err(e) if e.is_recoverable() => {
                    warn!(connection = %id, "Discarding payload: {}", e);
                }
                Err(e) => {
                    error!(connection = %id, "Relay failed: {}", e);
                    hub.on_error(id, &e.to_string());
                    break;
                }
            },
            ConnectionEvent::Activity => {}
            ConnectionEvent::Close(reason) => {
                debug!(connection = %id, reason = ?reason, "Relay WebSocket received close");
                hub.on_close(id);
                break;
            }
            ConnectionEvent::Error(reason) => {
                hub.on_error(id, &reason);
                break;
            }
            ConnectionEvent::Idle => {
                info!(
                    connection = %id,
                    idle_timeout = ?policy.idle_timeout,
                    "Closing idle connection"
                );
                hub.on_close(id);
                break;
            }
        }
    }
}

async fn next_event(
    receiver: &mut SplitStream<WebSocket>,
    idle_timeout: Option<Duration>,
) -> ConnectionEvent {
    match idle_timeout {
        Some(limit) => match timeout(limit, receiver.next()).await {
            Ok(frame) => ConnectionEvent::from_frame(frame),
            Err(_) => ConnectionEvent::Idle,
        },
        None => ConnectionEvent::from_frame(receiver.next().await),
    }
}
