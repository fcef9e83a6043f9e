//! Per-connection WebSocket handling: handshake, event forwarding, teardown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use sprout_types::events::ClientFrame;

use crate::presence::PresenceDirectory;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a client gets to send its hello frame before the socket closes.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a single gateway connection. The first frame must be a hello
/// announcing the user identity; after that the connection only receives
/// pushed events and may join rooms. Disconnect tears down presence and
/// room state, nothing else — in-flight toggles always run to completion.
pub async fn handle_connection(socket: WebSocket, directory: PresenceDirectory) {
    let (mut sender, mut receiver) = socket.split();

    let (user_id, initial_room) = match wait_for_hello(&mut receiver).await {
        Some(hello) => hello,
        None => {
            warn!("gateway client failed to say hello, closing");
            return;
        }
    };

    let registration = directory.register(user_id);
    let connection_id = registration.connection_id;
    let mut events = registration.events;
    if let Some(room) = &initial_room {
        directory.join_room(connection_id, room);
    }

    info!("{} connected to gateway as {}", user_id, connection_id);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward pushed events -> client, with heartbeat. Ends when the event
    // channel closes (unregistered or evicted by a newer connection).
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let event = match event {
                        Some(event) => event,
                        None => break,
                    };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("failed to serialize event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read frames from the client.
    let directory_recv = directory.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(ClientFrame::JoinRoom { room }) => {
                        info!("{} joining room {}", user_id, room);
                        directory_recv.join_room(connection_id, &room);
                    }
                    Ok(ClientFrame::Hello { .. }) => {} // already handled
                    Err(e) => {
                        warn!(
                            "{} bad frame: {} -- raw: {}",
                            user_id,
                            e,
                            truncate_to_boundary(&text, 200)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    directory.unregister(connection_id);
    info!("{} disconnected from gateway", user_id);
}

/// Cap logged frame text at `max` bytes without splitting a character.
fn truncate_to_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

async fn wait_for_hello(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
) -> Option<(Uuid, Option<String>)> {
    let timeout = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(ClientFrame::Hello { user_id, room }) =
                    serde_json::from_str::<ClientFrame>(&text)
                {
                    return Some((user_id, room));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_truncation_respects_char_boundaries() {
        // 100 euro signs = 300 bytes; byte 200 is mid-character.
        let frame = "\u{20ac}".repeat(100);
        let truncated = truncate_to_boundary(&frame, 200);
        assert_eq!(truncated.len(), 198);
        assert!(truncated.chars().all(|c| c == '\u{20ac}'));
    }

    #[test]
    fn short_text_is_left_alone() {
        assert_eq!(truncate_to_boundary("hello", 200), "hello");
        assert_eq!(truncate_to_boundary("abc", 3), "abc");
    }
}
