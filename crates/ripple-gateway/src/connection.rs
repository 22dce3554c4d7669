use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use ripple_types::events::RoomEvent;

use crate::dispatcher::{Dispatcher, Subscription};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Upper bound on a single socket write.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Close code sent when the requested room does not exist.
pub const CLOSE_ROOM_NOT_FOUND: u16 = 4004;
/// Close code sent when the room is full or no longer live.
pub const CLOSE_CANNOT_JOIN: u16 = 4003;

/// Who is on the other end of a socket. The session has already joined the
/// room by the time the socket is handed over.
#[derive(Debug, Clone)]
pub struct LiveSession {
    pub room_id: Uuid,
    pub session_id: Uuid,
    pub anonymous_id: String,
}

/// Run one live connection until the client goes away or the dispatcher
/// drops it. The connection is server-push only: inbound text frames are
/// ignored, Pongs feed the heartbeat.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, session: LiveSession) {
    let (sender, mut receiver) = socket.split();
    let room_id = session.room_id;

    let Some(Subscription { conn_id, events, .. }) =
        dispatcher.register(room_id, session.session_id).await
    else {
        // The room closed between admission and upgrade.
        close_expired(sender, room_id).await;
        return;
    };

    info!(
        "{} (session {}) connected to room {}",
        session.anonymous_id, session.session_id, room_id
    );

    let participant_count = dispatcher.connection_count(room_id).await;
    dispatcher
        .broadcast(
            room_id,
            RoomEvent::ParticipantJoined {
                anonymous_id: session.anonymous_id.clone(),
                participant_count,
            },
        )
        .await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(forward_events(sender, events, pong_received));

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Text(text) => {
                    trace!("Ignoring client frame ({} bytes)", text.len());
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either side to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister(room_id, conn_id).await;

    let participant_count = dispatcher.connection_count(room_id).await;
    dispatcher
        .broadcast(
            room_id,
            RoomEvent::ParticipantLeft {
                anonymous_id: session.anonymous_id.clone(),
                participant_count,
            },
        )
        .await;

    info!(
        "{} (session {}) disconnected from room {}",
        session.anonymous_id, session.session_id, room_id
    );
}

/// Close a freshly upgraded socket that may not join its room.
pub async fn reject(mut socket: WebSocket, code: u16, reason: String) {
    debug!("Rejecting live connection: {} ({})", reason, code);
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

/// Tell the client its room is gone and close the socket normally.
async fn close_expired(mut sender: SplitSink<WebSocket, Message>, room_id: Uuid) {
    debug!("Room {} closed before the connection registered", room_id);
    if let Ok(text) = serde_json::to_string(&RoomEvent::RoomExpired { room_id }) {
        write(&mut sender, Message::Text(text.into())).await;
    }
    let frame = CloseFrame {
        code: close_code::NORMAL,
        reason: "Room closed".into(),
    };
    write(&mut sender, Message::Close(Some(frame))).await;
}

async fn forward_events(
    mut sender: SplitSink<WebSocket, Message>,
    mut events: mpsc::Receiver<Arc<RoomEvent>>,
    pong_flag: Arc<AtomicBool>,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    // Dropped by the dispatcher: the room closed or we fell behind.
                    let frame = CloseFrame {
                        code: close_code::NORMAL,
                        reason: "Room closed".into(),
                    };
                    write(&mut sender, Message::Close(Some(frame))).await;
                    break;
                };

                let text = match serde_json::to_string(event.as_ref()) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode room event: {}", e);
                        continue;
                    }
                };
                if !write(&mut sender, Message::Text(text.into())).await {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if pong_flag.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                if !write(&mut sender, Message::Ping(Bytes::new())).await {
                    break;
                }
            }
        }
    }
}

/// Write one frame, bounded by `WRITE_TIMEOUT`. Returns false if the socket
/// should be abandoned.
async fn write(sender: &mut SplitSink<WebSocket, Message>, msg: Message) -> bool {
    match tokio::time::timeout(WRITE_TIMEOUT, sender.send(msg)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!("Socket write failed: {}", e);
            false
        }
        Err(_) => {
            warn!("Socket write timed out after {:?}", WRITE_TIMEOUT);
            false
        }
    }
}
