use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ripple_types::events::RoomEvent;

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Events buffered per connection before a broadcast has to wait on it.
    pub queue_capacity: usize,
    /// Longest a broadcast waits for room in one connection's queue before
    /// dropping that connection.
    pub send_timeout: Duration,
    /// How long a closed room keeps refusing new registrations. Covers the
    /// gap between a join being admitted and its socket being registered.
    pub closed_retention: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            send_timeout: Duration::from_secs(2),
            closed_retention: Duration::from_secs(600),
        }
    }
}

/// Receiving half of a registered live connection. Events arrive in the order
/// they were broadcast to the room. The stream ends once the dispatcher drops
/// the connection (unregister, delivery failure or room closure).
pub struct Subscription {
    pub conn_id: Uuid,
    pub room_id: Uuid,
    pub events: mpsc::Receiver<Arc<RoomEvent>>,
}

struct Connection {
    session_id: Uuid,
    tx: mpsc::Sender<Arc<RoomEvent>>,
}

#[derive(Default)]
struct RoomConnections {
    connections: HashMap<Uuid, Connection>,
    /// Set when the set drains or the room closes. A retired slot is only
    /// ever removed from the map, never refilled.
    retired: bool,
}

type RoomSlot = Arc<Mutex<RoomConnections>>;

#[derive(Default)]
struct Rooms {
    live: HashMap<Uuid, RoomSlot>,
    /// Rooms closed recently, with the time they closed.
    closed: HashMap<Uuid, Instant>,
}

/// Owns every live connection, grouped by room, and fans room events out to
/// them.
///
/// Structural changes and broadcasts for one room serialize on that room's
/// mutex; the outer map lock is only held long enough to find or swap a slot,
/// so unrelated rooms never wait on each other.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    rooms: RwLock<Rooms>,
    config: DispatcherConfig,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    pub fn with_config(config: DispatcherConfig) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                rooms: RwLock::new(Rooms::default()),
                config,
            }),
        }
    }

    /// Register a live connection for `session_id` in `room_id`. The room's
    /// entry is created on first use. Returns `None` if the room has been
    /// closed.
    pub async fn register(&self, room_id: Uuid, session_id: Uuid) -> Option<Subscription> {
        let (tx, events) = mpsc::channel(self.inner.config.queue_capacity.max(1));
        let conn_id = Uuid::new_v4();

        loop {
            let slot = {
                let mut rooms = self.inner.rooms.write().await;
                if rooms.closed.contains_key(&room_id) {
                    debug!("Session {} refused: room {} is closed", session_id, room_id);
                    return None;
                }
                rooms.live.entry(room_id).or_default().clone()
            };
            let mut room = slot.lock().await;
            if room.retired {
                // Lost a race with the last unregister; swap in a fresh slot.
                drop(room);
                self.forget(room_id, &slot).await;
                continue;
            }

            room.connections.insert(conn_id, Connection { session_id, tx });
            debug!(
                "Connection {} (session {}) registered in room {} ({} live)",
                conn_id,
                session_id,
                room_id,
                room.connections.len()
            );
            return Some(Subscription { conn_id, room_id, events });
        }
    }

    /// Remove a connection. Removing the last connection of a room removes
    /// the room's entry. Returns false if the connection was already gone.
    pub async fn unregister(&self, room_id: Uuid, conn_id: Uuid) -> bool {
        let Some(slot) = self.slot(room_id).await else {
            return false;
        };

        let mut room = slot.lock().await;
        let removed = room.connections.remove(&conn_id).is_some();
        if removed {
            debug!("Connection {} unregistered from room {}", conn_id, room_id);
        }
        self.retire_if_empty(room_id, &slot, room).await;
        removed
    }

    /// Deliver `event` to every connection currently registered in the room.
    ///
    /// A connection whose queue is closed, or still full after the send
    /// timeout, is dropped from the room; the failure is not reported to the
    /// caller. Returns the number of connections the event was queued for.
    pub async fn broadcast(&self, room_id: Uuid, event: RoomEvent) -> usize {
        let Some(slot) = self.slot(room_id).await else {
            return 0;
        };

        let event = Arc::new(event);
        let send_timeout = self.inner.config.send_timeout;

        // Holding the room lock across delivery keeps per-connection order
        // equal to broadcast order. Each send is bounded by `send_timeout`.
        let mut room = slot.lock().await;
        let deliveries = room.connections.iter().map(|(&conn_id, conn)| {
            let event = event.clone();
            async move {
                match tokio::time::timeout(send_timeout, conn.tx.send(event)).await {
                    Ok(Ok(())) => None,
                    Ok(Err(_)) => {
                        debug!(
                            "Connection {} (session {}) closed, dropping from room {}",
                            conn_id, conn.session_id, room_id
                        );
                        Some(conn_id)
                    }
                    Err(_) => {
                        warn!(
                            "Connection {} (session {}) stalled for {:?}, dropping from room {}",
                            conn_id, conn.session_id, send_timeout, room_id
                        );
                        Some(conn_id)
                    }
                }
            }
        });
        let failed: Vec<Uuid> = join_all(deliveries).await.into_iter().flatten().collect();

        for conn_id in &failed {
            room.connections.remove(conn_id);
        }
        let delivered = room.connections.len();
        self.retire_if_empty(room_id, &slot, room).await;
        delivered
    }

    /// Close every connection of a room: each gets a final `RoomExpired`
    /// event (if its queue has space) and its stream then ends. Later
    /// registrations for the room are refused. Returns the number of
    /// connections closed.
    pub async fn close_room(&self, room_id: Uuid) -> usize {
        let slot = {
            let mut rooms = self.inner.rooms.write().await;
            let now = Instant::now();
            let retention = self.inner.config.closed_retention;
            rooms
                .closed
                .retain(|_, closed_at| now.duration_since(*closed_at) < retention);
            rooms.closed.insert(room_id, now);
            rooms.live.remove(&room_id)
        };
        let Some(slot) = slot else {
            return 0;
        };

        let mut room = slot.lock().await;
        room.retired = true;

        let event = Arc::new(RoomEvent::RoomExpired { room_id });
        let closed = room.connections.len();
        for (_, conn) in room.connections.drain() {
            let _ = conn.tx.try_send(event.clone());
        }

        if closed > 0 {
            info!("Closed {} live connections in room {}", closed, room_id);
        }
        closed
    }

    /// Number of live connections in a room.
    pub async fn connection_count(&self, room_id: Uuid) -> usize {
        match self.slot(room_id).await {
            Some(slot) => slot.lock().await.connections.len(),
            None => 0,
        }
    }

    /// Number of rooms with at least one live connection.
    pub async fn room_count(&self) -> usize {
        self.inner.rooms.read().await.live.len()
    }

    async fn slot(&self, room_id: Uuid) -> Option<RoomSlot> {
        self.inner.rooms.read().await.live.get(&room_id).cloned()
    }

    async fn retire_if_empty(
        &self,
        room_id: Uuid,
        slot: &RoomSlot,
        mut room: tokio::sync::MutexGuard<'_, RoomConnections>,
    ) {
        if !room.connections.is_empty() || room.retired {
            return;
        }
        room.retired = true;
        drop(room);
        self.forget(room_id, slot).await;
    }

    /// Drop the map entry for `room_id` if it still points at `slot`.
    async fn forget(&self, room_id: Uuid, slot: &RoomSlot) {
        let mut rooms = self.inner.rooms.write().await;
        if rooms.live.get(&room_id).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            rooms.live.remove(&room_id);
        }
    }
}
