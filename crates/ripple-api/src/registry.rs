use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use ripple_db::Store;
use ripple_types::models::{Participant, Room};

use crate::error::{Result, RippleError};
use crate::identity::IdentityPool;
use crate::sync::{lock, read, write};

struct RoomEntry {
    room: Room,
    participants: HashMap<Uuid, Participant>,
}

impl RoomEntry {
    fn taken_identities(&self) -> HashSet<String> {
        self.participants
            .values()
            .map(|p| p.anonymous_id.clone())
            .collect()
    }
}

/// A room together with how many sessions have joined it.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub participant_count: usize,
}

/// Owns room lifecycle and membership.
///
/// Live rooms are cached behind a per-room mutex: a join holds that mutex
/// across the capacity check, identity pick and insert, so concurrent joins
/// can never overshoot `max_participants`. Work on different rooms does not
/// contend beyond the brief map lookup.
pub struct RoomRegistry {
    store: Arc<dyn Store>,
    identities: IdentityPool,
    rooms: RwLock<HashMap<Uuid, Arc<Mutex<RoomEntry>>>>,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn Store>, identities: IdentityPool) -> Self {
        Self {
            store,
            identities,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(&self, topic: Option<String>, ttl: Duration, max_participants: u32) -> Result<Room> {
        if ttl < Duration::zero() {
            return Err(RippleError::InvalidArgument("room lifetime must not be negative".into()));
        }
        if max_participants == 0 {
            return Err(RippleError::InvalidArgument("max_participants must be at least 1".into()));
        }

        let room = Room::new(topic, ttl, max_participants, Utc::now());
        self.store.save_room(&room)?;

        write(&self.rooms).insert(
            room.id,
            Arc::new(Mutex::new(RoomEntry {
                room: room.clone(),
                participants: HashMap::new(),
            })),
        );

        info!(
            "Created room {} (expires {}, max {} participants)",
            room.id, room.expires_at, room.max_participants
        );
        Ok(room)
    }

    /// The room as last recorded, live or not.
    pub fn get(&self, room_id: Uuid) -> Result<RoomState> {
        let entry = self.entry(room_id)?;
        let entry = lock(&entry);
        Ok(RoomState {
            room: entry.room.clone(),
            participant_count: entry.participants.len(),
        })
    }

    /// Like `get`, but a room past its expiry or already closed is `Expired`.
    pub fn get_live(&self, room_id: Uuid) -> Result<RoomState> {
        let state = self.get(room_id)?;
        if !state.room.is_live_at(Utc::now()) {
            return Err(RippleError::Expired);
        }
        Ok(state)
    }

    /// Add `session_id` to the room, or return its existing membership
    /// unchanged.
    pub fn join(&self, room_id: Uuid, session_id: Uuid) -> Result<Participant> {
        let entry = self.entry(room_id)?;
        let mut entry = lock(&entry);
        let now = Utc::now();

        if !entry.room.is_live_at(now) {
            return Err(RippleError::Expired);
        }
        if let Some(existing) = entry.participants.get(&session_id) {
            debug!("Session {} rejoined room {}", session_id, room_id);
            return Ok(existing.clone());
        }
        if entry.participants.len() >= entry.room.max_participants as usize {
            return Err(RippleError::Full);
        }

        let anonymous_id = self
            .identities
            .issue(room_id, session_id, &entry.taken_identities())?;
        let participant = Participant {
            room_id,
            session_id,
            anonymous_id,
            joined_at: now,
        };
        self.store.save_participant(&participant)?;
        entry.participants.insert(session_id, participant.clone());

        debug!(
            "{} joined room {} ({}/{})",
            participant.anonymous_id,
            room_id,
            entry.participants.len(),
            entry.room.max_participants
        );
        Ok(participant)
    }

    /// Membership of `session_id` in a live room.
    pub fn participant(&self, room_id: Uuid, session_id: Uuid) -> Result<Participant> {
        let entry = self.entry(room_id)?;
        let entry = lock(&entry);
        if !entry.room.is_live_at(Utc::now()) {
            return Err(RippleError::Expired);
        }
        entry
            .participants
            .get(&session_id)
            .cloned()
            .ok_or(RippleError::NotFound("participant"))
    }

    /// Close a room ahead of its expiry.
    pub fn close(&self, room_id: Uuid) -> Result<()> {
        let entry = self.entry(room_id)?;
        {
            let mut entry = lock(&entry);
            if !entry.room.active {
                return Ok(());
            }
            let mut closed = entry.room.clone();
            closed.active = false;
            self.store.save_room(&closed)?;
            entry.room = closed;
        }
        write(&self.rooms).remove(&room_id);
        info!("Closed room {}", room_id);
        Ok(())
    }

    /// Deactivate every room whose expiry has passed and that is still
    /// flagged active. Returns the ids actually deactivated.
    ///
    /// The batch update is tried first; if it fails, rooms are retried one at
    /// a time so a single bad row does not hold the rest back.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut candidates: HashSet<Uuid> = match self.store.load_expired_room_ids(now) {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                warn!("Sweep could not list expired rooms: {:#}", e);
                HashSet::new()
            }
        };
        for (room_id, entry) in read(&self.rooms).iter() {
            let entry = lock(entry);
            if entry.room.active && entry.room.is_expired_at(now) {
                candidates.insert(*room_id);
            }
        }
        if candidates.is_empty() {
            return Vec::new();
        }

        let ids: Vec<Uuid> = candidates.into_iter().collect();
        let retired = match self.store.deactivate_rooms(&ids) {
            Ok(_) => ids,
            Err(e) => {
                warn!(
                    "Batch deactivation of {} rooms failed, retrying one by one: {:#}",
                    ids.len(),
                    e
                );
                ids.into_iter()
                    .filter(|room_id| match self.store.deactivate_rooms(std::slice::from_ref(room_id)) {
                        Ok(_) => true,
                        Err(e) => {
                            warn!("Failed to deactivate room {}: {:#}", room_id, e);
                            false
                        }
                    })
                    .collect()
            }
        };

        let mut rooms = write(&self.rooms);
        for room_id in &retired {
            if let Some(entry) = rooms.remove(room_id) {
                lock(&entry).room.active = false;
            }
        }

        retired
    }

    /// Number of rooms held in memory.
    pub fn cached_rooms(&self) -> usize {
        read(&self.rooms).len()
    }

    fn entry(&self, room_id: Uuid) -> Result<Arc<Mutex<RoomEntry>>> {
        if let Some(entry) = read(&self.rooms).get(&room_id) {
            return Ok(entry.clone());
        }

        let room = self
            .store
            .load_room(room_id)?
            .ok_or(RippleError::NotFound("room"))?;
        let participants = self
            .store
            .load_participants(room_id)?
            .into_iter()
            .map(|p| (p.session_id, p))
            .collect();
        let live = room.is_live_at(Utc::now());
        let entry = Arc::new(Mutex::new(RoomEntry { room, participants }));

        // Dead rooms are served from storage each time and never cached
        if !live {
            return Ok(entry);
        }
        Ok(write(&self.rooms).entry(room_id).or_insert(entry).clone())
    }
}
