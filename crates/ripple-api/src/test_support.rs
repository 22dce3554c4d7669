use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration as StdDuration;

use anyhow::{Result, bail};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use ripple_db::{Database, Store};
use ripple_gateway::Dispatcher;
use ripple_types::models::{Participant, Post, Room, Vote};

use crate::coordinator::RoomCoordinator;
use crate::identity::{IdentityPool, TokenService};
use crate::rate_limit::RateLimiter;

pub(crate) const TEST_SECRET: &str = "test-secret";

pub(crate) fn memory_store() -> Arc<Database> {
    Arc::new(Database::open_in_memory().unwrap())
}

pub(crate) fn coordinator_with(store: Arc<dyn Store>, limiter: RateLimiter) -> Arc<RoomCoordinator> {
    Arc::new(RoomCoordinator::new(
        store,
        IdentityPool::default(),
        TokenService::new(TEST_SECRET),
        limiter,
        Dispatcher::new(),
        Duration::hours(24),
    ))
}

pub(crate) fn coordinator() -> Arc<RoomCoordinator> {
    coordinator_with(memory_store(), RateLimiter::default())
}

/// How long a held post write waits before giving up on release.
const HOLD_LIMIT: StdDuration = StdDuration::from_secs(5);

#[derive(Default)]
struct PostGate {
    held: bool,
    gave_up: bool,
}

/// Database whose batch and single-room deactivation fails for chosen rooms,
/// and whose post writes can be held until released.
pub(crate) struct FlakyStore {
    inner: Database,
    failing: Mutex<HashSet<Uuid>>,
    gate: Mutex<PostGate>,
    released: Condvar,
}

impl Default for FlakyStore {
    fn default() -> Self {
        Self {
            inner: Database::open_in_memory().unwrap(),
            failing: Mutex::new(HashSet::new()),
            gate: Mutex::new(PostGate::default()),
            released: Condvar::new(),
        }
    }
}

impl FlakyStore {
    pub(crate) fn fail_deactivation_of(&self, room_id: Uuid) {
        self.failing.lock().unwrap().insert(room_id);
    }

    /// Make every post write block until `release_post_writes`.
    pub(crate) fn hold_post_writes(&self) {
        self.gate.lock().unwrap().held = true;
    }

    /// Let held post writes through. False if a writer was held so long it
    /// gave up waiting.
    pub(crate) fn release_post_writes(&self) -> bool {
        let mut gate = self.gate.lock().unwrap();
        gate.held = false;
        self.released.notify_all();
        !gate.gave_up
    }

    fn db(&self) -> &Database {
        &self.inner
    }
}

impl Store for FlakyStore {
    fn load_room(&self, room_id: Uuid) -> Result<Option<Room>> {
        self.db().load_room(room_id)
    }

    fn save_room(&self, room: &Room) -> Result<()> {
        self.db().save_room(room)
    }

    fn load_expired_room_ids(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        self.db().load_expired_room_ids(now)
    }

    fn deactivate_rooms(&self, room_ids: &[Uuid]) -> Result<usize> {
        let failing = self.failing.lock().unwrap();
        if let Some(room_id) = room_ids.iter().find(|id| failing.contains(id)) {
            bail!("simulated write failure for room {}", room_id);
        }
        self.db().deactivate_rooms(room_ids)
    }

    fn load_participants(&self, room_id: Uuid) -> Result<Vec<Participant>> {
        self.db().load_participants(room_id)
    }

    fn save_participant(&self, participant: &Participant) -> Result<()> {
        self.db().save_participant(participant)
    }

    fn load_posts(&self, room_id: Uuid) -> Result<Vec<Post>> {
        self.db().load_posts(room_id)
    }

    fn load_post(&self, post_id: Uuid) -> Result<Option<Post>> {
        self.db().load_post(post_id)
    }

    fn save_post(&self, post: &Post) -> Result<()> {
        let gate = self.gate.lock().unwrap();
        let (mut gate, wait) = self
            .released
            .wait_timeout_while(gate, HOLD_LIMIT, |gate| gate.held)
            .unwrap();
        if wait.timed_out() {
            gate.gave_up = true;
        }
        drop(gate);
        self.db().save_post(post)
    }

    fn load_vote(&self, post_id: Uuid, session_id: Uuid) -> Result<Option<Vote>> {
        self.db().load_vote(post_id, session_id)
    }

    fn upsert_vote(&self, vote: &Vote) -> Result<()> {
        self.db().upsert_vote(vote)
    }

    fn update_post_score(&self, post_id: Uuid, score: i64) -> Result<()> {
        self.db().update_post_score(post_id, score)
    }
}
