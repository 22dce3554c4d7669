use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use ripple_types::models::{Participant, Post, Room, Vote};

/// The narrow read/write interface the coordination layer needs from
/// persistent storage. Each call is read-committed on its own; there are no
/// cross-call transactions, so callers hold their own per-room or per-post
/// locks around read-modify-write sequences.
pub trait Store: Send + Sync {
    fn load_room(&self, room_id: Uuid) -> Result<Option<Room>>;

    /// Insert a room, or overwrite the stored copy.
    fn save_room(&self, room: &Room) -> Result<()>;

    /// Ids of rooms still flagged active whose `expires_at <= now`.
    fn load_expired_room_ids(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>>;

    /// Flip `active` off for every listed room in one batch. Returns how many
    /// rows changed.
    fn deactivate_rooms(&self, room_ids: &[Uuid]) -> Result<usize>;

    fn load_participants(&self, room_id: Uuid) -> Result<Vec<Participant>>;

    fn save_participant(&self, participant: &Participant) -> Result<()>;

    /// All posts of a room, oldest first.
    fn load_posts(&self, room_id: Uuid) -> Result<Vec<Post>>;

    fn load_post(&self, post_id: Uuid) -> Result<Option<Post>>;

    fn save_post(&self, post: &Post) -> Result<()>;

    fn load_vote(&self, post_id: Uuid, session_id: Uuid) -> Result<Option<Vote>>;

    /// Insert the vote, or replace the direction of the existing
    /// (post, session) row.
    fn upsert_vote(&self, vote: &Vote) -> Result<()>;

    fn update_post_score(&self, post_id: Uuid, score: i64) -> Result<()>;
}
