use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, error};
use uuid::Uuid;

use ripple_db::Store;
use ripple_types::models::{Vote, VoteDirection};

use crate::error::{Result, RippleError};
use crate::sync::lock;

/// Result of one vote cast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteOutcome {
    pub post_id: Uuid,
    pub room_id: Uuid,
    pub direction: VoteDirection,
    pub new_score: i64,
    /// False when the session repeated its current vote.
    pub changed: bool,
}

/// Applies votes so that a post's score always equals the sum of its vote
/// weights. Read-modify-write of one post is serialized on a per-post lock;
/// votes on different posts proceed in parallel.
pub struct VoteAggregator {
    store: Arc<dyn Store>,
    post_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl VoteAggregator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            post_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Record `session_id`'s vote on `post_id`.
    ///
    /// A first vote moves the score by the direction's weight, a flip by
    /// twice that, and repeating the current direction changes nothing.
    pub fn cast(&self, post_id: Uuid, session_id: Uuid, direction: VoteDirection) -> Result<VoteOutcome> {
        let post_lock = lock(&self.post_locks).entry(post_id).or_default().clone();
        let outcome = {
            let _guard = lock(&post_lock);
            self.apply(post_id, session_id, direction)
        };

        drop(post_lock);
        self.release(post_id);
        outcome
    }

    /// Posts with a lock currently allocated.
    pub fn tracked_posts(&self) -> usize {
        lock(&self.post_locks).len()
    }

    fn apply(&self, post_id: Uuid, session_id: Uuid, direction: VoteDirection) -> Result<VoteOutcome> {
        let post = self
            .store
            .load_post(post_id)?
            .ok_or(RippleError::NotFound("post"))?;
        let previous = self
            .store
            .load_vote(post_id, session_id)?
            .map(|vote| vote.direction);

        let delta = match previous {
            Some(current) if current == direction => 0,
            Some(current) => direction.weight() - current.weight(),
            None => direction.weight(),
        };

        let mut outcome = VoteOutcome {
            post_id,
            room_id: post.room_id,
            direction,
            new_score: post.vote_score,
            changed: false,
        };
        if delta == 0 {
            return Ok(outcome);
        }

        // Score first: if recording the vote then fails, the score can be put
        // back and the post stays consistent with its vote rows.
        let new_score = post.vote_score + delta;
        self.store.update_post_score(post_id, new_score)?;
        let vote = Vote {
            post_id,
            session_id,
            direction,
        };
        if let Err(e) = self.store.upsert_vote(&vote) {
            if let Err(restore) = self.store.update_post_score(post_id, post.vote_score) {
                error!(
                    "Post {} score left at {} after failed vote write: {:#}",
                    post_id, new_score, restore
                );
            }
            return Err(e.into());
        }

        debug!(
            "Session {} voted {} on post {} (score {} -> {})",
            session_id, direction, post_id, post.vote_score, new_score
        );
        outcome.new_score = new_score;
        outcome.changed = true;
        Ok(outcome)
    }

    fn release(&self, post_id: Uuid) {
        let mut locks = lock(&self.post_locks);
        if locks
            .get(&post_id)
            .is_some_and(|post_lock| Arc::strong_count(post_lock) == 1)
        {
            locks.remove(&post_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use ripple_db::Database;
    use ripple_types::models::{Post, Room};

    use super::*;
    use crate::test_support::memory_store;

    fn seeded() -> (Arc<Database>, VoteAggregator, Uuid) {
        let db = memory_store();
        let room = Room::new(None, Duration::hours(1), 10, Utc::now());
        db.save_room(&room).unwrap();
        let post = Post {
            id: Uuid::new_v4(),
            room_id: room.id,
            content: "hello".into(),
            anonymous_id: "Calm Owl".into(),
            created_at: Utc::now(),
            parent_id: None,
            vote_score: 0,
        };
        db.save_post(&post).unwrap();
        let votes = VoteAggregator::new(db.clone());
        (db, votes, post.id)
    }

    #[test]
    fn test_flip_moves_score_by_two() {
        let (_db, votes, post_id) = seeded();
        let session = Uuid::new_v4();

        let up = votes.cast(post_id, session, VoteDirection::Up).unwrap();
        assert_eq!(up.new_score, 1);
        assert!(up.changed);

        let down = votes.cast(post_id, session, VoteDirection::Down).unwrap();
        assert_eq!(down.new_score, -1);

        let up_again = votes.cast(post_id, session, VoteDirection::Up).unwrap();
        assert_eq!(up_again.new_score, 1);
    }

    #[test]
    fn test_repeat_vote_is_noop() {
        let (db, votes, post_id) = seeded();
        let session = Uuid::new_v4();

        votes.cast(post_id, session, VoteDirection::Up).unwrap();
        let repeat = votes.cast(post_id, session, VoteDirection::Up).unwrap();
        assert!(!repeat.changed);
        assert_eq!(repeat.new_score, 1);
        assert_eq!(db.vote_sum(post_id).unwrap(), 1);
    }

    #[test]
    fn test_unknown_post() {
        let (_db, votes, _post_id) = seeded();
        assert!(matches!(
            votes.cast(Uuid::new_v4(), Uuid::new_v4(), VoteDirection::Up),
            Err(RippleError::NotFound("post"))
        ));
        assert_eq!(votes.tracked_posts(), 0);
    }

    #[test]
    fn test_concurrent_votes_keep_score_consistent() {
        let (db, votes, post_id) = seeded();
        let sessions: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();

        std::thread::scope(|scope| {
            for (i, session) in sessions.iter().enumerate() {
                let votes = &votes;
                scope.spawn(move || {
                    for round in 0..25 {
                        let direction = if (i + round) % 3 == 0 {
                            VoteDirection::Down
                        } else {
                            VoteDirection::Up
                        };
                        votes.cast(post_id, *session, direction).unwrap();
                    }
                });
            }
        });

        let score = db.load_post(post_id).unwrap().unwrap().vote_score;
        assert_eq!(score, db.vote_sum(post_id).unwrap());
        assert_eq!(votes.tracked_posts(), 0);
    }

    #[test]
    fn test_concurrent_first_votes_all_count() {
        let (db, votes, post_id) = seeded();

        std::thread::scope(|scope| {
            for _ in 0..20 {
                scope.spawn(|| votes.cast(post_id, Uuid::new_v4(), VoteDirection::Up).unwrap());
            }
        });

        assert_eq!(db.load_post(post_id).unwrap().unwrap().vote_score, 20);
    }
}
