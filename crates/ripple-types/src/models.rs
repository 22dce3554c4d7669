use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A time-bounded anonymous chat namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub topic: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub max_participants: u32,
    pub active: bool,
}

impl Room {
    pub fn new(topic: Option<String>, ttl: Duration, max_participants: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic,
            created_at: now,
            expires_at: now + ttl,
            max_participants,
            active: true,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// A room accepts joins, posts and votes only while live. This is the lazy
    /// backstop for rooms the periodic sweep has not reached yet.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired_at(now)
    }

    /// Whole seconds left before expiry, never negative.
    pub fn time_remaining_at(&self, now: DateTime<Utc>) -> i64 {
        if self.is_expired_at(now) {
            return 0;
        }
        (self.expires_at - now).num_seconds()
    }
}

/// A session's membership in one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub room_id: Uuid,
    pub session_id: Uuid,
    pub anonymous_id: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub room_id: Uuid,
    pub content: String,
    pub anonymous_id: String,
    pub created_at: DateTime<Utc>,
    pub parent_id: Option<Uuid>,
    pub vote_score: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    /// Contribution of one vote in this direction to a post's score.
    pub fn weight(self) -> i64 {
        match self {
            Self::Up => 1,
            Self::Down => -1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl fmt::Display for VoteDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseVoteDirectionError(pub String);

impl fmt::Display for ParseVoteDirectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown vote direction '{}', expected 'up' or 'down'", self.0)
    }
}

impl std::error::Error for ParseVoteDirectionError {}

impl FromStr for VoteDirection {
    type Err = ParseVoteDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            other => Err(ParseVoteDirectionError(other.to_string())),
        }
    }
}

/// One session's current vote on one post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub post_id: Uuid,
    pub session_id: Uuid,
    pub direction: VoteDirection,
}
