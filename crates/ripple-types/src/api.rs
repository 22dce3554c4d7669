use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Post, Room};

// -- Session tokens --

/// Token `typ` marker; tokens carrying anything else are rejected.
pub const SESSION_TOKEN_TYPE: &str = "room_session";

/// Claims of a signed session token. `room_id` scopes the token to a single
/// room; unscoped tokens identify the session everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<Uuid>,
    pub exp: usize,
    pub iat: usize,
    pub typ: String,
}

// -- Rooms --

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateRoomRequest {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub duration_hours: Option<i64>,
    #[serde(default)]
    pub max_participants: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomResponse {
    pub id: Uuid,
    pub topic: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub max_participants: u32,
    pub is_active: bool,
    pub time_remaining: i64,
    pub participant_count: usize,
}

impl RoomResponse {
    pub fn from_room(room: &Room, participant_count: usize, now: DateTime<Utc>) -> Self {
        Self {
            id: room.id,
            topic: room.topic.clone(),
            created_at: room.created_at,
            expires_at: room.expires_at,
            max_participants: room.max_participants,
            is_active: room.is_live_at(now),
            time_remaining: room.time_remaining_at(now),
            participant_count,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    pub room: RoomResponse,
    pub session_token: String,
    pub session_id: Uuid,
    pub anonymous_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinRoomResponse {
    pub session_token: String,
    pub anonymous_id: String,
    pub session_id: Uuid,
}

// -- Posts --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostResponse {
    pub id: Uuid,
    pub content: String,
    pub anonymous_id: String,
    pub created_at: DateTime<Utc>,
    pub parent_id: Option<Uuid>,
    pub vote_score: i64,
    pub replies: Vec<PostResponse>,
}

impl From<Post> for PostResponse {
    fn from(post: Post) -> Self {
        Self {
            id: post.id,
            content: post.content,
            anonymous_id: post.anonymous_id,
            created_at: post.created_at,
            parent_id: post.parent_id,
            vote_score: post.vote_score,
            replies: vec![],
        }
    }
}

// -- Votes --

/// `vote_type` stays a string here so an unknown direction surfaces as an
/// invalid-argument error rather than a body rejection.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoteRequest {
    pub vote_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VoteResponse {
    pub post_id: Uuid,
    pub vote_type: String,
    pub new_score: i64,
}

// -- Health --

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub message: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}
