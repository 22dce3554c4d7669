//! Database row types. These map directly to SQLite rows and are converted
//! into `ripple-types` models at the query boundary.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use ripple_types::models::{Participant, Post, Room, VoteDirection};

pub struct RoomRow {
    pub id: String,
    pub topic: Option<String>,
    pub created_at: String,
    pub expires_at: String,
    pub max_participants: i64,
    pub active: bool,
}

pub struct ParticipantRow {
    pub room_id: String,
    pub session_id: String,
    pub anonymous_id: String,
    pub joined_at: String,
}

pub struct PostRow {
    pub id: String,
    pub room_id: String,
    pub content: String,
    pub anonymous_id: String,
    pub created_at: String,
    pub parent_id: Option<String>,
    pub vote_score: i64,
}

pub struct VoteRow {
    pub post_id: String,
    pub session_id: String,
    pub direction: String,
}

/// Fixed-width UTC timestamps, so lexical order in SQL matches time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("corrupt timestamp '{}'", raw))?
        .with_timezone(&Utc))
}

pub fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("corrupt id '{}'", raw))
}

impl TryFrom<RoomRow> for Room {
    type Error = anyhow::Error;

    fn try_from(row: RoomRow) -> Result<Self> {
        Ok(Room {
            id: parse_id(&row.id)?,
            topic: row.topic,
            created_at: parse_timestamp(&row.created_at)?,
            expires_at: parse_timestamp(&row.expires_at)?,
            max_participants: u32::try_from(row.max_participants)
                .with_context(|| format!("corrupt max_participants on room '{}'", row.id))?,
            active: row.active,
        })
    }
}

impl TryFrom<ParticipantRow> for Participant {
    type Error = anyhow::Error;

    fn try_from(row: ParticipantRow) -> Result<Self> {
        Ok(Participant {
            room_id: parse_id(&row.room_id)?,
            session_id: parse_id(&row.session_id)?,
            anonymous_id: row.anonymous_id,
            joined_at: parse_timestamp(&row.joined_at)?,
        })
    }
}

impl TryFrom<PostRow> for Post {
    type Error = anyhow::Error;

    fn try_from(row: PostRow) -> Result<Self> {
        Ok(Post {
            id: parse_id(&row.id)?,
            room_id: parse_id(&row.room_id)?,
            content: row.content,
            anonymous_id: row.anonymous_id,
            created_at: parse_timestamp(&row.created_at)?,
            parent_id: row.parent_id.as_deref().map(parse_id).transpose()?,
            vote_score: row.vote_score,
        })
    }
}

impl TryFrom<VoteRow> for ripple_types::models::Vote {
    type Error = anyhow::Error;

    fn try_from(row: VoteRow) -> Result<Self> {
        Ok(ripple_types::models::Vote {
            post_id: parse_id(&row.post_id)?,
            session_id: parse_id(&row.session_id)?,
            direction: row
                .direction
                .parse::<VoteDirection>()
                .with_context(|| format!("corrupt vote on post '{}'", row.post_id))?,
        })
    }
}
