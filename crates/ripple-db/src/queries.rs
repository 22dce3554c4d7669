use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use ripple_types::models::{Participant, Post, Room, Vote};

use crate::Database;
use crate::models::{ParticipantRow, PostRow, RoomRow, VoteRow, format_timestamp};
use crate::store::Store;

const ROOM_COLUMNS: &str = "id, topic, created_at, expires_at, max_participants, active";
const POST_COLUMNS: &str = "id, room_id, content, anonymous_id, created_at, parent_id, vote_score";

impl Store for Database {
    // -- Rooms --

    fn load_room(&self, room_id: Uuid) -> Result<Option<Room>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?1"),
                    [room_id.to_string()],
                    room_row,
                )
                .optional()?;
            row.map(Room::try_from).transpose()
        })
    }

    fn save_room(&self, room: &Room) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO rooms (id, topic, created_at, expires_at, max_participants, active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    topic = excluded.topic,
                    expires_at = excluded.expires_at,
                    max_participants = excluded.max_participants,
                    active = excluded.active",
                params![
                    room.id.to_string(),
                    room.topic,
                    format_timestamp(room.created_at),
                    format_timestamp(room.expires_at),
                    room.max_participants,
                    room.active,
                ],
            )?;
            Ok(())
        })
    }

    fn load_expired_room_ids(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id FROM rooms WHERE active = 1 AND expires_at <= ?1")?;
            let ids = stmt
                .query_map([format_timestamp(now)], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids.iter().map(|id| crate::models::parse_id(id)).collect()
        })
    }

    fn deactivate_rooms(&self, room_ids: &[Uuid]) -> Result<usize> {
        if room_ids.is_empty() {
            return Ok(0);
        }

        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut changed = 0;
            {
                let mut stmt =
                    tx.prepare("UPDATE rooms SET active = 0 WHERE id = ?1 AND active = 1")?;
                for id in room_ids {
                    changed += stmt.execute([id.to_string()])?;
                }
            }
            tx.commit()?;
            Ok(changed)
        })
    }

    // -- Participants --

    fn load_participants(&self, room_id: Uuid) -> Result<Vec<Participant>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT room_id, session_id, anonymous_id, joined_at
                 FROM participants
                 WHERE room_id = ?1
                 ORDER BY joined_at",
            )?;
            let rows = stmt
                .query_map([room_id.to_string()], |row| {
                    Ok(ParticipantRow {
                        room_id: row.get(0)?,
                        session_id: row.get(1)?,
                        anonymous_id: row.get(2)?,
                        joined_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(Participant::try_from).collect()
        })
    }

    fn save_participant(&self, participant: &Participant) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO participants (room_id, session_id, anonymous_id, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    participant.room_id.to_string(),
                    participant.session_id.to_string(),
                    participant.anonymous_id,
                    format_timestamp(participant.joined_at),
                ],
            )?;
            Ok(())
        })
    }

    // -- Posts --

    fn load_posts(&self, room_id: Uuid) -> Result<Vec<Post>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {POST_COLUMNS} FROM posts WHERE room_id = ?1 ORDER BY created_at, rowid"
            ))?;
            let rows = stmt
                .query_map([room_id.to_string()], post_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(Post::try_from).collect()
        })
    }

    fn load_post(&self, post_id: Uuid) -> Result<Option<Post>> {
        self.with_conn(|conn| query_post(conn, post_id))
    }

    fn save_post(&self, post: &Post) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, room_id, content, anonymous_id, created_at, parent_id, vote_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    post.id.to_string(),
                    post.room_id.to_string(),
                    post.content,
                    post.anonymous_id,
                    format_timestamp(post.created_at),
                    post.parent_id.map(|id| id.to_string()),
                    post.vote_score,
                ],
            )?;
            Ok(())
        })
    }

    // -- Votes --

    fn load_vote(&self, post_id: Uuid, session_id: Uuid) -> Result<Option<Vote>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT post_id, session_id, direction FROM votes
                     WHERE post_id = ?1 AND session_id = ?2",
                    [post_id.to_string(), session_id.to_string()],
                    |row| {
                        Ok(VoteRow {
                            post_id: row.get(0)?,
                            session_id: row.get(1)?,
                            direction: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            row.map(Vote::try_from).transpose()
        })
    }

    fn upsert_vote(&self, vote: &Vote) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO votes (post_id, session_id, direction) VALUES (?1, ?2, ?3)
                 ON CONFLICT(post_id, session_id) DO UPDATE SET direction = excluded.direction",
                params![
                    vote.post_id.to_string(),
                    vote.session_id.to_string(),
                    vote.direction.as_str(),
                ],
            )?;
            Ok(())
        })
    }

    fn update_post_score(&self, post_id: Uuid, score: i64) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE posts SET vote_score = ?2 WHERE id = ?1",
                params![post_id.to_string(), score],
            )?;
            if changed == 0 {
                bail!("post not found: {}", post_id);
            }
            Ok(())
        })
    }
}

impl Database {
    /// Sum of +1/-1 over every stored vote on a post. Used to audit
    /// `posts.vote_score`.
    pub fn vote_sum(&self, post_id: Uuid) -> Result<i64> {
        self.with_conn(|conn| {
            let sum = conn.query_row(
                "SELECT COALESCE(SUM(CASE direction WHEN 'up' THEN 1 ELSE -1 END), 0)
                 FROM votes WHERE post_id = ?1",
                [post_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(sum)
        })
    }
}

fn room_row(row: &Row<'_>) -> rusqlite::Result<RoomRow> {
    Ok(RoomRow {
        id: row.get(0)?,
        topic: row.get(1)?,
        created_at: row.get(2)?,
        expires_at: row.get(3)?,
        max_participants: row.get(4)?,
        active: row.get(5)?,
    })
}

fn post_row(row: &Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        room_id: row.get(1)?,
        content: row.get(2)?,
        anonymous_id: row.get(3)?,
        created_at: row.get(4)?,
        parent_id: row.get(5)?,
        vote_score: row.get(6)?,
    })
}

fn query_post(conn: &Connection, post_id: Uuid) -> Result<Option<Post>> {
    let row = conn
        .query_row(
            &format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1"),
            [post_id.to_string()],
            post_row,
        )
        .optional()?;
    row.map(Post::try_from).transpose()
}
