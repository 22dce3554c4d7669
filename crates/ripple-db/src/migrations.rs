use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE rooms (
                id                  TEXT PRIMARY KEY,
                topic               TEXT,
                created_at          TEXT NOT NULL,
                expires_at          TEXT NOT NULL,
                max_participants    INTEGER NOT NULL,
                active              INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX idx_rooms_expiry ON rooms(active, expires_at);

            CREATE TABLE participants (
                room_id         TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                session_id      TEXT NOT NULL,
                anonymous_id    TEXT NOT NULL,
                joined_at       TEXT NOT NULL,
                PRIMARY KEY (room_id, session_id),
                UNIQUE (room_id, anonymous_id)
            );

            CREATE TABLE posts (
                id              TEXT PRIMARY KEY,
                room_id         TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                content         TEXT NOT NULL,
                anonymous_id    TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                parent_id       TEXT REFERENCES posts(id) ON DELETE CASCADE,
                vote_score      INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_posts_room ON posts(room_id, created_at);

            CREATE TABLE votes (
                post_id         TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                session_id      TEXT NOT NULL,
                direction       TEXT NOT NULL CHECK (direction IN ('up', 'down')),
                PRIMARY KEY (post_id, session_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
