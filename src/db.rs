use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use crate::error::PersistenceError;

#[derive(Clone, Debug)]
pub struct User {
    pub uuid: Uuid,
    pub username: String,
}

#[derive(Clone, Debug)]
pub struct Room {
    pub uuid: Uuid,
    pub name: String,
}

/// One persisted chat message. `author` is the author's id and username,
/// gone (None) once the user row has been deleted.
#[derive(Clone, Debug)]
pub struct StoredMessage {
    pub id: Uuid,
    pub room_id: Uuid,
    pub author: Option<(Uuid, String)>,
    pub content: String,
    pub created_at: String,
}

pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(16)
        .connect(database_url)
        .await
}

/// Bring the schema up on a fresh database. Idempotent; proper migrations
/// are a non-goal.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            uuid TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS rooms (
            uuid TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            password_hash TEXT,
            created_by TEXT REFERENCES users(uuid) ON DELETE SET NULL,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            room_id TEXT NOT NULL REFERENCES rooms(uuid) ON DELETE CASCADE,
            user_id TEXT REFERENCES users(uuid) ON DELETE SET NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn now_rfc3339() -> Result<String, PersistenceError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| PersistenceError::Unavailable(Box::new(e)))
}

pub async fn find_user(pool: &SqlitePool, id: Uuid) -> Result<Option<User>, PersistenceError> {
    let row: Option<(String, String)> =
        sqlx::query_as("SELECT uuid,username FROM users WHERE uuid=?")
            .bind(id.to_string())
            .fetch_optional(pool)
            .await?;

    match row {
        Some((uuid, username)) => Ok(Some(User {
            uuid: parse_uuid(&uuid)?,
            username,
        })),
        None => Ok(None),
    }
}

pub async fn find_room(pool: &SqlitePool, name: &str) -> Result<Option<Room>, PersistenceError> {
    let row: Option<(String, String)> =
        sqlx::query_as("SELECT uuid,name FROM rooms WHERE name=?")
            .bind(name)
            .fetch_optional(pool)
            .await?;

    match row {
        Some((uuid, name)) => Ok(Some(Room {
            uuid: parse_uuid(&uuid)?,
            name,
        })),
        None => Ok(None),
    }
}

/// Get the room named `name`, creating it (no access secret, no creator) if
/// absent. Racing creators all land on the same row: the insert is
/// `ON CONFLICT DO NOTHING` and every caller re-reads by name.
pub async fn find_or_create_room(
    pool: &SqlitePool,
    name: &str,
) -> Result<Room, PersistenceError> {
    sqlx::query(
        "INSERT INTO rooms (uuid,name,created_at) VALUES (?,?,?)
         ON CONFLICT(name) DO NOTHING",
    )
    .bind(Uuid::now_v7().to_string())
    .bind(name)
    .bind(now_rfc3339()?)
    .execute(pool)
    .await?;

    find_room(pool, name)
        .await?
        .ok_or_else(|| PersistenceError::Unavailable(Box::new(sqlx::Error::RowNotFound)))
}

pub async fn append_message(
    pool: &SqlitePool,
    room_id: Uuid,
    author: &User,
    content: &str,
) -> Result<StoredMessage, PersistenceError> {
    let id = Uuid::now_v7();
    let created_at = now_rfc3339()?;

    sqlx::query("INSERT INTO messages (id,room_id,user_id,content,created_at) VALUES (?,?,?,?,?)")
        .bind(id.to_string())
        .bind(room_id.to_string())
        .bind(author.uuid.to_string())
        .bind(content)
        .bind(&created_at)
        .execute(pool)
        .await?;

    Ok(StoredMessage {
        id,
        room_id,
        author: Some((author.uuid, author.username.clone())),
        content: content.to_owned(),
        created_at,
    })
}

/// All messages of a room in persisted order. Message ids are v7 uuids, so
/// equal timestamps still sort in insertion order.
pub async fn list_messages(
    pool: &SqlitePool,
    room_id: Uuid,
) -> Result<Vec<StoredMessage>, PersistenceError> {
    let rows: Vec<(String, Option<String>, Option<String>, String, String)> = sqlx::query_as(
        "SELECT m.id, m.user_id, u.username, m.content, m.created_at
         FROM messages m LEFT JOIN users u ON u.uuid = m.user_id
         WHERE m.room_id=?
         ORDER BY m.created_at ASC, m.id ASC",
    )
    .bind(room_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut messages = Vec::with_capacity(rows.len());
    for (id, user_id, username, content, created_at) in rows {
        let author = match (user_id, username) {
            (Some(uid), Some(username)) => Some((parse_uuid(&uid)?, username)),
            _ => None,
        };
        messages.push(StoredMessage {
            id: parse_uuid(&id)?,
            room_id,
            author,
            content,
            created_at,
        });
    }

    Ok(messages)
}

/// Insert a user row. Registration itself lives outside the core; this
/// exists for bootstrapping and tests.
pub async fn create_user(
    pool: &SqlitePool,
    id: Uuid,
    username: &str,
) -> Result<User, PersistenceError> {
    sqlx::query("INSERT INTO users (uuid,username,created_at) VALUES (?,?,?)")
        .bind(id.to_string())
        .bind(username)
        .bind(now_rfc3339()?)
        .execute(pool)
        .await?;

    Ok(User {
        uuid: id,
        username: username.to_owned(),
    })
}

fn parse_uuid(s: &str) -> Result<Uuid, PersistenceError> {
    Uuid::parse_str(s).map_err(|e| PersistenceError::Unavailable(Box::new(e)))
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_schema(&pool).await.unwrap();
    pool
}
