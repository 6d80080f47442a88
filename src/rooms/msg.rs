use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::{self, Room, StoredMessage, User},
    error::PersistenceError,
    hub::BroadcastHub,
};

/// The closed set of event kinds a client may send. A frame without a
/// `type` field is a chat message, matching what clients have always sent.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ClientEventKind {
    #[default]
    ChatMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ClientEvent {
    #[serde(rename = "type", default)]
    pub(crate) kind: ClientEventKind,
    #[serde(default)]
    pub(crate) content: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct AuthorSummary {
    pub(crate) id: Uuid,
    pub(crate) username: String,
}

/// What every room member receives, and what the history endpoint returns.
#[derive(Debug, Serialize)]
pub(crate) struct MessageEvent {
    pub(crate) id: Uuid,
    pub(crate) content: String,
    pub(crate) user: Option<AuthorSummary>,
    pub(crate) timestamp: String,
}

impl From<StoredMessage> for MessageEvent {
    fn from(message: StoredMessage) -> Self {
        Self {
            id: message.id,
            content: message.content,
            user: message.author.map(|(id, username)| AuthorSummary { id, username }),
            timestamp: message.created_at,
        }
    }
}

/// Persist a validated chat message, then fan it out to the room. The
/// event is only published once the write is acknowledged; a failed write
/// bubbles up and nothing is broadcast.
pub(crate) async fn send_msg(
    db_pool: &SqlitePool,
    hub: &BroadcastHub,
    room: &Room,
    author: &User,
    content: &str,
) -> Result<(), PersistenceError> {
    let stored = db::append_message(db_pool, room.uuid, author, content).await?;
    hub.publish(&room.name, &MessageEvent::from(stored)).await;
    Ok(())
}
