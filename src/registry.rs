use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::{db::{self, Room}, error::RoomError, session::SessionHandle};

/// Live state of one room: who is connected right now, and the lock that
/// serializes publishes to it. Room records themselves live in the store;
/// groups only track connectivity and are never removed when they empty.
pub(crate) struct RoomGroup {
    members: RwLock<HashMap<Uuid, Arc<SessionHandle>>>,
    pub(crate) publish_lock: Mutex<()>,
}

impl RoomGroup {
    fn new() -> Self {
        Self {
            members: RwLock::new(HashMap::new()),
            publish_lock: Mutex::new(()),
        }
    }

    pub(crate) async fn snapshot(&self) -> Vec<Arc<SessionHandle>> {
        self.members.read().await.values().cloned().collect()
    }
}

/// Maps room names to their live membership. All mutation goes through
/// these methods; callers only ever see copied snapshots.
pub struct RoomRegistry {
    pool: SqlitePool,
    rooms: RwLock<HashMap<String, Arc<RoomGroup>>>,
}

impl RoomRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the room record, creating it on first reference. Concurrent
    /// callers converge on one row (the store insert is conflict-free) and
    /// one in-memory group.
    pub async fn get_or_create(&self, name: &str) -> Result<Room, RoomError> {
        let room = db::find_or_create_room(&self.pool, name)
            .await
            .map_err(RoomError::CreateFailed)?;

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(RoomGroup::new()));

        Ok(room)
    }

    /// Add a session to the room's membership. Idempotent per session.
    pub async fn join(&self, name: &str, handle: Arc<SessionHandle>) {
        let group = {
            let mut rooms = self.rooms.write().await;
            rooms
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(RoomGroup::new()))
                .clone()
        };
        debug!(room = name, session = %handle.id, "session joined");
        group.members.write().await.insert(handle.id, handle);
    }

    /// Drop a session from the room's membership. The room itself survives
    /// an empty membership set.
    pub async fn leave(&self, name: &str, session_id: Uuid) {
        let group = self.rooms.read().await.get(name).cloned();
        if let Some(group) = group {
            if group.members.write().await.remove(&session_id).is_some() {
                debug!(room = name, session = %session_id, "session left");
            }
        }
    }

    /// Copy-on-read membership snapshot.
    pub async fn members(&self, name: &str) -> Vec<Arc<SessionHandle>> {
        match self.rooms.read().await.get(name).cloned() {
            Some(group) => group.snapshot().await,
            None => Vec::new(),
        }
    }

    pub(crate) async fn group(&self, name: &str) -> Option<Arc<RoomGroup>> {
        self.rooms.read().await.get(name).cloned()
    }
}
