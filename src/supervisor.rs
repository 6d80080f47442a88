use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::session::SessionHandle;

/// Process-wide table of every open session. Entries appear as soon as a
/// channel is accepted (before the handshake outcome is known, so aborted
/// attempts are still tracked) and must be gone once the session reaches
/// `Closed`, whatever path it took there.
pub struct ConnectionSupervisor {
    sessions: RwLock<HashMap<Uuid, Arc<SessionHandle>>>,
}

impl ConnectionSupervisor {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, handle: Arc<SessionHandle>) {
        debug!(session = %handle.id, "session registered");
        self.sessions.write().await.insert(handle.id, handle);
    }

    /// Idempotent: racing removal paths (session task, broadcast cleanup)
    /// both land here.
    pub async fn remove(&self, session_id: Uuid) {
        if self.sessions.write().await.remove(&session_id).is_some() {
            debug!(session = %session_id, "session removed");
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Signal every live session to close. Each session then walks its own
    /// deregistration path.
    pub async fn shutdown_all(&self) {
        let handles: Vec<_> = self.sessions.read().await.values().cloned().collect();
        for handle in handles {
            handle.shutdown();
        }
    }
}

impl Default for ConnectionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
