use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::{registry::RoomRegistry, supervisor::ConnectionSupervisor};

/// Fans one event out to every current member of a room, the sender
/// included. Publishes to the same room are serialized by the room's
/// publish lock so no recipient ever sees two messages reordered;
/// unrelated rooms share nothing and never contend.
pub struct BroadcastHub {
    registry: Arc<RoomRegistry>,
    supervisor: Arc<ConnectionSupervisor>,
}

impl BroadcastHub {
    pub fn new(registry: Arc<RoomRegistry>, supervisor: Arc<ConnectionSupervisor>) -> Self {
        Self {
            registry,
            supervisor,
        }
    }

    /// Best-effort delivery to every member. A recipient that cannot take
    /// the frame (closed or backed-up channel) is treated as disconnected:
    /// it is shut down and deregistered in the background, and delivery to
    /// the rest proceeds untouched. Nothing here reaches the publisher.
    pub async fn publish<T: Serialize>(&self, room: &str, event: &T) {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(room, error = %e, "failed to serialize event");
                return;
            }
        };

        let Some(group) = self.registry.group(room).await else {
            return;
        };

        let dead = {
            let _serialized = group.publish_lock.lock().await;
            let members = group.snapshot().await;
            debug!(room, recipients = members.len(), "broadcasting event");

            let mut dead = Vec::new();
            for member in members {
                if !member.deliver(frame.clone()) {
                    dead.push(member);
                }
            }
            dead
        };

        for member in dead {
            warn!(room, session = %member.id, "dropping unresponsive session");
            member.shutdown();

            let registry = self.registry.clone();
            let supervisor = self.supervisor.clone();
            let room = room.to_owned();
            tokio::spawn(async move {
                registry.leave(&room, member.id).await;
                supervisor.remove(member.id).await;
            });
        }
    }
}
