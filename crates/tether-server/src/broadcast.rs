//! Message fan-out across sessions.
//!
//! A message is encoded once and the encoded form is shared by every
//! recipient's queue.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tether_core::{EncodedMessage, SessionId};
use tracing::{debug, warn};

use crate::errors::SessionError;
use crate::session::Session;

/// Enqueue `message` on each session. Returns how many accepted it; closed
/// sessions are skipped.
pub fn send_encoded<'a>(sessions: impl IntoIterator<Item = &'a Arc<Session>>, message: &EncodedMessage) -> usize {
    let mut delivered = 0;
    for session in sessions {
        match session.send_encoded(message.clone()) {
            Ok(()) => delivered += 1,
            Err(e) => debug!(session_id = %session.id(), error = %e, "broadcast skipped session"),
        }
    }
    delivered
}

/// A named set of sessions that receive the same messages, such as the
/// members of a chat room.
pub struct SessionGroup {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionGroup {
    /// Create an empty group.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Add a session.
    pub fn add(&self, session: Arc<Session>) {
        let _ = self.sessions.write().insert(session.id().clone(), session);
    }

    /// Remove a session by ID.
    pub fn remove(&self, id: &str) {
        let _ = self.sessions.write().remove(id);
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether the group has no members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize `message` and send its JSON text to every member.
    pub fn broadcast<T: Serialize + ?Sized>(&self, message: &T) -> Result<usize, SessionError> {
        let encoded = EncodedMessage::json(message)?;
        Ok(self.broadcast_encoded(&encoded))
    }

    /// Send a text message to every member.
    pub fn broadcast_text(&self, message: &str) -> usize {
        self.broadcast_encoded(&EncodedMessage::text(message))
    }

    fn broadcast_encoded(&self, message: &EncodedMessage) -> usize {
        // snapshot so sends never run under the group lock
        let members: Vec<Arc<Session>> = self.sessions.read().values().cloned().collect();
        let delivered = send_encoded(&members, message);
        if delivered < members.len() {
            warn!(members = members.len(), delivered, "broadcast reached a subset of the group");
        }
        debug!(recipients = delivered, "broadcast");
        delivered
    }
}

impl Default for SessionGroup {
    fn default() -> Self {
        Self::new()
    }
}
