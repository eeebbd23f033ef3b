//! Demo applications served by the binary.

use std::sync::Arc;

use tether_server::{AppError, Connection, ConnectionFactory, ConnectionInfo, Session, SessionGroup};
use tracing::debug;

/// Sends every message back to its sender.
struct Echo;

impl Connection for Echo {
    fn on_message(&self, session: &Arc<Session>, message: String) -> Result<(), AppError> {
        session.send(&message)?;
        Ok(())
    }
}

/// Factory for the echo endpoint.
pub fn echo() -> Arc<dyn ConnectionFactory> {
    Arc::new(|| -> Box<dyn Connection> { Box::new(Echo) })
}

/// Member of a shared room: inbound messages go to every open member.
struct Broadcast {
    room: Arc<SessionGroup>,
}

impl Connection for Broadcast {
    fn on_open(&self, session: &Arc<Session>, info: &ConnectionInfo) {
        debug!(session_id = %session.id(), ip = ?info.ip, "joined room");
        self.room.add(session.clone());
    }

    fn on_message(&self, _session: &Arc<Session>, message: String) -> Result<(), AppError> {
        let _ = self.room.broadcast_text(&message);
        Ok(())
    }

    fn on_close(&self, session: &Arc<Session>) {
        self.room.remove(session.id());
        debug!(session_id = %session.id(), members = self.room.len(), "left room");
    }
}

/// Factory for the broadcast endpoint. All sessions it creates share `room`.
pub fn broadcast(room: Arc<SessionGroup>) -> Arc<dyn ConnectionFactory> {
    Arc::new(move || -> Box<dyn Connection> {
        Box::new(Broadcast { room: room.clone() })
    })
}
