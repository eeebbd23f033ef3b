//! The write end of an attached transport.
//!
//! A [`Handler`] is what a session holds while a transport is bound: the
//! sending half of a channel whose receiving half is owned by the transport
//! (an HTTP response body or a WebSocket writer task). Dropping the handler
//! closes the channel, which ends the response; the session never owns the
//! connection itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tether_core::Frame;
use tether_settings::ProtocolSettings;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::transport::TransportKind;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Result of writing one frame to a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written; the handler stays bound.
    Sent,
    /// Written, and the handler is done: a polling response got its one
    /// frame, a streaming response spent its budget, or the frame was
    /// terminal. The session should unbind it.
    Finished,
    /// The transport is gone or stalled; nothing was written.
    Failed,
}

/// A transport bound (or about to be bound) to a session.
pub struct Handler {
    id: u64,
    kind: TransportKind,
    tx: mpsc::Sender<String>,
    bytes_sent: usize,
    byte_budget: Option<usize>,
    deadline: Option<Instant>,
}

impl Handler {
    /// Create a handler and the receiver the transport drains.
    pub fn new(kind: TransportKind, settings: &ProtocolSettings) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(settings.send_queue_capacity);
        let streaming = kind.is_streaming();
        let handler = Self {
            id: NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            tx,
            bytes_sent: 0,
            byte_budget: streaming.then_some(settings.response_limit),
            deadline: settings
                .response_time_limit()
                .filter(|_| streaming)
                .map(|limit: Duration| Instant::now() + limit),
        };
        (handler, rx)
    }

    /// Process-unique handler ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The wire mechanism this handler speaks.
    pub fn kind(&self) -> &TransportKind {
        &self.kind
    }

    /// Total bytes handed to the transport so far.
    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    /// Write the transport's prelude, if it has one.
    ///
    /// Returns `false` if the transport is already gone.
    pub fn write_prelude(&mut self) -> bool {
        match self.kind.prelude() {
            Some(prelude) => self.write(prelude),
            None => true,
        }
    }

    /// Encode and write one frame.
    pub fn send_pack(&mut self, frame: &Frame) -> Delivery {
        let packed = self.kind.send_pack(&frame.encode());
        if !self.write(packed) {
            return Delivery::Failed;
        }
        if frame.is_terminal() || self.kind.is_one_shot() || self.budget_spent() {
            Delivery::Finished
        } else {
            Delivery::Sent
        }
    }

    fn write(&mut self, text: String) -> bool {
        let len = text.len();
        if self.tx.try_send(text).is_ok() {
            self.bytes_sent += len;
            true
        } else {
            false
        }
    }

    fn budget_spent(&self) -> bool {
        self.byte_budget.is_some_and(|limit| self.bytes_sent >= limit)
            || self.deadline.is_some_and(|at| Instant::now() >= at)
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("bytes_sent", &self.bytes_sent)
            .finish_non_exhaustive()
    }
}
