//! One logical connection: state machine, outbound queue, flush policy.
//!
//! State only moves forward:
//!
//! ```text
//! Connecting ──attach──▶ Open ──close──▶ Closing ──▶ Closed
//!      └─────────────────close───────────────────────▲
//! ```
//!
//! `Closing` exists only while a close is being written to the attached
//! transport; it is never observable outside [`Session::close`].
//!
//! All mutation happens under one short-lived lock. Application callbacks,
//! deferred flushes and deferred closes run with the lock released, and
//! every deferred task re-checks the state before acting.

mod handler;
pub mod heartbeat;
mod info;

pub use handler::{Delivery, Handler};
pub use info::ConnectionInfo;

use std::fmt;
use std::sync::{Arc, Weak};

use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use tether_core::{CloseReason, EncodedMessage, Frame, SessionId};
use tether_settings::{FlushMode, ProtocolSettings};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::Connection;
use crate::errors::SessionError;
use crate::registry::{Expirable, Retention};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Created; no transport has attached yet.
    Connecting,
    /// `o` was sent; messages flow.
    Open,
    /// A close is being written.
    Closing,
    /// Terminal.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// An attach attempt that was refused.
///
/// The handler is handed back so the transport can answer on its own
/// connection with a close frame; the session and any bound handler are
/// untouched.
pub struct Rejected {
    /// The handler that tried to attach.
    pub handler: Handler,
    /// Why it was refused.
    pub reason: CloseReason,
}

impl Rejected {
    /// Write the close frame to the refused handler and drop it.
    pub fn respond(mut self) {
        let _ = self.handler.send_pack(&Frame::Close(self.reason));
    }
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("handler", &self.handler.id())
            .field("reason", &self.reason)
            .finish()
    }
}

struct Inner {
    state: SessionState,
    queue: Vec<EncodedMessage>,
    handler: Option<Handler>,
    heartbeat: Option<CancellationToken>,
    info: Option<ConnectionInfo>,
    close_reason: Option<CloseReason>,
    flush_scheduled: bool,
}

/// A transport-independent logical connection.
pub struct Session {
    id: SessionId,
    settings: Arc<ProtocolSettings>,
    app: Box<dyn Connection>,
    reaper: Option<mpsc::UnboundedSender<SessionId>>,
    this: Weak<Session>,
    inner: Mutex<Inner>,
}

impl Session {
    /// Create a session in the `Connecting` state.
    ///
    /// `reaper`, when given, receives the session ID once the session
    /// closes so its owner can purge it.
    pub fn new(
        id: SessionId,
        settings: Arc<ProtocolSettings>,
        app: Box<dyn Connection>,
        reaper: Option<mpsc::UnboundedSender<SessionId>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id,
            settings,
            app,
            reaper,
            this: this.clone(),
            inner: Mutex::new(Inner {
                state: SessionState::Connecting,
                queue: Vec::new(),
                handler: None,
                heartbeat: None,
                info: None,
                close_reason: None,
                flush_scheduled: false,
            }),
        })
    }

    /// Session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Whether the session reached its terminal state.
    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Why the session closed; `None` while it is alive.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.lock().close_reason.clone()
    }

    /// Details of the request that first attached, if any has.
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.inner.lock().info.clone()
    }

    /// ID of the currently bound handler.
    pub fn handler_id(&self) -> Option<u64> {
        self.inner.lock().handler.as_ref().map(Handler::id)
    }

    /// Number of messages waiting for a transport.
    pub fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }

    // ── Transport side ──────────────────────────────────────────────────

    /// Bind a transport.
    ///
    /// The first successful attach sends `o`, opens the session and calls the
    /// application's `on_open`. Later attaches flush whatever was queued
    /// while no transport was bound. At most one handler is bound at a time:
    /// the one already bound always wins.
    pub fn attach(self: &Arc<Self>, handler: Handler, info: ConnectionInfo) -> Result<(), Rejected> {
        let opened = {
            let mut inner = self.inner.lock();

            if inner.state >= SessionState::Closing {
                let reason = inner.close_reason.clone().unwrap_or_default();
                return Err(self.reject(handler, reason));
            }
            if self.settings.verify_ip {
                if let Some(original) = &inner.info {
                    if original.ip != info.ip {
                        warn!(
                            session_id = %self.id,
                            expected = ?original.ip,
                            got = ?info.ip,
                            "attach from a different address"
                        );
                        return Err(self.reject(handler, CloseReason::IP_MISMATCH));
                    }
                }
            }
            if let Some(bound) = &inner.handler {
                debug!(session_id = %self.id, bound = bound.id(), "another handler is bound");
                return Err(self.reject(handler, CloseReason::ANOTHER_CONNECTION));
            }

            debug!(
                session_id = %self.id,
                handler_id = handler.id(),
                transport = %handler.kind().name(),
                "handler attached"
            );
            if inner.info.is_none() {
                inner.info = Some(info);
            }
            inner.handler = Some(handler);

            let opening = inner.state == SessionState::Connecting;
            if opening {
                inner.state = SessionState::Open;
                self.deliver(&mut inner, Frame::Open);
            }
            // messages sent while connecting follow the open frame
            self.flush_locked(&mut inner);
            if inner.handler.is_some() {
                self.start_heartbeat(&mut inner);
            }
            if opening { inner.info.clone() } else { None }
        };

        if let Some(info) = opened {
            info!(session_id = %self.id, ip = ?info.ip, "session opened");
            counter!("tether_sessions_opened_total").increment(1);
            gauge!("tether_sessions_open").increment(1.0);
            self.app.on_open(self, &info);
        }
        Ok(())
    }

    /// Unbind a handler without closing the session.
    ///
    /// Returns `false` if `handler_id` is not the bound handler.
    pub fn detach(&self, handler_id: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.handler.as_ref().map(Handler::id) != Some(handler_id) {
            return false;
        }
        Self::release_handler(&mut inner);
        debug!(session_id = %self.id, handler_id, "handler detached");
        true
    }

    /// The transport behind `handler_id` went away on its own (client
    /// disconnect, dropped response). Unbinds it and schedules a close.
    pub fn handler_lost(&self, handler_id: u64) {
        if self.detach(handler_id) {
            info!(session_id = %self.id, handler_id, "transport lost");
            self.delayed_close(CloseReason::CONNECTION_INTERRUPTED);
        }
    }

    /// Dispatch inbound messages to the application, in order.
    ///
    /// Ignored unless the session is open. An application error closes the
    /// session with [`CloseReason::SERVER_ERROR`] and drops the rest of the
    /// batch.
    pub fn on_messages(self: &Arc<Self>, messages: Vec<String>) {
        for message in messages {
            if self.state() != SessionState::Open {
                debug!(session_id = %self.id, "dropping inbound message, session not open");
                return;
            }
            if let Err(e) = self.app.on_message(self, message) {
                error!(session_id = %self.id, error = %e, "message handler failed");
                self.close(CloseReason::SERVER_ERROR);
                return;
            }
        }
    }

    /// Send a heartbeat if open with a bound handler. Returns whether one
    /// was sent.
    pub fn send_heartbeat(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Open || inner.handler.is_none() {
            return false;
        }
        self.deliver(&mut inner, Frame::Heartbeat);
        true
    }

    // ── Application side ────────────────────────────────────────────────

    /// Send a text message.
    pub fn send(&self, message: &str) -> Result<(), SessionError> {
        self.send_encoded(EncodedMessage::text(message))
    }

    /// Serialize `value` to JSON and send that text as a message.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), SessionError> {
        self.send_encoded(EncodedMessage::json(value)?)
    }

    /// Enqueue an already-encoded message.
    ///
    /// With [`FlushMode::Immediate`] a message goes straight to the bound
    /// handler when nothing else is pending. Otherwise it is queued and a
    /// single flush is scheduled for the next scheduler tick. With no
    /// handler bound, messages wait for the next attach.
    pub fn send_encoded(&self, message: EncodedMessage) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        if inner.state >= SessionState::Closing {
            return Err(SessionError::Closed(self.id.clone()));
        }

        let direct = self.settings.flush_mode == FlushMode::Immediate
            && inner.state == SessionState::Open
            && inner.handler.is_some()
            && inner.queue.is_empty();
        if direct {
            self.deliver(&mut inner, Frame::Messages(vec![message]));
        } else {
            inner.queue.push(message);
            if inner.handler.is_some() {
                self.schedule_flush(&mut inner);
            }
        }
        Ok(())
    }

    /// Drain the queue into one frame for the bound handler.
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        inner.flush_scheduled = false;
        if inner.state != SessionState::Open || inner.handler.is_none() {
            return;
        }
        self.flush_locked(&mut inner);
    }

    /// Close the session.
    ///
    /// The first close fixes the reason; later calls are no-ops. Messages
    /// still queued are written ahead of the close frame when a handler is
    /// bound; otherwise they are discarded.
    pub fn close(self: &Arc<Self>, reason: CloseReason) {
        let was_open = {
            let mut inner = self.inner.lock();
            if inner.state >= SessionState::Closing {
                return;
            }
            let was_open = inner.state == SessionState::Open;
            inner.state = SessionState::Closing;
            inner.close_reason = Some(reason.clone());

            self.flush_locked(&mut inner);
            inner.queue.clear();
            if inner.handler.is_some() {
                self.deliver(&mut inner, Frame::Close(reason.clone()));
            }
            Self::release_handler(&mut inner);
            inner.state = SessionState::Closed;
            was_open
        };

        info!(session_id = %self.id, code = reason.code, reason = %reason.message, "session closed");
        counter!("tether_sessions_closed_total").increment(1);
        if let Some(reaper) = &self.reaper {
            let _ = reaper.send(self.id.clone());
        }
        if was_open {
            gauge!("tether_sessions_open").decrement(1.0);
            self.app.on_close(self);
        }
    }

    /// Close on the next scheduler tick instead of from the current call
    /// stack. An explicit close that lands first wins.
    ///
    /// Without a runtime there is no next tick, so the close runs inline.
    pub fn delayed_close(&self, reason: CloseReason) {
        if tokio::runtime::Handle::try_current().is_ok() {
            self.spawn_close(reason);
        } else if let Some(this) = self.this.upgrade() {
            this.close(reason);
        }
    }

    // ── Internals (lock held) ───────────────────────────────────────────

    fn reject(&self, handler: Handler, reason: CloseReason) -> Rejected {
        counter!("tether_attach_rejected_total", "code" => reason.code.to_string()).increment(1);
        Rejected { handler, reason }
    }

    /// Write one frame to the bound handler and act on the outcome.
    fn deliver(&self, inner: &mut Inner, frame: Frame) {
        let Some(handler) = inner.handler.as_mut() else {
            return;
        };
        match handler.send_pack(&frame) {
            Delivery::Sent => {}
            Delivery::Finished => Self::release_handler(inner),
            Delivery::Failed => {
                warn!(session_id = %self.id, handler_id = handler.id(), "transport write failed");
                Self::release_handler(inner);
                self.spawn_close(CloseReason::CONNECTION_INTERRUPTED);
            }
        }
    }

    /// Lock-held variant of [`Session::delayed_close`]: never closes inline.
    /// Without a runtime the session is left for the sweeper to expire.
    fn spawn_close(&self, reason: CloseReason) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        if tokio::runtime::Handle::try_current().is_ok() {
            let _ = tokio::spawn(async move { this.close(reason) });
        }
    }

    fn flush_locked(&self, inner: &mut Inner) {
        if inner.queue.is_empty() || inner.handler.is_none() {
            return;
        }
        let messages = std::mem::take(&mut inner.queue);
        self.deliver(inner, Frame::Messages(messages));
    }

    fn schedule_flush(&self, inner: &mut Inner) {
        if inner.flush_scheduled {
            return;
        }
        let Some(this) = self.this.upgrade() else {
            return;
        };
        if tokio::runtime::Handle::try_current().is_err() {
            self.flush_locked(inner);
            return;
        }
        inner.flush_scheduled = true;
        let _ = tokio::spawn(async move { this.flush() });
    }

    fn start_heartbeat(&self, inner: &mut Inner) {
        if let Some(previous) = inner.heartbeat.take() {
            previous.cancel();
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let cancel = CancellationToken::new();
        let _ = tokio::spawn(heartbeat::run_heartbeat(
            self.this.clone(),
            self.settings.heartbeat_interval(),
            cancel.clone(),
        ));
        inner.heartbeat = Some(cancel);
    }

    fn release_handler(inner: &mut Inner) {
        inner.handler = None;
        if let Some(heartbeat) = inner.heartbeat.take() {
            heartbeat.cancel();
        }
    }
}

impl Expirable for Session {
    fn key(&self) -> &SessionId {
        &self.id
    }

    /// Expiry keeps a session that still has a transport mid-request;
    /// otherwise it closes with [`CloseReason::GO_AWAY`].
    fn on_delete(self: &Arc<Self>, forced: bool) -> Retention {
        if !forced {
            let inner = self.inner.lock();
            if inner.handler.is_some() && inner.state == SessionState::Open {
                return Retention::Keep;
            }
        }
        self.close(CloseReason::GO_AWAY);
        Retention::Release
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("pending", &inner.queue.len())
            .field("handler", &inner.handler.as_ref().map(Handler::id))
            .finish_non_exhaustive()
    }
}
