//! Binds URL patterns to transport adapters and owns the session registry.

use std::sync::Arc;

use axum::Router;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tether_core::{EncodedMessage, SessionId};
use tether_settings::{ProtocolSettings, TransportName};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::app::ConnectionFactory;
use crate::broadcast;
use crate::errors::SessionError;
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::transport::{polling, send, streaming, websocket};

const GREETING: &str = "Welcome to SockJS!\n";

/// One mounted endpoint: its sessions, its application, and its routes.
pub struct SessionRouter {
    settings: Arc<ProtocolSettings>,
    registry: Arc<SessionRegistry<Session>>,
    factory: Arc<dyn ConnectionFactory>,
    reaper_tx: mpsc::UnboundedSender<SessionId>,
    reaper_rx: Mutex<mpsc::UnboundedReceiver<SessionId>>,
}

impl SessionRouter {
    /// Create a router serving `factory`'s application.
    pub fn new(settings: ProtocolSettings, factory: Arc<dyn ConnectionFactory>) -> Arc<Self> {
        let (reaper_tx, reaper_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            settings: Arc::new(settings),
            registry: Arc::new(SessionRegistry::new()),
            factory,
            reaper_tx,
            reaper_rx: Mutex::new(reaper_rx),
        })
    }

    /// Protocol settings.
    pub fn settings(&self) -> &Arc<ProtocolSettings> {
        &self.settings
    }

    /// The session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry<Session>> {
        &self.registry
    }

    /// Build a session for this router's application.
    ///
    /// Registered sessions expire after the disconnect delay unless
    /// promoted. Unregistered ones (WebSocket) are owned by their
    /// connection and cannot be looked up.
    pub fn create_session(&self, id: Option<SessionId>, register: bool) -> Arc<Session> {
        let id = id.unwrap_or_default();
        let reaper = register.then(|| self.reaper_tx.clone());
        let session = Session::new(id, self.settings.clone(), self.factory.create(), reaper);
        if register {
            let _ = self.registry.add(session.clone(), Some(self.settings.disconnect_delay()));
        }
        debug!(session_id = %session.id(), register, "session created");
        session
    }

    /// Look up a registered session.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.registry.get(id)
    }

    /// Look up a registered session, creating it if absent.
    pub fn get_or_create(&self, id: SessionId) -> Arc<Session> {
        let (session, created) =
            self.registry
                .get_or_insert_with(&id, Some(self.settings.disconnect_delay()), || {
                    Session::new(
                        id.clone(),
                        self.settings.clone(),
                        self.factory.create(),
                        Some(self.reaper_tx.clone()),
                    )
                });
        if created {
            debug!(session_id = %id, "session created");
        }
        session
    }

    /// Keep a session alive for another disconnect delay.
    pub fn promote(&self, id: &str) -> bool {
        self.registry.promote(id)
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Send `message` to every session in `sessions`, encoding it once.
    pub fn broadcast<'a, T>(
        &self,
        sessions: impl IntoIterator<Item = &'a Arc<Session>>,
        message: &T,
    ) -> Result<usize, SessionError>
    where
        T: Serialize + ?Sized,
    {
        let encoded = EncodedMessage::json(message)?;
        Ok(broadcast::send_encoded(sessions, &encoded))
    }

    /// Send `message` to every registered session.
    pub fn broadcast_all<T: Serialize + ?Sized>(&self, message: &T) -> Result<usize, SessionError> {
        let sessions = self.registry.items();
        self.broadcast(&sessions, message)
    }

    /// Purge closed sessions, then expire idle ones.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut purged = 0;
        {
            let mut rx = self.reaper_rx.lock();
            while let Ok(id) = rx.try_recv() {
                if self.registry.remove_where(&id, Session::is_closed).is_some() {
                    purged += 1;
                }
            }
        }
        purged + self.registry.sweep(now).len()
    }

    /// Run [`SessionRouter::sweep`] every sweep interval until cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(router.settings.sweep_interval());
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = router.sweep(Instant::now());
                        if removed > 0 {
                            debug!(removed, live = router.session_count(), "expired sessions");
                        }
                    }
                    () = cancel.cancelled() => break,
                }
            }
        })
    }

    /// Close and drop every registered session.
    pub fn close_all(&self) -> usize {
        let closed = self.registry.clear();
        if closed > 0 {
            info!(closed, "closed all sessions");
        }
        closed
    }

    /// The axum routes for this endpoint, relative to its prefix.
    pub fn routes(self: &Arc<Self>) -> Router {
        let s = &self.settings;
        let mut router = Router::new()
            .route("/", get(greeting_handler))
            .route("/info", get(info_handler));

        if s.is_enabled(TransportName::Websocket) {
            router = router.route("/{server}/{session}/websocket", get(websocket::upgrade));
        }
        if s.is_enabled(TransportName::XhrPolling) {
            router = router.route("/{server}/{session}/xhr", post(polling::xhr_poll));
        }
        let uses_xhr_send = [
            TransportName::XhrPolling,
            TransportName::XhrStreaming,
            TransportName::Eventsource,
            TransportName::Htmlfile,
        ]
        .into_iter()
        .any(|t| s.is_enabled(t));
        if uses_xhr_send {
            router = router.route("/{server}/{session}/xhr_send", post(send::xhr_send));
        }
        if s.is_enabled(TransportName::XhrStreaming) {
            router = router.route("/{server}/{session}/xhr_streaming", post(streaming::xhr_streaming));
        }
        if s.is_enabled(TransportName::Eventsource) {
            router = router.route("/{server}/{session}/eventsource", get(streaming::eventsource));
        }
        if s.is_enabled(TransportName::JsonpPolling) {
            router = router
                .route("/{server}/{session}/jsonp", get(polling::jsonp_poll))
                .route("/{server}/{session}/jsonp_send", post(send::jsonp_send));
        }
        if s.is_enabled(TransportName::Htmlfile) {
            router = router.route("/{server}/{session}/htmlfile", get(streaming::htmlfile));
        }

        router
            .layer(DefaultBodyLimit::max(s.max_message_size))
            .with_state(self.clone())
    }
}

async fn greeting_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; charset=UTF-8")], GREETING)
}

async fn info_handler(State(router): State<Arc<SessionRouter>>) -> impl IntoResponse {
    let s = router.settings();
    (
        [(header::CACHE_CONTROL, "no-store, no-cache, must-revalidate, max-age=0")],
        Json(json!({
            "websocket": s.is_enabled(TransportName::Websocket),
            "cookie_needed": s.cookie_needed,
            "origins": ["*:*"],
            "entropy": rand::random::<u32>(),
        })),
    )
}
