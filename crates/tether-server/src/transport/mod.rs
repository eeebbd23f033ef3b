//! Transport adapters: axum handlers that bind one wire mechanism to a
//! session.
//!
//! HTTP adapters hand the session a [`Handler`] and return a streaming body
//! fed by the handler's channel. The body owns a [`DetachGuard`]; when axum
//! drops the body (response finished or client gone) the guard promotes
//! the session and reports the handler as lost if it was still bound.

mod kind;
pub(crate) mod polling;
pub(crate) mod send;
pub(crate) mod streaming;
pub(crate) mod websocket;

pub use kind::TransportKind;

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::{Arc, LazyLock};
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use bytes::Bytes;
use futures::Stream;
use regex::Regex;
use tether_core::SessionId;
use tether_settings::ProtocolSettings;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::errors::TransportError;
use crate::registry::SessionRegistry;
use crate::session::{ConnectionInfo, Handler, Session};

/// Load-balancer affinity cookie.
pub const AFFINITY_COOKIE: &str = "JSESSIONID";

const NO_CACHE: &str = "no-store, no-cache, must-revalidate, max-age=0";

static CALLBACK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.]+$").expect("callback pattern compiles"));

/// Validate the `/{server}/{session}` path segments and return the session
/// ID. Empty segments and segments containing `.` are rejected.
pub(crate) fn session_path(server: &str, session: &str) -> Result<SessionId, TransportError> {
    let valid = |s: &str| !s.is_empty() && !s.contains('.');
    if valid(server) && valid(session) {
        Ok(SessionId::from(session))
    } else {
        Err(TransportError::BadPath)
    }
}

/// The `c` query argument of callback transports.
pub(crate) fn callback_param(info: &ConnectionInfo) -> Result<String, TransportError> {
    let callback = info
        .argument("c")
        .filter(|c| !c.is_empty())
        .ok_or(TransportError::CallbackRequired)?;
    if CALLBACK_PATTERN.is_match(callback) {
        Ok(callback.to_owned())
    } else {
        Err(TransportError::InvalidCallback)
    }
}

/// Add the affinity cookie when the deployment asks for one, echoing the
/// client's value or falling back to `dummy`.
pub(crate) fn affinity(jar: CookieJar, settings: &ProtocolSettings) -> CookieJar {
    if !settings.cookie_needed {
        return jar;
    }
    let value = jar
        .get(AFFINITY_COOKIE)
        .map_or_else(|| "dummy".to_owned(), |c| c.value().to_owned());
    jar.add(Cookie::build((AFFINITY_COOKIE, value)).path("/"))
}

/// Build a non-cacheable response with the given content type.
pub(crate) fn response(content_type: &'static str, jar: CookieJar, body: impl Into<Body>) -> Response {
    let mut resp = (jar, body.into()).into_response();
    let headers = resp.headers_mut();
    let _ = headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    let _ = headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    resp
}

/// Unbinds a transport from its session when the transport goes away.
pub struct DetachGuard {
    registry: Arc<SessionRegistry<Session>>,
    session: Arc<Session>,
    handler_id: u64,
}

impl DetachGuard {
    /// Guard `handler_id` on `session`.
    pub fn new(registry: Arc<SessionRegistry<Session>>, session: Arc<Session>, handler_id: u64) -> Self {
        Self {
            registry,
            session,
            handler_id,
        }
    }
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        let _ = self.registry.promote(self.session.id());
        self.session.handler_lost(self.handler_id);
    }
}

/// Response body fed by a handler's channel.
pub struct HandlerStream {
    rx: ReceiverStream<String>,
    _guard: Option<DetachGuard>,
}

impl HandlerStream {
    fn new(rx: mpsc::Receiver<String>, guard: Option<DetachGuard>) -> Self {
        Self {
            rx: ReceiverStream::new(rx),
            _guard: guard,
        }
    }
}

impl Stream for HandlerStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|chunk| chunk.map(|text| Ok(Bytes::from(text))))
    }
}

/// Attach a fresh handler of `kind` to `session` and return the streaming
/// response that carries its frames.
///
/// A refused attach still answers on this response, with the close frame
/// explaining the refusal.
pub(crate) fn attach_response(
    registry: &Arc<SessionRegistry<Session>>,
    settings: &ProtocolSettings,
    session: &Arc<Session>,
    kind: TransportKind,
    info: ConnectionInfo,
    jar: CookieJar,
) -> Response {
    let content_type = kind.content_type();
    let (mut handler, rx) = Handler::new(kind, settings);
    let handler_id = handler.id();
    let _ = handler.write_prelude();
    let _ = registry.promote(session.id());

    let guard = match session.attach(handler, info) {
        Ok(()) => Some(DetachGuard::new(registry.clone(), session.clone(), handler_id)),
        Err(rejected) => {
            debug!(session_id = %session.id(), code = rejected.reason.code, "attach refused");
            rejected.respond();
            None
        }
    };

    let body = Body::from_stream(HandlerStream::new(rx, guard));
    response(content_type, affinity(jar, settings), body)
}
