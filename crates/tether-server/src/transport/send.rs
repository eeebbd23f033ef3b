//! Inbound delivery for the half-duplex transports.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use bytes::Bytes;
use tracing::{debug, instrument};
use url::form_urlencoded;

use super::{affinity, response, session_path};
use crate::errors::TransportError;
use crate::router::SessionRouter;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// `POST /{server}/{session}/xhr_send`
#[instrument(skip_all, fields(session_id = %session))]
pub(crate) async fn xhr_send(
    State(router): State<Arc<SessionRouter>>,
    Path((server, session)): Path<(String, String)>,
    jar: CookieJar,
    body: Bytes,
) -> Response {
    match deliver(&router, &server, &session, &body) {
        Ok(()) => {
            let mut resp = response("text/plain; charset=UTF-8", affinity(jar, router.settings()), ());
            *resp.status_mut() = StatusCode::NO_CONTENT;
            resp
        }
        Err(e) => e.into_response(),
    }
}

/// `POST /{server}/{session}/jsonp_send`, body raw or form field `d`.
#[instrument(skip_all, fields(session_id = %session))]
pub(crate) async fn jsonp_send(
    State(router): State<Arc<SessionRouter>>,
    Path((server, session)): Path<(String, String)>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> Response {
    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with(FORM_CONTENT_TYPE));
    let payload = if is_form {
        form_urlencoded::parse(&body)
            .find(|(key, _)| key == "d")
            .map(|(_, value)| Bytes::from(value.into_owned()))
            .unwrap_or_default()
    } else {
        body
    };

    match deliver(&router, &server, &session, &payload) {
        Ok(()) => response("text/plain; charset=UTF-8", affinity(jar, router.settings()), "ok"),
        Err(e) => e.into_response(),
    }
}

fn deliver(router: &SessionRouter, server: &str, session: &str, payload: &[u8]) -> Result<(), TransportError> {
    let id = session_path(server, session)?;
    let session = router.get(&id).ok_or(TransportError::SessionNotFound)?;
    if payload.is_empty() {
        return Err(TransportError::PayloadExpected);
    }
    let text = String::from_utf8_lossy(payload);
    let messages = tether_core::decode_payload(&text).map_err(TransportError::BrokenJson)?;

    debug!(count = messages.len(), "inbound messages");
    let _ = router.promote(&id);
    session.on_messages(messages);
    Ok(())
}
