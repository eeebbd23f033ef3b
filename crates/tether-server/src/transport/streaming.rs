//! Long-lived push adapters. Each response carries frames until its byte or
//! time budget is spent; the client then re-requests and the session
//! resumes on the new response.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use tracing::instrument;

use super::{TransportKind, attach_response, callback_param, session_path};
use crate::router::SessionRouter;
use crate::session::ConnectionInfo;

/// `POST /{server}/{session}/xhr_streaming`
#[instrument(skip_all, fields(session_id = %session))]
pub(crate) async fn xhr_streaming(
    State(router): State<Arc<SessionRouter>>,
    Path((server, session)): Path<(String, String)>,
    jar: CookieJar,
    info: ConnectionInfo,
) -> Response {
    open(&router, &server, &session, jar, info, TransportKind::XhrStreaming)
}

/// `GET /{server}/{session}/eventsource`
#[instrument(skip_all, fields(session_id = %session))]
pub(crate) async fn eventsource(
    State(router): State<Arc<SessionRouter>>,
    Path((server, session)): Path<(String, String)>,
    jar: CookieJar,
    info: ConnectionInfo,
) -> Response {
    open(&router, &server, &session, jar, info, TransportKind::EventSource)
}

/// `GET /{server}/{session}/htmlfile?c=<callback>`
#[instrument(skip_all, fields(session_id = %session))]
pub(crate) async fn htmlfile(
    State(router): State<Arc<SessionRouter>>,
    Path((server, session)): Path<(String, String)>,
    jar: CookieJar,
    info: ConnectionInfo,
) -> Response {
    match callback_param(&info) {
        Ok(callback) => open(&router, &server, &session, jar, info, TransportKind::HtmlFile { callback }),
        Err(e) => e.into_response(),
    }
}

fn open(
    router: &Arc<SessionRouter>,
    server: &str,
    session: &str,
    jar: CookieJar,
    info: ConnectionInfo,
    kind: TransportKind,
) -> Response {
    match session_path(server, session) {
        Ok(id) => {
            let session = router.get_or_create(id);
            attach_response(router.registry(), router.settings(), &session, kind, info, jar)
        }
        Err(e) => e.into_response(),
    }
}
