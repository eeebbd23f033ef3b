//! Short-polling adapters: one request, one frame.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use tracing::instrument;

use super::{TransportKind, attach_response, callback_param, session_path};
use crate::router::SessionRouter;
use crate::session::ConnectionInfo;

/// `POST /{server}/{session}/xhr`
#[instrument(skip_all, fields(session_id = %session))]
pub(crate) async fn xhr_poll(
    State(router): State<Arc<SessionRouter>>,
    Path((server, session)): Path<(String, String)>,
    jar: CookieJar,
    info: ConnectionInfo,
) -> Response {
    poll(&router, &server, &session, jar, info, |_| Ok(TransportKind::XhrPolling))
}

/// `GET /{server}/{session}/jsonp?c=<callback>`
#[instrument(skip_all, fields(session_id = %session))]
pub(crate) async fn jsonp_poll(
    State(router): State<Arc<SessionRouter>>,
    Path((server, session)): Path<(String, String)>,
    jar: CookieJar,
    info: ConnectionInfo,
) -> Response {
    poll(&router, &server, &session, jar, info, |info| {
        Ok(TransportKind::JsonpPolling {
            callback: callback_param(info)?,
        })
    })
}

fn poll(
    router: &Arc<SessionRouter>,
    server: &str,
    session: &str,
    jar: CookieJar,
    info: ConnectionInfo,
    kind: impl FnOnce(&ConnectionInfo) -> Result<TransportKind, crate::errors::TransportError>,
) -> Response {
    let result = session_path(server, session).and_then(|id| Ok((id, kind(&info)?)));
    match result {
        Ok((id, kind)) => {
            let session = router.get_or_create(id);
            attach_response(router.registry(), router.settings(), &session, kind, info, jar)
        }
        Err(e) => e.into_response(),
    }
}
