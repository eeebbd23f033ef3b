//! Request details captured when a session is first attached.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts, Query};
use axum::http::request::Parts;
use axum_extra::extract::cookie::CookieJar;

/// Headers copied into [`ConnectionInfo::headers`]; everything else is dropped.
const EXPOSED_HEADERS: [&str; 10] = [
    "referer",
    "x-client-ip",
    "x-forwarded-for",
    "x-cluster-client-ip",
    "via",
    "x-real-ip",
    "x-forwarded-host",
    "x-forwarded-port",
    "accept-language",
    "host",
];

/// Who opened the session.
///
/// Fixed at first attach; later attaches are checked against `ip` when
/// address verification is enabled.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Peer address of the TCP connection, when the server exposes it.
    pub ip: Option<IpAddr>,
    /// Request cookies.
    pub cookies: HashMap<String, String>,
    /// Query-string arguments.
    pub arguments: HashMap<String, String>,
    /// Selected request headers (lowercase names).
    pub headers: HashMap<String, String>,
    /// Request path.
    pub path: String,
}

impl ConnectionInfo {
    /// Info carrying only a peer address.
    pub fn from_ip(ip: IpAddr) -> Self {
        Self {
            ip: Some(ip),
            ..Self::default()
        }
    }

    /// Look up a query argument.
    pub fn argument(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).map(String::as_str)
    }

    /// Look up a cookie.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ConnectionInfo {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        let cookies = CookieJar::from_headers(&parts.headers)
            .iter()
            .map(|c| (c.name().to_owned(), c.value().to_owned()))
            .collect();

        let arguments = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .map(|Query(args)| args)
            .unwrap_or_default();

        let headers = EXPOSED_HEADERS
            .iter()
            .filter_map(|name| {
                let value = parts.headers.get(*name)?.to_str().ok()?;
                Some(((*name).to_owned(), value.to_owned()))
            })
            .collect();

        Ok(Self {
            ip,
            cookies,
            arguments,
            headers,
            path: parts.uri.path().to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(req: Request<()>) -> ConnectionInfo {
        let (mut parts, ()) = req.into_parts();
        ConnectionInfo::from_request_parts(&mut parts, &())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn captures_ip_cookies_args_and_headers() {
        let mut req = Request::builder()
            .uri("/echo/000/abc/xhr?c=cb&t=1")
            .header("cookie", "JSESSIONID=xyz; other=1")
            .header("referer", "http://example.com/")
            .header("authorization", "secret")
            .body(())
            .unwrap();
        let addr: SocketAddr = "1.2.3.4:5555".parse().unwrap();
        let _ = req.extensions_mut().insert(ConnectInfo(addr));

        let info = extract(req).await;
        assert_eq!(info.ip, Some("1.2.3.4".parse().unwrap()));
        assert_eq!(info.cookie("JSESSIONID"), Some("xyz"));
        assert_eq!(info.argument("c"), Some("cb"));
        assert_eq!(info.headers.get("referer").unwrap(), "http://example.com/");
        assert!(!info.headers.contains_key("authorization"));
        assert_eq!(info.path, "/echo/000/abc/xhr");
    }

    #[tokio::test]
    async fn missing_connect_info_gives_no_ip() {
        let req = Request::builder().uri("/x").body(()).unwrap();
        let info = extract(req).await;
        assert!(info.ip.is_none());
        assert!(info.arguments.is_empty());
    }

    #[test]
    fn from_ip() {
        let info = ConnectionInfo::from_ip("5.6.7.8".parse().unwrap());
        assert_eq!(info.ip.unwrap().to_string(), "5.6.7.8");
    }
}
