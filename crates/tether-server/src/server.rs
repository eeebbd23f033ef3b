//! `TetherServer`: axum listener hosting one or more session endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use tokio::net::TcpListener;
use tracing::info;

use crate::app::ConnectionFactory;
use crate::config::ServerConfig;
use crate::health::{self, EndpointHealth, HealthResponse};
use crate::router::SessionRouter;
use crate::shutdown::ShutdownCoordinator;

/// State shared by server-level handlers.
#[derive(Clone)]
struct AppState {
    endpoints: Arc<Vec<(String, Arc<SessionRouter>)>>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

/// The HTTP server.
pub struct TetherServer {
    config: ServerConfig,
    endpoints: Vec<(String, Arc<SessionRouter>)>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl TetherServer {
    /// Create a server with no endpoints.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            endpoints: Vec::new(),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Serve `factory`'s application under `prefix`.
    pub fn mount(&mut self, prefix: &str, factory: Arc<dyn ConnectionFactory>) -> Arc<SessionRouter> {
        let router = SessionRouter::new(self.config.protocol.clone(), factory);
        let prefix = normalize_prefix(prefix);
        info!(prefix, "endpoint mounted");
        self.endpoints.push((prefix, router.clone()));
        router
    }

    /// Build the axum router: `/health` plus every mounted endpoint.
    pub fn router(&self) -> Router {
        let state = AppState {
            endpoints: Arc::new(self.endpoints.clone()),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
        };

        let mut app = Router::new()
            .route("/health", get(health_handler))
            .with_state(state);
        for (prefix, router) in &self.endpoints {
            app = if prefix.is_empty() {
                app.merge(router.routes())
            } else {
                app.nest(prefix, router.routes())
            };
        }
        app
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind((self.config.host.as_str(), self.config.port)).await
    }

    /// Serve on `listener` until shutdown, then close every session.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, endpoints = self.endpoints.len(), "tether listening");

        let sweepers = self
            .endpoints
            .iter()
            .map(|(_, router)| router.spawn_sweeper(self.shutdown.token()))
            .collect();

        let token = self.shutdown.token();
        let result = axum::serve(
            listener,
            self.router().into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await;

        for (_, router) in &self.endpoints {
            let _ = router.close_all();
        }
        self.shutdown.graceful_shutdown(sweepers, None).await;
        info!("tether stopped");
        result
    }

    /// Bind and serve in the background. Returns the bound address.
    pub async fn listen(
        self: &Arc<Self>,
    ) -> std::io::Result<(SocketAddr, tokio::task::JoinHandle<std::io::Result<()>>)> {
        let listener = self.bind().await?;
        let addr = listener.local_addr()?;
        let server = self.clone();
        let handle = tokio::spawn(async move { server.serve(listener).await });
        Ok((addr, handle))
    }

    /// Mounted endpoints by prefix.
    pub fn endpoints(&self) -> &[(String, Arc<SessionRouter>)] {
        &self.endpoints
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// `"echo/"` → `"/echo"`; `"/"` → `""` (served at the root).
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let endpoints = state
        .endpoints
        .iter()
        .map(|(prefix, router)| EndpointHealth {
            prefix: prefix.clone(),
            sessions: router.session_count(),
        })
        .collect();
    Json(health::health_check(
        state.start_time,
        state.shutdown.is_shutting_down(),
        endpoints,
    ))
}
