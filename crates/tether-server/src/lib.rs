//! # tether-server
//!
//! Carries one logical bidirectional session over whichever wire mechanism
//! the client can use, and re-binds it as the client switches transports or
//! reconnects.
//!
//! - [`session`]: per-session state machine, outbound queue, flush policy,
//!   heartbeat
//! - [`registry`]: keyed session store with a lazy-deletion expiry heap
//! - [`transport`]: the wire adapters (WebSocket, XHR polling/streaming,
//!   EventSource, JSONP polling, htmlfile)
//! - [`router`]: binds URL patterns to adapters, owns the registry and the
//!   expiry sweep, and fans messages out
//! - [`server`]: axum listener, `/health`, graceful shutdown

#![deny(unsafe_code)]

pub mod app;
pub mod broadcast;
pub mod config;
pub mod errors;
pub mod health;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod transport;

pub use app::{AppError, Connection, ConnectionFactory};
pub use broadcast::SessionGroup;
pub use config::ServerConfig;
pub use errors::{SessionError, TransportError};
pub use registry::{Expirable, Retention, SessionRegistry};
pub use router::SessionRouter;
pub use server::TetherServer;
pub use session::{ConnectionInfo, Session, SessionState};
pub use transport::TransportKind;
pub use tether_core::{CloseReason, EncodedMessage, Frame, SessionId};
