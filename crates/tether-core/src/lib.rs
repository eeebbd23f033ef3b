//! # tether-core
//!
//! Foundation types shared by the tether server crates.
//!
//! - [`frame`]: the four protocol frames (`o`, `h`, `a[...]`, `c[...]`) and
//!   their exact textual encoding
//! - [`close`]: well-known close codes carried by `c` frames
//! - [`ids`]: the unguessable [`SessionId`](ids::SessionId)
//! - [`errors`]: framing/payload errors
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod close;
pub mod errors;
pub mod frame;
pub mod ids;
pub mod logging;

pub use close::CloseReason;
pub use errors::FrameError;
pub use frame::{EncodedMessage, Frame, decode_payload};
pub use ids::SessionId;
