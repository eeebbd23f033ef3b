//! # tether-settings
//!
//! Configuration with layered sources for the tether server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TetherSettings::default()`]
//! 2. **User file**: `~/.tether/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TETHER_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! let settings = tether_settings::load_settings().unwrap_or_default();
//! println!("heartbeat every {} ms", settings.protocol.heartbeat_interval_ms);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
