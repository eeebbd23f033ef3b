//! Errors raised while loading `~/.tether/settings.json`.

use thiserror::Error;

/// Why a settings file could not become a [`TetherSettings`](crate::TetherSettings).
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file exists but could not be read. A missing file is not an
    /// error; the loader falls back to defaults.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not JSON, or a key has the wrong type after merging over
    /// the defaults.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A protocol tunable that sessions cannot work with, such as a zero
    /// `responseLimit` or a zero heartbeat, disconnect or sweep interval.
    #[error("invalid settings value: {field} {rule}")]
    InvalidValue {
        /// camelCase key as written in the settings file.
        field: &'static str,
        /// Constraint the value broke.
        rule: &'static str,
    },
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
