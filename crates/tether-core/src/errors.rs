//! Framing and payload errors.

use thiserror::Error;

/// Errors raised while decoding frames or inbound payloads.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The input was empty.
    #[error("empty frame")]
    Empty,
    /// The leading frame-kind byte was not one of `o`, `h`, `a`, `c`.
    #[error("unknown frame kind {0:?}")]
    UnknownKind(char),
    /// A bodiless frame (`o`, `h`) carried trailing data.
    #[error("unexpected data after {0:?} frame")]
    TrailingData(char),
    /// The JSON body could not be parsed or did not have the expected shape.
    #[error("broken JSON encoding: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_unknown_kind() {
        assert_eq!(FrameError::UnknownKind('x').to_string(), "unknown frame kind 'x'");
    }

    #[test]
    fn json_from_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: FrameError = json_err.into();
        assert!(matches!(err, FrameError::Json(_)));
        assert!(err.to_string().starts_with("broken JSON encoding"));
    }
}
