//! Unified error handling for the fleet-track library.
//!
//! The processing pipeline itself never fails: malformed records are dropped
//! and noisy numeric fields coerce to zero. Errors only surface at the edges,
//! when parsing a payload or configuring the playback ticker.

use std::fmt;

/// Unified error type for fleet-track operations.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackError {
    /// Payload could not be parsed as JSON
    InvalidPayload { message: String },
    /// Payload parsed but has no recognizable record list
    UnexpectedShape { message: String },
    /// Configuration value rejected
    ConfigError { message: String },
    /// Ticker was started outside an async runtime
    NoRuntime { message: String },
}

impl fmt::Display for TrackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackError::InvalidPayload { message } => {
                write!(f, "Invalid payload: {}", message)
            }
            TrackError::UnexpectedShape { message } => {
                write!(f, "Unexpected payload shape: {}", message)
            }
            TrackError::ConfigError { message } => {
                write!(f, "Configuration error: {}", message)
            }
            TrackError::NoRuntime { message } => {
                write!(f, "No runtime available: {}", message)
            }
        }
    }
}

impl std::error::Error for TrackError {}

impl From<serde_json::Error> for TrackError {
    fn from(err: serde_json::Error) -> Self {
        TrackError::InvalidPayload {
            message: err.to_string(),
        }
    }
}

/// Result type alias for fleet-track operations.
pub type Result<T> = std::result::Result<T, TrackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrackError::ConfigError {
            message: "tick interval must be positive".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Configuration error: tick interval must be positive"
        );
    }

    #[test]
    fn test_from_serde_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: TrackError = parse_err.into();
        assert!(matches!(err, TrackError::InvalidPayload { .. }));
        assert!(err.to_string().starts_with("Invalid payload"));
    }
}
