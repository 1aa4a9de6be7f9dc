//! Error types for the callwire runtime.
//!
//! Every layer (transport, handshake, session, dispatch, interception) reports
//! through [`CallwireError`]. Remote faults travel as [`Response`] statuses and
//! are turned back into [`CallwireError::Fault`] on the calling side.
//!
//! [`Response`]: crate::message::Response

use crate::message::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the callwire runtime.
#[derive(Debug, Error)]
pub enum CallwireError {
    // Transport errors
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Connect failed: {message}")]
    ConnectFailed { message: String },

    #[error("Session disconnected")]
    Disconnected,

    #[error("Session is not connected")]
    NotConnected,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation was cancelled")]
    Cancelled,

    // Security errors
    #[error("Handshake failed: {message}")]
    Handshake { message: String },

    #[error("Not authorized: {message}")]
    Unauthorized { message: String },

    // Wire errors
    #[error("Framing error: {message}")]
    Framing { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Cannot convert value to {target}: {message}")]
    Conversion { target: String, message: String },

    // Remote outcome
    #[error("Remote fault ({status}): {message}")]
    Fault {
        status: StatusCode,
        message: String,
        detail: Option<String>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for callwire operations.
pub type Result<T> = std::result::Result<T, CallwireError>;

/// Discriminant of [`CallwireError`], used where errors are matched by kind
/// (retry filters, metrics, tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    ConnectFailed,
    Disconnected,
    NotConnected,
    Timeout,
    Cancelled,
    Handshake,
    Unauthorized,
    Framing,
    Protocol,
    Serialization,
    Conversion,
    Fault,
    Config,
    Other,
}

impl From<std::io::Error> for CallwireError {
    fn from(err: std::io::Error) -> Self {
        CallwireError::Transport {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CallwireError {
    fn from(err: serde_json::Error) -> Self {
        CallwireError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<rmp_serde::encode::Error> for CallwireError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        CallwireError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<rmp_serde::decode::Error> for CallwireError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        CallwireError::Serialization {
            message: err.to_string(),
        }
    }
}

impl CallwireError {
    /// Create a transport error without an underlying IO source.
    pub fn transport(message: impl Into<String>) -> Self {
        CallwireError::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        CallwireError::Protocol {
            message: message.into(),
        }
    }

    /// Create a handshake error.
    pub fn handshake(message: impl Into<String>) -> Self {
        CallwireError::Handshake {
            message: message.into(),
        }
    }

    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallwireError::Transport { .. } => ErrorKind::Transport,
            CallwireError::ConnectFailed { .. } => ErrorKind::ConnectFailed,
            CallwireError::Disconnected => ErrorKind::Disconnected,
            CallwireError::NotConnected => ErrorKind::NotConnected,
            CallwireError::Timeout(_) => ErrorKind::Timeout,
            CallwireError::Cancelled => ErrorKind::Cancelled,
            CallwireError::Handshake { .. } => ErrorKind::Handshake,
            CallwireError::Unauthorized { .. } => ErrorKind::Unauthorized,
            CallwireError::Framing { .. } => ErrorKind::Framing,
            CallwireError::Protocol { .. } => ErrorKind::Protocol,
            CallwireError::Serialization { .. } => ErrorKind::Serialization,
            CallwireError::Conversion { .. } => ErrorKind::Conversion,
            CallwireError::Fault { .. } => ErrorKind::Fault,
            CallwireError::Config { .. } => ErrorKind::Config,
            CallwireError::Other(_) => ErrorKind::Other,
        }
    }

    /// Map to the wire status a dispatcher would answer with.
    ///
    /// - 400: the request itself could not be understood or resolved
    /// - 561: the caller is not authorized
    /// - 500: everything else
    pub fn to_status_code(&self) -> StatusCode {
        match self {
            CallwireError::Fault { status, .. } => *status,
            CallwireError::Unauthorized { .. } => StatusCode::Unauthorized,
            CallwireError::Framing { .. }
            | CallwireError::Protocol { .. }
            | CallwireError::Serialization { .. }
            | CallwireError::Conversion { .. } => StatusCode::BadRequest,
            _ => StatusCode::InternalServerError,
        }
    }
}

impl ErrorKind {
    /// Kinds that describe a lost or missing connection rather than a bad call.
    pub const TRANSIENT: [ErrorKind; 5] = [
        ErrorKind::Transport,
        ErrorKind::ConnectFailed,
        ErrorKind::Disconnected,
        ErrorKind::NotConnected,
        ErrorKind::Timeout,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CallwireError::Fault {
            status: StatusCode::BadRequest,
            message: "no such method".into(),
            detail: None,
        };
        assert_eq!(err.to_string(), "Remote fault (400 BadRequest): no such method");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            CallwireError::protocol("bad").to_status_code(),
            StatusCode::BadRequest
        );
        assert_eq!(
            CallwireError::Unauthorized {
                message: "nope".into()
            }
            .to_status_code(),
            StatusCode::Unauthorized
        );
        assert_eq!(
            CallwireError::Disconnected.to_status_code(),
            StatusCode::InternalServerError
        );
    }

    #[test]
    fn test_transient_kinds() {
        let timeout = CallwireError::Timeout(Duration::from_secs(5));
        assert!(ErrorKind::TRANSIENT.contains(&timeout.kind()));
        assert!(ErrorKind::TRANSIENT.contains(&CallwireError::Disconnected.kind()));
        assert!(!ErrorKind::TRANSIENT.contains(&CallwireError::handshake("bad key").kind()));
    }

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(CallwireError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(CallwireError::transport("x").kind(), ErrorKind::Transport);
    }
}
