//! Error types for the AMI client

use thiserror::Error;

/// Result alias used throughout the crate.
pub type AmiResult<T> = Result<T, AmiError>;

/// Errors produced by the AMI client.
///
/// Background tasks never surface these to callers; they are converted into
/// state transitions and lifecycle callbacks. They reach callers only through
/// the typed API ([`AmiClient::try_connect`](crate::AmiClient::try_connect),
/// [`AmiClient::send`](crate::AmiClient::send)).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AmiError {
    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connect, handshake read or action response did not complete in time.
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// No authenticated session is available.
    #[error("not connected")]
    NotConnected,

    /// Login was rejected.
    #[error("authentication failed: {message}")]
    AuthFailed { message: String },

    /// The byte stream or a caller-supplied value violates the protocol.
    #[error("protocol error: {message}")]
    ProtocolError { message: String },

    /// The server answered an action with `Response: Error`.
    #[error("action failed: {message}")]
    ActionFailed { message: String },

    /// One or more events were dropped because an event stream fell behind.
    #[error("event queue full, events dropped")]
    QueueFull,
}

impl AmiError {
    pub(crate) fn protocol_error(message: impl Into<String>) -> Self {
        AmiError::ProtocolError {
            message: message.into(),
        }
    }

    pub(crate) fn auth_failed(message: impl Into<String>) -> Self {
        AmiError::AuthFailed {
            message: message.into(),
        }
    }

    pub(crate) fn timeout(duration: std::time::Duration) -> Self {
        AmiError::Timeout {
            timeout_ms: duration.as_millis() as u64,
        }
    }

    /// Whether the error means the session itself is gone, as opposed to a
    /// single action failing.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            AmiError::Io(_) | AmiError::ConnectionClosed | AmiError::NotConnected
        )
    }
}
