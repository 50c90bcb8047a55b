//! Session-level error taxonomy.

use std::sync::Arc;

use crate::ports::TransportError;

/// Failures surfaced by the connection manager and session handle.
///
/// Cloneable so it can travel on the session event stream; transport
/// sources are shared behind an [`Arc`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// Scan or connect blocked by a missing platform permission.
    #[error("transport permission denied")]
    PermissionDenied,

    /// The UART service or one of its characteristics is absent.
    #[error("required service or characteristics not found")]
    ProtocolMismatch,

    /// The peripheral did not authorize the session in time.
    #[error("session not authorized before timeout")]
    ConnectionTimeout,

    /// A command could not be written after every retry.
    #[error("failed to send command")]
    WriteFailed,

    /// The peripheral did not answer a command in time.
    #[error("no response from peripheral")]
    ResponseTimeout,

    /// The peripheral ended the session.
    #[error("session expired")]
    SessionExpired,

    /// The session is not authorized yet.
    #[error("session not authorized")]
    NotAuthorized,

    /// The command queue is full.
    #[error("command queue full")]
    Busy,

    /// The session has been torn down.
    #[error("session closed")]
    Closed,

    /// Discovery found no matching peripheral.
    #[error("no matching device found")]
    DeviceNotFound,

    /// Any other transport failure.
    #[error("transport error")]
    Transport(#[source] Arc<TransportError>),
}

impl SessionError {
    /// Short message suitable for showing to a rider.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "Bluetooth permission is required",
            Self::ProtocolMismatch => "This device is not a supported bridge",
            Self::ConnectionTimeout => "The bridge did not respond",
            Self::WriteFailed => "Failed to send command",
            Self::ResponseTimeout => "The bridge did not answer",
            Self::SessionExpired => "Session expired, please reconnect",
            Self::NotAuthorized => "Not connected to the bridge",
            Self::Busy => "The bridge is busy, try again",
            Self::Closed => "Disconnected",
            Self::DeviceNotFound => "No bridge found nearby",
            Self::Transport(_) => "Bluetooth error",
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::PermissionDenied => Self::PermissionDenied,
            TransportError::DeviceNotFound => Self::DeviceNotFound,
            other => Self::Transport(Arc::new(other)),
        }
    }
}
