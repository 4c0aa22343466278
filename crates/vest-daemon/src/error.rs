//! Error types for the vest daemon.

use vest_core::SessionError;
use vest_rpc::protocol::{ErrorCode, Response};

/// Errors that can occur in the daemon
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Core error (configuration)
    #[error("Core error: {0}")]
    Core(#[from] vest_core::Error),

    /// Session or playback failure
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Invalid parameters
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Effect name not in the library
    #[error("Unknown effect: {0}")]
    UnknownEffect(String),
}

impl DaemonError {
    /// Wire code reported to the client.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            DaemonError::Session(e) => session_code(e),
            DaemonError::Core(vest_core::Error::Session(e)) => session_code(e),
            DaemonError::InvalidParams(_) => ErrorCode::InvalidParams,
            DaemonError::UnknownEffect(_) => ErrorCode::UnknownEffect,
            DaemonError::Io(_) | DaemonError::Json(_) | DaemonError::Core(_) => {
                ErrorCode::ProtocolError
            }
        }
    }

    /// Failure response for `verb`.
    #[must_use]
    pub fn to_response(&self, verb: &str) -> Response {
        Response::failure(verb, self.code(), self.to_string())
    }
}

fn session_code(err: &SessionError) -> ErrorCode {
    match err {
        SessionError::NoDeviceSelected => ErrorCode::NoDeviceSelected,
        SessionError::NotFound(_) => ErrorCode::NotFound,
        SessionError::NotConnected => ErrorCode::NotConnected,
        SessionError::ConnectError { .. } => ErrorCode::ConnectError,
        SessionError::HardwareWriteError { .. } => ErrorCode::HardwareWriteError,
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
