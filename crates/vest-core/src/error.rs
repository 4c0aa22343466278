use thiserror::Error;
use vest_types::{CellId, DeviceDescriptor, DeviceMatcher};

/// Failure reported by the device collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Device not present: {0}")]
    NotPresent(String),

    #[error("Device busy: {0}")]
    Busy(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Enumeration failed: {0}")]
    Enumeration(String),
}

impl DeviceError {
    /// The unit is gone; the session can no longer use its handle.
    #[must_use]
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::NotPresent(_) | Self::Disconnected)
    }
}

/// Command-level failure from the session manager or sequencer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("No device selected")]
    NoDeviceSelected,

    #[error("Device not found: {0}")]
    NotFound(DeviceMatcher),

    #[error("Device not connected")]
    NotConnected,

    #[error("Failed to connect to {device}: {source}")]
    ConnectError {
        device: DeviceDescriptor,
        #[source]
        source: DeviceError,
    },

    #[error("Write to cell {cell} failed: {source}")]
    HardwareWriteError {
        cell: CellId,
        #[source]
        source: DeviceError,
    },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

pub type Result<T> = std::result::Result<T, Error>;
