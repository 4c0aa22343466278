//! Boundary to the USB collaborator.
//!
//! The transfer layer itself lives outside this crate. A backend enumerates
//! units and opens handles; a handle writes one cell level at a time. Writes
//! are short control transfers made only from the router task. Opening may
//! block on the bus, so the session manager runs it on the blocking pool.

use vest_types::{CellId, DeviceDescriptor};

use crate::error::DeviceError;

/// Discovery and open side of the collaborator.
pub trait DeviceBackend: Send + Sync {
    /// List the units currently attached.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus cannot be scanned.
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError>;

    /// Claim `device` for exclusive use.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit is gone or already claimed.
    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn DeviceHandle>, DeviceError>;
}

/// An open, exclusively owned device.
pub trait DeviceHandle: Send {
    /// Set `cell` to `level` (0 is off, 1..=10 are pulse intensities).
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer fails.
    fn write(&mut self, cell: CellId, level: u8) -> Result<(), DeviceError>;

    /// Release the device. Called once; errors are swallowed.
    fn close(&mut self);
}
