//! In-process device backend.
//!
//! Simulates a bus with a configurable device list. Every handle write is
//! appended to a shared log so tests can assert exactly what reached the
//! "hardware" and when. Failures can be injected for open, write and
//! enumeration.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;
use tracing::debug;
use vest_types::{CellId, DeviceDescriptor};

use crate::device::{DeviceBackend, DeviceHandle};
use crate::error::DeviceError;

const MOCK_VENDOR_ID: u16 = 0x1234;
const MOCK_PRODUCT_ID: u16 = 0x5678;

/// One write that reached a mock handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub device: DeviceDescriptor,
    pub cell: CellId,
    pub level: u8,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct MockState {
    devices: Vec<DeviceDescriptor>,
    writes: Vec<WriteRecord>,
    open: Vec<DeviceDescriptor>,
    total_opens: usize,
    enumerate_failure: Option<DeviceError>,
    open_failure: Option<DeviceError>,
    // Writes still allowed before the failure kicks in.
    write_failure: Option<(usize, DeviceError)>,
}

/// Simulated device bus. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    #[must_use]
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        let backend = Self::default();
        backend.lock().devices = devices;
        backend
    }

    /// `count` units on bus 1 at addresses 1..=count with serials `MOCK-0001`...
    #[must_use]
    pub fn simulated(count: u8) -> Self {
        let devices = (1..=count)
            .map(|address| {
                DeviceDescriptor::new(1, address)
                    .with_serial(format!("MOCK-{address:04}"))
                    .with_ids(MOCK_VENDOR_ID, MOCK_PRODUCT_ID)
            })
            .collect();
        Self::new(devices)
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_device(&self, device: DeviceDescriptor) {
        self.lock().devices.push(device);
    }

    /// Unplug the unit at `bus`/`address`. Open handles to it start failing.
    pub fn remove_device(&self, bus: u8, address: u8) -> bool {
        let mut state = self.lock();
        let before = state.devices.len();
        state
            .devices
            .retain(|d| !(d.bus == bus && d.address == address));
        state.devices.len() != before
    }

    pub fn fail_enumeration(&self, error: Option<DeviceError>) {
        self.lock().enumerate_failure = error;
    }

    /// The next `open` fails with `error`, once.
    pub fn fail_next_open(&self, error: DeviceError) {
        self.lock().open_failure = Some(error);
    }

    /// Allow `successful` more writes, then fail every write with `error`.
    pub fn fail_writes_after(&self, successful: usize, error: DeviceError) {
        self.lock().write_failure = Some((successful, error));
    }

    pub fn clear_write_failure(&self) {
        self.lock().write_failure = None;
    }

    #[must_use]
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    /// Drain the write log.
    pub fn take_writes(&self) -> Vec<WriteRecord> {
        std::mem::take(&mut self.lock().writes)
    }

    /// Handles currently open.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.lock().open.len()
    }

    /// Successful opens since creation.
    #[must_use]
    pub fn total_opens(&self) -> usize {
        self.lock().total_opens
    }
}

impl DeviceBackend for MockBackend {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        let state = self.lock();
        if let Some(error) = &state.enumerate_failure {
            return Err(error.clone());
        }
        Ok(state.devices.clone())
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn DeviceHandle>, DeviceError> {
        let mut state = self.lock();
        if let Some(error) = state.open_failure.take() {
            return Err(error);
        }
        if !state.devices.iter().any(|d| d.same_location(device)) {
            return Err(DeviceError::NotPresent(device.to_string()));
        }
        if state.open.iter().any(|d| d.same_location(device)) {
            return Err(DeviceError::Busy(format!("{device} is already claimed")));
        }

        state.open.push(device.clone());
        state.total_opens += 1;
        debug!("Mock device opened: {device}");

        Ok(Box::new(MockHandle {
            device: device.clone(),
            state: self.state.clone(),
            closed: false,
        }))
    }
}

struct MockHandle {
    device: DeviceDescriptor,
    state: Arc<Mutex<MockState>>,
    closed: bool,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceHandle for MockHandle {
    fn write(&mut self, cell: CellId, level: u8) -> Result<(), DeviceError> {
        if self.closed {
            return Err(DeviceError::Disconnected);
        }

        let device = self.device.clone();
        let mut state = self.lock();
        if !state.devices.iter().any(|d| d.same_location(&device)) {
            return Err(DeviceError::Disconnected);
        }
        if let Some((remaining, error)) = &mut state.write_failure {
            if *remaining == 0 {
                return Err(error.clone());
            }
            *remaining -= 1;
        }

        debug!("Mock write: cell {cell} level {level}");
        state.writes.push(WriteRecord {
            device,
            cell,
            level,
            at: Instant::now(),
        });
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let device = self.device.clone();
        self.lock().open.retain(|d| !d.same_location(&device));
        debug!("Mock device closed: {device}");
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_devices() {
        let backend = MockBackend::simulated(2);
        let devices = backend.enumerate().unwrap();

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].bus, 1);
        assert_eq!(devices[1].address, 2);
        assert_eq!(devices[0].serial_number.as_deref(), Some("MOCK-0001"));
        assert_eq!(devices[0].vendor_id, MOCK_VENDOR_ID);
    }

    #[tokio::test]
    async fn test_open_is_exclusive() {
        let backend = MockBackend::simulated(1);
        let device = backend.enumerate().unwrap().remove(0);

        let mut handle = backend.open(&device).unwrap();
        assert!(matches!(backend.open(&device), Err(DeviceError::Busy(_))));
        assert_eq!(backend.open_handles(), 1);

        handle.close();
        assert_eq!(backend.open_handles(), 0);
        assert!(backend.open(&device).is_ok());
        assert_eq!(backend.total_opens(), 2);
    }

    #[test]
    fn test_open_unknown_device() {
        let backend = MockBackend::simulated(1);
        let result = backend.open(&DeviceDescriptor::new(9, 9));
        assert!(matches!(result, Err(DeviceError::NotPresent(_))));
    }

    #[test]
    fn test_fail_next_open_is_one_shot() {
        let backend = MockBackend::simulated(1);
        let device = backend.enumerate().unwrap().remove(0);

        backend.fail_next_open(DeviceError::Busy("claimed".to_string()));
        assert!(backend.open(&device).is_err());
        assert!(backend.open(&device).is_ok());
    }

    #[tokio::test]
    async fn test_writes_are_logged() {
        let backend = MockBackend::simulated(1);
        let device = backend.enumerate().unwrap().remove(0);
        let mut handle = backend.open(&device).unwrap();

        handle.write(CellId::FRONT_UPPER_LEFT, 5).unwrap();
        handle.write(CellId::BACK_LOWER_RIGHT, 0).unwrap();

        let writes = backend.take_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].cell, CellId::FRONT_UPPER_LEFT);
        assert_eq!(writes[0].level, 5);
        assert_eq!(writes[1].level, 0);
        assert!(backend.writes().is_empty());
    }

    #[tokio::test]
    async fn test_fail_writes_after() {
        let backend = MockBackend::simulated(1);
        let device = backend.enumerate().unwrap().remove(0);
        let mut handle = backend.open(&device).unwrap();

        backend.fail_writes_after(1, DeviceError::Transfer("stall".to_string()));
        assert!(handle.write(CellId::FRONT_UPPER_LEFT, 5).is_ok());
        assert!(handle.write(CellId::FRONT_UPPER_LEFT, 5).is_err());
        assert!(handle.write(CellId::FRONT_UPPER_LEFT, 5).is_err());

        backend.clear_write_failure();
        assert!(handle.write(CellId::FRONT_UPPER_LEFT, 5).is_ok());
        assert_eq!(backend.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_removed_device_fails_writes() {
        let backend = MockBackend::simulated(1);
        let device = backend.enumerate().unwrap().remove(0);
        let mut handle = backend.open(&device).unwrap();

        assert!(backend.remove_device(1, 1));
        assert!(!backend.remove_device(1, 1));
        assert_eq!(
            handle.write(CellId::FRONT_UPPER_LEFT, 5),
            Err(DeviceError::Disconnected)
        );
        assert!(backend.enumerate().unwrap().is_empty());
    }

    #[test]
    fn test_enumeration_failure() {
        let backend = MockBackend::simulated(1);
        backend.fail_enumeration(Some(DeviceError::Enumeration("bus error".to_string())));
        assert!(backend.enumerate().is_err());
        backend.fail_enumeration(None);
        assert_eq!(backend.enumerate().unwrap().len(), 1);
    }

    #[test]
    fn test_dropping_handle_releases_claim() {
        let backend = MockBackend::simulated(1);
        let device = backend.enumerate().unwrap().remove(0);
        {
            let _handle = backend.open(&device).unwrap();
            assert_eq!(backend.open_handles(), 1);
        }
        assert_eq!(backend.open_handles(), 0);
    }
}
