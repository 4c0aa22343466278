//! Device session manager.
//!
//! Tracks the discovery cache, the single selected device, and the open
//! handle. Only the router task calls into it, so nothing here locks.

use std::sync::Arc;

use tracing::{debug, info, warn};
use vest_types::{CellId, ConnectionState, DeviceDescriptor, DeviceMatcher, Intensity};

use crate::device::{DeviceBackend, DeviceHandle};
use crate::error::{DeviceError, SessionError};

/// Level written to every cell by `stop_all`.
const OFF: u8 = 0;

/// Result of re-enumerating the bus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceScan {
    pub devices: Vec<DeviceDescriptor>,
    /// The listing differs from the previous one.
    pub changed: bool,
    /// The connected device vanished and its handle was closed.
    pub lost: Option<DeviceDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub device: DeviceDescriptor,
    /// A different device had been connected; its handle was closed.
    pub closed: Option<DeviceDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Opened(DeviceDescriptor),
    AlreadyConnected(DeviceDescriptor),
}

/// Outcome of an all-cells-off pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// False when no handle was open and nothing was written.
    pub attempted: bool,
    pub failed: Vec<(CellId, DeviceError)>,
}

impl StopReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct SessionManager {
    backend: Arc<dyn DeviceBackend>,
    devices: Vec<DeviceDescriptor>,
    selected: Option<DeviceDescriptor>,
    handle: Option<Box<dyn DeviceHandle>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(backend: Box<dyn DeviceBackend>) -> Self {
        Self {
            backend: Arc::from(backend),
            devices: Vec::new(),
            selected: None,
            handle: None,
        }
    }

    /// Re-enumerate and update the cache.
    ///
    /// A collaborator error yields an empty listing and leaves the cache and
    /// the connection untouched.
    pub fn list_devices(&mut self) -> DeviceScan {
        let devices = match self.backend.enumerate() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Device enumeration failed: {e}");
                return DeviceScan::default();
            }
        };

        let changed = devices != self.devices;
        self.devices.clone_from(&devices);

        let mut lost = None;
        if self.handle.is_some()
            && let Some(selected) = &self.selected
            && !devices.iter().any(|d| d.same_location(selected))
        {
            info!("Connected device {selected} is gone");
            lost = Some(selected.clone());
            self.close_handle();
        }

        DeviceScan {
            devices,
            changed,
            lost,
        }
    }

    /// Last successful listing.
    #[must_use]
    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    /// Select the single cached device matching `matcher`.
    ///
    /// Re-selecting the current device keeps its connection; selecting a
    /// different one closes it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` unless exactly one device matches.
    pub fn select_device(&mut self, matcher: &DeviceMatcher) -> Result<Selection, SessionError> {
        let mut matches = self.devices.iter().filter(|d| matcher.matches(d));
        let (Some(device), None) = (matches.next(), matches.next()) else {
            return Err(SessionError::NotFound(matcher.clone()));
        };
        let device = device.clone();

        let same = self
            .selected
            .as_ref()
            .is_some_and(|current| current.same_location(&device));
        let closed = if same { None } else { self.close_handle() };

        info!("Selected device {device}");
        self.selected = Some(device.clone());
        Ok(Selection { device, closed })
    }

    #[must_use]
    pub fn selected(&self) -> Option<&DeviceDescriptor> {
        self.selected.as_ref()
    }

    /// Drop the selection, closing any open handle. Returns the closed device.
    pub fn clear_device(&mut self) -> Option<DeviceDescriptor> {
        let closed = self.close_handle();
        if let Some(device) = self.selected.take() {
            info!("Cleared selection of {device}");
        }
        closed
    }

    /// Open the selected device.
    ///
    /// # Errors
    ///
    /// Returns `NoDeviceSelected` without a selection, or `ConnectError` if
    /// the collaborator refuses to open the device.
    pub async fn connect(&mut self) -> Result<ConnectOutcome, SessionError> {
        let device = self
            .selected
            .clone()
            .ok_or(SessionError::NoDeviceSelected)?;

        if self.handle.is_some() {
            return Ok(ConnectOutcome::AlreadyConnected(device));
        }

        // A real claim can block on the bus, so it runs off the router's thread.
        let backend = Arc::clone(&self.backend);
        let target = device.clone();
        let opened = tokio::task::spawn_blocking(move || backend.open(&target))
            .await
            .unwrap_or_else(|e| Err(DeviceError::Transfer(format!("open task failed: {e}"))));

        match opened {
            Ok(handle) => {
                info!("Connected to {device}");
                self.handle = Some(handle);
                Ok(ConnectOutcome::Opened(device))
            }
            Err(source) => {
                warn!("Failed to connect to {device}: {source}");
                Err(SessionError::ConnectError { device, source })
            }
        }
    }

    /// Close the handle if open. Returns the device that was connected.
    pub fn disconnect(&mut self) -> Option<DeviceDescriptor> {
        self.close_handle()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    /// Connect is synchronous from the caller's view, so `Connecting` is
    /// never observable here.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// The selected device while a handle is open.
    #[must_use]
    pub fn connected_device(&self) -> Option<&DeviceDescriptor> {
        self.handle.as_ref().and(self.selected.as_ref())
    }

    /// Pulse one cell.
    ///
    /// A write failure that means the device is gone closes the handle.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` without an open handle, or `HardwareWriteError`
    /// if the write fails.
    pub fn trigger_cell(&mut self, cell: CellId, intensity: Intensity) -> Result<(), SessionError> {
        let handle = self.handle.as_mut().ok_or(SessionError::NotConnected)?;

        match handle.write(cell, intensity.level()) {
            Ok(()) => Ok(()),
            Err(source) => {
                warn!("Write to cell {cell} failed: {source}");
                if source.is_gone() {
                    self.close_handle();
                }
                Err(SessionError::HardwareWriteError { cell, source })
            }
        }
    }

    /// Turn every cell off, continuing past individual failures.
    pub fn stop_all(&mut self) -> StopReport {
        let Some(handle) = self.handle.as_mut() else {
            return StopReport::default();
        };

        let mut report = StopReport {
            attempted: true,
            failed: Vec::new(),
        };
        for cell in CellId::ALL {
            if let Err(e) = handle.write(cell, OFF) {
                debug!("Stop write to cell {cell} failed: {e}");
                report.failed.push((cell, e));
            }
        }

        if report.failed.iter().any(|(_, e)| e.is_gone()) {
            self.close_handle();
        }
        report
    }

    fn close_handle(&mut self) -> Option<DeviceDescriptor> {
        let mut handle = self.handle.take()?;
        handle.close();
        let device = self.selected.clone();
        if let Some(device) = &device {
            info!("Disconnected from {device}");
        }
        device
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.close_handle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;

    fn session_with(backend: &MockBackend) -> SessionManager {
        let mut session = SessionManager::new(Box::new(backend.clone()));
        session.list_devices();
        session
    }

    fn location(bus: u8, address: u8) -> DeviceMatcher {
        DeviceMatcher::Location { bus, address }
    }

    #[test]
    fn test_list_devices_reports_changes() {
        let backend = MockBackend::simulated(1);
        let mut session = SessionManager::new(Box::new(backend.clone()));

        let scan = session.list_devices();
        assert!(scan.changed);
        assert_eq!(scan.devices.len(), 1);

        assert!(!session.list_devices().changed);

        backend.add_device(DeviceDescriptor::new(2, 9));
        let scan = session.list_devices();
        assert!(scan.changed);
        assert_eq!(session.devices().len(), 2);
    }

    #[test]
    fn test_list_devices_error_is_empty_and_keeps_cache() {
        let backend = MockBackend::simulated(2);
        let mut session = session_with(&backend);

        backend.fail_enumeration(Some(DeviceError::Enumeration("bus".to_string())));
        let scan = session.list_devices();
        assert!(scan.devices.is_empty());
        assert!(!scan.changed);
        assert_eq!(session.devices().len(), 2);
    }

    #[test]
    fn test_select_by_location_and_serial() {
        let backend = MockBackend::simulated(2);
        let mut session = session_with(&backend);

        let selection = session.select_device(&location(1, 2)).unwrap();
        assert_eq!(selection.device.address, 2);
        assert!(selection.closed.is_none());

        let selection = session
            .select_device(&DeviceMatcher::Serial("MOCK-0001".to_string()))
            .unwrap();
        assert_eq!(selection.device.address, 1);
        assert_eq!(session.selected().unwrap().address, 1);
    }

    #[test]
    fn test_select_does_not_connect() {
        let backend = MockBackend::simulated(1);
        let mut session = session_with(&backend);

        session.select_device(&location(1, 1)).unwrap();
        assert!(!session.is_connected());
        assert_eq!(backend.open_handles(), 0);
    }

    #[test]
    fn test_select_not_found_keeps_previous() {
        let backend = MockBackend::simulated(1);
        let mut session = session_with(&backend);
        session.select_device(&location(1, 1)).unwrap();

        let err = session.select_device(&location(3, 3)).unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
        assert_eq!(session.selected().unwrap().address, 1);
    }

    #[test]
    fn test_select_shared_serial_is_not_found() {
        let backend = MockBackend::new(vec![
            DeviceDescriptor::new(1, 1).with_serial("DUP"),
            DeviceDescriptor::new(1, 2).with_serial("DUP"),
        ]);
        let mut session = session_with(&backend);

        let err = session
            .select_device(&DeviceMatcher::Serial("DUP".to_string()))
            .unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
        assert!(session.selected().is_none());

        assert!(session.select_device(&location(1, 2)).is_ok());
    }

    #[tokio::test]
    async fn test_reselect_same_device_keeps_connection() {
        let backend = MockBackend::simulated(2);
        let mut session = session_with(&backend);
        session.select_device(&location(1, 1)).unwrap();
        session.connect().await.unwrap();

        let selection = session
            .select_device(&DeviceMatcher::Serial("MOCK-0001".to_string()))
            .unwrap();
        assert!(selection.closed.is_none());
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_select_other_device_closes_connection() {
        let backend = MockBackend::simulated(2);
        let mut session = session_with(&backend);
        session.select_device(&location(1, 1)).unwrap();
        session.connect().await.unwrap();

        let selection = session.select_device(&location(1, 2)).unwrap();
        assert_eq!(selection.closed.unwrap().address, 1);
        assert!(!session.is_connected());
        assert_eq!(backend.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_connect_requires_selection() {
        let backend = MockBackend::simulated(1);
        let mut session = session_with(&backend);

        assert_eq!(session.connect().await, Err(SessionError::NoDeviceSelected));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let backend = MockBackend::simulated(1);
        let mut session = session_with(&backend);
        session.select_device(&location(1, 1)).unwrap();

        assert!(matches!(session.connect().await, Ok(ConnectOutcome::Opened(_))));
        assert!(matches!(
            session.connect().await,
            Ok(ConnectOutcome::AlreadyConnected(_))
        ));
        assert_eq!(backend.total_opens(), 1);
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(session.connected_device().unwrap().address, 1);
    }

    #[tokio::test]
    async fn test_connect_error_is_propagated() {
        let backend = MockBackend::simulated(1);
        let mut session = session_with(&backend);
        session.select_device(&location(1, 1)).unwrap();

        backend.fail_next_open(DeviceError::Busy("claimed".to_string()));
        let err = session.connect().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::ConnectError {
                source: DeviceError::Busy(_),
                ..
            }
        ));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let backend = MockBackend::simulated(1);
        let mut session = session_with(&backend);
        session.select_device(&location(1, 1)).unwrap();
        session.connect().await.unwrap();

        assert!(session.disconnect().is_some());
        assert!(session.disconnect().is_none());
        assert!(session.selected().is_some());
        assert_eq!(backend.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_clear_device_closes_and_forgets() {
        let backend = MockBackend::simulated(1);
        let mut session = session_with(&backend);
        session.select_device(&location(1, 1)).unwrap();
        session.connect().await.unwrap();

        assert!(session.clear_device().is_some());
        assert!(session.selected().is_none());
        assert!(!session.is_connected());
        assert!(session.clear_device().is_none());
    }

    #[tokio::test]
    async fn test_trigger_requires_connection() {
        let backend = MockBackend::simulated(1);
        let mut session = session_with(&backend);

        let result = session.trigger_cell(CellId::FRONT_UPPER_LEFT, Intensity::MIN);
        assert_eq!(result, Err(SessionError::NotConnected));
        assert!(backend.writes().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_writes_level() {
        let backend = MockBackend::simulated(1);
        let mut session = session_with(&backend);
        session.select_device(&location(1, 1)).unwrap();
        session.connect().await.unwrap();

        session
            .trigger_cell(CellId::BACK_UPPER_RIGHT, Intensity::new(7).unwrap())
            .unwrap();

        let writes = backend.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].cell, CellId::BACK_UPPER_RIGHT);
        assert_eq!(writes[0].level, 7);
    }

    #[tokio::test]
    async fn test_trigger_on_removed_device_disconnects() {
        let backend = MockBackend::simulated(1);
        let mut session = session_with(&backend);
        session.select_device(&location(1, 1)).unwrap();
        session.connect().await.unwrap();

        backend.remove_device(1, 1);
        let err = session
            .trigger_cell(CellId::FRONT_UPPER_LEFT, Intensity::MIN)
            .unwrap_err();
        assert!(matches!(err, SessionError::HardwareWriteError { .. }));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_transient_write_failure_keeps_connection() {
        let backend = MockBackend::simulated(1);
        let mut session = session_with(&backend);
        session.select_device(&location(1, 1)).unwrap();
        session.connect().await.unwrap();

        backend.fail_writes_after(0, DeviceError::Transfer("stall".to_string()));
        assert!(
            session
                .trigger_cell(CellId::FRONT_UPPER_LEFT, Intensity::MIN)
                .is_err()
        );
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_stop_all_writes_every_cell_off() {
        let backend = MockBackend::simulated(1);
        let mut session = session_with(&backend);
        session.select_device(&location(1, 1)).unwrap();
        session.connect().await.unwrap();

        let report = session.stop_all();
        assert!(report.attempted);
        assert!(report.is_clean());

        let writes = backend.writes();
        assert_eq!(writes.len(), 8);
        assert!(writes.iter().all(|w| w.level == 0));
    }

    #[tokio::test]
    async fn test_stop_all_continues_past_failures() {
        let backend = MockBackend::simulated(1);
        let mut session = session_with(&backend);
        session.select_device(&location(1, 1)).unwrap();
        session.connect().await.unwrap();

        backend.fail_writes_after(3, DeviceError::Transfer("stall".to_string()));
        let report = session.stop_all();

        assert!(report.attempted);
        assert_eq!(report.failed.len(), 5);
        assert_eq!(backend.writes().len(), 3);
    }

    #[test]
    fn test_stop_all_without_connection_writes_nothing() {
        let backend = MockBackend::simulated(1);
        let mut session = session_with(&backend);

        let report = session.stop_all();
        assert!(!report.attempted);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_scan_detects_lost_device() {
        let backend = MockBackend::simulated(1);
        let mut session = session_with(&backend);
        session.select_device(&location(1, 1)).unwrap();
        session.connect().await.unwrap();

        backend.remove_device(1, 1);
        let scan = session.list_devices();

        assert!(scan.changed);
        assert_eq!(scan.lost.unwrap().address, 1);
        assert!(!session.is_connected());
        assert!(session.selected().is_some());
    }

    #[tokio::test]
    async fn test_drop_closes_handle() {
        let backend = MockBackend::simulated(1);
        {
            let mut session = session_with(&backend);
            session.select_device(&location(1, 1)).unwrap();
            session.connect().await.unwrap();
            assert_eq!(backend.open_handles(), 1);
        }
        assert_eq!(backend.open_handles(), 0);
    }

    /// Claims the device only after holding the calling thread for `delay`.
    struct SlowOpenBackend {
        inner: MockBackend,
        delay: std::time::Duration,
    }

    impl DeviceBackend for SlowOpenBackend {
        fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
            self.inner.enumerate()
        }

        fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn DeviceHandle>, DeviceError> {
            std::thread::sleep(self.delay);
            self.inner.open(device)
        }
    }

    #[tokio::test]
    async fn test_slow_open_does_not_stall_other_tasks() {
        let backend = MockBackend::simulated(1);
        let mut session = SessionManager::new(Box::new(SlowOpenBackend {
            inner: backend.clone(),
            delay: std::time::Duration::from_millis(300),
        }));
        session.list_devices();
        session.select_device(&location(1, 1)).unwrap();

        let ticker = tokio::spawn(async {
            for _ in 0..5 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        });

        assert!(matches!(session.connect().await, Ok(ConnectOutcome::Opened(_))));
        assert!(ticker.is_finished());
        assert_eq!(backend.open_handles(), 1);
    }
}
