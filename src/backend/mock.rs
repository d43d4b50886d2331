//! In-memory MIDI backend
//!
//! Used by tests and `--backend mock` runs. Devices are declared up front or
//! plugged at runtime; inbound traffic is injected by hand and outbound bytes
//! are recorded for inspection.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};

use super::{Clock, HotplugHandler, InboundSink, MidiBackend};
use crate::catalog::DeviceDescriptor;
use crate::error::{MidiError, Result};
use crate::midi::DeviceId;

#[derive(Default)]
pub struct MockBackend {
    clock: Clock,
    devices: RwLock<Vec<DeviceDescriptor>>,
    inputs: Mutex<HashMap<DeviceId, InboundSink>>,
    outputs: Mutex<HashSet<DeviceId>>,
    sent: Mutex<Vec<(DeviceId, Vec<u8>)>>,
    failing_inputs: Mutex<HashSet<DeviceId>>,
    failing_outputs: Mutex<HashSet<DeviceId>>,
    hotplug: RwLock<Option<HotplugHandler>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: Vec<DeviceDescriptor>) -> Self {
        let backend = Self::new();
        *backend.devices.write() = devices;
        backend
    }

    /// Add a device without a hotplug notification
    pub fn add_device(&self, device: DeviceDescriptor) {
        self.devices.write().push(device);
    }

    /// Remove a device without a hotplug notification
    pub fn remove_device(&self, id: DeviceId) -> Option<DeviceDescriptor> {
        let mut devices = self.devices.write();
        let index = devices.iter().position(|d| d.id == id)?;
        Some(devices.remove(index))
    }

    /// Add a device and notify the hotplug handler
    pub fn plug(&self, device: DeviceDescriptor) {
        self.add_device(device.clone());
        self.notify(device, true);
    }

    /// Remove a device, drop its connections and notify the hotplug handler
    pub fn unplug(&self, id: DeviceId) {
        let Some(mut device) = self.remove_device(id) else {
            return;
        };
        self.inputs.lock().remove(&id);
        self.outputs.lock().remove(&id);
        device.connected = false;
        self.notify(device, false);
    }

    fn notify(&self, device: DeviceDescriptor, connected: bool) {
        let handler = self.hotplug.read().clone();
        if let Some(handler) = handler {
            handler(device, connected);
        }
    }

    /// Deliver bytes from `id` stamped with the current clock
    ///
    /// Returns false when the device input is not open.
    pub fn inject(&self, id: DeviceId, bytes: &[u8]) -> bool {
        self.inject_at(id, bytes, self.clock.now())
    }

    /// Deliver bytes from `id` with an explicit timestamp
    pub fn inject_at(&self, id: DeviceId, bytes: &[u8], timestamp: f64) -> bool {
        let sink = self.inputs.lock().get(&id).cloned();
        match sink {
            Some(sink) => {
                sink(bytes, timestamp, id);
                true
            }
            None => false,
        }
    }

    /// Make subsequent `open_input` calls for `id` fail
    pub fn fail_input(&self, id: DeviceId) {
        self.failing_inputs.lock().insert(id);
    }

    /// Make subsequent `open_output` calls for `id` fail
    pub fn fail_output(&self, id: DeviceId) {
        self.failing_outputs.lock().insert(id);
    }

    pub fn is_input_open(&self, id: DeviceId) -> bool {
        self.inputs.lock().contains_key(&id)
    }

    pub fn is_output_open(&self, id: DeviceId) -> bool {
        self.outputs.lock().contains(&id)
    }

    pub fn sent_messages(&self) -> Vec<(DeviceId, Vec<u8>)> {
        self.sent.lock().clone()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    fn device(&self, id: DeviceId) -> Result<DeviceDescriptor> {
        self.devices
            .read()
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| MidiError::device_not_found(format!("no mock device with id {}", id)))
    }
}

impl MidiBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn clock(&self) -> Clock {
        self.clock
    }

    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(self.devices.read().clone())
    }

    fn open_input(&self, id: DeviceId, sink: InboundSink) -> Result<()> {
        let device = self.device(id)?;
        if !device.supports_input {
            return Err(MidiError::not_supported(format!("'{}' has no input", device.name)));
        }
        if self.failing_inputs.lock().contains(&id) {
            return Err(MidiError::busy(format!("input of '{}' refused", device.name)));
        }

        let mut inputs = self.inputs.lock();
        if inputs.contains_key(&id) {
            return Err(MidiError::busy(format!("input of '{}' already in use", device.name)));
        }
        inputs.insert(id, sink);
        Ok(())
    }

    fn open_output(&self, id: DeviceId) -> Result<()> {
        let device = self.device(id)?;
        if !device.supports_output {
            return Err(MidiError::not_supported(format!("'{}' has no output", device.name)));
        }
        if self.failing_outputs.lock().contains(&id) {
            return Err(MidiError::busy(format!("output of '{}' refused", device.name)));
        }

        if !self.outputs.lock().insert(id) {
            return Err(MidiError::busy(format!("output of '{}' already in use", device.name)));
        }
        Ok(())
    }

    fn close_input(&self, id: DeviceId) {
        self.inputs.lock().remove(&id);
    }

    fn close_output(&self, id: DeviceId) {
        self.outputs.lock().remove(&id);
    }

    fn send(&self, id: DeviceId, bytes: &[u8]) -> Result<()> {
        if !self.outputs.lock().contains(&id) {
            return Err(MidiError::not_connected(format!("mock output {} is not open", id)));
        }
        self.sent.lock().push((id, bytes.to_vec()));
        Ok(())
    }

    fn set_hotplug_handler(&self, handler: HotplugHandler) {
        *self.hotplug.write() = Some(handler);
    }

    fn clear_hotplug_handler(&self) {
        *self.hotplug.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn keyboard(id: DeviceId) -> DeviceDescriptor {
        DeviceDescriptor {
            id,
            name: format!("Keys {}", id),
            manufacturer: "Generic".to_string(),
            supports_input: true,
            supports_output: true,
            connected: true,
            port_count: 1,
        }
    }

    #[test]
    fn test_inject_reaches_open_input_only() {
        let backend = MockBackend::with_devices(vec![keyboard(1)]);
        let received = Arc::new(Mutex::new(Vec::new()));

        assert!(!backend.inject(1, &[0x90, 60, 100]));

        let sink_log = received.clone();
        backend
            .open_input(
                1,
                Arc::new(move |bytes: &[u8], _ts: f64, id: DeviceId| {
                    sink_log.lock().push((id, bytes.to_vec()));
                }),
            )
            .unwrap();

        assert!(backend.inject(1, &[0x90, 60, 100]));
        assert_eq!(*received.lock(), vec![(1, vec![0x90, 60, 100])]);
    }

    #[test]
    fn test_open_unknown_device() {
        let backend = MockBackend::new();
        let err = backend.open_output(42).unwrap_err();
        assert_eq!(err.kind, crate::error::MidiErrorKind::DeviceNotFound);
    }

    #[test]
    fn test_send_requires_open_output() {
        let backend = MockBackend::with_devices(vec![keyboard(1)]);
        assert!(backend.send(1, &[0xB0, 1, 2]).is_err());

        backend.open_output(1).unwrap();
        backend.send(1, &[0xB0, 1, 2]).unwrap();
        assert_eq!(backend.sent_messages(), vec![(1, vec![0xB0, 1, 2])]);
    }

    #[test]
    fn test_unplug_notifies_handler() {
        let backend = MockBackend::with_devices(vec![keyboard(3)]);
        let events = Arc::new(Mutex::new(Vec::new()));
        let log = events.clone();
        backend.set_hotplug_handler(Arc::new(move |device, connected| {
            log.lock().push((device.id, connected));
        }));

        backend.open_output(3).unwrap();
        backend.unplug(3);

        assert!(!backend.is_output_open(3));
        assert_eq!(*events.lock(), vec![(3, false)]);
        assert!(backend.enumerate().unwrap().is_empty());
    }
}
