//! System MIDI backend built on midir
//!
//! midir exposes input and output ports as separate lists; ports sharing a
//! name are merged into one device. A port name keeps the id it was first
//! given for the lifetime of the backend, and ids are never reused.

use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::{Clock, HotplugHandler, InboundSink, MidiBackend};
use crate::catalog::{infer_manufacturer, DeviceDescriptor};
use crate::error::{MidiError, Result};
use crate::midi::{format_hex, DeviceId};

/// How often the hotplug poller re-enumerates ports
const HOTPLUG_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Maps midir's per-connection microsecond stamps onto the shared clock
///
/// midir's stamp origin differs between platforms, so the first message of a
/// connection pins driver time to `Clock` time. Later messages arrive at
/// `at + (stamp - first stamp)`, which makes queueing delay between the
/// driver and the ingest call visible as latency.
#[derive(Debug, Clone, Copy)]
struct StampAnchor {
    stamp: u64,
    at: f64,
}

impl StampAnchor {
    fn arrival(&self, stamp: u64, now: f64) -> f64 {
        let elapsed = stamp.saturating_sub(self.stamp) as f64 / 1_000_000.0;
        (self.at + elapsed).min(now)
    }
}

/// Port name to device id assignments; only ever grows
#[derive(Debug, Default)]
struct PortIds {
    ids: HashMap<String, DeviceId>,
    next: DeviceId,
}

impl PortIds {
    fn id_for(&mut self, name: &str) -> DeviceId {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.next;
        self.next += 1;
        self.ids.insert(name.to_string(), id);
        id
    }
}

/// Merge input and output port names into devices, preserving first-seen order
fn merge_ports(inputs: &[String], outputs: &[String], ids: &mut PortIds) -> Vec<DeviceDescriptor> {
    let mut devices: Vec<DeviceDescriptor> = Vec::new();
    let ports = inputs
        .iter()
        .map(|name| (name, true))
        .chain(outputs.iter().map(|name| (name, false)));

    for (name, input) in ports {
        if let Some(device) = devices.iter_mut().find(|d| &d.name == name) {
            device.supports_input |= input;
            device.supports_output |= !input;
            device.port_count += 1;
            continue;
        }
        devices.push(DeviceDescriptor {
            id: ids.id_for(name),
            manufacturer: infer_manufacturer(name),
            name: name.clone(),
            supports_input: input,
            supports_output: !input,
            connected: true,
            port_count: 1,
        });
    }

    devices
}

/// Enumerate system ports, assigning ids from the shared table
fn enumerate_ports(client_name: &str, ids: &Mutex<PortIds>) -> Result<Vec<DeviceDescriptor>> {
    let midi_in = MidiInput::new(&format!("{}-scan-in", client_name))?;
    let midi_out = MidiOutput::new(&format!("{}-scan-out", client_name))?;

    let inputs: Vec<String> = midi_in
        .ports()
        .iter()
        .filter_map(|port| midi_in.port_name(port).ok())
        .collect();
    let outputs: Vec<String> = midi_out
        .ports()
        .iter()
        .filter_map(|port| midi_out.port_name(port).ok())
        .collect();

    Ok(merge_ports(&inputs, &outputs, &mut ids.lock()))
}

/// Background thread diffing enumerations to report hotplug events
struct HotplugPoller {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl HotplugPoller {
    fn spawn(
        client_name: String,
        ids: Arc<Mutex<PortIds>>,
        initial: Vec<DeviceDescriptor>,
        handler: HotplugHandler,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = std::thread::Builder::new()
            .name("midi-hotplug".to_string())
            .spawn(move || {
                let mut known = initial;
                while flag.load(Ordering::Acquire) {
                    std::thread::sleep(HOTPLUG_POLL_INTERVAL);
                    let current = match enumerate_ports(&client_name, &ids) {
                        Ok(devices) => devices,
                        Err(e) => {
                            trace!("Hotplug poll failed: {}", e);
                            continue;
                        }
                    };

                    for gone in known.iter().filter(|k| !current.iter().any(|c| c.name == k.name)) {
                        let mut gone = gone.clone();
                        gone.connected = false;
                        handler(gone, false);
                    }
                    for added in current.iter().filter(|c| !known.iter().any(|k| k.name == c.name)) {
                        handler(added.clone(), true);
                    }
                    known = current;
                }
            })
            .map_err(|e| warn!("Failed to spawn hotplug poller: {}", e))
            .ok();

        Self { running, handle }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            // A handler stopping its own poller cannot join itself
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// midir-backed implementation of [`MidiBackend`]
pub struct MidirBackend {
    client_name: String,
    clock: Clock,
    /// Last enumeration, used to resolve ids to port names
    ports: RwLock<Vec<DeviceDescriptor>>,
    ids: Arc<Mutex<PortIds>>,
    inputs: Mutex<HashMap<DeviceId, MidiInputConnection<()>>>,
    outputs: Mutex<HashMap<DeviceId, MidiOutputConnection>>,
    hotplug: Mutex<Option<HotplugPoller>>,
}

// Explicitly implement Send and Sync
// midir connections are only touched behind the Mutexes above
unsafe impl Send for MidirBackend {}
unsafe impl Sync for MidirBackend {}

impl MidirBackend {
    pub fn new(client_name: &str) -> Self {
        Self {
            client_name: client_name.to_string(),
            clock: Clock::new(),
            ports: RwLock::new(Vec::new()),
            ids: Arc::new(Mutex::new(PortIds::default())),
            inputs: Mutex::new(HashMap::new()),
            outputs: Mutex::new(HashMap::new()),
            hotplug: Mutex::new(None),
        }
    }

    /// Resolve an id against the last enumeration (enumerating once if empty)
    fn resolve(&self, id: DeviceId) -> Result<DeviceDescriptor> {
        if self.ports.read().is_empty() {
            self.enumerate()?;
        }
        self.ports
            .read()
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| MidiError::device_not_found(format!("no MIDI device with id {}", id)))
    }
}

impl MidiBackend for MidirBackend {
    fn name(&self) -> &str {
        "midir"
    }

    fn clock(&self) -> Clock {
        self.clock
    }

    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>> {
        let devices = enumerate_ports(&self.client_name, &self.ids)?;
        *self.ports.write() = devices.clone();
        Ok(devices)
    }

    fn open_input(&self, id: DeviceId, sink: InboundSink) -> Result<()> {
        let device = self.resolve(id)?;
        if !device.supports_input {
            return Err(MidiError::not_supported(format!("'{}' has no input port", device.name)));
        }
        if self.inputs.lock().contains_key(&id) {
            return Err(MidiError::busy(format!("input '{}' already open", device.name)));
        }

        let mut midi_in = MidiInput::new(&format!("{}-in", self.client_name))?;
        // SysEx is dropped by default; controllers answer configuration with it
        midi_in.ignore(Ignore::None);

        let port = midi_in
            .ports()
            .into_iter()
            .find(|p| midi_in.port_name(p).map(|n| n == device.name).unwrap_or(false))
            .ok_or_else(|| MidiError::device_not_found(format!("input port '{}' vanished", device.name)))?;

        let clock = self.clock;
        let mut anchor: Option<StampAnchor> = None;
        let connection = midi_in.connect(
            &port,
            &format!("{}-{}", self.client_name, device.name),
            move |stamp, data, _| {
                trace!("RX <- {}: {}", id, format_hex(data));
                let now = clock.now();
                let arrived = anchor.get_or_insert(StampAnchor { stamp, at: now }).arrival(stamp, now);
                sink(data, arrived, id);
            },
            (),
        )?;

        self.inputs.lock().insert(id, connection);
        info!("MIDI input opened: '{}'", device.name);
        Ok(())
    }

    fn open_output(&self, id: DeviceId) -> Result<()> {
        let device = self.resolve(id)?;
        if !device.supports_output {
            return Err(MidiError::not_supported(format!("'{}' has no output port", device.name)));
        }
        if self.outputs.lock().contains_key(&id) {
            return Err(MidiError::busy(format!("output '{}' already open", device.name)));
        }

        let midi_out = MidiOutput::new(&format!("{}-out", self.client_name))?;
        let port = midi_out
            .ports()
            .into_iter()
            .find(|p| midi_out.port_name(p).map(|n| n == device.name).unwrap_or(false))
            .ok_or_else(|| MidiError::device_not_found(format!("output port '{}' vanished", device.name)))?;

        let connection = midi_out.connect(&port, &format!("{}-{}", self.client_name, device.name))?;

        self.outputs.lock().insert(id, connection);
        info!("MIDI output opened: '{}'", device.name);
        Ok(())
    }

    fn close_input(&self, id: DeviceId) {
        if let Some(connection) = self.inputs.lock().remove(&id) {
            connection.close();
            debug!("MIDI input {} closed", id);
        }
    }

    fn close_output(&self, id: DeviceId) {
        if let Some(connection) = self.outputs.lock().remove(&id) {
            connection.close();
            debug!("MIDI output {} closed", id);
        }
    }

    fn send(&self, id: DeviceId, bytes: &[u8]) -> Result<()> {
        let mut outputs = self.outputs.lock();
        let connection = outputs
            .get_mut(&id)
            .ok_or_else(|| MidiError::not_connected(format!("output {} is not open", id)))?;
        connection.send(bytes)?;
        Ok(())
    }

    fn set_hotplug_handler(&self, handler: HotplugHandler) {
        let initial = self.ports.read().clone();
        let mut slot = self.hotplug.lock();
        if let Some(mut previous) = slot.take() {
            previous.stop();
        }
        *slot = Some(HotplugPoller::spawn(
            self.client_name.clone(),
            self.ids.clone(),
            initial,
            handler,
        ));
    }

    fn clear_hotplug_handler(&self) {
        if let Some(mut poller) = self.hotplug.lock().take() {
            poller.stop();
        }
    }
}

impl Drop for MidirBackend {
    fn drop(&mut self) {
        if let Some(mut poller) = self.hotplug.lock().take() {
            poller.stop();
        }
        self.inputs.lock().clear();
        self.outputs.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_stamp_anchor_reports_driver_delay() {
        let anchor = StampAnchor { stamp: 5_000_000, at: 2.0 };

        // Driver saw the message 10ms after the first one; ingest is 40ms late
        let arrived = anchor.arrival(5_010_000, 2.05);
        assert!((arrived - 2.01).abs() < 1e-9);
        assert!(((2.05 - arrived) * 1000.0 - 40.0).abs() < 1e-6);

        // The first message itself has no measurable delay
        assert_eq!(anchor.arrival(5_000_000, 2.0), 2.0);
        // Stamps running backwards or ahead of the clock are clamped
        assert_eq!(anchor.arrival(4_000_000, 2.5), 2.0);
        assert_eq!(anchor.arrival(9_000_000, 2.5), 2.5);
    }

    #[test]
    fn test_merge_ports_by_name() {
        let mut ids = PortIds::default();
        let devices = merge_ports(
            &names(&["Oxygen Pro 61", "Keystation 49"]),
            &names(&["Oxygen Pro 61", "Generic Synth"]),
            &mut ids,
        );

        let summary: Vec<(DeviceId, &str, bool, bool, u32)> = devices
            .iter()
            .map(|d| (d.id, d.name.as_str(), d.supports_input, d.supports_output, d.port_count))
            .collect();
        assert_eq!(
            summary,
            vec![
                (0, "Oxygen Pro 61", true, true, 2),
                (1, "Keystation 49", true, false, 1),
                (2, "Generic Synth", false, true, 1),
            ]
        );
        assert_eq!(devices[0].manufacturer, "M-Audio");
    }

    #[test]
    fn test_ids_survive_removal_and_are_not_reused() {
        let mut ids = PortIds::default();
        let first = merge_ports(&names(&["A", "B"]), &names(&["B"]), &mut ids);
        assert_eq!(first.iter().map(|d| d.id).collect::<Vec<_>>(), vec![0, 1]);

        // A unplugged: B keeps its id
        let second = merge_ports(&names(&["B"]), &names(&["B"]), &mut ids);
        assert_eq!(second.len(), 1);
        assert_eq!((second[0].name.as_str(), second[0].id), ("B", 1));

        // A new device never takes a freed id; A returns with its old one
        let third = merge_ports(&names(&["C", "B", "A"]), &[], &mut ids);
        let assigned: Vec<(&str, DeviceId)> = third.iter().map(|d| (d.name.as_str(), d.id)).collect();
        assert_eq!(assigned, vec![("C", 2), ("B", 1), ("A", 0)]);
    }

    #[test]
    fn test_enumeration_does_not_panic() {
        // Hosts without a MIDI subsystem return an error instead
        let backend = MidirBackend::new("keyhub-test");
        if let Ok(devices) = backend.enumerate() {
            for device in &devices {
                assert!(device.supports_input || device.supports_output);
            }
        }
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let backend = MidirBackend::new("keyhub-test");
        if backend.enumerate().is_ok() {
            let err = backend.open_output(10_000).unwrap_err();
            assert_eq!(err.kind, crate::error::MidiErrorKind::DeviceNotFound);
        }
    }
}
