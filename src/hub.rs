//! Device hub: the public facade
//!
//! Composes the catalog, connection manager and ingestion pipeline over one
//! platform backend. Every failing public operation returns its error and
//! also lands in a last-error slot for polling-style inspection.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::backend::{create_backend, HotplugHandler, MidiBackend};
use crate::catalog::{DeviceCatalog, DeviceDescriptor};
use crate::config::HubConfig;
use crate::connection::{ConnectionManager, ConnectionState, Direction};
use crate::controller;
use crate::error::{ErrorRecord, ErrorSlot, MidiError, Result};
use crate::keys::{KeyEvent, VelocityCurve};
use crate::midi::{self, convert, format_hex, DeviceId, WireMessage};
use crate::pipeline::{IngestionPipeline, KeyEventCallback, MessageCallback};
use crate::stats::Statistics;

/// Callback receiving hotplug notifications: (descriptor, connected)
pub type ConnectionCallback = Arc<dyn Fn(DeviceDescriptor, bool) + Send + Sync>;

struct HubInner {
    config: HubConfig,
    backend: Arc<dyn MidiBackend>,
    catalog: DeviceCatalog,
    connections: ConnectionManager,
    pipeline: IngestionPipeline,
    errors: ErrorSlot,
    connection_callback: RwLock<Option<ConnectionCallback>>,
    initialized: AtomicBool,
    /// Serializes initialize/shutdown
    lifecycle: Mutex<()>,
}

impl HubInner {
    /// Record a failure in the last-error slot
    fn track<T>(&self, operation: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            warn!("{} failed: {}", operation, e);
            self.errors.record(e);
        }
        result
    }

    fn transmit(&self, id: DeviceId, bytes: &[u8]) -> Result<()> {
        self.connections.require_output(id)?;
        self.backend.send(id, bytes)?;
        self.pipeline.stats().record_sent();
        debug!("TX -> {}: {}", id, format_hex(bytes));
        Ok(())
    }

    /// Run the matching controller profile's init sequence, if any
    fn configure_controller(&self, device: &DeviceDescriptor) -> Result<()> {
        let Some(profile) = controller::detect(device) else {
            return Ok(());
        };
        for bytes in profile.init_sequence() {
            self.transmit(device.id, &bytes)?;
        }
        info!("Configured '{}' as {}", device.name, profile.name);
        Ok(())
    }

    fn on_hotplug(&self, device: DeviceDescriptor, connected: bool) {
        if connected {
            info!("MIDI device plugged: '{}'", device.name);
        } else {
            info!("MIDI device removed: '{}'", device.name);
            if self.connections.is_open(device.id) {
                warn!("Open device '{}' disappeared, closing it", device.name);
                let _ = self.connections.close(device.id);
            }
        }

        let _ = self.track("rescan", self.catalog.scan());

        let callback = self.connection_callback.read().clone();
        if let Some(callback) = callback {
            callback(device, connected);
        }
    }
}

/// Facade over device discovery, connections, ingestion and sending
pub struct DeviceHub {
    inner: Arc<HubInner>,
}

impl DeviceHub {
    /// Build a hub on the backend selected by `config.backend`
    pub fn new(config: HubConfig) -> Self {
        let backend = create_backend(config.backend, &config.client_name);
        Self::with_backend(config, backend)
    }

    /// Build a hub on an explicit backend
    pub fn with_backend(config: HubConfig, backend: Arc<dyn MidiBackend>) -> Self {
        let pipeline = IngestionPipeline::new(config.pipeline_settings(), backend.clock());
        let connections = ConnectionManager::new(backend.clone(), pipeline.sink());

        Self {
            inner: Arc::new(HubInner {
                catalog: DeviceCatalog::new(backend.clone()),
                connections,
                pipeline,
                errors: ErrorSlot::new(),
                connection_callback: RwLock::new(None),
                initialized: AtomicBool::new(false),
                lifecycle: Mutex::new(()),
                backend,
                config,
            }),
        }
    }

    /// Start the worker, scan once and begin watching for hotplug events
    ///
    /// Calling it on an initialized hub is a no-op.
    pub fn initialize(&self) -> Result<()> {
        let inner = &self.inner;
        let _guard = inner.lifecycle.lock();
        if inner.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        inner.track("initialize", inner.pipeline.start())?;
        let devices = match inner.track("initialize", inner.catalog.scan()) {
            Ok(devices) => devices,
            Err(e) => {
                inner.pipeline.stop();
                return Err(e);
            }
        };

        let weak: Weak<HubInner> = Arc::downgrade(inner);
        let handler: HotplugHandler = Arc::new(move |device, connected| {
            if let Some(inner) = weak.upgrade() {
                inner.on_hotplug(device, connected);
            }
        });
        inner.backend.set_hotplug_handler(handler);

        inner.initialized.store(true, Ordering::Release);
        info!(
            "MIDI hub initialized ({} backend, {} devices)",
            inner.backend.name(),
            devices.len()
        );
        Ok(())
    }

    /// Close every device and stop the worker; idempotent
    pub fn shutdown(&self) {
        let inner = &self.inner;
        let _guard = inner.lifecycle.lock();
        if !inner.initialized.swap(false, Ordering::AcqRel) {
            return;
        }

        inner.backend.clear_hotplug_handler();
        inner.connections.close_all();
        inner.pipeline.stop();
        info!("MIDI hub shut down");
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub fn backend_name(&self) -> &str {
        self.inner.backend.name()
    }

    // ===== Discovery =====

    /// Re-enumerate devices, replacing the snapshot
    pub fn scan_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        self.inner.track("scan", self.inner.catalog.scan())
    }

    /// Last snapshot, in scan order
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.inner.catalog.snapshot().as_ref().clone()
    }

    /// First device whose name contains `pattern`; the sentinel when none does
    pub fn find_device(&self, pattern: &str) -> DeviceDescriptor {
        self.inner.catalog.find(pattern)
    }

    pub fn best_piano_controller(&self) -> DeviceDescriptor {
        self.inner.catalog.best_piano_controller()
    }

    pub fn find_synthesizers(&self) -> Vec<DeviceDescriptor> {
        self.inner.catalog.find_synthesizers()
    }

    // ===== Connections =====

    pub fn connect(&self, id: DeviceId, direction: Direction) -> Result<()> {
        let inner = &self.inner;
        if !self.is_initialized() {
            return inner.track(
                "connect",
                Err(MidiError::system("hub is not initialized")),
            );
        }

        inner.track("connect", inner.connections.open(id, direction))?;

        let device = inner.catalog.get(id);
        let name = device.as_ref().map(|d| d.name.as_str()).unwrap_or("?");
        info!("Connected to '{}' (id {}, {:?})", name, id, direction);

        if inner.config.auto_configure_controllers && direction.has_output() {
            if let Some(device) = device {
                // The device stays connected when its configuration fails
                let _ = inner.track("controller init", inner.configure_controller(&device));
            }
        }
        Ok(())
    }

    /// Resolve `pattern` against the snapshot, then connect by id
    pub fn connect_by_name(&self, pattern: &str, direction: Direction) -> Result<DeviceDescriptor> {
        let device = self.find_device(pattern);
        if !device.is_found() {
            return self.inner.track(
                "connect",
                Err(MidiError::device_not_found(format!(
                    "no MIDI device matching '{}'",
                    pattern
                ))),
            );
        }
        self.connect(device.id, direction)?;
        Ok(device)
    }

    /// Close a device; closing a closed device is a no-op
    pub fn disconnect(&self, id: DeviceId) -> Result<()> {
        let was_open = self.inner.connections.is_open(id);
        self.inner.track("disconnect", self.inner.connections.close(id))?;
        if was_open {
            info!("Disconnected device {}", id);
        }
        Ok(())
    }

    pub fn disconnect_all(&self) {
        self.inner.connections.close_all();
    }

    pub fn connection_state(&self, id: DeviceId) -> ConnectionState {
        self.inner.connections.state(id)
    }

    pub fn is_connected(&self, id: DeviceId) -> bool {
        self.inner.connections.is_open(id)
    }

    pub fn open_devices(&self) -> Vec<(DeviceId, Direction)> {
        self.inner.connections.open_devices()
    }

    // ===== Outbound =====

    /// Validate, encode and send a channel message
    pub fn send_message(&self, id: DeviceId, message: &WireMessage) -> Result<()> {
        let result = if midi::validate(message) {
            self.inner.transmit(id, &message.encode())
        } else {
            Err(MidiError::invalid_message(format!("refusing to send {:?}", message)))
        };
        self.inner.track("send", result)
    }

    pub fn send_note_on(&self, id: DeviceId, channel: u8, note: u8, velocity: u8) -> Result<()> {
        self.send_message(id, &WireMessage::note_on(channel, note, velocity))
    }

    pub fn send_note_off(&self, id: DeviceId, channel: u8, note: u8, velocity: u8) -> Result<()> {
        self.send_message(id, &WireMessage::note_off(channel, note, velocity))
    }

    pub fn send_control_change(&self, id: DeviceId, channel: u8, controller: u8, value: u8) -> Result<()> {
        self.send_message(id, &WireMessage::control_change(channel, controller, value))
    }

    pub fn send_program_change(&self, id: DeviceId, channel: u8, program: u8) -> Result<()> {
        self.send_message(id, &WireMessage::program_change(channel, program))
    }

    /// 14-bit bend, 8192 = center
    pub fn send_pitch_bend(&self, id: DeviceId, channel: u8, value: u16) -> Result<()> {
        if value > convert::MAX_14BIT {
            return self.inner.track(
                "send",
                Err(MidiError::invalid_message(format!(
                    "pitch bend {} exceeds {}",
                    value,
                    convert::MAX_14BIT
                ))),
            );
        }
        self.send_message(id, &WireMessage::pitch_bend(channel, value))
    }

    /// Send a complete F0 .. F7 frame
    pub fn send_sysex(&self, id: DeviceId, bytes: &[u8]) -> Result<()> {
        let limit = self.inner.config.max_sysex_len;
        let result = if !midi::is_valid_sysex(bytes) {
            Err(MidiError::invalid_message(format!(
                "malformed SysEx: {}",
                format_hex(bytes)
            )))
        } else if bytes.len() > limit {
            Err(MidiError::overflow(format!(
                "SysEx of {} bytes exceeds limit of {}",
                bytes.len(),
                limit
            )))
        } else {
            self.inner.transmit(id, bytes)
        };
        self.inner.track("send SysEx", result)
    }

    // ===== Callbacks =====

    /// Receive every queued wire message on the worker thread
    pub fn set_message_callback<F>(&self, callback: F)
    where
        F: Fn(WireMessage) + Send + Sync + 'static,
    {
        let callback: MessageCallback = Arc::new(callback);
        self.inner.pipeline.set_message_callback(Some(callback));
    }

    /// Receive every key event on the worker thread
    pub fn set_key_event_callback<F>(&self, callback: F)
    where
        F: Fn(KeyEvent) + Send + Sync + 'static,
    {
        let callback: KeyEventCallback = Arc::new(callback);
        self.inner.pipeline.set_key_event_callback(Some(callback));
    }

    /// Receive hotplug notifications on the backend's thread
    pub fn set_connection_callback<F>(&self, callback: F)
    where
        F: Fn(DeviceDescriptor, bool) + Send + Sync + 'static,
    {
        *self.inner.connection_callback.write() = Some(Arc::new(callback));
    }

    pub fn clear_callbacks(&self) {
        self.inner.pipeline.set_message_callback(None);
        self.inner.pipeline.set_key_event_callback(None);
        *self.inner.connection_callback.write() = None;
    }

    // ===== Statistics & history =====

    pub fn statistics(&self) -> Statistics {
        self.inner.pipeline.statistics()
    }

    pub fn reset_statistics(&self) {
        self.inner.pipeline.reset_statistics();
    }

    /// Messages waiting for the worker
    pub fn queued(&self) -> usize {
        self.inner.pipeline.queued()
    }

    /// Full key history, oldest first
    pub fn key_history(&self) -> Vec<KeyEvent> {
        self.inner.pipeline.translator().history()
    }

    pub fn recent_key_events(&self, count: usize) -> Vec<KeyEvent> {
        self.inner.pipeline.translator().recent(count)
    }

    pub fn clear_key_history(&self) {
        self.inner.pipeline.translator().clear();
    }

    // ===== Errors =====

    pub fn last_error(&self) -> ErrorRecord {
        self.inner.errors.get()
    }

    pub fn clear_error(&self) {
        self.inner.errors.clear();
    }

    // ===== Velocity =====

    /// Install a velocity curve; an empty table disables remapping
    pub fn set_velocity_curve(&self, points: Vec<u8>) -> Result<()> {
        if points.is_empty() {
            self.inner.pipeline.set_velocity_curve(None);
            return Ok(());
        }
        let len = points.len();
        match VelocityCurve::new(points) {
            Some(curve) => {
                self.inner.pipeline.set_velocity_curve(Some(curve));
                Ok(())
            }
            None => self.inner.track(
                "set velocity curve",
                Err(MidiError::invalid_message(format!(
                    "velocity curve of {} entries must be non-decreasing and within 0-127",
                    len
                ))),
            ),
        }
    }

    pub fn velocity_curve(&self) -> Option<VelocityCurve> {
        self.inner.pipeline.velocity_curve()
    }
}

impl Drop for DeviceHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}
