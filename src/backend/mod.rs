//! Platform MIDI backends
//!
//! The core talks to hardware only through the [`MidiBackend`] capability
//! trait. `midir` covers every desktop platform; the in-memory
//! [`MockBackend`] stands in for hardware in tests and dry runs.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::catalog::DeviceDescriptor;
use crate::error::Result;
use crate::midi::DeviceId;

pub mod midir_backend;
pub mod mock;

pub use midir_backend::MidirBackend;
pub use mock::MockBackend;

/// Delivery callback for inbound messages: (bytes, timestamp, device id)
///
/// Invoked on whatever thread the platform delivers MIDI on.
pub type InboundSink = Arc<dyn Fn(&[u8], f64, DeviceId) + Send + Sync>;

/// Hotplug callback: (descriptor, connected)
pub type HotplugHandler = Arc<dyn Fn(DeviceDescriptor, bool) + Send + Sync>;

/// Monotonic timebase shared by a backend and the pipeline consuming it
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Seconds elapsed since the clock was created
    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability surface a platform MIDI layer must provide
///
/// Note: All methods take &self to support Arc<dyn MidiBackend>.
/// Implementations use interior mutability for their connection tables.
pub trait MidiBackend: Send + Sync {
    /// Backend name (e.g., "midir", "mock")
    fn name(&self) -> &str;

    /// Timebase used to stamp inbound messages
    fn clock(&self) -> Clock;

    /// Enumerate currently available devices
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Open the input side of a device; inbound messages go to `sink`
    fn open_input(&self, id: DeviceId, sink: InboundSink) -> Result<()>;

    /// Open the output side of a device
    fn open_output(&self, id: DeviceId) -> Result<()>;

    /// Close the input side; no-op when not open
    fn close_input(&self, id: DeviceId);

    /// Close the output side; no-op when not open
    fn close_output(&self, id: DeviceId);

    /// Send raw bytes to an open output
    fn send(&self, id: DeviceId, bytes: &[u8]) -> Result<()>;

    /// Install (or replace) the hotplug handler
    ///
    /// Default implementation: no-op (backend can't observe hotplug)
    fn set_hotplug_handler(&self, _handler: HotplugHandler) {}

    /// Remove the hotplug handler
    fn clear_hotplug_handler(&self) {}
}

/// Backend selection, made explicitly at construction time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The operating system MIDI layer via midir
    #[default]
    System,
    /// In-memory backend with no hardware
    Mock,
}

/// Build the backend for `kind`
pub fn create_backend(kind: BackendKind, client_name: &str) -> Arc<dyn MidiBackend> {
    match kind {
        BackendKind::System => Arc::new(MidirBackend::new(client_name)),
        BackendKind::Mock => Arc::new(MockBackend::new()),
    }
}
