//! MIDI keyboard hub
//!
//! Discovers MIDI controllers, ranks them for piano use, manages per-device
//! connections and turns inbound traffic into key events on a background
//! worker, with throughput and latency statistics.

pub mod backend;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod controller;
pub mod error;
pub mod hub;
pub mod keys;
pub mod midi;
pub mod pipeline;
pub mod stats;

pub use backend::{create_backend, BackendKind, Clock, MidiBackend, MidirBackend, MockBackend};
pub use catalog::{DeviceCatalog, DeviceDescriptor};
pub use config::HubConfig;
pub use connection::{ConnectionManager, ConnectionState, Direction};
pub use controller::ControllerProfile;
pub use error::{ErrorRecord, MidiError, MidiErrorKind, Result};
pub use hub::DeviceHub;
pub use keys::{DeviceClass, KeyEvent, KeyEventTranslator, KeyState, VelocityCurve};
pub use midi::{DeviceId, MessageType, WireMessage};
pub use pipeline::{Ingest, IngestionPipeline, PipelineSettings};
pub use stats::{Statistics, StatisticsTracker};
