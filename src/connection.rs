//! Per-device connection state machine
//!
//! `Closed -> Open(direction)`. Opens are rejected while a device is open in
//! any direction; closes are idempotent. Input and output open independently,
//! so a half-open device is recorded as such instead of being rolled back.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::{InboundSink, MidiBackend};
use crate::error::{MidiError, Result};
use crate::midi::DeviceId;

/// Active direction(s) of an open device, also used to request an open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    InputOnly,
    OutputOnly,
    Both,
}

impl Direction {
    pub fn has_input(self) -> bool {
        matches!(self, Direction::InputOnly | Direction::Both)
    }

    pub fn has_output(self) -> bool {
        matches!(self, Direction::OutputOnly | Direction::Both)
    }

    fn from_sides(input: bool, output: bool) -> Option<Self> {
        match (input, output) {
            (true, true) => Some(Direction::Both),
            (true, false) => Some(Direction::InputOnly),
            (false, true) => Some(Direction::OutputOnly),
            (false, false) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Closed,
    Open(Direction),
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Open(_))
    }
}

/// Owns connection state for every device id
pub struct ConnectionManager {
    backend: Arc<dyn MidiBackend>,
    sink: InboundSink,
    states: DashMap<DeviceId, Direction>,
    /// Serializes open/close transitions; reads go straight to `states`
    transitions: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(backend: Arc<dyn MidiBackend>, sink: InboundSink) -> Self {
        Self {
            backend,
            sink,
            states: DashMap::new(),
            transitions: Mutex::new(()),
        }
    }

    /// Open the requested direction(s)
    ///
    /// When one side opens and the other fails, the open side stays recorded
    /// and the failure of the other side is returned.
    pub fn open(&self, id: DeviceId, direction: Direction) -> Result<Direction> {
        let _guard = self.transitions.lock();

        if let Some(current) = self.states.get(&id) {
            return Err(MidiError::already_open(format!(
                "device {} is already open ({:?})",
                id,
                *current
            )));
        }

        let input = if direction.has_input() {
            Some(self.backend.open_input(id, self.sink.clone()))
        } else {
            None
        };
        let output = if direction.has_output() {
            Some(self.backend.open_output(id))
        } else {
            None
        };

        let input_ok = matches!(input, Some(Ok(())));
        let output_ok = matches!(output, Some(Ok(())));

        if let Some(opened) = Direction::from_sides(input_ok, output_ok) {
            self.states.insert(id, opened);
            info!("Device {} open ({:?})", id, opened);
        }

        match (input, output) {
            (Some(Err(e)), _) | (_, Some(Err(e))) => {
                warn!("Device {} open incomplete: {}", id, e);
                Err(e)
            }
            _ => Ok(direction),
        }
    }

    /// Close both directions; closing a closed device is a no-op
    pub fn close(&self, id: DeviceId) -> Result<()> {
        let _guard = self.transitions.lock();

        if let Some((_, direction)) = self.states.remove(&id) {
            if direction.has_input() {
                self.backend.close_input(id);
            }
            if direction.has_output() {
                self.backend.close_output(id);
            }
            debug!("Device {} closed", id);
        }
        Ok(())
    }

    pub fn close_all(&self) {
        let ids: Vec<DeviceId> = self.states.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            let _ = self.close(id);
        }
    }

    pub fn state(&self, id: DeviceId) -> ConnectionState {
        self.states
            .get(&id)
            .map(|direction| ConnectionState::Open(*direction))
            .unwrap_or(ConnectionState::Closed)
    }

    pub fn is_open(&self, id: DeviceId) -> bool {
        self.states.contains_key(&id)
    }

    /// Fails with `DeviceNotConnected` unless the output side is open
    pub fn require_output(&self, id: DeviceId) -> Result<()> {
        match self.state(id) {
            ConnectionState::Open(direction) if direction.has_output() => Ok(()),
            ConnectionState::Open(_) => Err(MidiError::not_connected(format!(
                "device {} is open without output",
                id
            ))),
            ConnectionState::Closed => {
                Err(MidiError::not_connected(format!("device {} is not open", id)))
            }
        }
    }

    pub fn open_devices(&self) -> Vec<(DeviceId, Direction)> {
        let mut open: Vec<_> = self
            .states
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        open.sort_by_key(|(id, _)| *id);
        open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::catalog::DeviceDescriptor;
    use crate::error::MidiErrorKind;

    fn device(id: DeviceId, input: bool, output: bool) -> DeviceDescriptor {
        DeviceDescriptor {
            id,
            name: format!("Device {}", id),
            manufacturer: "Generic".to_string(),
            supports_input: input,
            supports_output: output,
            connected: true,
            port_count: 1,
        }
    }

    fn manager(devices: Vec<DeviceDescriptor>) -> (Arc<MockBackend>, ConnectionManager) {
        let backend = Arc::new(MockBackend::with_devices(devices));
        let sink: InboundSink = Arc::new(|_: &[u8], _: f64, _: DeviceId| {});
        let manager = ConnectionManager::new(backend.clone(), sink);
        (backend, manager)
    }

    #[test]
    fn test_open_twice_is_rejected() {
        let (_backend, manager) = manager(vec![device(1, true, true)]);

        assert_eq!(manager.open(1, Direction::Both).unwrap(), Direction::Both);
        let err = manager.open(1, Direction::InputOnly).unwrap_err();
        assert_eq!(err.kind, MidiErrorKind::DeviceAlreadyOpen);
        assert_eq!(manager.state(1), ConnectionState::Open(Direction::Both));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (backend, manager) = manager(vec![device(1, true, true)]);

        assert!(manager.close(1).is_ok());
        manager.open(1, Direction::Both).unwrap();
        assert!(manager.close(1).is_ok());
        assert!(manager.close(1).is_ok());

        assert_eq!(manager.state(1), ConnectionState::Closed);
        assert!(!backend.is_input_open(1));
        assert!(!backend.is_output_open(1));
    }

    #[test]
    fn test_partial_open_keeps_input() {
        let (backend, manager) = manager(vec![device(2, true, true)]);
        backend.fail_output(2);

        let err = manager.open(2, Direction::Both).unwrap_err();
        assert_eq!(err.kind, MidiErrorKind::DeviceBusy);
        assert_eq!(manager.state(2), ConnectionState::Open(Direction::InputOnly));
        assert!(backend.is_input_open(2));

        let err = manager.require_output(2).unwrap_err();
        assert_eq!(err.kind, MidiErrorKind::DeviceNotConnected);
    }

    #[test]
    fn test_partial_open_keeps_output() {
        let (backend, manager) = manager(vec![device(2, true, true)]);
        backend.fail_input(2);

        assert!(manager.open(2, Direction::Both).is_err());
        assert_eq!(manager.state(2), ConnectionState::Open(Direction::OutputOnly));
        assert!(manager.require_output(2).is_ok());
    }

    #[test]
    fn test_failed_open_leaves_state_closed() {
        let (_backend, manager) = manager(vec![device(3, false, true)]);

        let err = manager.open(3, Direction::InputOnly).unwrap_err();
        assert_eq!(err.kind, MidiErrorKind::NotSupported);
        assert_eq!(manager.state(3), ConnectionState::Closed);

        let err = manager.open(99, Direction::Both).unwrap_err();
        assert_eq!(err.kind, MidiErrorKind::DeviceNotFound);
        assert!(!manager.is_open(99));
    }

    #[test]
    fn test_close_all() {
        let (backend, manager) = manager(vec![device(1, true, true), device(2, false, true)]);
        manager.open(1, Direction::InputOnly).unwrap();
        manager.open(2, Direction::OutputOnly).unwrap();
        assert_eq!(
            manager.open_devices(),
            vec![(1, Direction::InputOnly), (2, Direction::OutputOnly)]
        );

        manager.close_all();
        assert!(manager.open_devices().is_empty());
        assert!(!backend.is_input_open(1));
        assert!(!backend.is_output_open(2));
    }
}
