//! Error taxonomy for the MIDI device subsystem
//!
//! Every fallible public operation returns a [`MidiError`] carrying one of the
//! [`MidiErrorKind`] values. The hub additionally mirrors the most recent
//! failure into an [`ErrorSlot`] for polling-style inspection.

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

/// Kind of failure reported by the device subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Error)]
pub enum MidiErrorKind {
    /// Absence of error (value of a cleared error slot)
    #[default]
    #[error("no error")]
    None,
    #[error("device not found")]
    DeviceNotFound,
    #[error("device not connected")]
    DeviceNotConnected,
    #[error("device already open")]
    DeviceAlreadyOpen,
    #[error("device busy")]
    DeviceBusy,
    #[error("invalid message")]
    InvalidMessage,
    #[error("buffer overflow")]
    BufferOverflow,
    #[error("system error")]
    SystemError,
    #[error("not supported")]
    NotSupported,
}

/// Error returned by device subsystem operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct MidiError {
    pub kind: MidiErrorKind,
    pub message: String,
}

impl MidiError {
    pub fn new(kind: MidiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn device_not_found(message: impl Into<String>) -> Self {
        Self::new(MidiErrorKind::DeviceNotFound, message)
    }

    pub fn not_connected(message: impl Into<String>) -> Self {
        Self::new(MidiErrorKind::DeviceNotConnected, message)
    }

    pub fn already_open(message: impl Into<String>) -> Self {
        Self::new(MidiErrorKind::DeviceAlreadyOpen, message)
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(MidiErrorKind::DeviceBusy, message)
    }

    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::new(MidiErrorKind::InvalidMessage, message)
    }

    pub fn overflow(message: impl Into<String>) -> Self {
        Self::new(MidiErrorKind::BufferOverflow, message)
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::new(MidiErrorKind::SystemError, message)
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(MidiErrorKind::NotSupported, message)
    }
}

impl From<midir::InitError> for MidiError {
    fn from(e: midir::InitError) -> Self {
        MidiError::system(e.to_string())
    }
}

impl From<midir::PortInfoError> for MidiError {
    fn from(e: midir::PortInfoError) -> Self {
        MidiError::device_not_found(e.to_string())
    }
}

impl From<midir::SendError> for MidiError {
    fn from(e: midir::SendError) -> Self {
        MidiError::system(e.to_string())
    }
}

impl<T> From<midir::ConnectError<T>> for MidiError {
    fn from(e: midir::ConnectError<T>) -> Self {
        match e.kind() {
            midir::ConnectErrorKind::InvalidPort => MidiError::device_not_found(e.to_string()),
            midir::ConnectErrorKind::Other(_) => MidiError::busy(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, MidiError>;

/// Snapshot of the last failure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub kind: MidiErrorKind,
    pub message: String,
}

impl ErrorRecord {
    pub fn is_error(&self) -> bool {
        self.kind != MidiErrorKind::None
    }
}

impl From<&MidiError> for ErrorRecord {
    fn from(e: &MidiError) -> Self {
        Self {
            kind: e.kind,
            message: e.message.clone(),
        }
    }
}

/// Process-local "last error" slot, guarded independently of other hub state
#[derive(Debug, Default)]
pub struct ErrorSlot {
    last: Mutex<ErrorRecord>,
}

impl ErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, error: &MidiError) {
        *self.last.lock() = ErrorRecord::from(error);
    }

    /// Read without clearing
    pub fn get(&self) -> ErrorRecord {
        self.last.lock().clone()
    }

    pub fn clear(&self) {
        *self.last.lock() = ErrorRecord::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_kind_and_message() {
        let err = MidiError::device_not_found("no device matching 'Oxygen'");
        assert_eq!(err.to_string(), "device not found: no device matching 'Oxygen'");
    }

    #[test]
    fn test_slot_read_is_non_destructive() {
        let slot = ErrorSlot::new();
        assert!(!slot.get().is_error());

        slot.record(&MidiError::busy("port in use"));
        assert_eq!(slot.get().kind, MidiErrorKind::DeviceBusy);
        assert_eq!(slot.get().message, "port in use");

        slot.clear();
        assert_eq!(slot.get(), ErrorRecord::default());
    }
}
