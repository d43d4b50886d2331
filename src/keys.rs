//! Key events derived from note messages
//!
//! The translator is the only producer of [`KeyEvent`]s. It also owns the
//! bounded rolling history (oldest entries evicted first).

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::midi::WireMessage;

/// Default number of key events retained
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceClass {
    Piano,
    DrumPad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum KeyState {
    KeyDown,
    KeyUp,
}

/// Semantic key press/release
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KeyEvent {
    pub device_class: DeviceClass,
    pub state: KeyState,
    pub note: u8,
    pub velocity: u8,
    pub channel: u8,
    pub timestamp: f64,
}

impl KeyEvent {
    pub fn is_down(&self) -> bool {
        self.state == KeyState::KeyDown
    }
}

/// Monotonic lookup remapping incoming velocities (0-127)
///
/// Deserializes from a plain list and is validated like [`VelocityCurve::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct VelocityCurve {
    points: Vec<u8>,
}

impl TryFrom<Vec<u8>> for VelocityCurve {
    type Error = String;

    fn try_from(points: Vec<u8>) -> Result<Self, Self::Error> {
        let len = points.len();
        Self::new(points).ok_or_else(|| {
            format!(
                "velocity curve of {} entries must have 1-128 non-decreasing values in 0-127",
                len
            )
        })
    }
}

impl From<VelocityCurve> for Vec<u8> {
    fn from(curve: VelocityCurve) -> Self {
        curve.points
    }
}

impl VelocityCurve {
    /// Build a curve; `None` when empty, non-monotonic, too long or out of range
    pub fn new(points: Vec<u8>) -> Option<Self> {
        let valid = !points.is_empty()
            && points.len() <= 128
            && points.iter().all(|&p| p <= 127)
            && points.windows(2).all(|w| w[0] <= w[1]);
        valid.then_some(Self { points })
    }

    /// Map a velocity through the curve; a sounding note never maps to 0
    pub fn apply(&self, velocity: u8) -> u8 {
        if velocity == 0 {
            return 0;
        }
        let last = self.points.len() - 1;
        let index = (velocity.min(127) as usize * last) / 127;
        self.points[index].max(1)
    }

    pub fn points(&self) -> &[u8] {
        &self.points
    }
}

/// Translates note messages and keeps the rolling history
#[derive(Debug)]
pub struct KeyEventTranslator {
    history: Mutex<VecDeque<KeyEvent>>,
    capacity: usize,
}

impl KeyEventTranslator {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Pure translation of a message to a key event
    pub fn to_key_event(message: &WireMessage) -> KeyEvent {
        KeyEvent {
            device_class: if message.is_drum_pad() {
                DeviceClass::DrumPad
            } else {
                DeviceClass::Piano
            },
            state: if message.is_note_on() {
                KeyState::KeyDown
            } else {
                KeyState::KeyUp
            },
            note: message.data1,
            velocity: message.data2,
            channel: message.channel,
            timestamp: message.timestamp,
        }
    }

    /// Translate note messages and append them to the history
    ///
    /// Returns `None` for messages that are not note on/off.
    pub fn translate(&self, message: &WireMessage) -> Option<KeyEvent> {
        if !(message.is_note_on() || message.is_note_off()) {
            return None;
        }
        let event = Self::to_key_event(message);
        self.push(event);
        Some(event)
    }

    fn push(&self, event: KeyEvent) {
        let mut history = self.history.lock();
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(event);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.history.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.lock().is_empty()
    }

    /// Oldest first
    pub fn history(&self) -> Vec<KeyEvent> {
        self.history.lock().iter().copied().collect()
    }

    /// Up to `count` most recent events, oldest first
    pub fn recent(&self, count: usize) -> Vec<KeyEvent> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(count);
        history.iter().skip(skip).copied().collect()
    }

    pub fn clear(&self) {
        self.history.lock().clear();
    }
}

impl Default for KeyEventTranslator {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_piano_key_down() {
        let msg = WireMessage::note_on(1, 60, 100).with_timestamp(2.5);
        let event = KeyEventTranslator::to_key_event(&msg);
        assert_eq!(event.device_class, DeviceClass::Piano);
        assert_eq!(event.state, KeyState::KeyDown);
        assert_eq!(event.note, 60);
        assert_eq!(event.velocity, 100);
        assert_eq!(event.channel, 1);
        assert_eq!(event.timestamp, 2.5);
    }

    #[test]
    fn test_drum_pad_and_velocity_zero_release() {
        let event = KeyEventTranslator::to_key_event(&WireMessage::note_on(10, 38, 0));
        assert_eq!(event.device_class, DeviceClass::DrumPad);
        assert_eq!(event.state, KeyState::KeyUp);
    }

    #[test]
    fn test_non_note_messages_are_not_translated() {
        let translator = KeyEventTranslator::default();
        assert!(translator.translate(&WireMessage::control_change(1, 1, 64)).is_none());
        assert!(translator.is_empty());
    }

    #[test]
    fn test_history_evicts_oldest() {
        let translator = KeyEventTranslator::new(3);
        for note in 60..65 {
            translator.translate(&WireMessage::note_on(1, note, 90));
        }

        let notes: Vec<u8> = translator.history().iter().map(|e| e.note).collect();
        assert_eq!(notes, vec![62, 63, 64]);
        assert_eq!(translator.len(), 3);

        let recent: Vec<u8> = translator.recent(2).iter().map(|e| e.note).collect();
        assert_eq!(recent, vec![63, 64]);
        assert_eq!(translator.recent(10).len(), 3);

        translator.clear();
        assert!(translator.is_empty());
    }

    #[test]
    fn test_default_history_capacity() {
        let translator = KeyEventTranslator::default();
        for i in 0..1005u32 {
            translator.translate(&WireMessage::note_on(1, (i % 128) as u8, 1));
        }
        assert_eq!(translator.len(), DEFAULT_HISTORY_CAPACITY);
    }

    #[test]
    fn test_velocity_curve_validation() {
        assert!(VelocityCurve::new(vec![]).is_none());
        assert!(VelocityCurve::new(vec![10, 5]).is_none());
        assert!(VelocityCurve::new(vec![0, 200]).is_none());
        assert!(VelocityCurve::new(vec![0u8; 129]).is_none());
        assert!(VelocityCurve::new(vec![0, 64, 127]).is_some());
    }

    #[test]
    fn test_velocity_curve_deserialize_is_validated() {
        assert!(serde_yaml::from_str::<VelocityCurve>("[]").is_err());
        assert!(serde_yaml::from_str::<VelocityCurve>("[200]").is_err());
        assert!(serde_yaml::from_str::<VelocityCurve>("[90, 10]").is_err());

        let curve: VelocityCurve = serde_yaml::from_str("[0, 40, 127]").unwrap();
        assert_eq!(curve.points(), &[0, 40, 127]);
        assert_eq!(curve.apply(64), 40);

        let yaml = serde_yaml::to_string(&curve).unwrap();
        assert_eq!(serde_yaml::from_str::<VelocityCurve>(&yaml).unwrap(), curve);
    }

    #[test]
    fn test_velocity_curve_apply() {
        let identity = VelocityCurve::new((0..=127).collect()).unwrap();
        assert_eq!(identity.apply(1), 1);
        assert_eq!(identity.apply(100), 100);
        assert_eq!(identity.apply(127), 127);

        let flat = VelocityCurve::new(vec![0, 0, 0]).unwrap();
        assert_eq!(flat.apply(0), 0);
        assert_eq!(flat.apply(50), 1);

        let soft = VelocityCurve::new(vec![0, 40, 127]).unwrap();
        assert_eq!(soft.apply(64), 40);
        assert_eq!(soft.apply(127), 127);
    }
}
