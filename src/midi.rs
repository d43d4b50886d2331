//! MIDI wire codec
//!
//! Stateless encode/decode of the 1-3 byte MIDI wire format, legality checks
//! and note/drum classification helpers.

use serde::Serialize;
use std::fmt;

/// Identifier of a device within one backend session
pub type DeviceId = i32;

/// Lowest status nibble that carries a recognized message type
pub const MIN_STATUS_NIBBLE: u8 = 0x8;

/// General-MIDI percussion channel (1-based)
pub const DRUM_CHANNEL: u8 = 10;

/// Percussion key range recognized as drum pads
pub const DRUM_NOTE_RANGE: std::ops::RangeInclusive<u8> = 36..=51;

/// Message type, selected by the high nibble of the status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum MessageType {
    NoteOff,
    NoteOn,
    PolyAftertouch,
    ControlChange,
    ProgramChange,
    ChannelAftertouch,
    PitchBend,
    SysEx,
    #[default]
    Unknown,
}

impl MessageType {
    /// Status nibble emitted for this type (0 for `Unknown`)
    pub fn status_nibble(self) -> u8 {
        match self {
            MessageType::NoteOff => 0x8,
            MessageType::NoteOn => 0x9,
            MessageType::PolyAftertouch => 0xA,
            MessageType::ControlChange => 0xB,
            MessageType::ProgramChange => 0xC,
            MessageType::ChannelAftertouch => 0xD,
            MessageType::PitchBend => 0xE,
            MessageType::SysEx => 0xF,
            MessageType::Unknown => 0x0,
        }
    }

    /// Number of data bytes carried on the wire
    pub fn data_len(self) -> usize {
        match self {
            MessageType::NoteOff
            | MessageType::NoteOn
            | MessageType::PolyAftertouch
            | MessageType::ControlChange
            | MessageType::PitchBend => 2,
            MessageType::ProgramChange | MessageType::ChannelAftertouch => 1,
            MessageType::SysEx | MessageType::Unknown => 0,
        }
    }
}

/// Map a status byte to its message type
pub fn classify(status: u8) -> MessageType {
    match status >> 4 {
        0x8 => MessageType::NoteOff,
        0x9 => MessageType::NoteOn,
        0xA => MessageType::PolyAftertouch,
        0xB => MessageType::ControlChange,
        0xC => MessageType::ProgramChange,
        0xD => MessageType::ChannelAftertouch,
        0xE => MessageType::PitchBend,
        0xF => MessageType::SysEx,
        _ => MessageType::Unknown,
    }
}

/// Structured form of a single wire message
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct WireMessage {
    pub kind: MessageType,
    pub data1: u8,
    pub data2: u8,
    /// 1-16
    pub channel: u8,
    /// Seconds on the backend clock
    pub timestamp: f64,
    pub source: DeviceId,
}

impl WireMessage {
    pub fn new(kind: MessageType, channel: u8, data1: u8, data2: u8) -> Self {
        Self {
            kind,
            data1,
            data2,
            channel,
            timestamp: 0.0,
            source: -1,
        }
    }

    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(MessageType::NoteOn, channel, note, velocity)
    }

    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(MessageType::NoteOff, channel, note, velocity)
    }

    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        Self::new(MessageType::ControlChange, channel, controller, value)
    }

    pub fn program_change(channel: u8, program: u8) -> Self {
        Self::new(MessageType::ProgramChange, channel, program, 0)
    }

    /// `value`: 14-bit (0-16383, 8192 = center)
    pub fn pitch_bend(channel: u8, value: u16) -> Self {
        let (lsb, msb) = convert::split_14bit(value);
        Self::new(MessageType::PitchBend, channel, lsb, msb)
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_source(mut self, source: DeviceId) -> Self {
        self.source = source;
        self
    }

    pub fn note(&self) -> u8 {
        self.data1
    }

    pub fn velocity(&self) -> u8 {
        self.data2
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn is_valid(&self) -> bool {
        validate(self)
    }

    pub fn is_note_on(&self) -> bool {
        is_note_on(self)
    }

    pub fn is_note_off(&self) -> bool {
        is_note_off(self)
    }

    pub fn is_drum_pad(&self) -> bool {
        is_drum_pad(self)
    }
}

impl fmt::Display for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MessageType::NoteOff => {
                write!(f, "NoteOff ch:{} n:{} v:{}", self.channel, self.data1, self.data2)
            }
            MessageType::NoteOn => {
                write!(f, "NoteOn ch:{} n:{} v:{}", self.channel, self.data1, self.data2)
            }
            MessageType::PolyAftertouch => {
                write!(f, "PolyAftertouch ch:{} n:{} p:{}", self.channel, self.data1, self.data2)
            }
            MessageType::ControlChange => {
                write!(f, "CC ch:{} cc:{} v:{}", self.channel, self.data1, self.data2)
            }
            MessageType::ProgramChange => {
                write!(f, "ProgramChange ch:{} p:{}", self.channel, self.data1)
            }
            MessageType::ChannelAftertouch => {
                write!(f, "ChannelAftertouch ch:{} p:{}", self.channel, self.data1)
            }
            MessageType::PitchBend => write!(
                f,
                "PitchBend ch:{} v:{}",
                self.channel,
                convert::join_14bit(self.data1, self.data2)
            ),
            MessageType::SysEx => write!(f, "SysEx"),
            MessageType::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Encode a message to 1, 2 or 3 wire bytes
pub fn encode(message: &WireMessage) -> Vec<u8> {
    let status = (message.kind.status_nibble() << 4) | (message.channel.wrapping_sub(1) & 0x0F);
    match message.kind.data_len() {
        2 => vec![status, message.data1, message.data2],
        1 => vec![status, message.data1],
        _ => vec![status],
    }
}

/// Decode wire bytes; missing data bytes default to 0
///
/// An empty slice yields an all-zero message, which fails [`validate`].
pub fn decode(bytes: &[u8], timestamp: f64, source: DeviceId) -> WireMessage {
    let Some(&status) = bytes.first() else {
        return WireMessage {
            timestamp,
            source,
            ..WireMessage::default()
        };
    };

    WireMessage {
        kind: classify(status),
        data1: bytes.get(1).copied().unwrap_or(0),
        data2: bytes.get(2).copied().unwrap_or(0),
        channel: (status & 0x0F) + 1,
        timestamp,
        source,
    }
}

/// Structural legality gate used before any send or translation
pub fn validate(message: &WireMessage) -> bool {
    if !(1..=16).contains(&message.channel) {
        return false;
    }
    if message.kind.status_nibble() < MIN_STATUS_NIBBLE {
        return false;
    }

    match message.kind {
        MessageType::NoteOn | MessageType::NoteOff | MessageType::ControlChange => {
            message.data1 <= 0x7F && message.data2 <= 0x7F
        }
        MessageType::ProgramChange => message.data1 <= 0x7F,
        _ => true,
    }
}

pub fn is_note_on(message: &WireMessage) -> bool {
    message.kind == MessageType::NoteOn && message.data2 > 0
}

/// Note-on with velocity 0 counts as note-off
pub fn is_note_off(message: &WireMessage) -> bool {
    message.kind == MessageType::NoteOff
        || (message.kind == MessageType::NoteOn && message.data2 == 0)
}

pub fn is_drum_pad(message: &WireMessage) -> bool {
    message.channel == DRUM_CHANNEL
        && (is_note_on(message) || is_note_off(message))
        && DRUM_NOTE_RANGE.contains(&message.data1)
}

/// Check a raw SysEx frame: F0, 7-bit payload, F7
pub fn is_valid_sysex(bytes: &[u8]) -> bool {
    bytes.len() >= 2
        && bytes[0] == 0xF0
        && bytes[bytes.len() - 1] == 0xF7
        && bytes[1..bytes.len() - 1].iter().all(|&b| b <= 0x7F)
}

/// MIDI value conversion utilities
pub mod convert {
    /// Center of the 14-bit pitch-bend range
    pub const PITCH_BEND_CENTER: u16 = 8192;

    /// Largest 14-bit value
    pub const MAX_14BIT: u16 = 16383;

    /// Split a 14-bit value into (lsb, msb) data bytes
    pub fn split_14bit(value: u16) -> (u8, u8) {
        let value = value.min(MAX_14BIT);
        ((value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8)
    }

    /// Join (lsb, msb) data bytes into a 14-bit value
    pub fn join_14bit(lsb: u8, msb: u8) -> u16 {
        (((msb & 0x7F) as u16) << 7) | (lsb & 0x7F) as u16
    }

    /// Convert 14-bit value (0-16383) to 7-bit value (0-127)
    pub fn to_7bit(value_14bit: u16) -> u8 {
        ((value_14bit >> 7) & 0x7F) as u8
    }

    /// Convert 7-bit value to percentage (0-100)
    pub fn to_percent_7bit(value: u8) -> f32 {
        (value as f32 * 100.0) / 127.0
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_note_on() {
        let msg = WireMessage::note_on(1, 60, 100);
        assert_eq!(msg.encode(), vec![0x90, 60, 100]);
    }

    #[test]
    fn test_encode_lengths() {
        assert_eq!(WireMessage::control_change(3, 7, 100).encode(), vec![0xB2, 7, 100]);
        assert_eq!(WireMessage::program_change(16, 5).encode(), vec![0xCF, 5]);
        assert_eq!(
            WireMessage::new(MessageType::ChannelAftertouch, 1, 40, 99).encode(),
            vec![0xD0, 40]
        );
        assert_eq!(WireMessage::new(MessageType::SysEx, 1, 1, 2).encode(), vec![0xF0]);
    }

    #[test]
    fn test_pitch_bend_center() {
        let msg = WireMessage::pitch_bend(1, convert::PITCH_BEND_CENTER);
        assert_eq!(msg.encode(), vec![0xE0, 0x00, 0x40]);
    }

    #[test]
    fn test_decode_short_input_defaults_to_zero() {
        let msg = decode(&[0xC4], 1.5, 3);
        assert_eq!(msg.kind, MessageType::ProgramChange);
        assert_eq!(msg.channel, 5);
        assert_eq!(msg.data1, 0);
        assert_eq!(msg.data2, 0);
        assert_eq!(msg.timestamp, 1.5);
        assert_eq!(msg.source, 3);
    }

    #[test]
    fn test_decode_empty_is_all_zero_and_invalid() {
        let msg = decode(&[], 0.0, 0);
        assert_eq!(msg.kind, MessageType::Unknown);
        assert_eq!(msg.channel, 0);
        assert!(!validate(&msg));
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(0x93), MessageType::NoteOn);
        assert_eq!(classify(0x80), MessageType::NoteOff);
        assert_eq!(classify(0xF0), MessageType::SysEx);
        assert_eq!(classify(0x7F), MessageType::Unknown);
        assert_eq!(classify(0x00), MessageType::Unknown);
    }

    #[test]
    fn test_validate_channel_bounds() {
        assert!(!validate(&WireMessage::note_on(0, 60, 100)));
        assert!(!validate(&WireMessage::note_on(17, 60, 100)));
        assert!(validate(&WireMessage::note_on(1, 60, 100)));
        assert!(validate(&WireMessage::note_on(16, 60, 100)));
    }

    #[test]
    fn test_validate_data_bytes() {
        assert!(!validate(&WireMessage::note_on(1, 128, 100)));
        assert!(!validate(&WireMessage::note_off(1, 60, 200)));
        assert!(!validate(&WireMessage::control_change(1, 7, 128)));
        assert!(!validate(&WireMessage::program_change(1, 130)));
        assert!(!validate(&WireMessage::new(MessageType::Unknown, 1, 0, 0)));
    }

    #[test]
    fn test_note_on_velocity_zero_is_note_off() {
        let msg = decode(&[0x90, 60, 0], 0.0, 0);
        assert!(is_note_off(&msg));
        assert!(!is_note_on(&msg));
    }

    #[test]
    fn test_drum_pad_detection() {
        for note in [36, 38, 42] {
            assert!(WireMessage::note_on(10, note, 90).is_drum_pad());
            assert!(!WireMessage::note_on(1, note, 90).is_drum_pad());
        }
        assert!(!WireMessage::note_on(10, 60, 90).is_drum_pad());
        assert!(WireMessage::note_off(10, 51, 0).is_drum_pad());
        assert!(!WireMessage::control_change(10, 40, 1).is_drum_pad());
    }

    #[test]
    fn test_sysex_frame_check() {
        assert!(is_valid_sysex(&[0xF0, 0x00, 0x01, 0x05, 0xF7]));
        assert!(!is_valid_sysex(&[0xF0, 0x80, 0xF7]));
        assert!(!is_valid_sysex(&[0xF0, 0x01]));
        assert!(!is_valid_sysex(&[]));
    }

    #[test]
    fn test_14bit_helpers() {
        assert_eq!(convert::join_14bit(0x00, 0x40), 8192);
        assert_eq!(convert::split_14bit(16383), (0x7F, 0x7F));
        assert_eq!(convert::split_14bit(20000), (0x7F, 0x7F));
        assert_eq!(convert::to_7bit(8192), 64);
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0x90, 0x3C, 0x7F]), "90 3C 7F");
    }

    fn channel_message_type() -> impl Strategy<Value = MessageType> {
        prop_oneof![
            Just(MessageType::NoteOff),
            Just(MessageType::NoteOn),
            Just(MessageType::PolyAftertouch),
            Just(MessageType::ControlChange),
            Just(MessageType::ProgramChange),
            Just(MessageType::ChannelAftertouch),
            Just(MessageType::PitchBend),
        ]
    }

    proptest! {
        #[test]
        fn prop_round_trip_valid_messages(
            kind in channel_message_type(),
            channel in 1u8..=16,
            data1 in 0u8..=127,
            data2 in 0u8..=127,
        ) {
            let msg = WireMessage::new(kind, channel, data1, data2);
            prop_assert!(validate(&msg));

            let decoded = decode(&encode(&msg), msg.timestamp, msg.source);
            let expected_data2 = if kind.data_len() == 2 { data2 } else { 0 };
            prop_assert_eq!(decoded.kind, kind);
            prop_assert_eq!(decoded.channel, channel);
            prop_assert_eq!(decoded.data1, data1);
            prop_assert_eq!(decoded.data2, expected_data2);
        }

        #[test]
        fn prop_encoded_length_is_bounded(
            kind in channel_message_type(),
            channel in 1u8..=16,
            data1 in any::<u8>(),
            data2 in any::<u8>(),
        ) {
            let bytes = encode(&WireMessage::new(kind, channel, data1, data2));
            prop_assert!((1..=3).contains(&bytes.len()));
        }
    }
}
