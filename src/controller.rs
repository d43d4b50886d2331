//! Controller-specific initialization
//!
//! A profile recognizes a hardware family by name and, right after a
//! successful connect, sends its configuration SysEx followed by one
//! control change per knob to park every knob at a neutral value.

use serde::Serialize;
use tracing::info;

use crate::catalog::DeviceDescriptor;
use crate::midi::WireMessage;

/// Channel the knob bank is configured on
const KNOB_CHANNEL: u8 = 1;

/// Init profile for one controller family
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerProfile {
    pub name: &'static str,
    /// Case-insensitive substrings matched against the device name
    pub match_patterns: &'static [&'static str],
    pub manufacturer: &'static str,
    /// Configuration payload, framed with F0 .. F7
    pub sysex: &'static [u8],
    pub knob_ccs: &'static [u8],
    pub neutral_value: u8,
}

/// M-Audio Oxygen Pro series (25/49/61)
pub const OXYGEN_PRO: ControllerProfile = ControllerProfile {
    name: "Oxygen Pro",
    match_patterns: &["Oxygen Pro"],
    manufacturer: "M-Audio",
    // Select the DAW-less preset slot and enable knob feedback
    sysex: &[0xF0, 0x00, 0x01, 0x05, 0x7F, 0x00, 0x00, 0x6D, 0x00, 0x01, 0x02, 0xF7],
    knob_ccs: &[22, 23, 24, 25, 26, 27, 28, 29],
    neutral_value: 64,
};

/// Every profile known to the hub, checked in order
pub const PROFILES: &[ControllerProfile] = &[OXYGEN_PRO];

impl ControllerProfile {
    /// Whether the device belongs to this family
    ///
    /// The name must contain a pattern; a known manufacturer that disagrees
    /// with the profile rules it out.
    pub fn matches(&self, device: &DeviceDescriptor) -> bool {
        let name = device.name.to_lowercase();
        let named = self
            .match_patterns
            .iter()
            .any(|pattern| name.contains(&pattern.to_lowercase()));
        if !named {
            return false;
        }

        let manufacturer = device.manufacturer.to_lowercase();
        manufacturer.is_empty()
            || manufacturer == "unknown"
            || manufacturer == self.manufacturer.to_lowercase()
    }

    /// Raw messages to send, in order: the SysEx payload then the knob bank
    pub fn init_sequence(&self) -> Vec<Vec<u8>> {
        let mut sequence = Vec::with_capacity(1 + self.knob_ccs.len());
        sequence.push(self.sysex.to_vec());
        for &cc in self.knob_ccs {
            sequence.push(WireMessage::control_change(KNOB_CHANNEL, cc, self.neutral_value).encode());
        }
        info!(
            "{} init: SysEx ({} bytes) + {} knob CCs",
            self.name,
            self.sysex.len(),
            self.knob_ccs.len()
        );
        sequence
    }
}

/// Find the profile for a device, if any
pub fn detect(device: &DeviceDescriptor) -> Option<&'static ControllerProfile> {
    PROFILES.iter().find(|profile| profile.matches(device))
}
