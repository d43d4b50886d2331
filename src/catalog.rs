//! Device catalog and controller classification
//!
//! Holds the last enumeration snapshot from the backend and implements the
//! heuristics used to pick a piano controller among several candidates.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::backend::MidiBackend;
use crate::error::Result;
use crate::midi::DeviceId;

/// Id carried by the "not found" sentinel descriptor
pub const NOT_FOUND_ID: DeviceId = -1;

/// Name fragments that mark a device as a keyboard controller
const PIANO_KEYWORDS: &[&str] = &[
    "Piano",
    "Keyboard",
    "Controller",
    "Keys",
    "Oxygen",
    "Keystation",
    "Hammer",
    "MPK",
    "Launchkey",
    "KeyLab",
    "Komplete Kontrol",
];

/// Manufacturer and product-line fragments of the preferred controller family
const TARGET_PEDIGREE: &[&str] = &["M-Audio", "Oxygen", "Keystation", "Hammer 88"];

/// Flagship model, scored above the rest of its family
pub const FLAGSHIP_MODEL: &str = "Oxygen Pro 61";

/// Manufacturer inferred from port-name fragments
const KNOWN_MANUFACTURERS: &[(&str, &[&str])] = &[
    ("M-Audio", &["M-Audio", "Oxygen", "Keystation", "Hammer 88"]),
    ("Akai", &["Akai", "MPK", "MPD", "APC"]),
    ("Novation", &["Novation", "Launchkey", "Launchpad", "SL MkIII"]),
    ("Arturia", &["Arturia", "KeyLab", "MiniLab", "KeyStep"]),
    ("Native Instruments", &["Komplete Kontrol", "Maschine", "Native Instruments"]),
    ("Roland", &["Roland", "A-49", "A-88"]),
    ("Yamaha", &["Yamaha", "Digital Piano", "Clavinova"]),
    ("Korg", &["Korg", "nanoKEY", "microKEY"]),
    ("Behringer", &["Behringer", "X-Touch"]),
];

/// Snapshot of one enumerated device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub name: String,
    pub manufacturer: String,
    pub supports_input: bool,
    pub supports_output: bool,
    pub connected: bool,
    pub port_count: u32,
}

impl DeviceDescriptor {
    /// Sentinel returned when a lookup finds nothing
    pub fn not_found() -> Self {
        Self {
            id: NOT_FOUND_ID,
            name: String::new(),
            manufacturer: String::new(),
            supports_input: false,
            supports_output: false,
            connected: false,
            port_count: 0,
        }
    }

    pub fn is_found(&self) -> bool {
        self.id != NOT_FOUND_ID
    }
}

/// Guess the manufacturer from a port name
pub fn infer_manufacturer(name: &str) -> String {
    let lower = name.to_lowercase();
    KNOWN_MANUFACTURERS
        .iter()
        .find(|(_, fragments)| {
            fragments
                .iter()
                .any(|fragment| lower.contains(&fragment.to_lowercase()))
        })
        .map(|(manufacturer, _)| manufacturer.to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Whether the descriptor belongs to the preferred controller family
pub fn matches_target_pedigree(descriptor: &DeviceDescriptor) -> bool {
    TARGET_PEDIGREE.iter().any(|fragment| {
        descriptor.manufacturer.contains(fragment) || descriptor.name.contains(fragment)
    })
}

/// Additive ranking score; never used to reject a device
pub fn score_for_piano(descriptor: &DeviceDescriptor) -> i32 {
    let mut score: i32 = 0;

    if descriptor.supports_input {
        score += 10;
    }
    if descriptor.connected {
        score += 20;
    }
    if matches_target_pedigree(descriptor) {
        score += 30;
        if descriptor.name.contains(FLAGSHIP_MODEL) {
            score += 20;
        }
    }
    if descriptor.name.contains("Piano") {
        score += 15;
    }
    if descriptor.name.contains("Keyboard") {
        score += 10;
    }

    let ports = i32::try_from(descriptor.port_count).unwrap_or(i32::MAX);
    score.saturating_add(ports.saturating_mul(5))
}

/// Permissive keyboard classification: keyword match, or any input device with a port
pub fn is_piano_keyboard(descriptor: &DeviceDescriptor) -> bool {
    PIANO_KEYWORDS
        .iter()
        .any(|keyword| descriptor.name.contains(keyword))
        || (descriptor.supports_input && descriptor.port_count > 0)
}

/// Highest-scoring keyboard; ties keep the first seen. Sentinel when none qualify.
pub fn best_piano_controller(candidates: &[DeviceDescriptor]) -> DeviceDescriptor {
    let mut best: Option<(&DeviceDescriptor, i32)> = None;

    for candidate in candidates.iter().filter(|d| is_piano_keyboard(d)) {
        let score = score_for_piano(candidate);
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((candidate, score));
        }
    }

    best.map(|(descriptor, _)| descriptor.clone())
        .unwrap_or_else(DeviceDescriptor::not_found)
}

/// Output-capable devices that are not keyboards
pub fn find_synthesizers(candidates: &[DeviceDescriptor]) -> Vec<DeviceDescriptor> {
    candidates
        .iter()
        .filter(|d| d.supports_output && !is_piano_keyboard(d))
        .cloned()
        .collect()
}

/// Last-known device snapshot, replaced wholesale on every scan
pub struct DeviceCatalog {
    backend: Arc<dyn MidiBackend>,
    snapshot: RwLock<Arc<Vec<DeviceDescriptor>>>,
}

impl DeviceCatalog {
    pub fn new(backend: Arc<dyn MidiBackend>) -> Self {
        Self {
            backend,
            snapshot: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Query the backend and replace the cached snapshot
    pub fn scan(&self) -> Result<Vec<DeviceDescriptor>> {
        let devices = self.backend.enumerate()?;
        debug!("Scan found {} MIDI devices via {}", devices.len(), self.backend.name());

        *self.snapshot.write() = Arc::new(devices.clone());
        Ok(devices)
    }

    /// Current snapshot (cheap clone of the shared list)
    pub fn snapshot(&self) -> Arc<Vec<DeviceDescriptor>> {
        self.snapshot.read().clone()
    }

    pub fn get(&self, id: DeviceId) -> Option<DeviceDescriptor> {
        self.snapshot().iter().find(|d| d.id == id).cloned()
    }

    /// First device whose name contains `pattern` (case-insensitive), in scan order
    pub fn find(&self, pattern: &str) -> DeviceDescriptor {
        let pattern = pattern.to_lowercase();
        self.snapshot()
            .iter()
            .find(|d| d.name.to_lowercase().contains(&pattern))
            .cloned()
            .unwrap_or_else(DeviceDescriptor::not_found)
    }

    pub fn best_piano_controller(&self) -> DeviceDescriptor {
        best_piano_controller(&self.snapshot())
    }

    pub fn find_synthesizers(&self) -> Vec<DeviceDescriptor> {
        find_synthesizers(&self.snapshot())
    }
}
