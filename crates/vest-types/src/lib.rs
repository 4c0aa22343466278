//! Shared types for the vest daemon components.
//!
//! This crate provides the value types used across vest-core, vest-rpc,
//! vest-daemon, and vest-cli. All types are serializable for transport over
//! the line-delimited JSON protocol.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::convert::TryFrom;

/// Number of actuator cells on the device.
pub const CELL_COUNT: u8 = 8;

/// One of the eight fixed actuator positions.
///
/// Hardware layout (front view and back view):
///
/// ```text
///       FRONT                BACK
///   +-----+-----+      +-----+-----+
///   |  2  |  5  |      |  1  |  6  |   upper
///   +-----+-----+      +-----+-----+
///   |  3  |  4  |      |  0  |  7  |   lower
///   +-----+-----+      +-----+-----+
///     L     R            L     R
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct CellId(u8);

impl CellId {
    pub const BACK_LOWER_LEFT: CellId = CellId(0);
    pub const BACK_UPPER_LEFT: CellId = CellId(1);
    pub const FRONT_UPPER_LEFT: CellId = CellId(2);
    pub const FRONT_LOWER_LEFT: CellId = CellId(3);
    pub const FRONT_LOWER_RIGHT: CellId = CellId(4);
    pub const FRONT_UPPER_RIGHT: CellId = CellId(5);
    pub const BACK_UPPER_RIGHT: CellId = CellId(6);
    pub const BACK_LOWER_RIGHT: CellId = CellId(7);

    pub const ALL: [CellId; CELL_COUNT as usize] = [
        CellId(0),
        CellId(1),
        CellId(2),
        CellId(3),
        CellId(4),
        CellId(5),
        CellId(6),
        CellId(7),
    ];

    pub const FRONT: [CellId; 4] = [
        Self::FRONT_UPPER_LEFT,
        Self::FRONT_UPPER_RIGHT,
        Self::FRONT_LOWER_LEFT,
        Self::FRONT_LOWER_RIGHT,
    ];

    pub const BACK: [CellId; 4] = [
        Self::BACK_UPPER_LEFT,
        Self::BACK_UPPER_RIGHT,
        Self::BACK_LOWER_LEFT,
        Self::BACK_LOWER_RIGHT,
    ];

    pub const LEFT_SIDE: [CellId; 4] = [
        Self::FRONT_UPPER_LEFT,
        Self::FRONT_LOWER_LEFT,
        Self::BACK_UPPER_LEFT,
        Self::BACK_LOWER_LEFT,
    ];

    pub const RIGHT_SIDE: [CellId; 4] = [
        Self::FRONT_UPPER_RIGHT,
        Self::FRONT_LOWER_RIGHT,
        Self::BACK_UPPER_RIGHT,
        Self::BACK_LOWER_RIGHT,
    ];

    /// Returns `None` when `index` is not a valid cell position.
    #[must_use]
    pub fn new(index: u8) -> Option<Self> {
        (index < CELL_COUNT).then_some(Self(index))
    }

    #[must_use]
    pub fn index(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for CellId {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .and_then(CellId::new)
            .ok_or_else(|| format!("cell must be between 0 and {}, got {value}", CELL_COUNT - 1))
    }
}

impl From<CellId> for u8 {
    fn from(cell: CellId) -> Self {
        cell.0
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Actuator intensity ("speed" on the wire), always within 1..=10.
///
/// Out-of-range values are rejected rather than clamped. Level 0 (off) is
/// only ever written internally by stop commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Intensity(u8);

impl Intensity {
    pub const MIN: Intensity = Intensity(1);
    pub const MAX: Intensity = Intensity(10);

    #[must_use]
    pub fn new(level: u8) -> Option<Self> {
        (Self::MIN.0..=Self::MAX.0)
            .contains(&level)
            .then_some(Self(level))
    }

    /// Constructor for literal levels in built-in data.
    ///
    /// # Panics
    ///
    /// Panics if `level` is outside 1..=10. In a `const` context this is a
    /// compile error instead.
    #[must_use]
    pub const fn from_level(level: u8) -> Self {
        assert!(matches!(level, 1..=10), "intensity must be between 1 and 10");
        Self(level)
    }

    #[must_use]
    pub fn level(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Intensity {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .and_then(Intensity::new)
            .ok_or_else(|| {
                format!(
                    "speed must be between {} and {}, got {value}",
                    Intensity::MIN.0,
                    Intensity::MAX.0
                )
            })
    }
}

impl From<Intensity> for u8 {
    fn from(intensity: Intensity) -> Self {
        intensity.0
    }
}

impl std::fmt::Display for Intensity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one physical unit found by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub bus: u8,
    pub address: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub vendor_id: u16,
    #[serde(default)]
    pub product_id: u16,
}

impl DeviceDescriptor {
    #[must_use]
    pub fn new(bus: u8, address: u8) -> Self {
        Self {
            bus,
            address,
            serial_number: None,
            vendor_id: 0,
            product_id: 0,
        }
    }

    #[must_use]
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = Some(serial.into());
        self
    }

    #[must_use]
    pub fn with_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        self
    }

    /// Same USB location. Serial numbers are not compared.
    #[must_use]
    pub fn same_location(&self, other: &DeviceDescriptor) -> bool {
        self.bus == other.bus && self.address == other.address
    }
}

impl std::fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bus {} address {}", self.bus, self.address)?;
        if let Some(serial) = &self.serial_number {
            write!(f, " (serial {serial})")?;
        }
        Ok(())
    }
}

/// How a client names the device it wants selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceMatcher {
    Location { bus: u8, address: u8 },
    Serial(String),
}

impl DeviceMatcher {
    /// Build a matcher from optional wire fields.
    ///
    /// A complete bus/address pair wins over a serial. An empty serial counts
    /// as absent. Returns `None` when neither shape is complete.
    #[must_use]
    pub fn from_parts(bus: Option<u8>, address: Option<u8>, serial: Option<&str>) -> Option<Self> {
        if let (Some(bus), Some(address)) = (bus, address) {
            return Some(Self::Location { bus, address });
        }
        serial
            .filter(|s| !s.is_empty())
            .map(|s| Self::Serial(s.to_string()))
    }

    #[must_use]
    pub fn matches(&self, device: &DeviceDescriptor) -> bool {
        match self {
            Self::Location { bus, address } => device.bus == *bus && device.address == *address,
            Self::Serial(serial) => device.serial_number.as_deref() == Some(serial.as_str()),
        }
    }
}

impl std::fmt::Display for DeviceMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Location { bus, address } => write!(f, "bus {bus} address {address}"),
            Self::Serial(serial) => write!(f, "serial {serial}"),
        }
    }
}

/// Session connection state as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Grouping used by UIs when listing effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectCategory {
    Weapons,
    Impacts,
    Melee,
    Driving,
    Special,
    Custom,
}

impl EffectCategory {
    pub const ALL: [EffectCategory; 6] = [
        Self::Weapons,
        Self::Impacts,
        Self::Melee,
        Self::Driving,
        Self::Special,
        Self::Custom,
    ];
}

/// One step of a pattern: pulse `cells` at `intensity`, then hold for `hold_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectStep {
    pub cells: BTreeSet<CellId>,
    #[serde(rename = "speed")]
    pub intensity: Intensity,
    #[serde(rename = "duration_ms")]
    pub hold_ms: u64,
}

impl EffectStep {
    #[must_use]
    pub fn new(cells: &[CellId], intensity: Intensity, hold_ms: u64) -> Self {
        Self {
            cells: cells.iter().copied().collect(),
            intensity,
            hold_ms,
        }
    }
}

/// A named, read-only haptic pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectPattern {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_category")]
    pub category: EffectCategory,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<EffectStep>,
}

fn default_category() -> EffectCategory {
    EffectCategory::Custom
}

impl EffectPattern {
    /// Unnamed pattern built from client-supplied steps.
    #[must_use]
    pub fn ad_hoc(steps: Vec<EffectStep>) -> Self {
        Self {
            name: "ad_hoc".to_string(),
            display_name: "Ad-hoc".to_string(),
            category: EffectCategory::Custom,
            description: String::new(),
            steps,
        }
    }

    #[must_use]
    pub fn total_duration_ms(&self) -> u64 {
        self.steps.iter().map(|s| s.hold_ms).sum()
    }

    /// Checks the structural rules cell and intensity types cannot express.
    ///
    /// # Errors
    ///
    /// Returns a message when the pattern has no name, no steps, or a step
    /// without cells.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("effect name must not be empty".to_string());
        }
        if self.steps.is_empty() {
            return Err(format!("effect '{}' has no steps", self.name));
        }
        if let Some(index) = self.steps.iter().position(|s| s.cells.is_empty()) {
            return Err(format!("effect '{}' step {index} has no cells", self.name));
        }
        Ok(())
    }
}

/// Listing entry returned by `list_effects`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectInfo {
    pub name: String,
    pub display_name: String,
    pub category: EffectCategory,
    pub description: String,
    pub duration_ms: u64,
    pub steps: Vec<EffectStep>,
}

impl From<&EffectPattern> for EffectInfo {
    fn from(pattern: &EffectPattern) -> Self {
        Self {
            name: pattern.name.clone(),
            display_name: pattern.display_name.clone(),
            category: pattern.category,
            description: pattern.description.clone(),
            duration_ms: pattern.total_duration_ms(),
            steps: pattern.steps.clone(),
        }
    }
}

/// Progress of the active playback, reported by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackInfo {
    pub effect_name: String,
    pub step: usize,
    pub total_steps: usize,
}
