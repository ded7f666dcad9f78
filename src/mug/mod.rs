//! Bluetooth mug interface consumed by the bridge.
//!
//! The reconciler and listener only talk to mugs through [`MugDriver`] and
//! [`MugSession`]. `ble` provides the btleplug implementation used at runtime;
//! tests substitute scripted sessions.

pub mod ble;
pub mod protocol;

use std::fmt;

use uuid::Uuid;

use crate::error::DeviceError;

/// Manufacturer string written into every discovery device block.
pub const EMBER_MANUFACTURER: &str = "Ember";

/// Device-reported thermal/fill status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LiquidState {
    #[default]
    Unknown,
    Empty,
    Filling,
    ColdNoTempControl,
    Cooling,
    Heating,
    TargetTemperature,
    WarmNoTempControl,
}

impl LiquidState {
    pub fn from_byte(value: u8) -> Self {
        match value {
            1 => LiquidState::Empty,
            2 => LiquidState::Filling,
            3 => LiquidState::ColdNoTempControl,
            4 => LiquidState::Cooling,
            5 => LiquidState::Heating,
            6 => LiquidState::TargetTemperature,
            7 => LiquidState::WarmNoTempControl,
            _ => LiquidState::Unknown,
        }
    }

    /// True while the mug is actively controlling temperature.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            LiquidState::Heating | LiquidState::TargetTemperature | LiquidState::Cooling
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    /// Convert a Celsius reading into this unit.
    pub fn from_celsius(self, celsius: f32) -> f32 {
        match self {
            TemperatureUnit::Celsius => celsius,
            TemperatureUnit::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
        }
    }

    /// Convert a value expressed in this unit back to Celsius.
    pub fn to_celsius(self, value: f32) -> f32 {
        match self {
            TemperatureUnit::Celsius => value,
            TemperatureUnit::Fahrenheit => (value - 32.0) * 5.0 / 9.0,
        }
    }

    /// Unit symbol used by the climate descriptor.
    pub fn symbol(self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "C",
            TemperatureUnit::Fahrenheit => "F",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryInfo {
    pub percent: u8,
    pub on_charging_base: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Colour {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl fmt::Display for Colour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.red, self.green, self.blue)
    }
}

/// Sensor/actuator snapshot. Temperatures are always stored in Celsius.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MugData {
    pub name: Option<String>,
    pub current_temp: f32,
    pub target_temp: f32,
    pub temperature_unit: TemperatureUnit,
    pub liquid_level: u8,
    pub liquid_state: LiquidState,
    pub battery: Option<BatteryInfo>,
    pub led_colour: Option<Colour>,
}

/// Attributes that can be refreshed individually after a push event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MugAttribute {
    Name,
    CurrentTemperature,
    TargetTemperature,
    TemperatureUnit,
    LiquidLevel,
    LiquidState,
    Battery,
    LedColour,
}

impl MugAttribute {
    pub const ALL: [MugAttribute; 8] = [
        MugAttribute::Name,
        MugAttribute::CurrentTemperature,
        MugAttribute::TargetTemperature,
        MugAttribute::TemperatureUnit,
        MugAttribute::LiquidLevel,
        MugAttribute::LiquidState,
        MugAttribute::Battery,
        MugAttribute::LedColour,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MugAttribute::Name => "name",
            MugAttribute::CurrentTemperature => "current_temp",
            MugAttribute::TargetTemperature => "target_temp",
            MugAttribute::TemperatureUnit => "temperature_unit",
            MugAttribute::LiquidLevel => "liquid_level",
            MugAttribute::LiquidState => "liquid_state",
            MugAttribute::Battery => "battery",
            MugAttribute::LedColour => "led_colour",
        }
    }
}

/// One attribute whose value differed after a queued refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeChange {
    pub attribute: MugAttribute,
    pub old: String,
    pub new: String,
}

/// Scans for mugs and resolves known addresses to sessions.
#[allow(async_fn_in_trait)]
pub trait MugDriver {
    type Session: MugSession;

    /// Mugs currently advertising (pairing mode).
    async fn discover(&self) -> Result<Vec<Self::Session>, DeviceError>;

    /// Resolve a previously paired mug by hardware address.
    async fn find_by_address(&self, address: &str) -> Result<Option<Self::Session>, DeviceError>;
}

/// A connection-scoped handle to one mug. Dropping it releases the
/// underlying Bluetooth resources.
#[allow(async_fn_in_trait)]
pub trait MugSession {
    fn address(&self) -> &str;

    /// Device-reported name, falling back to the advertised name.
    fn name(&self) -> &str;

    /// Service UUIDs seen in the advertisement that produced this session.
    fn advertised_services(&self) -> &[Uuid];

    fn data(&self) -> &MugData;

    async fn is_connected(&self) -> bool;

    async fn connect(&mut self) -> Result<(), DeviceError>;

    async fn disconnect(&mut self) -> Result<(), DeviceError>;

    /// Read every attribute into [`MugSession::data`].
    async fn update_all(&mut self) -> Result<(), DeviceError>;

    /// Start receiving push events. Must stay connected to keep receiving them.
    async fn subscribe(&mut self) -> Result<(), DeviceError>;

    /// Re-read attributes queued by push events, returning the ones that changed.
    async fn update_queued_attributes(&mut self) -> Result<Vec<AttributeChange>, DeviceError>;

    async fn set_target_temperature(&mut self, celsius: f32) -> Result<(), DeviceError>;

    async fn set_led_colour(&mut self, colour: Colour) -> Result<(), DeviceError>;
}
