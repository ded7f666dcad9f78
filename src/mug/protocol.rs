//! Ember GATT layout and value codecs.
//!
//! All characteristics live under the Ember service and share its UUID
//! suffix; only the 16 bits after the `fc54` prefix differ. Temperatures are
//! little-endian u16 hundredths of a degree Celsius.

use uuid::Uuid;

use super::{BatteryInfo, Colour, LiquidState, MugAttribute, TemperatureUnit};
use crate::error::DeviceError;

/// Service advertised by mugs, used to filter scanner results.
pub const EMBER_SERVICE: Uuid = Uuid::from_u128(0xfc543622_236c_4c94_8fa9_944a3e5353fa);

const fn characteristic(short: u16) -> Uuid {
    Uuid::from_u128(0xfc540000_236c_4c94_8fa9_944a3e5353fa | ((short as u128) << 96))
}

pub const NAME: Uuid = characteristic(0x0001);
pub const CURRENT_TEMPERATURE: Uuid = characteristic(0x0002);
pub const TARGET_TEMPERATURE: Uuid = characteristic(0x0003);
pub const TEMPERATURE_UNIT: Uuid = characteristic(0x0004);
pub const LIQUID_LEVEL: Uuid = characteristic(0x0005);
pub const BATTERY: Uuid = characteristic(0x0007);
pub const LIQUID_STATE: Uuid = characteristic(0x0008);
pub const PUSH_EVENT: Uuid = characteristic(0x0012);
pub const LED_COLOUR: Uuid = characteristic(0x0014);

/// Characteristic backing each refreshable attribute.
pub fn characteristic_for(attribute: MugAttribute) -> Uuid {
    match attribute {
        MugAttribute::Name => NAME,
        MugAttribute::CurrentTemperature => CURRENT_TEMPERATURE,
        MugAttribute::TargetTemperature => TARGET_TEMPERATURE,
        MugAttribute::TemperatureUnit => TEMPERATURE_UNIT,
        MugAttribute::LiquidLevel => LIQUID_LEVEL,
        MugAttribute::LiquidState => LIQUID_STATE,
        MugAttribute::Battery => BATTERY,
        MugAttribute::LedColour => LED_COLOUR,
    }
}

/// Events delivered on the push-event characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushEvent {
    BatteryChanged,
    Charging,
    NotCharging,
    TargetTemperatureChanged,
    DrinkTemperatureChanged,
    AuthInfoNotFound,
    LiquidLevelChanged,
    LiquidStateChanged,
    BatteryVoltageStateChanged,
}

impl PushEvent {
    pub fn from_byte(value: u8) -> Option<Self> {
        Some(match value {
            1 => PushEvent::BatteryChanged,
            2 => PushEvent::Charging,
            3 => PushEvent::NotCharging,
            4 => PushEvent::TargetTemperatureChanged,
            5 => PushEvent::DrinkTemperatureChanged,
            6 => PushEvent::AuthInfoNotFound,
            7 => PushEvent::LiquidLevelChanged,
            8 => PushEvent::LiquidStateChanged,
            9 => PushEvent::BatteryVoltageStateChanged,
            _ => return None,
        })
    }

    /// Attribute to re-read when this event arrives.
    pub fn attribute(self) -> Option<MugAttribute> {
        match self {
            PushEvent::BatteryChanged
            | PushEvent::Charging
            | PushEvent::NotCharging
            | PushEvent::BatteryVoltageStateChanged => Some(MugAttribute::Battery),
            PushEvent::TargetTemperatureChanged => Some(MugAttribute::TargetTemperature),
            PushEvent::DrinkTemperatureChanged => Some(MugAttribute::CurrentTemperature),
            PushEvent::LiquidLevelChanged => Some(MugAttribute::LiquidLevel),
            PushEvent::LiquidStateChanged => Some(MugAttribute::LiquidState),
            PushEvent::AuthInfoNotFound => None,
        }
    }

    /// Reverse of [`PushEvent::attribute`] for the events the bridge reacts to.
    pub fn for_attribute(attribute: MugAttribute) -> Option<Self> {
        match attribute {
            MugAttribute::LiquidState => Some(PushEvent::LiquidStateChanged),
            MugAttribute::LiquidLevel => Some(PushEvent::LiquidLevelChanged),
            MugAttribute::TargetTemperature => Some(PushEvent::TargetTemperatureChanged),
            MugAttribute::CurrentTemperature => Some(PushEvent::DrinkTemperatureChanged),
            MugAttribute::Battery => Some(PushEvent::BatteryChanged),
            _ => None,
        }
    }
}

fn malformed(attribute: &'static str, bytes: &[u8]) -> DeviceError {
    DeviceError::MalformedReading {
        attribute,
        bytes: bytes.to_vec(),
    }
}

pub fn decode_temperature(bytes: &[u8]) -> Result<f32, DeviceError> {
    match bytes {
        [lo, hi, ..] => Ok(f32::from(u16::from_le_bytes([*lo, *hi])) / 100.0),
        _ => Err(malformed("temperature", bytes)),
    }
}

pub fn encode_temperature(celsius: f32) -> [u8; 2] {
    let hundredths = (celsius * 100.0).round().clamp(0.0, f32::from(u16::MAX)) as u16;
    hundredths.to_le_bytes()
}

pub fn decode_unit(bytes: &[u8]) -> Result<TemperatureUnit, DeviceError> {
    match bytes.first() {
        Some(0) => Ok(TemperatureUnit::Celsius),
        Some(1) => Ok(TemperatureUnit::Fahrenheit),
        _ => Err(malformed("temperature_unit", bytes)),
    }
}

pub fn decode_liquid_state(bytes: &[u8]) -> Result<LiquidState, DeviceError> {
    bytes
        .first()
        .map(|b| LiquidState::from_byte(*b))
        .ok_or_else(|| malformed("liquid_state", bytes))
}

pub fn decode_liquid_level(bytes: &[u8]) -> Result<u8, DeviceError> {
    bytes.first().copied().ok_or_else(|| malformed("liquid_level", bytes))
}

pub fn decode_battery(bytes: &[u8]) -> Result<BatteryInfo, DeviceError> {
    match bytes {
        [percent, charging, ..] => Ok(BatteryInfo {
            percent: (*percent).min(100),
            on_charging_base: *charging == 1,
        }),
        _ => Err(malformed("battery", bytes)),
    }
}

pub fn decode_colour(bytes: &[u8]) -> Result<Colour, DeviceError> {
    match bytes {
        [red, green, blue, ..] => Ok(Colour {
            red: *red,
            green: *green,
            blue: *blue,
        }),
        _ => Err(malformed("led_colour", bytes)),
    }
}

/// RGBA with full alpha; the mug ignores alpha but requires four bytes.
pub fn encode_colour(colour: Colour) -> [u8; 4] {
    [colour.red, colour.green, colour.blue, 0xff]
}

pub fn decode_name(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\0')
        .trim()
        .to_string()
}
