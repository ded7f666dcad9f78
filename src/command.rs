//! Parsing of `ember/{address}/{facet}/set` payloads.

use crate::entities::facet;
use crate::error::CommandError;
use crate::mug::Colour;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    Off,
    Heat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MugCommand {
    Power(PowerMode),
    /// Target in the mug's display unit.
    Temperature(f32),
    /// The LED cannot be switched or dimmed; accepted so state is echoed back.
    Led,
    LedBrightness,
    LedColour(Colour),
    Pair,
}

impl MugCommand {
    pub fn parse(facet_name: &str, payload: &[u8]) -> Result<Self, CommandError> {
        let text = String::from_utf8_lossy(payload);
        let text = text.trim();
        match facet_name {
            facet::POWER => Ok(MugCommand::Power(if text == "off" {
                PowerMode::Off
            } else {
                PowerMode::Heat
            })),
            facet::TEMPERATURE => parse_temperature(text).map(MugCommand::Temperature),
            facet::LED => Ok(MugCommand::Led),
            facet::LED_BRIGHTNESS => Ok(MugCommand::LedBrightness),
            facet::LED_COLOUR => parse_colour(text).map(MugCommand::LedColour),
            facet::PAIRING_BUTTON => Ok(MugCommand::Pair),
            other => Err(CommandError::Unsupported(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MugCommand::Power(_) => facet::POWER,
            MugCommand::Temperature(_) => facet::TEMPERATURE,
            MugCommand::Led => facet::LED,
            MugCommand::LedBrightness => facet::LED_BRIGHTNESS,
            MugCommand::LedColour(_) => facet::LED_COLOUR,
            MugCommand::Pair => facet::PAIRING_BUTTON,
        }
    }

    /// Pairing is the only command an unpaired mug accepts.
    pub fn is_pairing(&self) -> bool {
        matches!(self, MugCommand::Pair)
    }
}

/// Extract the facet from a command topic, e.g. `power` from
/// `ember/AA_BB/power/set`.
pub fn facet_of(topic: &str) -> Option<&str> {
    let rest = topic.strip_suffix("/set")?;
    let (_, facet_name) = rest.rsplit_once('/')?;
    (!facet_name.is_empty()).then_some(facet_name)
}

pub fn parse_temperature(text: &str) -> Result<f32, CommandError> {
    text.parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| CommandError::InvalidTemperature(text.to_string()))
}

/// Accepts `r,g,b`, optionally wrapped in parentheses.
pub fn parse_colour(text: &str) -> Result<Colour, CommandError> {
    let invalid = || CommandError::InvalidColour(text.to_string());
    let inner = text
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')');
    let parts: Vec<u8> = inner
        .split(',')
        .map(|p| p.trim().parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid())?;
    match parts.as_slice() {
        [red, green, blue] => Ok(Colour {
            red: *red,
            green: *green,
            blue: *blue,
        }),
        _ => Err(invalid()),
    }
}
