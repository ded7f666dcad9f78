//! Home Assistant discovery descriptors and telemetry for one mug.
//!
//! Everything here is pure: a [`MugView`] goes in, topics and JSON come out.
//!
//! Topic layout:
//!   ember/{sanitised}/state                      telemetry (not retained)
//!   ember/{sanitised}/{facet}/set                commands
//!   {prefix}/{component}/{sanitised}/{facet}/config  descriptors

use serde::Serialize;
use serde_json::{json, Value};

use crate::mug::{MugData, TemperatureUnit, EMBER_MANUFACTURER};

pub const TOPIC_ROOT: &str = "ember";

/// Facet name of the climate descriptor; its retraction forgets the mug.
pub const CLIMATE_FACET: &str = "root";

/// Target written for a "heat" mode command, the top of the supported range.
pub const MAX_TARGET_CELSIUS: f32 = 62.5;
const MIN_TARGET_CELSIUS: f32 = 50.0;
const MAX_TARGET_FAHRENHEIT: f32 = 145.0;
const MIN_TARGET_FAHRENHEIT: f32 = 120.0;

/// Replace colons so the address is usable as a topic level.
pub fn sanitise_address(address: &str) -> String {
    address.replace(':', "_")
}

/// Inverse of [`sanitise_address`].
pub fn unsanitise_address(sanitised: &str) -> String {
    sanitised.replace('_', ":")
}

/// The per-mug MQTT namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MugTopics {
    root: String,
}

impl MugTopics {
    pub fn new(address: &str) -> Self {
        Self {
            root: format!("{}/{}", TOPIC_ROOT, sanitise_address(address)),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// True when `topic` lives under this mug's namespace.
    pub fn owns(&self, topic: &str) -> bool {
        topic
            .strip_prefix(self.root.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    pub fn state(&self) -> String {
        format!("{}/state", self.root)
    }

    pub fn command(&self, facet: &str) -> String {
        format!("{}/{}/set", self.root, facet)
    }

    /// Subscription filter covering every command topic of this mug.
    pub fn command_filter(&self) -> String {
        format!("{}/+/set", self.root)
    }
}

/// Command facets, shared with the command parser.
pub mod facet {
    pub const POWER: &str = "power";
    pub const TEMPERATURE: &str = "temperature";
    pub const LED: &str = "led";
    pub const LED_BRIGHTNESS: &str = "led_brightness";
    pub const LED_COLOUR: &str = "led_color";
    pub const PAIRING_BUTTON: &str = "pairing_button";
}

/// Read-only view of a mug used to render payloads.
#[derive(Debug, Clone, Copy)]
pub struct MugView<'a> {
    pub address: &'a str,
    pub name: &'a str,
    pub data: &'a MugData,
}

impl MugView<'_> {
    fn topics(&self) -> MugTopics {
        MugTopics::new(self.address)
    }

    fn config_topic(&self, prefix: &str, component: &str, facet: &str) -> String {
        format!(
            "{}/{}/{}/{}/config",
            prefix,
            component,
            sanitise_address(self.address),
            facet
        )
    }
}

/// A descriptor ready to publish. `payload == None` retracts the entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    pub topic: String,
    pub payload: Option<Value>,
    pub retain: bool,
}

impl EntityDescriptor {
    pub fn body(&self) -> Vec<u8> {
        self.payload
            .as_ref()
            .map(|p| p.to_string().into_bytes())
            .unwrap_or_default()
    }
}

/// Shared `device` block grouping every facet under one device.
pub fn device_block(view: &MugView<'_>) -> Value {
    json!({
        "name": view.name,
        "connections": [["mac", view.address]],
        "model": view.name,
        "manufacturer": EMBER_MANUFACTURER,
        "suggested_area": "Office",
    })
}

/// Mode list offered by the climate entity. Heating an empty mug is pointless.
pub fn climate_modes(data: &MugData) -> Vec<&'static str> {
    if data.liquid_state == crate::mug::LiquidState::Empty {
        vec!["off"]
    } else {
        vec!["heat", "off"]
    }
}

pub fn climate(prefix: &str, view: &MugView<'_>) -> EntityDescriptor {
    let topics = view.topics();
    let state = topics.state();
    let unit = view.data.temperature_unit;
    let (min_temp, max_temp) = match unit {
        TemperatureUnit::Celsius => (MIN_TARGET_CELSIUS, MAX_TARGET_CELSIUS),
        TemperatureUnit::Fahrenheit => (MIN_TARGET_FAHRENHEIT, MAX_TARGET_FAHRENHEIT),
    };

    EntityDescriptor {
        topic: view.config_topic(prefix, "climate", CLIMATE_FACET),
        payload: Some(json!({
            "name": "Mug Temperature Control",
            "mode_state_topic": state,
            "mode_state_template": "{{ value_json.power }}",
            "current_temperature_topic": state,
            "current_temperature_template": "{{ value_json.current_temperature }}",
            "temperature_state_topic": state,
            "temperature_state_template": "{{ value_json.desired_temperature }}",
            "availability_topic": state,
            "availability_template": "{{ value_json.availability }}",
            "mode_command_topic": topics.command(facet::POWER),
            "temperature_command_topic": topics.command(facet::TEMPERATURE),
            "modes": climate_modes(view.data),
            "temperature_unit": unit.symbol(),
            "temp_step": 1,
            "min_temp": min_temp,
            "max_temp": max_temp,
            "unique_id": view.address,
            "icon": "mdi:coffee",
            "device": device_block(view),
        })),
        retain: true,
    }
}

pub fn battery(prefix: &str, view: &MugView<'_>) -> EntityDescriptor {
    let state = view.topics().state();
    EntityDescriptor {
        topic: view.config_topic(prefix, "sensor", "battery"),
        payload: Some(json!({
            "name": "Mug Battery",
            "device_class": "battery",
            "unit_of_measurement": "%",
            "state_topic": state,
            "value_template": "{{ value_json.battery_percent }}",
            "availability_topic": state,
            "availability_template": "{{ value_json.availability }}",
            "unique_id": format!("{}_battery", view.address),
            "device": device_block(view),
        })),
        retain: true,
    }
}

pub fn charging(prefix: &str, view: &MugView<'_>) -> EntityDescriptor {
    let state = view.topics().state();
    EntityDescriptor {
        topic: view.config_topic(prefix, "binary_sensor", "battery_charging"),
        payload: Some(json!({
            "name": "Mug Battery Charging",
            "device_class": "battery_charging",
            "state_topic": state,
            "value_template": "{{ value_json.battery_charging }}",
            "availability_topic": state,
            "availability_template": "{{ value_json.availability }}",
            "unique_id": format!("{}_battery_charging", view.address),
            "device": device_block(view),
        })),
        retain: true,
    }
}

/// The LED has no off state and no brightness, but Home Assistant hides the
/// colour picker unless the light advertises both command topics.
pub fn led(prefix: &str, view: &MugView<'_>) -> EntityDescriptor {
    let topics = view.topics();
    let state = topics.state();
    EntityDescriptor {
        topic: view.config_topic(prefix, "light", facet::LED),
        payload: Some(json!({
            "name": "Mug LED",
            "optimistic": false,
            "state_topic": state,
            "state_value_template": "{{ value_json.led }}",
            "command_topic": topics.command(facet::LED),
            "brightness_command_topic": topics.command(facet::LED_BRIGHTNESS),
            "rgb_command_topic": topics.command(facet::LED_COLOUR),
            "rgb_command_template": "{{ red }},{{ green }},{{ blue }}",
            "rgb_state_topic": state,
            "rgb_value_template": "{{ value_json.led_rgb }}",
            "availability_topic": state,
            "availability_template": "{{ value_json.availability }}",
            "unique_id": format!("{}_led", view.address),
            "device": device_block(view),
        })),
        retain: true,
    }
}

/// Transient button offered while a mug advertises but is not paired.
pub fn pairing_button(prefix: &str, view: &MugView<'_>) -> EntityDescriptor {
    EntityDescriptor {
        topic: view.config_topic(prefix, "button", facet::PAIRING_BUTTON),
        payload: Some(json!({
            "name": "Pair With Device",
            "command_topic": view.topics().command(facet::PAIRING_BUTTON),
            "unique_id": format!("{}_pairing_button", view.address),
            "icon": "mdi:coffee-off-outline",
            "device": device_block(view),
        })),
        retain: false,
    }
}

/// Empty-payload retraction of the pairing button.
pub fn pairing_button_retraction(prefix: &str, address: &str) -> EntityDescriptor {
    EntityDescriptor {
        topic: format!(
            "{}/button/{}/{}/config",
            prefix,
            sanitise_address(address),
            facet::PAIRING_BUTTON
        ),
        payload: None,
        retain: false,
    }
}

/// Full descriptor set for a tracked mug, climate first.
pub fn tracked_descriptors(prefix: &str, view: &MugView<'_>) -> Vec<EntityDescriptor> {
    vec![
        climate(prefix, view),
        battery(prefix, view),
        charging(prefix, view),
        led(prefix, view),
    ]
}

/// Body of `ember/{sanitised}/state`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Telemetry {
    pub power: &'static str,
    pub current_temperature: f32,
    pub desired_temperature: f32,
    pub availability: &'static str,
    pub battery_percent: Option<u8>,
    pub battery_charging: &'static str,
    pub led: &'static str,
    pub led_rgb: String,
}

fn round_tenth(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}

/// Telemetry in the mug's preferred unit.
pub fn telemetry(view: &MugView<'_>, online: bool) -> Telemetry {
    let data = view.data;
    let unit = data.temperature_unit;
    let display = |celsius: f32| {
        if celsius == 0.0 {
            0.0
        } else {
            round_tenth(unit.from_celsius(celsius))
        }
    };

    Telemetry {
        power: if data.liquid_state.is_active() { "heat" } else { "off" },
        current_temperature: display(data.current_temp),
        desired_temperature: display(data.target_temp),
        availability: if online { "online" } else { "offline" },
        battery_percent: data.battery.map(|b| b.percent),
        battery_charging: match data.battery {
            None => "UNKNOWN",
            Some(b) if b.on_charging_base => "ON",
            Some(_) => "OFF",
        },
        led: "ON",
        led_rgb: data
            .led_colour
            .map(|c| c.to_string())
            .unwrap_or_else(|| "UNKNOWN".to_string()),
    }
}
