//! Startup configuration: CLI flags layered over an optional YAML file.
//!
//! Precedence is CLI, then file, then built-in defaults. Missing required
//! parameters are reported together.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_BROKER_PORT: u16 = 1883;
const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 30;
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 1;
const DEFAULT_SCAN_DURATION_SECS: u64 = 5;
const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";

#[derive(Debug, Default, Parser)]
#[command(
    name = "ember-mqtt-bridge",
    version,
    about = "Integrate your Ember mug with your MQTT server"
)]
pub struct Cli {
    /// YAML file with any of the options below; command-line values win.
    #[arg(short = 'c', long)]
    pub config_file: Option<PathBuf>,

    /// Target MQTT broker, like test.mosquitto.org.
    #[arg(short = 'b', long)]
    pub mqtt_broker: Option<String>,

    /// Target MQTT broker port [default: 1883].
    #[arg(short = 'P', long)]
    pub mqtt_broker_port: Option<u16>,

    /// Username to authenticate to the MQTT broker.
    #[arg(short = 'u', long)]
    pub mqtt_username: Option<String>,

    /// Password to authenticate to the MQTT broker.
    #[arg(short = 'p', long)]
    pub mqtt_password: Option<String>,

    /// Seconds between polling passes [default: 30].
    #[arg(short = 'i', long)]
    pub update_interval: Option<u64>,

    /// MQTT discovery prefix [default: homeassistant].
    #[arg(long)]
    pub discovery_prefix: Option<String>,

    /// Bluetooth adapter to use, matched against the adapter description.
    #[arg(long)]
    pub adapter: Option<String>,

    /// Address of a paired mug to track from startup. Repeatable.
    #[arg(long = "mug", value_name = "ADDRESS")]
    pub mugs: Vec<String>,

    /// Seconds to wait before reconnecting to the broker [default: 1].
    #[arg(long)]
    pub retry_interval: Option<u64>,

    /// Seconds each Bluetooth scan runs for [default: 5].
    #[arg(long)]
    pub scan_duration: Option<u64>,
}

/// Options accepted in the YAML config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub mqtt_broker: Option<String>,
    pub mqtt_broker_port: Option<u16>,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub update_interval: Option<u64>,
    pub discovery_prefix: Option<String>,
    pub adapter: Option<String>,
    pub mugs: Vec<String>,
    pub retry_interval: Option<u64>,
    pub scan_duration: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeSettings {
    pub discovery_prefix: String,
    pub update_interval: Duration,
    pub retry_interval: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            discovery_prefix: DEFAULT_DISCOVERY_PREFIX.to_string(),
            update_interval: Duration::from_secs(DEFAULT_UPDATE_INTERVAL_SECS),
            retry_interval: Duration::from_secs(DEFAULT_RETRY_INTERVAL_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub broker: BrokerConfig,
    pub bridge: BridgeSettings,
    pub adapter: Option<String>,
    pub scan_duration: Duration,
    /// Addresses seeded into the known set.
    pub mugs: Vec<String>,
}

impl Config {
    /// Read the config file named on the command line, if any, and merge.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config_file {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(cli, file)
    }

    pub fn merge(cli: &Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let host = cli.mqtt_broker.clone().or(file.mqtt_broker);
        let username = cli.mqtt_username.clone().or(file.mqtt_username);
        let password = cli.mqtt_password.clone().or(file.mqtt_password);

        let mut missing = Vec::new();
        if host.is_none() {
            missing.push("mqtt_broker");
        }
        if username.is_none() {
            missing.push("mqtt_username");
        }
        if password.is_none() {
            missing.push("mqtt_password");
        }
        let (Some(host), Some(username), Some(password)) = (host, username, password) else {
            return Err(ConfigError::MissingParameters(missing));
        };

        let secs = |cli: Option<u64>, file: Option<u64>, default: u64| {
            Duration::from_secs(cli.or(file).unwrap_or(default))
        };

        let mut mugs = file.mugs;
        mugs.extend(cli.mugs.iter().cloned());

        Ok(Self {
            broker: BrokerConfig {
                host,
                port: cli
                    .mqtt_broker_port
                    .or(file.mqtt_broker_port)
                    .unwrap_or(DEFAULT_BROKER_PORT),
                username,
                password,
                client_id: format!("ember-mqtt-bridge-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            },
            bridge: BridgeSettings {
                discovery_prefix: cli
                    .discovery_prefix
                    .clone()
                    .or(file.discovery_prefix)
                    .unwrap_or_else(|| DEFAULT_DISCOVERY_PREFIX.to_string()),
                update_interval: secs(
                    cli.update_interval,
                    file.update_interval,
                    DEFAULT_UPDATE_INTERVAL_SECS,
                ),
                retry_interval: secs(
                    cli.retry_interval,
                    file.retry_interval,
                    DEFAULT_RETRY_INTERVAL_SECS,
                ),
            },
            adapter: cli.adapter.clone().or(file.adapter),
            scan_duration: secs(cli.scan_duration, file.scan_duration, DEFAULT_SCAN_DURATION_SECS),
            mugs,
        })
    }
}
