//! Error taxonomy for the bridge.
//!
//! Only `ConfigError::MissingParameters` is fatal. Device errors demote a
//! single mug, broker errors restart the session, command errors drop one
//! message.

use thiserror::Error;

/// A mug stopped responding or returned something we could not decode.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("bluetooth communication failed: {0}")]
    Communication(String),

    #[error("characteristic {0} not found on device")]
    MissingCharacteristic(uuid::Uuid),

    #[error("malformed {attribute} reading: {bytes:?}")]
    MalformedReading {
        attribute: &'static str,
        bytes: Vec<u8>,
    },

    #[error("no bluetooth adapter available{}", .0.as_deref().map(|n| format!(" matching {n}")).unwrap_or_default())]
    AdapterUnavailable(Option<String>),
}

impl From<btleplug::Error> for DeviceError {
    fn from(err: btleplug::Error) -> Self {
        DeviceError::Communication(err.to_string())
    }
}

/// The broker connection failed or refused a request.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("MQTT client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("MQTT connection failed: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("failed to encode MQTT payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("inbound MQTT message stream closed")]
    StreamClosed,
}

/// An inbound command could not be turned into a device operation.
#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("unsupported command topic {0}")]
    Unsupported(String),

    #[error("invalid temperature {0:?}")]
    InvalidTemperature(String),

    #[error("invalid colour {0:?}, expected \"r,g,b\"")]
    InvalidColour(String),

    #[error("command {command} is not available for {status} mug")]
    WrongStatus {
        command: &'static str,
        status: &'static str,
    },
}

/// Failure while operating one mug. Device failures demote the mug,
/// broker failures end the session, command failures drop the message.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Command(#[from] CommandError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("one or more parameters was not provided: {}", .0.join(", "))]
    MissingParameters(Vec<&'static str>),
}
