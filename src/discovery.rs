//! Inbound discovery announcements.
//!
//! Retained descriptors under the discovery prefix double as the bridge's
//! memory of paired mugs: any announcement with an Ember device block teaches
//! us an address, whichever bridge instance published it. An empty payload on
//! a climate root descriptor retracts the mug.
//!
//! Topic format: {prefix}/{component}/{node_id}/{object_id}/config
//!           or: {prefix}/{component}/{object_id}/config

use serde::Deserialize;

use crate::entities::{unsanitise_address, CLIMATE_FACET};
use crate::mug::EMBER_MANUFACTURER;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    Learned(String),
    Retracted(String),
    Ignored,
}

/// Raw discovery payload (subset of fields we care about).
#[derive(Debug, Deserialize)]
struct DiscoveryPayload {
    #[serde(default)]
    device: Option<DevicePayload>,
}

#[derive(Debug, Deserialize)]
struct DevicePayload {
    #[serde(default)]
    manufacturer: Option<String>,
    #[serde(default)]
    connections: Vec<Vec<String>>,
}

impl DevicePayload {
    /// Preferred connection identifier: a `mac` entry, else the first one.
    fn address(&self) -> Option<&str> {
        fn value(connection: &[String]) -> Option<&str> {
            connection.get(1).map(String::as_str)
        }
        self.connections
            .iter()
            .find(|c| c.first().is_some_and(|kind| kind == "mac"))
            .map(Vec::as_slice)
            .and_then(value)
            .or_else(|| self.connections.first().map(Vec::as_slice).and_then(value))
    }
}

struct DiscoveryTopic<'a> {
    component: &'a str,
    node_id: Option<&'a str>,
    object_id: &'a str,
}

fn split_topic<'a>(prefix: &str, topic: &'a str) -> Option<DiscoveryTopic<'a>> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let parts: Vec<&str> = rest.split('/').collect();
    match parts.as_slice() {
        &[component, object_id, "config"] => Some(DiscoveryTopic {
            component,
            node_id: None,
            object_id,
        }),
        &[component, node_id, object_id, "config"] => Some(DiscoveryTopic {
            component,
            node_id: Some(node_id),
            object_id,
        }),
        _ => None,
    }
}

pub fn is_discovery_topic(prefix: &str, topic: &str) -> bool {
    topic
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Interpret one message received under the discovery prefix.
pub fn parse_announcement(prefix: &str, topic: &str, payload: &[u8]) -> Announcement {
    let Some(parsed) = split_topic(prefix, topic) else {
        return Announcement::Ignored;
    };

    if payload.is_empty() {
        return match parsed.node_id {
            Some(node) if parsed.component == "climate" && parsed.object_id == CLIMATE_FACET => {
                Announcement::Retracted(unsanitise_address(node))
            }
            _ => Announcement::Ignored,
        };
    }

    // Our own pairing buttons carry the Ember device block for unpaired mugs.
    if parsed.component == "button" {
        return Announcement::Ignored;
    }

    let disc: DiscoveryPayload = match serde_json::from_slice(payload) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(topic = %topic, error = %e, "Discovery: ignoring malformed payload");
            return Announcement::Ignored;
        }
    };

    let Some(device) = disc.device else {
        return Announcement::Ignored;
    };
    if device.manufacturer.as_deref() != Some(EMBER_MANUFACTURER) {
        return Announcement::Ignored;
    }
    match device.address() {
        Some(address) => Announcement::Learned(address.to_string()),
        None => Announcement::Ignored,
    }
}
