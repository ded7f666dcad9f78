use std::convert::Infallible;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::BrokerConfig;
use crate::entities::EntityDescriptor;
use crate::error::BrokerError;

/// Incoming discovery payloads from other integrations can be large.
const MAX_PACKET_SIZE: usize = 256 * 1024;

/// A message delivered by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Outbound side of a broker session.
#[allow(async_fn_in_trait)]
pub trait MqttTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), BrokerError>;

    async fn subscribe(&self, filter: &str) -> Result<(), BrokerError>;

    async fn unsubscribe(&self, filter: &str) -> Result<(), BrokerError>;

    /// Ask the broker to close the session once queued requests are sent.
    async fn disconnect(&self) -> Result<(), BrokerError>;
}

/// Inbound side of a broker session.
#[allow(async_fn_in_trait)]
pub trait MqttEvents {
    /// Deliver incoming publishes to `inbound`. Only returns on failure.
    async fn pump(
        &mut self,
        inbound: mpsc::UnboundedSender<InboundMessage>,
    ) -> Result<Infallible, BrokerError>;

    /// Send whatever is still queued, returning once the session is gone.
    async fn flush(&mut self);
}

/// Opens one broker session per call.
pub trait MqttConnector {
    type Transport: MqttTransport;
    type Events: MqttEvents;

    fn connect(&self) -> (Self::Transport, Self::Events);
}

pub async fn publish_descriptor<T: MqttTransport>(
    mqtt: &T,
    descriptor: &EntityDescriptor,
) -> Result<(), BrokerError> {
    mqtt.publish(&descriptor.topic, descriptor.body(), descriptor.retain)
        .await
}

pub async fn publish_json<T: MqttTransport, P: Serialize>(
    mqtt: &T,
    topic: &str,
    payload: &P,
    retain: bool,
) -> Result<(), BrokerError> {
    let body = serde_json::to_vec(payload)?;
    mqtt.publish(topic, body, retain).await
}

/// rumqttc-backed transport. Requests are queued on the client and only
/// reach the broker while [`pump`] polls the matching event loop.
#[derive(Clone)]
pub struct RumqttcTransport {
    client: AsyncClient,
}

impl MqttTransport for RumqttcTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), BrokerError> {
        self.client
            .publish(topic, QoS::AtMostOnce, retain, payload)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<(), BrokerError> {
        tracing::debug!(filter = %filter, "MQTT subscribe");
        self.client.subscribe(filter, QoS::AtMostOnce).await?;
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), BrokerError> {
        tracing::debug!(filter = %filter, "MQTT unsubscribe");
        self.client.unsubscribe(filter).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.client.disconnect().await?;
        Ok(())
    }
}

/// Connects to the configured broker with rumqttc.
pub struct RumqttcConnector {
    config: BrokerConfig,
}

impl RumqttcConnector {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }
}

impl MqttConnector for RumqttcConnector {
    type Transport = RumqttcTransport;
    type Events = EventLoop;

    fn connect(&self) -> (RumqttcTransport, EventLoop) {
        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            client_id = %self.config.client_id,
            "Connecting to MQTT broker"
        );
        connect(&self.config)
    }
}

impl MqttEvents for EventLoop {
    async fn pump(
        &mut self,
        inbound: mpsc::UnboundedSender<InboundMessage>,
    ) -> Result<Infallible, BrokerError> {
        pump(self, inbound).await
    }

    async fn flush(&mut self) {
        flush(self).await
    }
}

/// Build a fresh client/event-loop pair for one broker session.
fn connect(config: &BrokerConfig) -> (RumqttcTransport, EventLoop) {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options
        .set_credentials(&config.username, &config.password)
        .set_keep_alive(Duration::from_secs(30))
        .set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    let (client, eventloop) = AsyncClient::new(options, 100);
    (RumqttcTransport { client }, eventloop)
}

/// Drive the event loop, forwarding publishes to `inbound`. Only returns on
/// failure. The channel is unbounded so a busy listener never stalls the
/// loop that flushes its own outgoing requests.
async fn pump(
    eventloop: &mut EventLoop,
    inbound: mpsc::UnboundedSender<InboundMessage>,
) -> Result<Infallible, BrokerError> {
    loop {
        let event = eventloop.poll().await?;
        if let Event::Incoming(Packet::ConnAck(ack)) = &event {
            tracing::info!(code = ?ack.code, "MQTT connected");
            continue;
        }
        if let Some(message) = extract_publish(&event) {
            tracing::trace!(topic = %message.topic, bytes = message.payload.len(), "MQTT <-");
            if inbound.send(message).is_err() {
                return Err(BrokerError::StreamClosed);
            }
        }
    }
}

/// Poll until the event loop errors out, flushing queued requests.
async fn flush(eventloop: &mut EventLoop) {
    while eventloop.poll().await.is_ok() {}
}

/// Extract topic and payload from an incoming publish.
fn extract_publish(event: &Event) -> Option<InboundMessage> {
    match event {
        Event::Incoming(Packet::Publish(publish)) => Some(InboundMessage {
            topic: publish.topic.clone(),
            payload: publish.payload.to_vec(),
        }),
        _ => None,
    }
}
