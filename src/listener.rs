//! Command router: learns addresses from discovery traffic and applies
//! `ember/{address}/{facet}/set` commands to the matching mug.

use std::convert::Infallible;

use tokio::sync::mpsc;

use crate::bridge::BridgeState;
use crate::command::{facet_of, MugCommand, PowerMode};
use crate::discovery::{self, Announcement};
use crate::entities::{MAX_TARGET_CELSIUS, TOPIC_ROOT};
use crate::error::{BrokerError, CommandError, OperationError};
use crate::mqtt::{publish_json, InboundMessage, MqttTransport};
use crate::mug::{LiquidState, MugDriver, MugSession};
use crate::reconciler::demote_mug;
use crate::tracker::{DeviceRecord, MugStatus};

pub struct Listener<'a, D: MugDriver, T> {
    state: &'a BridgeState<D>,
    mqtt: &'a T,
}

impl<'a, D: MugDriver, T: MqttTransport> Listener<'a, D, T> {
    pub fn new(state: &'a BridgeState<D>, mqtt: &'a T) -> Self {
        Self { state, mqtt }
    }

    /// Subscribe to the discovery prefix and handle messages until the
    /// inbound stream closes or the broker fails.
    pub async fn run(
        &self,
        inbound: &mut mpsc::UnboundedReceiver<InboundMessage>,
    ) -> Result<Infallible, BrokerError> {
        let filter = format!("{}/#", self.state.settings.discovery_prefix);
        self.mqtt.subscribe(&filter).await?;

        while let Some(message) = inbound.recv().await {
            self.handle(&message).await?;
        }
        Err(BrokerError::StreamClosed)
    }

    pub async fn handle(&self, message: &InboundMessage) -> Result<(), BrokerError> {
        let prefix = &self.state.settings.discovery_prefix;
        if discovery::is_discovery_topic(prefix, &message.topic) {
            self.handle_announcement(prefix, message);
            return Ok(());
        }

        let is_command = message
            .topic
            .strip_prefix(TOPIC_ROOT)
            .is_some_and(|rest| rest.starts_with('/'))
            && message.topic.ends_with("/set");
        if is_command {
            return self.handle_command(message).await;
        }

        tracing::trace!(topic = %message.topic, "Ignoring message");
        Ok(())
    }

    fn handle_announcement(&self, prefix: &str, message: &InboundMessage) {
        match discovery::parse_announcement(prefix, &message.topic, &message.payload) {
            Announcement::Learned(address) => {
                if self.state.known.record(&address) {
                    tracing::info!(address = %address, "Learned mug from discovery");
                }
            }
            Announcement::Retracted(address) => {
                if self.state.known.forget(&address) {
                    tracing::info!(address = %address, "Mug retracted, forgetting");
                }
            }
            Announcement::Ignored => {}
        }
    }

    async fn handle_command(&self, message: &InboundMessage) -> Result<(), BrokerError> {
        let mut tracker = self.state.tracker.lock().await;

        let matches = tracker.matching(&message.topic);
        let address = match matches.as_slice() {
            [address] => address.clone(),
            [] => {
                tracing::error!(topic = %message.topic, "No mug matched command topic");
                return Ok(());
            }
            _ => {
                tracing::error!(topic = %message.topic, count = matches.len(), "More than one mug matched command topic");
                return Ok(());
            }
        };

        let Some(record) = tracker.get_mut(&address) else {
            return Ok(());
        };
        let status = record.status();

        let command = match facet_of(&message.topic)
            .ok_or_else(|| CommandError::Unsupported(message.topic.clone()))
            .and_then(|facet| MugCommand::parse(facet, &message.payload))
        {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(address = %address, topic = %message.topic, error = %e, "Rejected command");
                return Ok(());
            }
        };

        tracing::debug!(address = %address, command = command.name(), "Applying command");
        match apply(record, &command, self.state).await {
            Ok(()) => {}
            Err(OperationError::Command(e)) => {
                tracing::warn!(address = %address, error = %e, "Rejected command");
                return Ok(());
            }
            Err(OperationError::Device(e)) => {
                tracing::warn!(address = %address, error = %e, "Command failed");
                if status == MugStatus::Tracked {
                    demote_mug(&mut tracker, self.mqtt, &address).await?;
                }
                return Ok(());
            }
            Err(OperationError::Broker(e)) => return Err(e),
        }

        if status == MugStatus::Tracked {
            publish_json(self.mqtt, &record.topics().state(), &record.telemetry(true), false).await?;
        }
        Ok(())
    }
}

/// Apply one parsed command to a mug.
async fn apply<D: MugDriver>(
    record: &mut DeviceRecord<D::Session>,
    command: &MugCommand,
    state: &BridgeState<D>,
) -> Result<(), OperationError> {
    let expected = if command.is_pairing() {
        MugStatus::Unpaired
    } else {
        MugStatus::Tracked
    };
    if record.status() != expected {
        return Err(CommandError::WrongStatus {
            command: command.name(),
            status: record.status().as_str(),
        }
        .into());
    }

    match command {
        MugCommand::Power(PowerMode::Off) => {
            record.session_mut().set_target_temperature(0.0).await?;
            // The mug reports the new state lazily; show it now.
            record.set_optimistic_liquid_state(LiquidState::WarmNoTempControl);
        }
        MugCommand::Power(PowerMode::Heat) => {
            // Mugs heat on their own once filled; a maximal target is the
            // closest thing to "on".
            record
                .session_mut()
                .set_target_temperature(MAX_TARGET_CELSIUS)
                .await?;
            record.set_optimistic_liquid_state(LiquidState::Heating);
        }
        MugCommand::Temperature(value) => {
            let unit = record.session().data().temperature_unit;
            record
                .session_mut()
                .set_target_temperature(unit.to_celsius(*value))
                .await?;
        }
        MugCommand::LedColour(colour) => {
            record.session_mut().set_led_colour(*colour).await?;
        }
        MugCommand::Led | MugCommand::LedBrightness => {}
        MugCommand::Pair => {
            // Connecting triggers pairing on the mug itself.
            let session = record.session_mut();
            session.connect().await?;
            session.disconnect().await?;
            if state.known.record(record.address()) {
                tracing::info!(address = %record.address(), "Mug paired");
            }
        }
    }
    Ok(())
}
