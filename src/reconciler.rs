//! Polling reconciler: scans, promotes, refreshes and demotes mugs on a
//! fixed interval.

use std::collections::HashSet;
use std::convert::Infallible;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::bridge::BridgeState;
use crate::entities::pairing_button_retraction;
use crate::error::{BrokerError, DeviceError, OperationError};
use crate::mqtt::{publish_descriptor, publish_json, MqttTransport};
use crate::mug::protocol::{PushEvent, EMBER_SERVICE};
use crate::mug::{MugDriver, MugSession};
use crate::tracker::{normalize_address, DeviceRecord, MugStatus, MugTracker};

/// `tokio::time::interval` rejects a zero period.
const MIN_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

pub struct Reconciler<'a, D: MugDriver, T> {
    state: &'a BridgeState<D>,
    mqtt: &'a T,
}

impl<'a, D: MugDriver, T: MqttTransport> Reconciler<'a, D, T> {
    pub fn new(state: &'a BridgeState<D>, mqtt: &'a T) -> Self {
        Self { state, mqtt }
    }

    fn prefix(&self) -> &str {
        &self.state.settings.discovery_prefix
    }

    /// Run forever, one tick per update interval. Only broker failures end it.
    pub async fn run(&self) -> Result<Infallible, BrokerError> {
        self.resume().await?;

        let period = self.state.settings.update_interval.max(MIN_UPDATE_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.tick().await?;
        }
    }

    /// Re-establish subscriptions and descriptors for records that outlived
    /// the previous broker session.
    pub async fn resume(&self) -> Result<(), BrokerError> {
        let tracker = self.state.tracker.lock().await;
        for record in tracker.records() {
            self.mqtt.subscribe(&record.topics().command_filter()).await?;
            match record.status() {
                MugStatus::Tracked if record.is_initialized() => {
                    for descriptor in record.descriptors(self.prefix()) {
                        publish_descriptor(self.mqtt, &descriptor).await?;
                    }
                }
                MugStatus::Tracked => {}
                MugStatus::Unpaired => {
                    publish_descriptor(self.mqtt, &record.pairing_button(self.prefix())).await?;
                }
            }
        }
        if !tracker.is_empty() {
            tracing::info!(mugs = tracker.len(), "Resumed mugs on new broker session");
        }
        Ok(())
    }

    /// One reconciliation pass.
    pub async fn tick(&self) -> Result<(), BrokerError> {
        let scan = match self.state.driver.discover().await {
            Ok(found) => Some(found),
            Err(e) => {
                tracing::warn!(error = %e, "Bluetooth scan failed");
                None
            }
        };

        // Lookups of absent mugs can each take a full scan, so resolve them
        // before taking the lock that commands also need.
        let resolved = self.resolve_known().await;

        let mut tracker = self.state.tracker.lock().await;

        let visible = match scan {
            Some(found) => Some(self.register_visible(&mut tracker, found).await?),
            None => None,
        };

        self.promote_resolved(&mut tracker, resolved).await?;

        for address in tracker.tracked_addresses() {
            if !self.state.known.contains(&address) {
                tracing::info!(address = %address, "Mug no longer known");
                demote_mug(&mut tracker, self.mqtt, &address).await?;
            }
        }

        let mut missing = Vec::new();
        for address in tracker.tracked_addresses() {
            let Some(record) = tracker.get_mut(&address) else {
                continue;
            };
            match refresh(record, self.prefix(), self.mqtt).await {
                Ok(()) => {}
                Err(OperationError::Device(e)) => {
                    tracing::warn!(address = %address, error = %e, "Lost contact with mug");
                    missing.push(address);
                }
                Err(OperationError::Broker(e)) => return Err(e),
                Err(OperationError::Command(e)) => {
                    tracing::warn!(address = %address, error = %e, "Unexpected command failure");
                }
            }
        }

        for address in missing {
            demote_mug(&mut tracker, self.mqtt, &address).await?;
        }

        // A failed scan says nothing about which mugs left.
        if let Some(visible) = visible {
            for record in tracker.prune_unpaired_not_in(&visible) {
                tracing::info!(address = %record.address(), "Unpaired mug no longer visible");
                publish_descriptor(
                    self.mqtt,
                    &pairing_button_retraction(self.prefix(), record.address()),
                )
                .await?;
                self.mqtt.unsubscribe(&record.topics().command_filter()).await?;
            }
        }

        Ok(())
    }

    /// Handle scan results; returns the set of Ember addresses seen.
    async fn register_visible(
        &self,
        tracker: &mut MugTracker<D::Session>,
        found: Vec<D::Session>,
    ) -> Result<HashSet<String>, BrokerError> {
        let mut visible = HashSet::new();
        for mut session in found {
            if !session.advertised_services().contains(&EMBER_SERVICE) {
                tracing::debug!(address = %session.address(), "Ignoring scan result without Ember service");
                continue;
            }
            let address = normalize_address(session.address());
            visible.insert(address.clone());

            if tracker.is_tracked(&address) {
                continue;
            }

            if self.state.known.contains(&address) {
                // Known but advertising: the bond is broken or another bridge
                // paired it. Connecting re-pairs; the next tick tracks it.
                tracing::info!(address = %address, "Known mug is advertising, reconnecting");
                if let Err(e) = session.connect().await {
                    tracing::warn!(address = %address, error = %e, "Reconnect to known mug failed");
                }
                continue;
            }

            if tracker.upsert_unpaired(session) {
                tracing::info!(address = %address, "Unpaired mug visible");
                if let Some(record) = tracker.get(&address) {
                    self.mqtt.subscribe(&record.topics().command_filter()).await?;
                }
            }
            if let Some(record) = tracker.get(&address) {
                publish_descriptor(self.mqtt, &record.pairing_button(self.prefix())).await?;
            }
        }
        Ok(visible)
    }

    /// Look up every known mug that is not tracked yet, without holding the
    /// tracker lock.
    async fn resolve_known(&self) -> Vec<D::Session> {
        let untracked: Vec<String> = {
            let tracker = self.state.tracker.lock().await;
            self.state
                .known
                .snapshot()
                .into_iter()
                .filter(|address| !tracker.is_tracked(address))
                .collect()
        };

        let mut resolved = Vec::new();
        for address in untracked {
            match self.state.driver.find_by_address(&address).await {
                Ok(Some(session)) => resolved.push(session),
                Ok(None) => {
                    tracing::debug!(address = %address, "Known mug not in range");
                }
                Err(e) => {
                    tracing::warn!(address = %address, error = %e, "Lookup of known mug failed");
                }
            }
        }
        resolved
    }

    /// Promote resolved mugs that are still known and still untracked.
    async fn promote_resolved(
        &self,
        tracker: &mut MugTracker<D::Session>,
        resolved: Vec<D::Session>,
    ) -> Result<(), BrokerError> {
        for session in resolved {
            let address = normalize_address(session.address());
            if tracker.is_tracked(&address) || !self.state.known.contains(&address) {
                continue;
            }
            tracing::info!(address = %address, "Tracking mug");
            let displaced = tracker.promote(session);
            if displaced.is_some_and(|r| r.status() == MugStatus::Unpaired) {
                publish_descriptor(self.mqtt, &pairing_button_retraction(self.prefix(), &address))
                    .await?;
            }
        }
        Ok(())
    }
}

/// Bring one tracked mug up to date and publish its telemetry.
pub async fn refresh<S: MugSession, T: MqttTransport>(
    record: &mut DeviceRecord<S>,
    prefix: &str,
    mqtt: &T,
) -> Result<(), OperationError> {
    if record.is_initialized() && !record.session().is_connected().await {
        return Err(DeviceError::Communication("connection dropped".to_string()).into());
    }

    if !record.is_initialized() {
        // The connection stays open afterwards; push events stop without it.
        record.session_mut().update_all().await?;
        record.session_mut().subscribe().await?;
        record.clear_optimistic();
        mqtt.subscribe(&record.topics().command_filter()).await?;
        for descriptor in record.descriptors(prefix) {
            publish_descriptor(mqtt, &descriptor).await?;
        }
        record.mark_initialized();
        tracing::info!(address = %record.address(), name = %record.session().name(), "Mug initialized");
    }

    let changes = record.session_mut().update_queued_attributes().await?;
    for change in &changes {
        tracing::debug!(
            address = %record.address(),
            attribute = change.attribute.name(),
            old = %change.old,
            new = %change.new,
            "Mug attribute changed"
        );
    }
    let liquid_state_changed = changes
        .iter()
        .any(|c| PushEvent::for_attribute(c.attribute) == Some(PushEvent::LiquidStateChanged));
    if liquid_state_changed {
        record.clear_optimistic();
        // The climate mode list depends on the liquid state.
        for descriptor in record.descriptors(prefix) {
            publish_descriptor(mqtt, &descriptor).await?;
        }
    }

    let telemetry = record.telemetry(true);
    tracing::debug!(address = %record.address(), power = telemetry.power, "Publishing telemetry");
    publish_json(mqtt, &record.topics().state(), &telemetry, false).await?;
    Ok(())
}

/// Stop tracking a mug: announce it offline once, drop its command
/// subscription and release the connection.
pub async fn demote_mug<S: MugSession, T: MqttTransport>(
    tracker: &mut MugTracker<S>,
    mqtt: &T,
    address: &str,
) -> Result<(), BrokerError> {
    let Some(mut record) = tracker.demote(address) else {
        return Ok(());
    };
    tracing::warn!(address = %record.address(), "Mug unavailable, no longer tracking");
    publish_json(mqtt, &record.topics().state(), &record.telemetry(false), false).await?;
    mqtt.unsubscribe(&record.topics().command_filter()).await?;
    if let Err(e) = record.session_mut().disconnect().await {
        tracing::debug!(address = %record.address(), error = %e, "Disconnect after demotion failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeSettings;
    use crate::listener::Listener;
    use crate::mqtt::InboundMessage;
    use crate::mug::{LiquidState, MugAttribute, MugData};
    use crate::testing::{FakeDriver, FakeMug, RecordingTransport};

    const A: &str = "AA:BB:CC:DD:EE:FF";
    const B: &str = "11:22:33:44:55:66";
    const STATE_A: &str = "ember/AA_BB_CC_DD_EE_FF/state";
    const BUTTON_A: &str = "homeassistant/button/AA_BB_CC_DD_EE_FF/pairing_button/config";
    const CLIMATE_A: &str = "homeassistant/climate/AA_BB_CC_DD_EE_FF/root/config";

    fn state(driver: FakeDriver) -> BridgeState<FakeDriver> {
        BridgeState::new(BridgeSettings::default(), driver)
    }

    fn warm_mug(address: &str) -> FakeMug {
        let mug = FakeMug::new(address);
        mug.handle().set_data(MugData {
            current_temp: 55.0,
            target_temp: 57.0,
            liquid_state: LiquidState::Heating,
            ..MugData::default()
        });
        mug
    }

    #[tokio::test]
    async fn test_unpaired_mug_gets_pairing_button() {
        let driver = FakeDriver::default();
        let mug = FakeMug::new(A);
        mug.handle().set_data(MugData {
            liquid_state: LiquidState::Empty,
            ..MugData::default()
        });
        driver.advertise(mug);
        let state = state(driver);
        let mqtt = RecordingTransport::default();

        Reconciler::new(&state, &mqtt).tick().await.unwrap();

        let published = mqtt.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, BUTTON_A);
        assert!(!published[0].retain);
        assert!(mqtt.published_to(CLIMATE_A).is_empty());
        assert_eq!(mqtt.subscriptions(), vec!["ember/AA_BB_CC_DD_EE_FF/+/set"]);
        assert_eq!(
            state.tracker.lock().await.status(A),
            Some(MugStatus::Unpaired)
        );
    }

    #[tokio::test]
    async fn test_scan_results_without_service_are_discarded() {
        let driver = FakeDriver::default();
        driver.advertise(FakeMug::without_service(A));
        let state = state(driver);
        let mqtt = RecordingTransport::default();

        Reconciler::new(&state, &mqtt).tick().await.unwrap();

        assert!(mqtt.published().is_empty());
        assert_eq!(state.tracker.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn test_unpaired_mug_pruned_when_gone() {
        let driver = FakeDriver::default();
        driver.advertise(FakeMug::new(A));
        let state = state(driver);
        let mqtt = RecordingTransport::default();
        let reconciler = Reconciler::new(&state, &mqtt);

        reconciler.tick().await.unwrap();
        state.driver.stop_advertising(A);
        mqtt.clear();
        reconciler.tick().await.unwrap();

        let published = mqtt.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, BUTTON_A);
        assert!(published[0].payload.is_empty());
        assert_eq!(mqtt.unsubscriptions(), vec!["ember/AA_BB_CC_DD_EE_FF/+/set"]);
        assert_eq!(state.tracker.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn test_failed_scan_keeps_unpaired_mugs() {
        let driver = FakeDriver::default();
        driver.advertise(FakeMug::new(A));
        let state = state(driver);
        let mqtt = RecordingTransport::default();
        let reconciler = Reconciler::new(&state, &mqtt);

        reconciler.tick().await.unwrap();
        state.driver.fail_scans(true);
        mqtt.clear();
        reconciler.tick().await.unwrap();

        assert!(mqtt.published().is_empty());
        assert_eq!(state.tracker.lock().await.status(A), Some(MugStatus::Unpaired));
    }

    #[tokio::test]
    async fn test_known_mug_is_tracked_and_initialized() {
        let driver = FakeDriver::default();
        let mug = warm_mug(A);
        let handle = mug.handle();
        driver.pair(mug);
        let state = state(driver);
        state.known.record(A);
        let mqtt = RecordingTransport::default();

        Reconciler::new(&state, &mqtt).tick().await.unwrap();

        let topics: Vec<String> = mqtt.published().into_iter().map(|p| p.topic).collect();
        assert_eq!(
            topics,
            vec![
                CLIMATE_A.to_string(),
                "homeassistant/sensor/AA_BB_CC_DD_EE_FF/battery/config".to_string(),
                "homeassistant/binary_sensor/AA_BB_CC_DD_EE_FF/battery_charging/config".to_string(),
                "homeassistant/light/AA_BB_CC_DD_EE_FF/led/config".to_string(),
                STATE_A.to_string(),
            ]
        );
        let telemetry = mqtt.published_to(STATE_A)[0].json();
        assert_eq!(telemetry["power"], "heat");
        assert_eq!(telemetry["availability"], "online");
        assert_eq!(telemetry["current_temperature"], 55.0);
        assert_eq!(mqtt.subscriptions(), vec!["ember/AA_BB_CC_DD_EE_FF/+/set"]);
        assert_eq!(
            handle.calls(),
            vec!["update_all", "subscribe", "update_queued_attributes"]
        );

        let tracker = state.tracker.lock().await;
        assert!(tracker.is_tracked(A));
        assert!(tracker.get(A).unwrap().is_initialized());
    }

    #[tokio::test]
    async fn test_second_tick_only_publishes_telemetry() {
        let driver = FakeDriver::default();
        driver.pair(warm_mug(A));
        let state = state(driver);
        state.known.record(A);
        let mqtt = RecordingTransport::default();
        let reconciler = Reconciler::new(&state, &mqtt);

        reconciler.tick().await.unwrap();
        mqtt.clear();
        reconciler.tick().await.unwrap();

        let topics: Vec<String> = mqtt.published().into_iter().map(|p| p.topic).collect();
        assert_eq!(topics, vec![STATE_A.to_string()]);
    }

    #[tokio::test]
    async fn test_liquid_state_change_republishes_descriptors() {
        let driver = FakeDriver::default();
        let mug = warm_mug(A);
        let handle = mug.handle();
        driver.pair(mug);
        let state = state(driver);
        state.known.record(A);
        let mqtt = RecordingTransport::default();
        let reconciler = Reconciler::new(&state, &mqtt);
        reconciler.tick().await.unwrap();

        state
            .tracker
            .lock()
            .await
            .get_mut(A)
            .unwrap()
            .set_optimistic_liquid_state(LiquidState::WarmNoTempControl);
        handle.queue_change(
            MugData {
                liquid_state: LiquidState::Empty,
                ..MugData::default()
            },
            MugAttribute::LiquidState,
        );
        mqtt.clear();
        reconciler.tick().await.unwrap();

        let climate = mqtt.published_to(CLIMATE_A);
        assert_eq!(climate.len(), 1);
        assert_eq!(climate[0].json()["modes"], serde_json::json!(["off"]));
        assert_eq!(mqtt.published().last().unwrap().topic, STATE_A);
        let tracker = state.tracker.lock().await;
        assert_eq!(
            tracker.get(A).unwrap().effective_data().liquid_state,
            LiquidState::Empty
        );
    }

    #[tokio::test]
    async fn test_other_changes_do_not_republish_descriptors() {
        let driver = FakeDriver::default();
        let mug = warm_mug(A);
        let handle = mug.handle();
        driver.pair(mug);
        let state = state(driver);
        state.known.record(A);
        let mqtt = RecordingTransport::default();
        let reconciler = Reconciler::new(&state, &mqtt);
        reconciler.tick().await.unwrap();

        handle.queue_change(
            MugData {
                current_temp: 50.0,
                liquid_state: LiquidState::Heating,
                ..MugData::default()
            },
            MugAttribute::CurrentTemperature,
        );
        mqtt.clear();
        reconciler.tick().await.unwrap();

        assert!(mqtt.published_to(CLIMATE_A).is_empty());
        assert_eq!(mqtt.published_to(STATE_A)[0].json()["current_temperature"], 50.0);
    }

    #[tokio::test]
    async fn test_dropped_connection_demotes_once() {
        let driver = FakeDriver::default();
        let mug = warm_mug(A);
        let handle = mug.handle();
        driver.pair(mug);
        let state = state(driver);
        state.known.record(A);
        let mqtt = RecordingTransport::default();
        let reconciler = Reconciler::new(&state, &mqtt);
        reconciler.tick().await.unwrap();

        handle.set_connected(false);
        mqtt.clear();
        reconciler.tick().await.unwrap();

        let offline = mqtt.published_to(STATE_A);
        assert_eq!(offline.len(), 1);
        assert_eq!(offline[0].json()["availability"], "offline");
        assert_eq!(mqtt.unsubscriptions(), vec!["ember/AA_BB_CC_DD_EE_FF/+/set"]);
        assert!(!state.tracker.lock().await.is_tracked(A));
        assert!(handle.calls().contains(&"disconnect".to_string()));
    }

    #[tokio::test]
    async fn test_device_error_during_refresh_demotes() {
        let driver = FakeDriver::default();
        let mug = warm_mug(A);
        let handle = mug.handle();
        driver.pair(mug);
        driver.pair(warm_mug(B));
        let state = state(driver);
        state.known.record(A);
        state.known.record(B);
        let mqtt = RecordingTransport::default();
        let reconciler = Reconciler::new(&state, &mqtt);
        reconciler.tick().await.unwrap();

        handle.fail();
        mqtt.clear();
        reconciler.tick().await.unwrap();

        let tracker = state.tracker.lock().await;
        assert!(!tracker.is_tracked(A));
        assert!(tracker.is_tracked(B));
        assert_eq!(mqtt.published_to(STATE_A)[0].json()["availability"], "offline");
        assert_eq!(
            mqtt.published_to("ember/11_22_33_44_55_66/state")[0].json()["availability"],
            "online"
        );
    }

    #[tokio::test]
    async fn test_promotion_retracts_pairing_button() {
        let driver = FakeDriver::default();
        driver.advertise(FakeMug::new(A));
        let state = state(driver);
        let mqtt = RecordingTransport::default();
        let reconciler = Reconciler::new(&state, &mqtt);
        reconciler.tick().await.unwrap();

        // Paired through the button: no longer advertising, now resolvable.
        state.driver.stop_advertising(A);
        state.driver.pair(warm_mug(A));
        state.known.record(A);
        mqtt.clear();
        reconciler.tick().await.unwrap();

        let button = mqtt.published_to(BUTTON_A);
        assert_eq!(button.len(), 1);
        assert!(button[0].payload.is_empty());
        assert_eq!(mqtt.published_to(CLIMATE_A).len(), 1);

        let tracker = state.tracker.lock().await;
        assert!(tracker.is_tracked(A));
        assert!(tracker.unpaired_addresses().is_empty());
    }

    #[tokio::test]
    async fn test_forgotten_mug_is_demoted() {
        let driver = FakeDriver::default();
        let mug = warm_mug(A);
        let handle = mug.handle();
        driver.pair(mug);
        let state = state(driver);
        state.known.record(A);
        let mqtt = RecordingTransport::default();
        let reconciler = Reconciler::new(&state, &mqtt);
        reconciler.tick().await.unwrap();

        Listener::new(&state, &mqtt)
            .handle(&InboundMessage {
                topic: CLIMATE_A.to_string(),
                payload: Vec::new(),
            })
            .await
            .unwrap();
        mqtt.clear();
        reconciler.tick().await.unwrap();

        let state_messages = mqtt.published_to(STATE_A);
        assert_eq!(state_messages.len(), 1);
        assert_eq!(state_messages[0].json()["availability"], "offline");
        assert_eq!(mqtt.unsubscriptions(), vec!["ember/AA_BB_CC_DD_EE_FF/+/set"]);
        assert!(!state.tracker.lock().await.is_tracked(A));
        assert!(handle.calls().contains(&"disconnect".to_string()));

        // Not looked up again until it is learned again.
        mqtt.clear();
        reconciler.tick().await.unwrap();
        assert!(mqtt.published().is_empty());
    }

    #[tokio::test]
    async fn test_commands_run_while_known_mugs_are_looked_up() {
        let driver = FakeDriver::default();
        let mug = warm_mug(A);
        let handle = mug.handle();
        driver.pair(mug);
        let state = state(driver);
        state.known.record(A);
        let mqtt = RecordingTransport::default();
        let reconciler = Reconciler::new(&state, &mqtt);
        reconciler.tick().await.unwrap();

        // B is known but out of range; its lookup is held open.
        state.known.record(B);
        let gate = state.driver.gate_lookups();
        let command = async {
            gate.started.notified().await;
            Listener::new(&state, &mqtt)
                .handle(&InboundMessage {
                    topic: "ember/AA_BB_CC_DD_EE_FF/power/set".to_string(),
                    payload: b"off".to_vec(),
                })
                .await
                .unwrap();
            let applied = handle
                .calls()
                .contains(&"set_target_temperature 0".to_string());
            gate.release.notify_one();
            applied
        };

        let (result, applied) = tokio::join!(reconciler.tick(), command);
        result.unwrap();
        assert!(applied);
        assert!(!state.tracker.lock().await.is_tracked(B));
    }

    #[tokio::test]
    async fn test_mug_forgotten_during_lookup_is_not_promoted() {
        let driver = FakeDriver::default();
        driver.pair(warm_mug(A));
        let state = state(driver);
        state.known.record(A);
        let mqtt = RecordingTransport::default();
        let gate = state.driver.gate_lookups();
        let forget = async {
            gate.started.notified().await;
            state.known.forget(A);
            gate.release.notify_one();
        };

        let reconciler = Reconciler::new(&state, &mqtt);
        let (result, ()) = tokio::join!(reconciler.tick(), forget);
        result.unwrap();

        assert_eq!(state.tracker.lock().await.len(), 0);
        assert!(mqtt.published().is_empty());
    }

    #[tokio::test]
    async fn test_known_advertising_mug_is_reconnected() {
        let driver = FakeDriver::default();
        let mug = FakeMug::new(A);
        let handle = mug.handle();
        driver.advertise(mug);
        let state = state(driver);
        state.known.record(A);
        let mqtt = RecordingTransport::default();

        Reconciler::new(&state, &mqtt).tick().await.unwrap();

        assert_eq!(handle.calls(), vec!["connect"]);
        assert!(mqtt.published_to(BUTTON_A).is_empty());
        assert_eq!(state.tracker.lock().await.status(A), None);
    }

    #[tokio::test]
    async fn test_resume_republishes_for_existing_records() {
        let driver = FakeDriver::default();
        driver.pair(warm_mug(A));
        driver.advertise(FakeMug::new(B));
        let state = state(driver);
        state.known.record(A);
        let mqtt = RecordingTransport::default();
        let reconciler = Reconciler::new(&state, &mqtt);
        reconciler.tick().await.unwrap();

        let fresh = RecordingTransport::default();
        Reconciler::new(&state, &fresh).resume().await.unwrap();

        let mut subscriptions = fresh.subscriptions();
        subscriptions.sort();
        assert_eq!(
            subscriptions,
            vec!["ember/11_22_33_44_55_66/+/set", "ember/AA_BB_CC_DD_EE_FF/+/set"]
        );
        assert_eq!(fresh.published_to(CLIMATE_A).len(), 1);
        assert_eq!(
            fresh
                .published_to("homeassistant/button/11_22_33_44_55_66/pairing_button/config")
                .len(),
            1
        );
    }
}
