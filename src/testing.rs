//! Scripted mugs and a recording broker for unit tests.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::error::{BrokerError, DeviceError};
use crate::mqtt::{InboundMessage, MqttConnector, MqttEvents, MqttTransport};
use crate::mug::protocol::EMBER_SERVICE;
use crate::mug::{AttributeChange, Colour, MugAttribute, MugData, MugDriver, MugSession};

#[derive(Debug, Default)]
struct FakeMugState {
    connected: bool,
    failing: bool,
    initial: MugData,
    next: Option<MugData>,
    changes: Vec<AttributeChange>,
    calls: Vec<String>,
}

/// In-memory mug. Clones share scripted state, so a test can keep a handle
/// after the session moves into the tracker.
#[derive(Debug, Clone)]
pub struct FakeMug {
    address: String,
    name: String,
    services: Vec<Uuid>,
    data: MugData,
    shared: Arc<Mutex<FakeMugState>>,
}

#[derive(Debug, Clone)]
pub struct FakeMugHandle {
    shared: Arc<Mutex<FakeMugState>>,
}

impl FakeMugHandle {
    /// Data returned by the next full read.
    pub fn set_data(&self, data: MugData) {
        self.shared.lock().unwrap().initial = data;
    }

    /// Every later operation fails with a communication error.
    pub fn fail(&self) {
        let mut state = self.shared.lock().unwrap();
        state.failing = true;
        state.connected = false;
    }

    pub fn set_connected(&self, connected: bool) {
        self.shared.lock().unwrap().connected = connected;
    }

    /// Data and change reported by the next queued refresh.
    pub fn queue_change(&self, data: MugData, attribute: MugAttribute) {
        let mut state = self.shared.lock().unwrap();
        state.next = Some(data);
        state.changes.push(AttributeChange {
            attribute,
            old: String::new(),
            new: String::new(),
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.shared.lock().unwrap().calls.clone()
    }
}

impl FakeMug {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            name: "Ember Ceramic Mug".to_string(),
            services: vec![EMBER_SERVICE],
            data: MugData::default(),
            shared: Arc::default(),
        }
    }

    /// A device that advertises but not the Ember service.
    pub fn without_service(address: &str) -> Self {
        Self {
            services: Vec::new(),
            ..Self::new(address)
        }
    }

    pub fn handle(&self) -> FakeMugHandle {
        FakeMugHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn call(&self, name: &str) -> Result<(), DeviceError> {
        let mut state = self.shared.lock().unwrap();
        state.calls.push(name.to_string());
        if state.failing {
            return Err(DeviceError::Communication(format!("{name} failed")));
        }
        Ok(())
    }
}

impl MugSession for FakeMug {
    fn address(&self) -> &str {
        &self.address
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn advertised_services(&self) -> &[Uuid] {
        &self.services
    }

    fn data(&self) -> &MugData {
        &self.data
    }

    async fn is_connected(&self) -> bool {
        self.shared.lock().unwrap().connected
    }

    async fn connect(&mut self) -> Result<(), DeviceError> {
        self.call("connect")?;
        self.shared.lock().unwrap().connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.call("disconnect")?;
        self.shared.lock().unwrap().connected = false;
        Ok(())
    }

    async fn update_all(&mut self) -> Result<(), DeviceError> {
        self.call("update_all")?;
        let mut state = self.shared.lock().unwrap();
        state.connected = true;
        self.data = state.initial.clone();
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<(), DeviceError> {
        self.call("subscribe")
    }

    async fn update_queued_attributes(&mut self) -> Result<Vec<AttributeChange>, DeviceError> {
        self.call("update_queued_attributes")?;
        let mut state = self.shared.lock().unwrap();
        if let Some(next) = state.next.take() {
            self.data = next;
        }
        Ok(std::mem::take(&mut state.changes))
    }

    async fn set_target_temperature(&mut self, celsius: f32) -> Result<(), DeviceError> {
        self.call(&format!("set_target_temperature {celsius}"))?;
        self.data.target_temp = celsius;
        Ok(())
    }

    async fn set_led_colour(&mut self, colour: Colour) -> Result<(), DeviceError> {
        self.call(&format!("set_led_colour {colour}"))?;
        self.data.led_colour = Some(colour);
        Ok(())
    }
}

/// Driver returning clones of scripted mugs.
#[derive(Debug, Default)]
pub struct FakeDriver {
    visible: Mutex<Vec<FakeMug>>,
    paired: Mutex<Vec<FakeMug>>,
    scan_fails: Mutex<bool>,
    lookup_gate: Mutex<Option<Arc<LookupGate>>>,
}

/// Holds address lookups until the test releases them.
#[derive(Debug, Default)]
pub struct LookupGate {
    pub started: Notify,
    pub release: Notify,
}

impl FakeDriver {
    /// Mug returned by the next discovery scans.
    pub fn advertise(&self, mug: FakeMug) {
        self.visible.lock().unwrap().push(mug);
    }

    pub fn stop_advertising(&self, address: &str) {
        self.visible
            .lock()
            .unwrap()
            .retain(|m| !m.address.eq_ignore_ascii_case(address));
    }

    /// Mug resolvable by address.
    pub fn pair(&self, mug: FakeMug) {
        self.paired.lock().unwrap().push(mug);
    }

    pub fn fail_scans(&self, failing: bool) {
        *self.scan_fails.lock().unwrap() = failing;
    }

    /// Every later lookup signals `started` and waits for `release`.
    pub fn gate_lookups(&self) -> Arc<LookupGate> {
        let gate = Arc::new(LookupGate::default());
        *self.lookup_gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

impl MugDriver for FakeDriver {
    type Session = FakeMug;

    async fn discover(&self) -> Result<Vec<FakeMug>, DeviceError> {
        if *self.scan_fails.lock().unwrap() {
            return Err(DeviceError::AdapterUnavailable(None));
        }
        Ok(self.visible.lock().unwrap().clone())
    }

    async fn find_by_address(&self, address: &str) -> Result<Option<FakeMug>, DeviceError> {
        let gate = self.lookup_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.started.notify_one();
            gate.release.notified().await;
        }
        Ok(self
            .paired
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.address.eq_ignore_ascii_case(address))
            .cloned())
    }
}

#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl Published {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap()
    }
}

/// Transport that records every request instead of talking to a broker.
/// Clones share the record.
#[derive(Debug, Default, Clone)]
pub struct RecordingTransport {
    published: Arc<Mutex<Vec<Published>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    unsubscriptions: Arc<Mutex<Vec<String>>>,
    disconnects: Arc<Mutex<usize>>,
    failing_topics: Arc<Mutex<Vec<String>>>,
}

impl RecordingTransport {
    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|p| p.topic == topic)
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn unsubscriptions(&self) -> Vec<String> {
        self.unsubscriptions.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> usize {
        *self.disconnects.lock().unwrap()
    }

    /// Refuse publishes to `topic` from now on.
    pub fn fail_publishes_to(&self, topic: &str) {
        self.failing_topics.lock().unwrap().push(topic.to_string());
    }

    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
        self.subscriptions.lock().unwrap().clear();
        self.unsubscriptions.lock().unwrap().clear();
    }
}

impl MqttTransport for RecordingTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), BrokerError> {
        if self.failing_topics.lock().unwrap().iter().any(|t| t == topic) {
            return Err(BrokerError::StreamClosed);
        }
        self.published.lock().unwrap().push(Published {
            topic: topic.to_string(),
            payload,
            retain,
        });
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<(), BrokerError> {
        self.subscriptions.lock().unwrap().push(filter.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), BrokerError> {
        self.unsubscriptions.lock().unwrap().push(filter.to_string());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        *self.disconnects.lock().unwrap() += 1;
        Ok(())
    }
}

/// Hands out sessions sharing one [`RecordingTransport`]. The first
/// `failing` sessions lose their broker connection straight away.
#[derive(Debug, Default)]
pub struct FakeConnector {
    pub transport: RecordingTransport,
    failing: Mutex<usize>,
    connects: Mutex<Vec<Instant>>,
}

impl FakeConnector {
    pub fn failing(sessions: usize) -> Self {
        Self {
            failing: Mutex::new(sessions),
            ..Self::default()
        }
    }

    pub fn connects(&self) -> Vec<Instant> {
        self.connects.lock().unwrap().clone()
    }
}

impl MqttConnector for FakeConnector {
    type Transport = RecordingTransport;
    type Events = FakeEvents;

    fn connect(&self) -> (RecordingTransport, FakeEvents) {
        self.connects.lock().unwrap().push(Instant::now());
        let mut failing = self.failing.lock().unwrap();
        let fails = *failing > 0;
        *failing = failing.saturating_sub(1);
        (self.transport.clone(), FakeEvents { fails })
    }
}

#[derive(Debug)]
pub struct FakeEvents {
    fails: bool,
}

impl MqttEvents for FakeEvents {
    async fn pump(
        &mut self,
        inbound: mpsc::UnboundedSender<InboundMessage>,
    ) -> Result<Infallible, BrokerError> {
        if self.fails {
            return Err(BrokerError::StreamClosed);
        }
        let _inbound = inbound;
        std::future::pending().await
    }

    async fn flush(&mut self) {}
}
