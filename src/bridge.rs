//! Bridge supervisor.
//!
//! One broker session runs the event pump, the reconciler and the listener
//! as branches of a single `select!`. The first branch to finish ends the
//! session; the others are dropped with it. Mug records outlive sessions and
//! are re-announced when the next one starts.

use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::config::BridgeSettings;
use crate::entities::pairing_button_retraction;
use crate::error::BrokerError;
use crate::listener::Listener;
use crate::mqtt::{
    publish_descriptor, publish_json, InboundMessage, MqttConnector, MqttEvents, MqttTransport,
};
use crate::mug::MugDriver;
use crate::reconciler::Reconciler;
use crate::tracker::{KnownAddresses, MugStatus, MugTracker};

/// Upper bound on the offline announcements sent when a session ends.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// State shared by the reconciler and the listener.
pub struct BridgeState<D: MugDriver> {
    pub settings: BridgeSettings,
    pub driver: D,
    pub known: KnownAddresses,
    pub tracker: Mutex<MugTracker<D::Session>>,
}

impl<D: MugDriver> BridgeState<D> {
    pub fn new(settings: BridgeSettings, driver: D) -> Self {
        Self {
            settings,
            driver,
            known: KnownAddresses::new(),
            tracker: Mutex::new(MugTracker::new()),
        }
    }
}

#[derive(Debug)]
pub enum SessionEnd {
    Failed(BrokerError),
    Terminated,
}

fn failure(result: Result<Infallible, BrokerError>) -> SessionEnd {
    match result {
        Ok(never) => match never {},
        Err(e) => SessionEnd::Failed(e),
    }
}

/// Run one broker session until a branch fails or `shutdown` resolves.
pub async fn run_session<D, T, P, S>(
    state: &BridgeState<D>,
    mqtt: &T,
    mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
    pump: P,
    shutdown: S,
) -> SessionEnd
where
    D: MugDriver,
    T: MqttTransport,
    P: Future<Output = Result<Infallible, BrokerError>>,
    S: Future<Output = ()>,
{
    let reconciler = Reconciler::new(state, mqtt);
    let listener = Listener::new(state, mqtt);

    tokio::select! {
        result = pump => failure(result),
        result = reconciler.run() => failure(result),
        result = listener.run(&mut inbound) => failure(result),
        () = shutdown => SessionEnd::Terminated,
    }
}

/// Best-effort goodbye: tracked mugs go offline, pairing buttons are retracted.
pub async fn announce_shutdown<D: MugDriver, T: MqttTransport>(state: &BridgeState<D>, mqtt: &T) {
    let prefix = &state.settings.discovery_prefix;
    let tracker = state.tracker.lock().await;
    for record in tracker.records() {
        let result = match record.status() {
            MugStatus::Tracked => {
                publish_json(mqtt, &record.topics().state(), &record.telemetry(false), false).await
            }
            MugStatus::Unpaired => {
                publish_descriptor(mqtt, &pairing_button_retraction(prefix, record.address()))
                    .await
            }
        };
        if let Err(e) = result {
            tracing::warn!(address = %record.address(), error = %e, "Shutdown announcement failed");
        }
    }
}

/// Keeps a broker session alive, reconnecting after failures.
pub struct Supervisor<D: MugDriver, C> {
    state: BridgeState<D>,
    connector: C,
}

impl<D: MugDriver, C: MqttConnector> Supervisor<D, C> {
    pub fn new(state: BridgeState<D>, connector: C) -> Self {
        Self { state, connector }
    }

    /// Returns only once `shutdown` resolves.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let retry = self.state.settings.retry_interval;

        loop {
            let (transport, mut events) = self.connector.connect();
            let (tx, rx) = mpsc::unbounded_channel();

            let end = run_session(
                &self.state,
                &transport,
                rx,
                events.pump(tx),
                shutdown.as_mut(),
            )
            .await;

            // Requests only leave while the event loop is polled.
            let closing = async {
                announce_shutdown(&self.state, &transport).await;
                if let Err(e) = transport.disconnect().await {
                    tracing::debug!(error = %e, "MQTT disconnect request failed");
                }
            };
            let drain = async {
                tokio::join!(closing, events.flush());
            };
            if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
                tracing::debug!("Shutdown announcements timed out");
            }

            match end {
                SessionEnd::Terminated => {
                    tracing::info!("Bridge stopped");
                    return;
                }
                SessionEnd::Failed(e) => {
                    tracing::warn!(error = %e, retry_in = ?retry, "MQTT session ended");
                }
            }

            tokio::select! {
                () = tokio::time::sleep(retry) => {}
                () = shutdown.as_mut() => {
                    tracing::info!("Bridge stopped");
                    return;
                }
            }
        }
    }
}
