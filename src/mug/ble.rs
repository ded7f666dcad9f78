//! btleplug-backed mug driver.
//!
//! Sessions connect lazily: constructing a [`BleMug`] only wraps the
//! peripheral, the first read or write opens the link. Push events are
//! consumed by a background task that queues attributes for
//! [`MugSession::update_queued_attributes`].

use std::collections::BTreeSet;
use std::time::Duration;

use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt as _;
use uuid::Uuid;

use super::protocol::{self, PushEvent};
use super::{AttributeChange, Colour, MugAttribute, MugData, MugDriver, MugSession};
use crate::error::DeviceError;

/// Mug discovery over one Bluetooth adapter.
pub struct BleDriver {
    adapter: Adapter,
    scan_duration: Duration,
}

impl BleDriver {
    /// Open the first adapter whose description contains `adapter_name`,
    /// or the first adapter at all when no name is given.
    pub async fn new(adapter_name: Option<&str>, scan_duration: Duration) -> Result<Self, DeviceError> {
        let manager = Manager::new().await?;

        for adapter in manager.adapters().await? {
            let info = adapter.adapter_info().await.unwrap_or_default();
            let selected = match adapter_name {
                Some(name) => info.contains(name),
                None => true,
            };
            if selected {
                tracing::info!(adapter = %info, "Using bluetooth adapter");
                return Ok(Self {
                    adapter,
                    scan_duration,
                });
            }
        }

        Err(DeviceError::AdapterUnavailable(adapter_name.map(str::to_string)))
    }

    async fn scan(&self, filter: ScanFilter) -> Result<(), DeviceError> {
        self.adapter.start_scan(filter).await?;
        tokio::time::sleep(self.scan_duration).await;
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn find_peripheral(&self, address: &str) -> Result<Option<Peripheral>, DeviceError> {
        for peripheral in self.adapter.peripherals().await? {
            if peripheral.address().to_string().eq_ignore_ascii_case(address) {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }
}

impl MugDriver for BleDriver {
    type Session = BleMug;

    async fn discover(&self) -> Result<Vec<BleMug>, DeviceError> {
        self.scan(ScanFilter {
            services: vec![protocol::EMBER_SERVICE],
        })
        .await?;

        let mut mugs = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            let Some(props) = peripheral.properties().await? else {
                continue;
            };
            // BlueZ keeps bonded devices in the list even when they are not
            // advertising; only fresh service advertisements count here.
            if props.rssi.is_none() {
                continue;
            }
            mugs.push(BleMug::new(
                peripheral,
                props.local_name.unwrap_or_default(),
                props.services,
            ));
        }

        tracing::debug!(count = mugs.len(), "BLE scan complete");
        Ok(mugs)
    }

    async fn find_by_address(&self, address: &str) -> Result<Option<BleMug>, DeviceError> {
        let peripheral = match self.find_peripheral(address).await? {
            Some(p) => Some(p),
            None => {
                self.scan(ScanFilter::default()).await?;
                self.find_peripheral(address).await?
            }
        };

        let Some(peripheral) = peripheral else {
            return Ok(None);
        };
        let props = peripheral.properties().await?.unwrap_or_default();
        Ok(Some(BleMug::new(
            peripheral,
            props.local_name.unwrap_or_default(),
            props.services,
        )))
    }
}

/// A session with one mug.
pub struct BleMug {
    peripheral: Peripheral,
    address: String,
    advertised_name: String,
    services: Vec<Uuid>,
    data: MugData,
    queued_tx: mpsc::UnboundedSender<MugAttribute>,
    queued_rx: mpsc::UnboundedReceiver<MugAttribute>,
    notifications: Option<JoinHandle<()>>,
}

impl BleMug {
    fn new(peripheral: Peripheral, advertised_name: String, services: Vec<Uuid>) -> Self {
        let (queued_tx, queued_rx) = mpsc::unbounded_channel();
        Self {
            address: peripheral.address().to_string(),
            peripheral,
            advertised_name,
            services,
            data: MugData::default(),
            queued_tx,
            queued_rx,
            notifications: None,
        }
    }

    async fn ensure_connected(&mut self) -> Result<(), DeviceError> {
        if !self.peripheral.is_connected().await? {
            tracing::debug!(address = %self.address, "Connecting");
            self.peripheral.connect().await?;
            self.peripheral.discover_services().await?;
        }
        Ok(())
    }

    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, DeviceError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(DeviceError::MissingCharacteristic(uuid))
    }

    async fn read_raw(&self, uuid: Uuid) -> Result<Vec<u8>, DeviceError> {
        let characteristic = self.characteristic(uuid)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    async fn write_raw(&self, uuid: Uuid, bytes: &[u8]) -> Result<(), DeviceError> {
        let characteristic = self.characteristic(uuid)?;
        self.peripheral
            .write(&characteristic, bytes, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    /// Read one attribute into `self.data`.
    async fn read_attribute(&mut self, attribute: MugAttribute) -> Result<(), DeviceError> {
        let bytes = self.read_raw(protocol::characteristic_for(attribute)).await?;
        let data = &mut self.data;
        match attribute {
            MugAttribute::Name => data.name = Some(protocol::decode_name(&bytes)),
            MugAttribute::CurrentTemperature => {
                data.current_temp = protocol::decode_temperature(&bytes)?
            }
            MugAttribute::TargetTemperature => {
                data.target_temp = protocol::decode_temperature(&bytes)?
            }
            MugAttribute::TemperatureUnit => data.temperature_unit = protocol::decode_unit(&bytes)?,
            MugAttribute::LiquidLevel => data.liquid_level = protocol::decode_liquid_level(&bytes)?,
            MugAttribute::LiquidState => data.liquid_state = protocol::decode_liquid_state(&bytes)?,
            MugAttribute::Battery => data.battery = Some(protocol::decode_battery(&bytes)?),
            MugAttribute::LedColour => data.led_colour = Some(protocol::decode_colour(&bytes)?),
        }
        Ok(())
    }
}

/// Printable value of one attribute, used to detect and log changes.
fn attribute_value(data: &MugData, attribute: MugAttribute) -> String {
    match attribute {
        MugAttribute::Name => format!("{:?}", data.name),
        MugAttribute::CurrentTemperature => format!("{:.2}", data.current_temp),
        MugAttribute::TargetTemperature => format!("{:.2}", data.target_temp),
        MugAttribute::TemperatureUnit => format!("{:?}", data.temperature_unit),
        MugAttribute::LiquidLevel => data.liquid_level.to_string(),
        MugAttribute::LiquidState => format!("{:?}", data.liquid_state),
        MugAttribute::Battery => format!("{:?}", data.battery),
        MugAttribute::LedColour => format!("{:?}", data.led_colour),
    }
}

impl MugSession for BleMug {
    fn address(&self) -> &str {
        &self.address
    }

    fn name(&self) -> &str {
        self.data.name.as_deref().unwrap_or(&self.advertised_name)
    }

    fn advertised_services(&self) -> &[Uuid] {
        &self.services
    }

    fn data(&self) -> &MugData {
        &self.data
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn connect(&mut self) -> Result<(), DeviceError> {
        self.ensure_connected().await
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        if let Some(task) = self.notifications.take() {
            task.abort();
        }
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }

    async fn update_all(&mut self) -> Result<(), DeviceError> {
        self.ensure_connected().await?;
        for attribute in MugAttribute::ALL {
            self.read_attribute(attribute).await?;
        }
        // A full read supersedes anything queued before it.
        while self.queued_rx.try_recv().is_ok() {}
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<(), DeviceError> {
        self.ensure_connected().await?;
        let push = self.characteristic(protocol::PUSH_EVENT)?;
        self.peripheral.subscribe(&push).await?;

        let mut stream = self.peripheral.notifications().await?;
        let queued = self.queued_tx.clone();
        let address = self.address.clone();

        if let Some(previous) = self.notifications.take() {
            previous.abort();
        }
        self.notifications = Some(tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid != protocol::PUSH_EVENT {
                    continue;
                }
                let Some(event) = notification.value.first().copied().and_then(PushEvent::from_byte) else {
                    continue;
                };
                tracing::trace!(address = %address, ?event, "Push event");
                if let Some(attribute) = event.attribute() {
                    if queued.send(attribute).is_err() {
                        break;
                    }
                }
            }
            tracing::debug!(address = %address, "Push event stream ended");
        }));
        Ok(())
    }

    async fn update_queued_attributes(&mut self) -> Result<Vec<AttributeChange>, DeviceError> {
        let mut pending = BTreeSet::new();
        while let Ok(attribute) = self.queued_rx.try_recv() {
            pending.insert(attribute);
        }
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        self.ensure_connected().await?;
        let mut changes = Vec::new();
        for attribute in pending {
            let old = attribute_value(&self.data, attribute);
            self.read_attribute(attribute).await?;
            let new = attribute_value(&self.data, attribute);
            if old != new {
                changes.push(AttributeChange { attribute, old, new });
            }
        }
        Ok(changes)
    }

    async fn set_target_temperature(&mut self, celsius: f32) -> Result<(), DeviceError> {
        self.ensure_connected().await?;
        self.write_raw(protocol::TARGET_TEMPERATURE, &protocol::encode_temperature(celsius))
            .await?;
        self.data.target_temp = celsius;
        Ok(())
    }

    async fn set_led_colour(&mut self, colour: Colour) -> Result<(), DeviceError> {
        self.ensure_connected().await?;
        self.write_raw(protocol::LED_COLOUR, &protocol::encode_colour(colour))
            .await?;
        self.data.led_colour = Some(colour);
        Ok(())
    }
}

impl Drop for BleMug {
    fn drop(&mut self) {
        if let Some(task) = self.notifications.take() {
            task.abort();
        }
    }
}
