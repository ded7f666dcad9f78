//! Device state tracking.
//!
//! Tracked and unpaired mugs share one map keyed by address, so an address
//! can only ever hold one status. The map sits behind the bridge's tokio
//! mutex and is held for a whole reconciler tick or listener message. The
//! known-address set is a `DashSet` because the listener writes it while a
//! tick may be reading it.

use std::collections::{HashMap, HashSet};

use dashmap::DashSet;

use crate::entities::{self, EntityDescriptor, MugTopics, MugView, Telemetry};
use crate::mug::{LiquidState, MugData, MugSession};

/// Canonical form of a hardware address used as a map key.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_uppercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MugStatus {
    /// Seen advertising, not yet known.
    Unpaired,
    /// Known and under connection management.
    Tracked,
}

impl MugStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MugStatus::Unpaired => "unpaired",
            MugStatus::Tracked => "tracked",
        }
    }
}

/// One mug and the bridge-side state kept about it.
pub struct DeviceRecord<S> {
    address: String,
    status: MugStatus,
    session: S,
    topics: MugTopics,
    initialized: bool,
    /// Liquid state assumed after a mode command, until the mug confirms.
    pending_liquid_state: Option<LiquidState>,
}

impl<S: MugSession> DeviceRecord<S> {
    fn new(session: S, status: MugStatus) -> Self {
        let address = normalize_address(session.address());
        Self {
            topics: MugTopics::new(&address),
            address,
            status,
            session,
            initialized: false,
            pending_liquid_state: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn status(&self) -> MugStatus {
        self.status
    }

    pub fn topics(&self) -> &MugTopics {
        &self.topics
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// True once the full read and push subscription have succeeded.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    pub fn set_optimistic_liquid_state(&mut self, state: LiquidState) {
        self.pending_liquid_state = Some(state);
    }

    /// Drop the optimistic overlay once the mug has reported for itself.
    pub fn clear_optimistic(&mut self) {
        self.pending_liquid_state = None;
    }

    /// Confirmed snapshot with the optimistic overlay applied.
    pub fn effective_data(&self) -> MugData {
        let mut data = self.session.data().clone();
        if let Some(state) = self.pending_liquid_state {
            data.liquid_state = state;
        }
        data
    }

    fn render<R>(&self, f: impl FnOnce(&MugView<'_>) -> R) -> R {
        let data = self.effective_data();
        let view = MugView {
            address: &self.address,
            name: self.session.name(),
            data: &data,
        };
        f(&view)
    }

    pub fn descriptors(&self, prefix: &str) -> Vec<EntityDescriptor> {
        self.render(|view| entities::tracked_descriptors(prefix, view))
    }

    pub fn pairing_button(&self, prefix: &str) -> EntityDescriptor {
        self.render(|view| entities::pairing_button(prefix, view))
    }

    pub fn telemetry(&self, online: bool) -> Telemetry {
        self.render(|view| entities::telemetry(view, online))
    }
}

/// Tracked and unpaired mugs, keyed by normalized address.
pub struct MugTracker<S> {
    devices: HashMap<String, DeviceRecord<S>>,
}

impl<S: MugSession> Default for MugTracker<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MugSession> MugTracker<S> {
    pub fn new() -> Self {
        Self {
            devices: HashMap::new(),
        }
    }

    pub fn get(&self, address: &str) -> Option<&DeviceRecord<S>> {
        self.devices.get(&normalize_address(address))
    }

    pub fn get_mut(&mut self, address: &str) -> Option<&mut DeviceRecord<S>> {
        self.devices.get_mut(&normalize_address(address))
    }

    pub fn status(&self, address: &str) -> Option<MugStatus> {
        self.get(address).map(|r| r.status)
    }

    pub fn is_tracked(&self, address: &str) -> bool {
        self.status(address) == Some(MugStatus::Tracked)
    }

    /// Start tracking a connected mug. Returns whatever record previously
    /// held the address, so callers can retract an unpaired mug's button.
    pub fn promote(&mut self, session: S) -> Option<DeviceRecord<S>> {
        let record = DeviceRecord::new(session, MugStatus::Tracked);
        self.devices.insert(record.address.clone(), record)
    }

    /// Stop tracking a mug. Unpaired records are left alone.
    pub fn demote(&mut self, address: &str) -> Option<DeviceRecord<S>> {
        let key = normalize_address(address);
        match self.devices.get(&key) {
            Some(record) if record.status == MugStatus::Tracked => self.devices.remove(&key),
            _ => None,
        }
    }

    /// Register an advertising mug. Returns true when the address was not
    /// present before; a tracked address is never downgraded.
    pub fn upsert_unpaired(&mut self, session: S) -> bool {
        let key = normalize_address(session.address());
        if self.devices.contains_key(&key) {
            return false;
        }
        self.devices
            .insert(key, DeviceRecord::new(session, MugStatus::Unpaired));
        true
    }

    /// Remove every unpaired mug whose address is not in `visible`.
    pub fn prune_unpaired_not_in(&mut self, visible: &HashSet<String>) -> Vec<DeviceRecord<S>> {
        let stale: Vec<String> = self
            .devices
            .values()
            .filter(|r| r.status == MugStatus::Unpaired && !visible.contains(&r.address))
            .map(|r| r.address.clone())
            .collect();
        stale
            .into_iter()
            .filter_map(|address| self.devices.remove(&address))
            .collect()
    }

    fn addresses_with(&self, status: MugStatus) -> Vec<String> {
        let mut addresses: Vec<String> = self
            .devices
            .values()
            .filter(|r| r.status == status)
            .map(|r| r.address.clone())
            .collect();
        addresses.sort();
        addresses
    }

    pub fn tracked_addresses(&self) -> Vec<String> {
        self.addresses_with(MugStatus::Tracked)
    }

    pub fn unpaired_addresses(&self) -> Vec<String> {
        self.addresses_with(MugStatus::Unpaired)
    }

    pub fn records(&self) -> impl Iterator<Item = &DeviceRecord<S>> {
        self.devices.values()
    }

    /// Addresses whose command namespace contains `topic`.
    pub fn matching(&self, topic: &str) -> Vec<String> {
        self.devices
            .values()
            .filter(|r| r.topics.owns(topic))
            .map(|r| r.address.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Addresses learned from configuration or retained discovery payloads.
#[derive(Debug, Default)]
pub struct KnownAddresses {
    addresses: DashSet<String>,
}

impl KnownAddresses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the address was not already known.
    pub fn record(&self, address: &str) -> bool {
        self.addresses.insert(normalize_address(address))
    }

    /// Returns true when the address was known.
    pub fn forget(&self, address: &str) -> bool {
        self.addresses.remove(&normalize_address(address)).is_some()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.addresses.contains(&normalize_address(address))
    }

    /// Sorted copy, so iteration never holds a shard lock across an await.
    pub fn snapshot(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.addresses.iter().map(|a| a.key().clone()).collect();
        addresses.sort();
        addresses
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}
