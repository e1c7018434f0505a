//! [`VehicleRegistry`] – every vehicle the bridge knows about.
//!
//! Built once at startup from settings and never resized afterwards.  Each
//! [`VehicleRecord`] keeps the last state that was polled successfully and
//! the messages derived from it; a failed poll leaves both untouched.
//! Iteration follows insertion order, which is also the order the state
//! loop polls in.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use simbridge_types::msgs::{
    CarStateMsg, ComputerVisionStateMsg, EnvironmentMsg, NavSatFix, Odometry, TransformStamped,
};
use simbridge_types::settings::{BasicSensorKind, CameraSetting, SensorKind, SensorSetting, SimMode, VehicleSetting};
use simbridge_types::state::{EnvironmentState, SimTimestamp, VehicleKind, VehicleState};
use simbridge_types::{BridgeError, EventPayload, Quaternion, VehicleTarget};

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────────────────────────

/// Kind-specific status message.  Multirotors have none.
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleStatus {
    Car(CarStateMsg),
    ComputerVision(ComputerVisionStateMsg),
}

impl VehicleStatus {
    pub fn into_payload(self) -> EventPayload {
        match self {
            VehicleStatus::Car(msg) => EventPayload::CarState(msg),
            VehicleStatus::ComputerVision(msg) => EventPayload::ComputerVisionState(msg),
        }
    }
}

/// Published-convention messages recomputed from each successful poll.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedMessages {
    pub odometry: Odometry,
    pub environment: EnvironmentMsg,
    pub gps: NavSatFix,
    pub status: Option<VehicleStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct VehicleSnapshot {
    pub latest_state: Option<VehicleState>,
    pub environment: Option<EnvironmentState>,
    pub derived: Option<DerivedMessages>,
}

impl VehicleSnapshot {
    /// Simulator time of the last successful poll.
    pub fn timestamp(&self) -> Option<SimTimestamp> {
        self.latest_state.as_ref().map(VehicleState::timestamp)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// VehicleRecord
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct VehicleRecord {
    kind: VehicleKind,
    setting: VehicleSetting,
    snapshot: RwLock<VehicleSnapshot>,
    static_transforms: RwLock<Vec<TransformStamped>>,
}

impl VehicleRecord {
    pub fn new(kind: VehicleKind, setting: VehicleSetting) -> Self {
        Self {
            kind,
            setting,
            snapshot: RwLock::new(VehicleSnapshot::default()),
            static_transforms: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.setting.name
    }

    pub fn kind(&self) -> VehicleKind {
        self.kind
    }

    pub fn setting(&self) -> &VehicleSetting {
        &self.setting
    }

    /// # Errors
    ///
    /// [`BridgeError::WrongVehicleKind`] when this vehicle is not `expected`.
    pub fn require_kind(&self, expected: VehicleKind) -> Result<(), BridgeError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(BridgeError::WrongVehicleKind {
                vehicle: self.name().to_string(),
                expected,
            })
        }
    }

    /// Enabled sensors of one kind, in settings order.
    pub fn sensors(&self, kind: SensorKind) -> impl Iterator<Item = &SensorSetting> {
        self.setting
            .sensors
            .iter()
            .filter(move |s| s.enabled && s.kind == kind)
    }

    /// Enabled sensors read on every state tick, paired with their kind.
    pub fn basic_sensors(&self) -> impl Iterator<Item = (BasicSensorKind, &SensorSetting)> {
        self.setting
            .sensors
            .iter()
            .filter(|s| s.enabled)
            .filter_map(|s| s.kind.basic().map(|kind| (kind, s)))
    }

    pub fn cameras(&self) -> &[CameraSetting] {
        &self.setting.cameras
    }

    pub fn snapshot(&self) -> VehicleSnapshot {
        self.read_snapshot().clone()
    }

    pub fn timestamp(&self) -> Option<SimTimestamp> {
        self.read_snapshot().timestamp()
    }

    pub fn derived(&self) -> Option<DerivedMessages> {
        self.read_snapshot().derived.clone()
    }

    /// Current orientation in the simulator convention; identity until the
    /// first successful poll.
    pub fn orientation(&self) -> Quaternion {
        self.read_snapshot()
            .latest_state
            .as_ref()
            .map(|s| s.kinematics().pose.orientation)
            .unwrap_or_default()
    }

    /// Replace the snapshot after a successful poll.
    pub fn store(&self, state: VehicleState, environment: EnvironmentState, derived: DerivedMessages) {
        let mut snapshot = self.write_snapshot();
        snapshot.latest_state = Some(state);
        snapshot.environment = Some(environment);
        snapshot.derived = Some(derived);
    }

    pub fn static_transforms(&self) -> Vec<TransformStamped> {
        self.static_transforms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_static_transforms(&self, transforms: Vec<TransformStamped>) {
        *self
            .static_transforms
            .write()
            .unwrap_or_else(PoisonError::into_inner) = transforms;
    }

    // A panicking writer cannot leave a snapshot half-written in a way that
    // matters more than staleness, so poisoning is ignored.
    fn read_snapshot(&self) -> RwLockReadGuard<'_, VehicleSnapshot> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_snapshot(&self) -> RwLockWriteGuard<'_, VehicleSnapshot> {
        self.snapshot.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// VehicleRegistry
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct VehicleRegistry {
    records: Vec<VehicleRecord>,
    index: HashMap<String, usize>,
}

impl VehicleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One record per configured vehicle, all of `mode`'s kind.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Config`] on an empty or duplicate vehicle name.
    pub fn from_settings(mode: SimMode, settings: &[VehicleSetting]) -> Result<Self, BridgeError> {
        let kind = mode.vehicle_kind();
        let mut registry = Self::new();
        for setting in settings {
            registry.insert(kind, setting.clone())?;
        }
        Ok(registry)
    }

    /// # Errors
    ///
    /// [`BridgeError::Config`] on an empty or duplicate vehicle name.
    pub fn insert(&mut self, kind: VehicleKind, setting: VehicleSetting) -> Result<(), BridgeError> {
        if setting.name.is_empty() {
            return Err(BridgeError::Config("vehicle name must not be empty".into()));
        }
        if self.index.contains_key(&setting.name) {
            return Err(BridgeError::Config(format!(
                "duplicate vehicle name '{}'",
                setting.name
            )));
        }
        self.index.insert(setting.name.clone(), self.records.len());
        self.records.push(VehicleRecord::new(kind, setting));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&VehicleRecord> {
        self.index.get(name).map(|&i| &self.records[i])
    }

    /// # Errors
    ///
    /// [`BridgeError::UnknownVehicle`] when `name` is not registered.
    pub fn require(&self, name: &str) -> Result<&VehicleRecord, BridgeError> {
        self.get(name)
            .ok_or_else(|| BridgeError::UnknownVehicle(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &VehicleRecord> {
        self.records.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.records.iter().map(|r| r.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records addressed by `target`, in request order for groups and
    /// registry order for `all`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnknownVehicle`] for the first name not registered.
    pub fn resolve(&self, target: &VehicleTarget) -> Result<Vec<&VehicleRecord>, BridgeError> {
        match target {
            VehicleTarget::All(_) => Ok(self.records.iter().collect()),
            VehicleTarget::One(name) => Ok(vec![self.require(name)?]),
            VehicleTarget::Group(names) => names.iter().map(|n| self.require(n)).collect(),
        }
    }
}
