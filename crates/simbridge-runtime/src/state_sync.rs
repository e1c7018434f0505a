//! [`StateSyncLoop`] – the periodic pull / convert / publish tick.
//!
//! Each tick:
//!
//! 1. publishes the origin geo point;
//! 2. refreshes every vehicle in registry order.  The environment query and
//!    the kind-specific state query must both succeed for a vehicle to
//!    update; otherwise its previous snapshot is kept as is;
//! 3. takes the simulation clock from the first vehicle that refreshed,
//!    unless the simulator reports it is paused;
//! 4. publishes the clock (when enabled), every vehicle's derived messages,
//!    its odom transform, its static transforms restamped with the vehicle
//!    time, and its basic sensors;
//! 5. raises one fault event per vehicle that went stale;
//! 6. hands off to the [`CommandDispatcher`].
//!
//! Nothing in a tick propagates an error.  A vehicle that cannot be reached
//! is logged and retried on the next period.

use std::sync::Arc;
use std::time::Duration;

use simbridge_hal::RemoteVehicleClient;
use simbridge_kernel::Watchdog;
use simbridge_middleware::EventBus;
use simbridge_perception::conversion::{
    environment_msg, imu_from_reading, odom_transform, odometry_from_kinematics,
};
use simbridge_types::msgs::{
    Altimeter, CarStateMsg, ComputerVisionStateMsg, GpsYaw, Header, MagneticField, NavSatFix, Range,
    SERVICE_GLONASS,
};
use simbridge_types::settings::{BasicSensorKind, SensorSetting};
use simbridge_types::state::{EnvironmentState, GeoPoint, SimTimestamp, VehicleState};
use simbridge_types::{EventPayload, RpcError};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::dispatcher::{CommandDispatcher, DispatchReport};
use crate::registry::{DerivedMessages, VehicleRecord, VehicleRegistry, VehicleStatus};

const SOURCE: &str = "simbridge::state_sync";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StateSyncConfig {
    pub odom_frame_id: String,
    pub publish_clock: bool,
    /// A vehicle with no fresh state for this long raises a fault event.
    pub stale_after: Duration,
    pub origin: GpsYaw,
}

impl Default for StateSyncConfig {
    fn default() -> Self {
        Self {
            odom_frame_id: "odom_local".to_string(),
            publish_clock: false,
            stale_after: Duration::from_secs(1),
            origin: GpsYaw::default(),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub refreshed: Vec<String>,
    pub failed: Vec<String>,
    /// Simulation clock after the tick; `None` until any vehicle refreshed.
    pub clock: Option<SimTimestamp>,
    pub dispatch: DispatchReport,
}

// ─────────────────────────────────────────────────────────────────────────────
// StateSyncLoop
// ─────────────────────────────────────────────────────────────────────────────

pub struct StateSyncLoop {
    client: Arc<dyn RemoteVehicleClient>,
    registry: Arc<VehicleRegistry>,
    bus: EventBus,
    dispatcher: CommandDispatcher,
    watchdog: Watchdog,
    config: StateSyncConfig,
    clock: Option<SimTimestamp>,
}

impl StateSyncLoop {
    pub fn new(
        client: Arc<dyn RemoteVehicleClient>,
        registry: Arc<VehicleRegistry>,
        bus: EventBus,
        dispatcher: CommandDispatcher,
        config: StateSyncConfig,
    ) -> Self {
        let mut watchdog = Watchdog::new();
        for record in registry.iter() {
            watchdog.register(record.name(), config.stale_after);
        }
        Self {
            client,
            registry,
            bus,
            dispatcher,
            watchdog,
            config,
            clock: None,
        }
    }

    pub fn clock(&self) -> Option<SimTimestamp> {
        self.clock
    }

    /// Tick every `period` until `shutdown` flips to `true`.
    pub async fn run(mut self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
        info!(period_ms, "state loop started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick().await;
                    if !report.failed.is_empty() {
                        debug!(failed = ?report.failed, "state refresh incomplete");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("state loop stopping");
                        return;
                    }
                }
            }
        }
    }

    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        self.bus
            .emit(SOURCE, EventPayload::OriginGeoPoint(self.config.origin));

        let mut first_stamp = None;
        for record in self.registry.iter() {
            match self.refresh(record).await {
                Ok(stamp) => {
                    first_stamp.get_or_insert(stamp);
                    self.watchdog.heartbeat(record.name());
                    report.refreshed.push(record.name().to_string());
                }
                Err(e) => {
                    warn!(vehicle = %record.name(), error = %e, "state query failed, keeping last state");
                    report.failed.push(record.name().to_string());
                }
            }
        }

        if let Some(stamp) = first_stamp {
            match self.client.is_paused().await {
                Ok(false) => self.clock = Some(stamp),
                Ok(true) => debug!("simulation paused, clock held"),
                Err(e) => debug!(error = %e, "pause query failed, clock held"),
            }
        }
        report.clock = self.clock;

        if self.config.publish_clock
            && let Some(nanos) = self.clock
        {
            self.bus.emit(SOURCE, EventPayload::Clock { nanos });
        }

        for record in self.registry.iter() {
            self.publish_vehicle(record).await;
        }

        for (vehicle, silent_for) in self.watchdog.take_newly_stale() {
            let silent_ms = u64::try_from(silent_for.as_millis()).unwrap_or(u64::MAX);
            warn!(vehicle = %vehicle, silent_ms, "vehicle state is stale");
            let message = format!("no fresh state for {:.2}s", silent_for.as_secs_f64());
            self.bus
                .emit(SOURCE, EventPayload::VehicleFault { vehicle, message });
        }

        report.dispatch = self.dispatcher.dispatch().await;
        report
    }

    /// Query and store one vehicle.  Returns its simulator time.
    async fn refresh(&self, record: &VehicleRecord) -> Result<SimTimestamp, RpcError> {
        let name = record.name();
        let environment = self.client.get_environment(name).await?;
        let state = self.client.get_state(name, record.kind()).await?;
        let stamp = state.timestamp();
        let derived = self.derive(name, &state, &environment);
        record.store(state, environment, derived);
        Ok(stamp)
    }

    fn derive(&self, name: &str, state: &VehicleState, environment: &EnvironmentState) -> DerivedMessages {
        let stamp = state.timestamp();
        let odometry =
            odometry_from_kinematics(state.kinematics(), name, &self.config.odom_frame_id, stamp);

        let (geo, status) = match state {
            VehicleState::Multirotor(s) => (s.gps_location, None),
            VehicleState::Car(s) => (
                environment.geo_point,
                Some(VehicleStatus::Car(CarStateMsg {
                    header: Header::new(stamp, name),
                    pose: odometry.pose,
                    twist: odometry.twist,
                    speed: s.speed,
                    gear: s.gear,
                    rpm: s.rpm,
                    maxrpm: s.maxrpm,
                    handbrake: s.handbrake,
                })),
            ),
            VehicleState::ComputerVision(_) => (
                environment.geo_point,
                Some(VehicleStatus::ComputerVision(ComputerVisionStateMsg {
                    header: Header::new(stamp, name),
                    pose: odometry.pose,
                    twist: odometry.twist,
                })),
            ),
        };

        DerivedMessages {
            environment: environment_msg(environment, name, stamp),
            gps: nav_sat_fix(geo, Header::new(stamp, name)),
            odometry,
            status,
        }
    }

    async fn publish_vehicle(&self, record: &VehicleRecord) {
        let name = record.name();
        let Some(derived) = record.derived() else {
            // Never refreshed: nothing to publish yet.
            return;
        };
        let stamp = derived.odometry.header.stamp;

        self.bus
            .emit(name, EventPayload::Environment(derived.environment));
        if let Some(status) = derived.status {
            self.bus.emit(name, status.into_payload());
        }
        self.bus
            .emit(name, EventPayload::Transform(odom_transform(&derived.odometry)));
        self.bus.emit(name, EventPayload::Odometry(derived.odometry));
        self.bus.emit(name, EventPayload::GlobalGps(derived.gps));

        let mut statics = record.static_transforms();
        if !statics.is_empty() {
            for tf in &mut statics {
                tf.header.stamp = stamp;
            }
            self.bus.emit(name, EventPayload::StaticTransforms(statics));
        }

        for (kind, sensor) in record.basic_sensors() {
            match self.read_basic_sensor(name, kind, sensor).await {
                Ok(payload) => {
                    self.bus.emit(name, payload);
                }
                Err(e) => debug!(vehicle = %name, sensor = %sensor.name, error = %e, "sensor read skipped"),
            }
        }
    }

    /// One basic sensor as a bus payload, framed in the vehicle frame and
    /// stamped with the reading's own time.
    async fn read_basic_sensor(
        &self,
        vehicle: &str,
        kind: BasicSensorKind,
        sensor: &SensorSetting,
    ) -> Result<EventPayload, RpcError> {
        let client = &self.client;
        let name = sensor.name.clone();
        let payload = match kind {
            BasicSensorKind::Barometer => {
                let r = client.get_barometer(vehicle, &sensor.name).await?;
                EventPayload::Altimeter {
                    sensor: name,
                    msg: Altimeter {
                        header: Header::new(r.timestamp, vehicle),
                        altitude: r.altitude,
                        pressure: r.pressure,
                        qnh: r.qnh,
                    },
                }
            }
            BasicSensorKind::Imu => {
                let r = client.get_imu(vehicle, &sensor.name).await?;
                EventPayload::Imu {
                    sensor: name,
                    msg: imu_from_reading(&r, vehicle),
                }
            }
            BasicSensorKind::Distance => {
                let r = client.get_distance(vehicle, &sensor.name).await?;
                EventPayload::Range {
                    sensor: name,
                    msg: Range {
                        header: Header::new(r.timestamp, vehicle),
                        range: r.distance,
                        min_range: r.min_distance,
                        max_range: r.max_distance,
                    },
                }
            }
            BasicSensorKind::Gps => {
                let r = client.get_gps(vehicle, &sensor.name).await?;
                let mut msg = nav_sat_fix(r.geo_point, Header::new(r.timestamp, vehicle));
                msg.status = r.fix_type;
                msg.service = SERVICE_GLONASS;
                EventPayload::NavSatFix { sensor: name, msg }
            }
            BasicSensorKind::Magnetometer => {
                let r = client.get_magnetometer(vehicle, &sensor.name).await?;
                EventPayload::MagneticField {
                    sensor: name,
                    msg: MagneticField {
                        header: Header::new(r.timestamp, vehicle),
                        // Body-frame field is published as measured.
                        magnetic_field: r.magnetic_field_body,
                        magnetic_field_covariance: r.magnetic_field_covariance,
                    },
                }
            }
        };
        Ok(payload)
    }
}

fn nav_sat_fix(geo: GeoPoint, header: Header) -> NavSatFix {
    NavSatFix {
        header,
        latitude: geo.latitude,
        longitude: geo.longitude,
        altitude: geo.altitude,
        ..NavSatFix::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simbridge_hal::{SimClient, SimOp};
    use simbridge_kernel::ControlGate;
    use simbridge_types::command::{VehicleCommand, VelCmd};
    use simbridge_types::msgs::TransformStamped;
    use simbridge_types::settings::{SensorKind, SimMode, VehicleSetting};
    use simbridge_types::{Event, Vec3};
    use tokio::sync::broadcast;

    struct Rig {
        sim: Arc<SimClient>,
        registry: Arc<VehicleRegistry>,
        gate: Arc<ControlGate>,
        bus: EventBus,
        state_loop: StateSyncLoop,
    }

    fn rig(mode: SimMode, settings: Vec<VehicleSetting>, config: StateSyncConfig) -> Rig {
        let sim = Arc::new(SimClient::from_settings(mode, &settings, GeoPoint::default()));
        let registry = Arc::new(VehicleRegistry::from_settings(mode, &settings).unwrap());
        let gate = Arc::new(ControlGate::new());
        let bus = EventBus::default();
        let dispatcher = CommandDispatcher::new(
            sim.clone(),
            Arc::clone(&registry),
            Arc::clone(&gate),
            Duration::from_millis(50),
            false,
        );
        let state_loop = StateSyncLoop::new(
            sim.clone(),
            Arc::clone(&registry),
            bus.clone(),
            dispatcher,
            config,
        );
        Rig {
            sim,
            registry,
            gate,
            bus,
            state_loop,
        }
    }

    fn drones(names: &[&str]) -> Vec<VehicleSetting> {
        names.iter().map(|n| VehicleSetting::new(*n)).collect()
    }

    fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn failed_vehicle_keeps_its_stale_state() -> Result<(), Box<dyn std::error::Error>> {
        let mut rig = rig(SimMode::Multirotor, drones(&["a", "b"]), StateSyncConfig::default());
        rig.state_loop.tick().await;
        let a_before = rig.registry.require("a")?.timestamp();
        let b_before = rig.registry.require("b")?.timestamp();
        assert!(a_before.is_some() && b_before.is_some());

        rig.sim.fail_state_queries("a");
        let report = rig.state_loop.tick().await;

        assert_eq!(report.failed, vec!["a".to_string()]);
        assert_eq!(report.refreshed, vec!["b".to_string()]);
        assert_eq!(rig.registry.require("a")?.timestamp(), a_before);
        assert!(rig.registry.require("b")?.timestamp() > b_before);
        Ok(())
    }

    #[tokio::test]
    async fn clock_comes_from_first_success() -> Result<(), Box<dyn std::error::Error>> {
        let mut rig = rig(SimMode::Multirotor, drones(&["a", "b"]), StateSyncConfig::default());
        rig.sim.fail_state_queries("a");
        let report = rig.state_loop.tick().await;
        assert_eq!(report.clock, rig.registry.require("b")?.timestamp());
        Ok(())
    }

    #[tokio::test]
    async fn clock_holds_when_nothing_refreshes_or_sim_is_paused() -> Result<(), Box<dyn std::error::Error>> {
        let mut rig = rig(SimMode::Multirotor, drones(&["a"]), StateSyncConfig::default());
        let first = rig.state_loop.tick().await.clock;
        assert!(first.is_some());

        rig.sim.fail_state_queries("a");
        assert_eq!(rig.state_loop.tick().await.clock, first);

        rig.sim.clear_faults();
        rig.sim.set_paused(true);
        assert_eq!(rig.state_loop.tick().await.clock, first);

        rig.sim.set_paused(false);
        assert!(rig.state_loop.tick().await.clock > first);
        Ok(())
    }

    #[tokio::test]
    async fn publishes_derived_messages_in_published_convention() -> Result<(), Box<dyn std::error::Error>> {
        let settings = vec![VehicleSetting {
            position: Some(Vec3::new(1.0, 2.0, -4.0)),
            ..VehicleSetting::new("drone_1")
        }];
        let config = StateSyncConfig {
            publish_clock: true,
            ..StateSyncConfig::default()
        };
        let mut rig = rig(SimMode::Multirotor, settings, config);
        let mut rx = rig.bus.subscribe();
        rig.state_loop.tick().await;
        let events = drain(&mut rx);

        assert!(matches!(events[0].payload, EventPayload::OriginGeoPoint(_)));
        assert!(events.iter().any(|e| matches!(e.payload, EventPayload::Clock { .. })));

        let odom = events
            .iter()
            .find_map(|e| match &e.payload {
                EventPayload::Odometry(o) => Some(o.clone()),
                _ => None,
            })
            .ok_or("no odometry")?;
        assert_eq!(odom.pose.position, Vec3::new(1.0, -2.0, 4.0));
        assert_eq!(odom.header.frame_id, "drone_1");
        assert_eq!(odom.child_frame_id, "drone_1/odom_local");

        // The stored snapshot stays in the simulator convention.
        let stored = rig.registry.require("drone_1")?.snapshot().latest_state.ok_or("no state")?;
        assert_eq!(stored.kinematics().pose.position, Vec3::new(1.0, 2.0, -4.0));
        assert!(events.iter().any(|e| matches!(e.payload, EventPayload::GlobalGps(_))));
        assert!(events.iter().any(|e| matches!(e.payload, EventPayload::Environment(_))));
        assert!(events.iter().all(|e| !matches!(e.payload, EventPayload::CarState(_))));
        Ok(())
    }

    #[tokio::test]
    async fn car_publishes_car_state() -> Result<(), Box<dyn std::error::Error>> {
        let mut rig = rig(SimMode::Car, drones(&["car_1"]), StateSyncConfig::default());
        let mut rx = rig.bus.subscribe();
        rig.state_loop.tick().await;
        let events = drain(&mut rx);
        let state = events
            .iter()
            .find_map(|e| match &e.payload {
                EventPayload::CarState(s) => Some(s.clone()),
                _ => None,
            })
            .ok_or("no car state")?;
        assert_eq!(state.header.frame_id, "car_1");
        assert_eq!(state.maxrpm, 7500.0);
        Ok(())
    }

    #[tokio::test]
    async fn static_transforms_take_the_vehicle_stamp() -> Result<(), Box<dyn std::error::Error>> {
        let mut rig = rig(SimMode::Multirotor, drones(&["drone_1"]), StateSyncConfig::default());
        rig.registry.require("drone_1")?.set_static_transforms(vec![TransformStamped {
            header: Header::new(0, "world"),
            child_frame_id: "drone_1".into(),
            ..TransformStamped::default()
        }]);
        let mut rx = rig.bus.subscribe();
        rig.state_loop.tick().await;

        let stamp = rig.registry.require("drone_1")?.timestamp().ok_or("no stamp")?;
        let statics = drain(&mut rx)
            .into_iter()
            .find_map(|e| match e.payload {
                EventPayload::StaticTransforms(v) => Some(v),
                _ => None,
            })
            .ok_or("no static transforms")?;
        assert_eq!(statics[0].header.stamp, stamp);
        Ok(())
    }

    #[tokio::test]
    async fn basic_sensors_are_published_and_failures_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let settings = vec![
            VehicleSetting::new("drone_1")
                .with_sensor(SensorSetting::new("baro", SensorKind::Barometer))
                .with_sensor(SensorSetting::new("gps", SensorKind::Gps))
                .with_sensor(SensorSetting::new("mag", SensorKind::Magnetometer))
                .with_sensor(SensorSetting::new("lidar", SensorKind::Lidar)),
            VehicleSetting::new("drone_2").with_sensor(SensorSetting::new("imu", SensorKind::Imu)),
        ];
        let mut rig = rig(SimMode::Multirotor, settings, StateSyncConfig::default());
        rig.sim.fail_sensor_reads("drone_2");
        let mut rx = rig.bus.subscribe();
        let report = rig.state_loop.tick().await;
        assert_eq!(report.refreshed.len(), 2);

        let events = drain(&mut rx);
        let fix = events
            .iter()
            .find_map(|e| match &e.payload {
                EventPayload::NavSatFix { msg, .. } => Some(msg.clone()),
                _ => None,
            })
            .ok_or("no gps fix")?;
        assert_eq!(fix.service, SERVICE_GLONASS);
        assert_eq!(fix.status, 3);
        assert!(events.iter().any(|e| matches!(e.payload, EventPayload::Altimeter { .. })));
        assert!(events.iter().any(|e| matches!(e.payload, EventPayload::MagneticField { .. })));
        // Lidar belongs to the sensor poller; drone_2's IMU read failed.
        assert!(!events.iter().any(|e| matches!(e.payload, EventPayload::PointCloud { .. })));
        assert!(!events.iter().any(|e| matches!(e.payload, EventPayload::Imu { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn stale_vehicle_raises_one_fault() -> Result<(), Box<dyn std::error::Error>> {
        let config = StateSyncConfig {
            stale_after: Duration::from_millis(20),
            ..StateSyncConfig::default()
        };
        let mut rig = rig(SimMode::Multirotor, drones(&["a", "b"]), config);
        rig.sim.fail_state_queries("a");
        let mut rx = rig.bus.subscribe();

        tokio::time::sleep(Duration::from_millis(40)).await;
        rig.state_loop.tick().await;
        rig.state_loop.tick().await;

        let faults: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::VehicleFault { vehicle, .. } => Some(vehicle),
                _ => None,
            })
            .collect();
        assert_eq!(faults, vec!["a".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn tick_ends_with_dispatch() -> Result<(), Box<dyn std::error::Error>> {
        let mut rig = rig(SimMode::Multirotor, drones(&["drone_1"]), StateSyncConfig::default());
        rig.gate
            .lock()
            .await
            .set_pending("drone_1", VehicleCommand::Velocity(VelCmd::default()));
        let report = rig.state_loop.tick().await;
        assert_eq!(report.dispatch.issued, 1);
        assert_eq!(rig.sim.calls_for(SimOp::MoveByVelocity), vec!["drone_1".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() -> Result<(), Box<dyn std::error::Error>> {
        let rig = rig(SimMode::Multirotor, drones(&["drone_1"]), StateSyncConfig::default());
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(rig.state_loop.run(Duration::from_millis(5), rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true)?;
        tokio::time::timeout(Duration::from_secs(1), task).await??;
        assert!(rig.registry.require("drone_1")?.timestamp().is_some());
        Ok(())
    }
}
