//! [`CommandDispatcher`] – drains the command latch once per tick.
//!
//! Every pending command is issued fire-and-forget and its slot is cleared
//! whatever the RPC outcome; a failed dispatch is logged, never replayed.

use std::sync::Arc;
use std::time::Duration;

use simbridge_hal::client::gimbal_pose;
use simbridge_hal::RemoteVehicleClient;
use simbridge_kernel::{CommandLatch, ControlGate};
use simbridge_types::VehicleKind;
use tracing::{debug, warn};

use crate::registry::VehicleRegistry;

/// What one dispatch pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// The gate was held elsewhere; nothing was read or cleared.
    pub deferred: bool,
    pub issued: usize,
    pub failed: usize,
}

pub struct CommandDispatcher {
    client: Arc<dyn RemoteVehicleClient>,
    registry: Arc<VehicleRegistry>,
    gate: Arc<ControlGate>,
    vel_cmd_duration: Duration,
    enable_api_control: bool,
}

impl CommandDispatcher {
    pub fn new(
        client: Arc<dyn RemoteVehicleClient>,
        registry: Arc<VehicleRegistry>,
        gate: Arc<ControlGate>,
        vel_cmd_duration: Duration,
        enable_api_control: bool,
    ) -> Self {
        Self {
            client,
            registry,
            gate,
            vel_cmd_duration,
            enable_api_control,
        }
    }

    /// Dispatch if the gate is free.  While a coordinated maneuver holds it
    /// the latches are left for a later tick.
    pub async fn dispatch(&self) -> DispatchReport {
        let Some(mut latch) = self.gate.try_lock() else {
            debug!("control gate held, dispatch deferred");
            return DispatchReport {
                deferred: true,
                ..DispatchReport::default()
            };
        };
        self.dispatch_locked(&mut latch).await
    }

    /// Dispatch with the gate already held by the caller.
    async fn dispatch_locked(&self, latch: &mut CommandLatch) -> DispatchReport {
        let mut report = DispatchReport::default();

        for record in self.registry.iter() {
            let name = record.name();
            let pending = latch.take(name);

            if let Some(cmd) = pending.velocity {
                if record.kind() == VehicleKind::Multirotor {
                    match self
                        .client
                        .move_by_velocity(name, &cmd, self.vel_cmd_duration)
                        .await
                    {
                        // The handle is dropped: velocity set-points are not awaited.
                        Ok(_) => report.issued += 1,
                        Err(e) => {
                            warn!(vehicle = %name, error = %e, "velocity command dropped");
                            report.failed += 1;
                        }
                    }
                } else {
                    debug!(vehicle = %name, kind = %record.kind(), "velocity command ignored");
                }
            }

            if let Some(controls) = pending.car_controls {
                if self.enable_api_control && record.kind() == VehicleKind::Car {
                    match self.client.set_car_controls(name, &controls).await {
                        Ok(()) => report.issued += 1,
                        Err(e) => {
                            warn!(vehicle = %name, error = %e, "car controls dropped");
                            report.failed += 1;
                        }
                    }
                } else {
                    debug!(vehicle = %name, "car controls cleared without dispatch");
                }
            }
        }

        if let Some(gimbal) = latch.take_gimbal() {
            match self
                .client
                .set_camera_pose(&gimbal.vehicle_name, &gimbal.camera_name, gimbal_pose(gimbal.target_quat))
                .await
            {
                Ok(()) => report.issued += 1,
                Err(e) => {
                    warn!(
                        vehicle = %gimbal.vehicle_name,
                        camera = %gimbal.camera_name,
                        error = %e,
                        "gimbal command dropped"
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simbridge_hal::{SimClient, SimOp};
    use simbridge_types::command::{CarControls, CommandClass, GimbalCmd, VehicleCommand, VelCmd};
    use simbridge_types::settings::{SimMode, VehicleSetting};
    use simbridge_types::{Quaternion, Vec3};

    fn vel(x: f64) -> VehicleCommand {
        VehicleCommand::Velocity(VelCmd {
            x,
            ..VelCmd::default()
        })
    }

    fn setup(
        mode: SimMode,
        names: &[&str],
        enable_api_control: bool,
    ) -> (Arc<SimClient>, Arc<ControlGate>, CommandDispatcher) {
        let settings: Vec<VehicleSetting> = names.iter().map(|n| VehicleSetting::new(*n)).collect();
        let sim = Arc::new(SimClient::from_settings(mode, &settings, Default::default()));
        let registry = Arc::new(VehicleRegistry::from_settings(mode, &settings).unwrap());
        let gate = Arc::new(ControlGate::new());
        let dispatcher = CommandDispatcher::new(
            sim.clone(),
            registry,
            Arc::clone(&gate),
            Duration::from_secs(1),
            enable_api_control,
        );
        (sim, gate, dispatcher)
    }

    #[tokio::test]
    async fn only_the_last_write_is_dispatched() -> Result<(), Box<dyn std::error::Error>> {
        let (sim, gate, dispatcher) = setup(SimMode::Multirotor, &["drone_1"], false);
        {
            let mut latch = gate.lock().await;
            latch.set_pending("drone_1", vel(1.0));
            latch.set_pending("drone_1", vel(4.0));
        }

        let report = dispatcher.dispatch().await;
        assert_eq!(report.issued, 1);
        assert_eq!(sim.calls_for(SimOp::MoveByVelocity), vec!["drone_1".to_string()]);
        // 4 m/s for one second.
        let pos = sim.position("drone_1").ok_or("no drone")?;
        assert!((pos.x - 4.0).abs() < 1e-9);
        assert!(!gate.lock().await.has_pending("drone_1", CommandClass::Velocity));
        Ok(())
    }

    #[tokio::test]
    async fn latch_clears_even_when_the_rpc_fails() {
        let (sim, gate, dispatcher) = setup(SimMode::Multirotor, &["drone_1"], false);
        sim.fail_issue("drone_1", SimOp::MoveByVelocity);
        gate.lock().await.set_pending("drone_1", vel(1.0));

        let report = dispatcher.dispatch().await;
        assert_eq!(report.failed, 1);
        assert!(!gate.lock().await.has_pending("drone_1", CommandClass::Velocity));

        // Nothing is replayed on the next tick.
        sim.clear_calls();
        let report = dispatcher.dispatch().await;
        assert_eq!(report, DispatchReport::default());
        assert!(sim.calls_for(SimOp::MoveByVelocity).is_empty());
    }

    #[tokio::test]
    async fn held_gate_defers_dispatch() {
        let (sim, gate, dispatcher) = setup(SimMode::Multirotor, &["drone_1"], false);
        let mut held = gate.lock().await;
        held.set_pending("drone_1", vel(1.0));

        let report = dispatcher.dispatch().await;
        assert!(report.deferred);
        assert!(sim.calls_for(SimOp::MoveByVelocity).is_empty());
        assert!(held.has_pending("drone_1", CommandClass::Velocity));
    }

    #[tokio::test]
    async fn car_controls_need_api_control() {
        let controls = VehicleCommand::CarControls(CarControls {
            throttle: 0.7,
            ..CarControls::default()
        });

        let (sim, gate, dispatcher) = setup(SimMode::Car, &["car_1"], false);
        gate.lock().await.set_pending("car_1", controls);
        dispatcher.dispatch().await;
        assert!(sim.calls_for(SimOp::SetCarControls).is_empty());
        assert!(!gate.lock().await.has_pending("car_1", CommandClass::CarControls));

        let (sim, gate, dispatcher) = setup(SimMode::Car, &["car_1"], true);
        gate.lock().await.set_pending("car_1", controls);
        dispatcher.dispatch().await;
        assert_eq!(sim.car_controls("car_1").map(|c| c.throttle), Some(0.7));
    }

    #[tokio::test]
    async fn gimbal_is_sent_as_orientation_only_pose() {
        let (sim, gate, dispatcher) = setup(SimMode::Multirotor, &["drone_1"], false);
        let q = Quaternion::from_rpy_degrees(0.0, -30.0, 0.0);
        gate.lock().await.set_gimbal(GimbalCmd {
            vehicle_name: "drone_1".into(),
            camera_name: "front".into(),
            target_quat: q,
        });

        let report = dispatcher.dispatch().await;
        assert_eq!(report.issued, 1);
        let pose = sim.camera_pose("drone_1", "front").unwrap();
        assert_eq!(pose.position, Vec3::zero());
        assert_eq!(pose.orientation, q);
        assert!(!gate.lock().await.has_gimbal());
    }
}
