//! [`CoordinatedManeuver`] – raise a fleet to one altitude, hold, land.
//!
//! The whole maneuver runs with the [`ControlGate`] held, so the per-tick
//! dispatcher and every command producer stall until it finishes.  State
//! polling is not gated and carries on.
//!
//! # Phases
//!
//! 1. **Ascent** – a move-to-altitude is issued to every target before any
//!    of them is awaited.  A vehicle whose issue fails is marked failed at
//!    once; with `wait_on_last_task` each remaining handle is then awaited
//!    in target order and a `false` or an error marks that vehicle failed.
//! 2. **Hold** – a single sleep for the whole fleet.
//! 3. **Landing** – the same issue-all-then-await pattern, skipping every
//!    vehicle that already failed.
//!
//! Failures are a union across phases.  A vehicle is never retried.

use std::sync::Arc;
use std::time::{Duration, Instant};

use simbridge_hal::{RemoteVehicleClient, TaskHandle};
use simbridge_kernel::ControlGate;
use simbridge_types::command::YawMode;
use simbridge_types::{BridgeError, ManeuverRequest, ManeuverResult, RpcError};
use tracing::{error, info, instrument, warn};

use crate::registry::VehicleRegistry;

const MOVE_TO_Z_TIMEOUT: Duration = Duration::from_secs(30);
const LAND_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_ASCENT_SPEED: f64 = 2.0;
const DEFAULT_HOVER_TIME: f64 = 2.0;

pub struct CoordinatedManeuver {
    client: Arc<dyn RemoteVehicleClient>,
    registry: Arc<VehicleRegistry>,
    gate: Arc<ControlGate>,
    task_wait_timeout: Option<Duration>,
}

/// Names that failed so far, in the order they failed.
#[derive(Debug, Default)]
struct FailureSet(Vec<String>);

impl FailureSet {
    fn mark(&mut self, vehicle: &str) {
        if !self.contains(vehicle) {
            self.0.push(vehicle.to_string());
        }
    }

    fn contains(&self, vehicle: &str) -> bool {
        self.0.iter().any(|v| v == vehicle)
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl CoordinatedManeuver {
    /// `task_wait_timeout` bounds every await when set; otherwise a stuck
    /// simulator call blocks the maneuver, and the gate, indefinitely.
    pub fn new(
        client: Arc<dyn RemoteVehicleClient>,
        registry: Arc<VehicleRegistry>,
        gate: Arc<ControlGate>,
        task_wait_timeout: Option<Duration>,
    ) -> Self {
        Self {
            client,
            registry,
            gate,
            task_wait_timeout,
        }
    }

    /// Run the maneuver.  Never fails: every outcome is in the result.
    #[instrument(
        skip(self, request),
        fields(
            requested = request.vehicle_names.len(),
            target_height = request.target_height,
        )
    )]
    pub async fn execute(&self, request: &ManeuverRequest) -> ManeuverResult {
        let _gate = self.gate.lock().await;
        let started = Instant::now();

        let targets = self.resolve_targets(request);
        if targets.is_empty() {
            warn!("coordinated maneuver with no vehicles");
            return ManeuverResult {
                success: false,
                message: "No vehicles available for coordinated operation".into(),
                total_time: 0.0,
                ..ManeuverResult::default()
            };
        }

        info!(
            vehicles = targets.len(),
            target_height = request.target_height,
            "starting coordinated height and land"
        );

        let mut failed = FailureSet::default();
        match self.run_phases(request, &targets, &mut failed).await {
            Ok(()) => {
                let total_time = started.elapsed().as_secs_f64();
                let success = failed.is_empty();
                let message = if success {
                    info!(total_time, "coordinated maneuver completed");
                    "All vehicles successfully completed coordinated height and land operation"
                        .to_string()
                } else {
                    warn!(failures = failed.len(), total_time, "coordinated maneuver completed with failures");
                    format!(
                        "Coordinated operation completed with failures on {} vehicles",
                        failed.len()
                    )
                };
                ManeuverResult {
                    success,
                    message,
                    total_time,
                    vehicles_attempted: targets.len(),
                    vehicles_completed: targets.len().saturating_sub(failed.len()),
                    failed_vehicles: failed.0,
                }
            }
            Err(e) => {
                error!(error = %e, "coordinated maneuver aborted");
                ManeuverResult {
                    success: false,
                    message: format!("Coordinated operation failed: {e}"),
                    total_time: started.elapsed().as_secs_f64(),
                    vehicles_attempted: targets.len(),
                    vehicles_completed: 0,
                    failed_vehicles: failed.0,
                }
            }
        }
    }

    /// Explicit names are used as given, unknown ones included: they fail
    /// at issue time like any other per-vehicle fault.
    fn resolve_targets(&self, request: &ManeuverRequest) -> Vec<String> {
        if request.vehicle_names.is_empty() {
            self.registry.names()
        } else {
            request.vehicle_names.clone()
        }
    }

    async fn run_phases(
        &self,
        request: &ManeuverRequest,
        targets: &[String],
        failed: &mut FailureSet,
    ) -> Result<(), BridgeError> {
        if !request.target_height.is_finite() {
            return Err(BridgeError::InvalidRequest(format!(
                "target height {} is not finite",
                request.target_height
            )));
        }
        let ascent_speed = if request.ascent_speed > 0.0 {
            request.ascent_speed
        } else {
            DEFAULT_ASCENT_SPEED
        };
        let hover_time = if request.hover_time >= 0.0 {
            request.hover_time
        } else {
            DEFAULT_HOVER_TIME
        };
        let hover = Duration::try_from_secs_f64(hover_time)
            .map_err(|e| BridgeError::InvalidRequest(format!("hover time {hover_time}: {e}")))?;

        // ── Phase 1: ascent ──────────────────────────────────────────────
        info!(target_height = request.target_height, "phase 1: ascent");
        let mut ascents = Vec::with_capacity(targets.len());
        for name in targets {
            match self
                .client
                .move_to_z(
                    name,
                    request.target_height,
                    ascent_speed,
                    MOVE_TO_Z_TIMEOUT,
                    YawMode::default(),
                )
                .await
            {
                Ok(handle) => ascents.push((name.as_str(), handle)),
                Err(e) => {
                    error!(vehicle = %name, error = %e, "failed to send height command");
                    failed.mark(name);
                }
            }
        }
        if request.wait_on_last_task {
            self.await_all(ascents, failed, "reach target height").await;
        }

        // ── Phase 2: hold ────────────────────────────────────────────────
        if !hover.is_zero() {
            info!(hover_secs = hover_time, "phase 2: hover");
            tokio::time::sleep(hover).await;
        }

        // ── Phase 3: landing ─────────────────────────────────────────────
        info!("phase 3: landing");
        let remaining: Vec<&String> = targets.iter().filter(|n| !failed.contains(n)).collect();
        let mut landings = Vec::with_capacity(remaining.len());
        for name in remaining {
            match self.client.land(name, LAND_TIMEOUT).await {
                Ok(handle) => landings.push((name.as_str(), handle)),
                Err(e) => {
                    error!(vehicle = %name, error = %e, "failed to send land command");
                    failed.mark(name);
                }
            }
        }
        if request.wait_on_last_task {
            self.await_all(landings, failed, "land").await;
        }

        Ok(())
    }

    /// Await each handle in order; each keeps the name it was issued for.
    async fn await_all(&self, handles: Vec<(&str, TaskHandle)>, failed: &mut FailureSet, goal: &str) {
        for (name, handle) in handles {
            match self.wait(handle).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(vehicle = %name, "vehicle failed to {goal}");
                    failed.mark(name);
                }
                Err(e) => {
                    error!(vehicle = %name, error = %e, "error waiting for vehicle to {goal}");
                    failed.mark(name);
                }
            }
        }
    }

    async fn wait(&self, handle: TaskHandle) -> Result<bool, RpcError> {
        match self.task_wait_timeout {
            Some(deadline) => handle.wait_timeout(deadline).await,
            None => handle.wait().await,
        }
    }
}
