//! [`Watchdog`] – per-vehicle state freshness.
//!
//! The state loop calls [`Watchdog::heartbeat`] for every vehicle whose
//! query succeeded.  A vehicle is *stale* once no heartbeat has arrived
//! within its deadline.  [`Watchdog::take_newly_stale`] reports each vehicle
//! once per transition to stale, so alerts are not repeated every tick.

use std::collections::HashMap;
use std::time::{Duration, Instant};

// ────────────────────────────────────────────────────────────────────────────
// Internal entry
// ────────────────────────────────────────────────────────────────────────────

struct VehicleEntry {
    last_update: Instant,
    deadline: Duration,
    alerted: bool,
}

impl VehicleEntry {
    fn is_stale(&self, now: Instant) -> bool {
        now.duration_since(self.last_update) > self.deadline
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Watchdog
// ────────────────────────────────────────────────────────────────────────────

/// # Example
///
/// ```
/// use std::time::Duration;
/// use simbridge_kernel::watchdog::Watchdog;
///
/// let mut wd = Watchdog::new();
/// wd.register("drone_1", Duration::from_secs(1));
/// wd.heartbeat("drone_1");
///
/// assert!(wd.take_newly_stale().is_empty());
/// ```
#[derive(Default)]
pub struct Watchdog {
    vehicles: HashMap<String, VehicleEntry>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `vehicle`.  It begins fresh; re-registering resets it.
    pub fn register(&mut self, vehicle: &str, deadline: Duration) {
        self.vehicles.insert(
            vehicle.to_string(),
            VehicleEntry {
                last_update: Instant::now(),
                deadline,
                alerted: false,
            },
        );
    }

    /// Record a successful refresh.  Unknown vehicles are ignored.
    pub fn heartbeat(&mut self, vehicle: &str) {
        if let Some(entry) = self.vehicles.get_mut(vehicle) {
            entry.last_update = Instant::now();
            entry.alerted = false;
        }
    }

    /// Unknown vehicles are never fresh.
    #[cfg(test)]
    fn is_fresh(&self, vehicle: &str) -> bool {
        self.vehicles
            .get(vehicle)
            .is_some_and(|entry| !entry.is_stale(Instant::now()))
    }

    /// Every stale vehicle, sorted by name.
    #[cfg(test)]
    fn check_all(&self) -> Vec<String> {
        let now = Instant::now();
        let mut stale: Vec<String> = self
            .vehicles
            .iter()
            .filter(|(_, e)| e.is_stale(now))
            .map(|(name, _)| name.clone())
            .collect();
        stale.sort();
        stale
    }

    /// Stale vehicles not yet reported since they were last fresh, sorted by
    /// name.  Each is marked reported.
    pub fn take_newly_stale(&mut self) -> Vec<(String, Duration)> {
        let now = Instant::now();
        let mut out: Vec<(String, Duration)> = self
            .vehicles
            .iter_mut()
            .filter(|(_, e)| !e.alerted && e.is_stale(now))
            .map(|(name, e)| {
                e.alerted = true;
                (name.clone(), now.duration_since(e.last_update))
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}
