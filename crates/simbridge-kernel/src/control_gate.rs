//! [`ControlGate`] – the single command mutex.
//!
//! The gate owns the [`CommandLatch`].  Producers, the per-tick dispatcher
//! and the coordinated maneuver all go through it, so holding the guard is
//! the only way to touch latched commands or to issue direct commands.
//! State polling does not take the gate.

use tokio::sync::{Mutex, MutexGuard};

use crate::latch::CommandLatch;

pub type ControlGuard<'a> = MutexGuard<'a, CommandLatch>;

#[derive(Debug, Default)]
pub struct ControlGate {
    latch: Mutex<CommandLatch>,
}

impl ControlGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the gate.  Fair: waiters are served in arrival order.
    pub async fn lock(&self) -> ControlGuard<'_> {
        self.latch.lock().await
    }

    /// Take the gate only if nobody holds it.
    pub fn try_lock(&self) -> Option<ControlGuard<'_>> {
        self.latch.try_lock().ok()
    }

    pub fn is_held(&self) -> bool {
        self.latch.try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simbridge_types::command::{CommandClass, VehicleCommand, VelCmd};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn try_lock_fails_while_held() {
        let gate = ControlGate::new();
        let guard = gate.lock().await;
        assert!(gate.try_lock().is_none());
        assert!(gate.is_held());
        drop(guard);
        assert!(gate.try_lock().is_some());
        assert!(!gate.is_held());
    }

    #[tokio::test]
    async fn producer_waits_for_holder() {
        let gate = Arc::new(ControlGate::new());
        let guard = gate.lock().await;

        let producer = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                gate.lock()
                    .await
                    .set_pending("drone_1", VehicleCommand::Velocity(VelCmd::default()));
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!guard.has_pending("drone_1", CommandClass::Velocity));
        drop(guard);

        producer.await.unwrap();
        assert!(gate.lock().await.has_pending("drone_1", CommandClass::Velocity));
    }
}
