//! [`TaskHandle`] – reference to an in-flight simulator command.
//!
//! A handle resolves to `Ok(true)` when the command completed successfully,
//! `Ok(false)` when the simulator reports it did not, or an [`RpcError`].
//! Dropping an unawaited handle detaches the command; it keeps running on
//! the simulator side.

use std::time::Duration;

use simbridge_types::RpcError;
use tokio::sync::oneshot;

type Outcome = Result<bool, RpcError>;

/// Completion side of a [`TaskHandle`], held by whatever drives the call.
#[derive(Debug)]
pub struct TaskCompleter {
    tx: oneshot::Sender<Outcome>,
}

impl TaskCompleter {
    /// Resolve the paired handle.  A handle that was already dropped is
    /// ignored.
    pub fn complete(self, outcome: Outcome) {
        let _ = self.tx.send(outcome);
    }
}

#[derive(Debug)]
pub struct TaskHandle {
    call: String,
    vehicle: String,
    rx: oneshot::Receiver<Outcome>,
    done: Option<Outcome>,
}

impl TaskHandle {
    /// A handle that resolves when the returned completer is used.  If the
    /// completer is dropped first the handle resolves to
    /// [`RpcError::Disconnected`].
    pub fn pending(call: impl Into<String>, vehicle: impl Into<String>) -> (TaskCompleter, Self) {
        let (tx, rx) = oneshot::channel();
        let handle = Self {
            call: call.into(),
            vehicle: vehicle.into(),
            rx,
            done: None,
        };
        (TaskCompleter { tx }, handle)
    }

    /// A handle that has already resolved.
    pub fn ready(call: impl Into<String>, vehicle: impl Into<String>, outcome: Outcome) -> Self {
        let (completer, mut handle) = Self::pending(call, vehicle);
        completer.complete(outcome.clone());
        handle.done = Some(outcome);
        handle
    }

    pub fn call(&self) -> &str {
        &self.call
    }

    pub fn vehicle(&self) -> &str {
        &self.vehicle
    }

    /// Non-blocking check.  `None` while the command is still running.
    pub fn poll(&mut self) -> Option<Outcome> {
        if self.done.is_none() {
            match self.rx.try_recv() {
                Ok(outcome) => self.done = Some(outcome),
                Err(oneshot::error::TryRecvError::Empty) => return None,
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.done = Some(Err(self.disconnected()));
                }
            }
        }
        self.done.clone()
    }

    /// Wait for completion with no deadline.
    pub async fn wait(mut self) -> Outcome {
        if let Some(outcome) = self.done.take() {
            return outcome;
        }
        match (&mut self.rx).await {
            Ok(outcome) => outcome,
            Err(_) => Err(self.disconnected()),
        }
    }

    /// Wait for completion, giving up after `deadline`.  The command itself
    /// is not cancelled.
    pub async fn wait_timeout(self, deadline: Duration) -> Outcome {
        let call = self.call.clone();
        match tokio::time::timeout(deadline, self.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcError::Timeout {
                call,
                after_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    fn disconnected(&self) -> RpcError {
        RpcError::Disconnected(format!("{} on {} dropped before completing", self.call, self.vehicle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_handle_resolves_immediately() {
        let mut handle = TaskHandle::ready("land", "drone_1", Ok(true));
        assert_eq!(handle.poll(), Some(Ok(true)));
        assert_eq!(handle.wait().await, Ok(true));
    }

    #[tokio::test]
    async fn pending_handle_polls_none_until_completed() {
        let (completer, mut handle) = TaskHandle::pending("moveToZ", "drone_1");
        assert_eq!(handle.poll(), None);
        completer.complete(Ok(false));
        assert_eq!(handle.poll(), Some(Ok(false)));
        assert_eq!(handle.wait().await, Ok(false));
    }

    #[tokio::test]
    async fn dropped_completer_is_disconnected() {
        let (completer, handle) = TaskHandle::pending("takeoff", "drone_2");
        drop(completer);
        assert!(matches!(handle.wait().await, Err(RpcError::Disconnected(_))));
    }

    #[tokio::test]
    async fn wait_timeout_reports_deadline() {
        let (_completer, handle) = TaskHandle::pending("moveToZ", "drone_3");
        let err = handle
            .wait_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RpcError::Timeout {
                call: "moveToZ".into(),
                after_ms: 20
            }
        );
    }

    #[tokio::test]
    async fn wait_timeout_returns_completion_before_deadline() {
        let (completer, handle) = TaskHandle::pending("land", "drone_1");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            completer.complete(Ok(true));
        });
        assert_eq!(handle.wait_timeout(Duration::from_secs(2)).await, Ok(true));
    }
}
