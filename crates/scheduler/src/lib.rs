//! Admission control for chunk uploads.
//!
//! Each priority class has a concurrency limit. An upload holds a [`Slot`]
//! of its class while it runs; when the class is full, callers queue in
//! arrival order. While any high-priority transfer is active the medium and
//! low limits shrink so high-priority traffic gets most of the link.
//!
//! All state lives in a worker task spawned by [`Scheduler::spawn`]; the
//! [`Scheduler`] handle only sends it commands.

mod worker;

use sureroute_protocol::{PerClass, Priority, SchedulerSnapshot};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use worker::Command;

/// Limits while no high-priority transfer is active.
pub const DEFAULT_LIMITS: PerClass<usize> = PerClass::new(6, 4, 2);

/// Limits while at least one high-priority transfer is active.
pub const HIGH_ACTIVE_LIMITS: PerClass<usize> = PerClass::new(6, 2, 1);

/// Capacity of the command queue feeding the worker.
const COMMAND_QUEUE: usize = 256;

/// Errors returned by the scheduler handle.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler stopped")]
    Stopped,
}

/// Handle to the admission-control worker. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Starts the worker on the current tokio runtime.
    ///
    /// The worker runs until `cancel` fires; after that every pending and
    /// future acquisition fails with [`SchedulerError::Stopped`].
    pub fn spawn(cancel: CancellationToken) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_QUEUE);
        tokio::spawn(worker::run(rx, cancel.clone()));
        tracing::debug!("scheduler worker started");
        Self { commands, cancel }
    }

    /// Waits for a slot in `priority`'s class.
    ///
    /// Dropping the returned future before it resolves gives up the place
    /// in the queue without consuming capacity.
    pub async fn acquire(&self, priority: Priority) -> Result<Slot, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Acquire { priority, reply }).await?;
        rx.await.map_err(|_| SchedulerError::Stopped)
    }

    /// Switches between [`DEFAULT_LIMITS`] and [`HIGH_ACTIVE_LIMITS`].
    ///
    /// Slots already granted are never revoked; a class whose limit shrank
    /// simply admits nobody until its usage falls below the new limit.
    pub async fn set_high_active(&self, active: bool) -> Result<(), SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SetHighActive { active, reply }).await?;
        rx.await.map_err(|_| SchedulerError::Stopped)
    }

    /// Current limits, usage and queue lengths.
    pub async fn snapshot(&self) -> Result<SchedulerSnapshot, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| SchedulerError::Stopped)
    }

    /// Stops the worker.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn send(&self, cmd: Command) -> Result<(), SchedulerError> {
        if self.cancel.is_cancelled() {
            return Err(SchedulerError::Stopped);
        }
        self.commands
            .send(cmd)
            .await
            .map_err(|_| SchedulerError::Stopped)
    }
}

/// A granted admission slot. Released back to its class on drop.
#[derive(Debug)]
pub struct Slot {
    priority: Priority,
    release: Option<mpsc::UnboundedSender<Priority>>,
}

impl Slot {
    /// Class the slot was granted from.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Drops the slot without notifying the worker.
    fn defuse(mut self) {
        self.release = None;
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(tx) = self.release.take() {
            // Worker gone means nothing to release into.
            let _ = tx.send(self.priority);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const SHORT: Duration = Duration::from_millis(50);

    fn spawn() -> Scheduler {
        Scheduler::spawn(CancellationToken::new())
    }

    #[tokio::test]
    async fn third_low_acquire_waits() {
        let s = spawn();
        let a = s.acquire(Priority::Low).await.unwrap();
        let _b = s.acquire(Priority::Low).await.unwrap();

        let s2 = s.clone();
        let mut third = tokio::spawn(async move { s2.acquire(Priority::Low).await });
        assert!(tokio::time::timeout(SHORT, &mut third).await.is_err());

        let snap = s.snapshot().await.unwrap();
        assert_eq!(snap.usage.low, 2);
        assert_eq!(snap.waiting.low, 1);

        drop(a);
        let slot = third.await.unwrap().unwrap();
        assert_eq!(slot.priority(), Priority::Low);
    }

    #[tokio::test]
    async fn classes_are_independent() {
        let s = spawn();
        let _l1 = s.acquire(Priority::Low).await.unwrap();
        let _l2 = s.acquire(Priority::Low).await.unwrap();
        let high = tokio::time::timeout(SHORT, s.acquire(Priority::High)).await;
        assert!(high.is_ok(), "full low class must not block high");
    }

    #[tokio::test]
    async fn waiters_served_in_arrival_order() {
        let s = spawn();
        let first = s.acquire(Priority::Low).await.unwrap();
        let _second = s.acquire(Priority::Low).await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let s = s.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let slot = s.acquire(Priority::Low).await.unwrap();
                order.lock().unwrap().push(i);
                drop(slot);
            }));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(first);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn high_active_toggles_limits() {
        let s = spawn();
        assert_eq!(s.snapshot().await.unwrap().limits, DEFAULT_LIMITS);

        s.set_high_active(true).await.unwrap();
        let snap = s.snapshot().await.unwrap();
        assert!(snap.high_active);
        assert_eq!(snap.limits, PerClass::new(6, 2, 1));

        s.set_high_active(false).await.unwrap();
        let snap = s.snapshot().await.unwrap();
        assert!(!snap.high_active);
        assert_eq!(snap.limits, PerClass::new(6, 4, 2));
    }

    #[tokio::test]
    async fn shrinking_limit_does_not_preempt() {
        let s = spawn();
        let mut held = Vec::new();
        for _ in 0..4 {
            held.push(s.acquire(Priority::Medium).await.unwrap());
        }
        s.set_high_active(true).await.unwrap();
        assert_eq!(s.snapshot().await.unwrap().usage.medium, 4);

        let s2 = s.clone();
        let mut waiter = tokio::spawn(async move { s2.acquire(Priority::Medium).await });

        // 4 -> 2 held: usage equals the new limit, still full.
        held.truncate(2);
        assert!(tokio::time::timeout(SHORT, &mut waiter).await.is_err());

        held.pop();
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn restoring_limits_drains_queue() {
        let s = spawn();
        s.set_high_active(true).await.unwrap();
        let _l = s.acquire(Priority::Low).await.unwrap();

        let s2 = s.clone();
        let mut waiter = tokio::spawn(async move { s2.acquire(Priority::Low).await });
        assert!(tokio::time::timeout(SHORT, &mut waiter).await.is_err());

        s.set_high_active(false).await.unwrap();
        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(s.snapshot().await.unwrap().usage.low, 2);
    }

    #[tokio::test]
    async fn abandoned_waiter_is_skipped() {
        let s = spawn();
        let first = s.acquire(Priority::Low).await.unwrap();
        let _second = s.acquire(Priority::Low).await.unwrap();

        // Gives up while queued.
        assert!(
            tokio::time::timeout(SHORT, s.acquire(Priority::Low))
                .await
                .is_err()
        );

        let s2 = s.clone();
        let next = tokio::spawn(async move { s2.acquire(Priority::Low).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        drop(first);
        let slot = next.await.unwrap().unwrap();
        let snap = s.snapshot().await.unwrap();
        assert_eq!(snap.usage.low, 2);
        assert_eq!(snap.waiting.low, 0);
        drop(slot);
    }

    #[tokio::test]
    async fn release_returns_capacity() {
        let s = spawn();
        let slot = s.acquire(Priority::High).await.unwrap();
        assert_eq!(s.snapshot().await.unwrap().usage.high, 1);
        drop(slot);
        assert_eq!(s.snapshot().await.unwrap().usage.high, 0);
    }

    #[tokio::test]
    async fn stop_fails_pending_and_future_acquires() {
        let cancel = CancellationToken::new();
        let s = Scheduler::spawn(cancel.clone());
        let _a = s.acquire(Priority::Low).await.unwrap();
        let _b = s.acquire(Priority::Low).await.unwrap();

        let s2 = s.clone();
        let pending = tokio::spawn(async move { s2.acquire(Priority::Low).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        s.stop();
        assert_eq!(pending.await.unwrap().unwrap_err(), SchedulerError::Stopped);
        assert!(cancel.is_cancelled());
        assert_eq!(
            s.acquire(Priority::High).await.unwrap_err(),
            SchedulerError::Stopped
        );
    }
}
