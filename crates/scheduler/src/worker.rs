use std::collections::VecDeque;

use sureroute_protocol::{PerClass, Priority, SchedulerSnapshot};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{DEFAULT_LIMITS, HIGH_ACTIVE_LIMITS, Slot};

pub(crate) enum Command {
    Acquire {
        priority: Priority,
        reply: oneshot::Sender<Slot>,
    },
    SetHighActive {
        active: bool,
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<SchedulerSnapshot>,
    },
}

struct State {
    limits: PerClass<usize>,
    usage: PerClass<usize>,
    waiting: PerClass<VecDeque<oneshot::Sender<Slot>>>,
    high_active: bool,
    release_tx: mpsc::UnboundedSender<Priority>,
}

pub(crate) async fn run(mut commands: mpsc::Receiver<Command>, cancel: CancellationToken) {
    let (release_tx, mut releases) = mpsc::unbounded_channel();
    let mut state = State {
        limits: DEFAULT_LIMITS,
        usage: PerClass::default(),
        waiting: PerClass::default(),
        high_active: false,
        release_tx,
    };

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            // Releases first, so capacity freed before a command is visible to it.
            Some(priority) = releases.recv() => state.release(priority),
            cmd = commands.recv() => match cmd {
                Some(cmd) => state.handle(cmd),
                None => break,
            },
        }
    }

    // Dropping the queued reply senders wakes every waiter with `Stopped`.
    tracing::debug!("scheduler worker stopped");
}

impl State {
    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Acquire { priority, reply } => {
                let queue = self.waiting.get_mut(priority);
                queue.retain(|w| !w.is_closed());
                queue.push_back(reply);
                self.drain(priority);
            }
            Command::SetHighActive { active, reply } => {
                if active != self.high_active {
                    self.high_active = active;
                    self.limits = if active {
                        HIGH_ACTIVE_LIMITS
                    } else {
                        DEFAULT_LIMITS
                    };
                    tracing::info!(
                        high_active = active,
                        medium = self.limits.medium,
                        low = self.limits.low,
                        "scheduler limits changed"
                    );
                }
                for p in Priority::ALL {
                    self.drain(p);
                }
                let _ = reply.send(());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn release(&mut self, priority: Priority) {
        let used = self.usage.get_mut(priority);
        *used = used.saturating_sub(1);
        self.drain(priority);
    }

    /// Grants queued waiters of `priority` while the class has room.
    fn drain(&mut self, priority: Priority) {
        let limit = *self.limits.get(priority);
        while *self.usage.get(priority) < limit {
            let Some(reply) = self.waiting.get_mut(priority).pop_front() else {
                break;
            };
            if reply.is_closed() {
                continue;
            }
            *self.usage.get_mut(priority) += 1;
            let slot = Slot {
                priority,
                release: Some(self.release_tx.clone()),
            };
            if let Err(slot) = reply.send(slot) {
                // Waiter left between the check and the grant.
                slot.defuse();
                *self.usage.get_mut(priority) -= 1;
            }
        }
    }

    fn snapshot(&mut self) -> SchedulerSnapshot {
        let mut waiting = PerClass::default();
        for p in Priority::ALL {
            let queue = self.waiting.get_mut(p);
            queue.retain(|w| !w.is_closed());
            *waiting.get_mut(p) = queue.len();
        }
        SchedulerSnapshot {
            limits: self.limits,
            usage: self.usage,
            waiting,
            high_active: self.high_active,
        }
    }
}
