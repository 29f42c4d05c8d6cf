//! Periodic redelivery of persisted payloads.
//!
//! One background task owns a min-heap of due times, one entry per retry
//! store. Each store is drained at a fixed delay after its previous drain
//! finished, so two drains of the same store never overlap.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::store::{DrainReport, PersistError};

/// Longest accepted drain interval. Longer ones are clamped.
pub const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Something the scheduler can drain periodically.
#[async_trait]
pub trait RetryTarget: Send + Sync {
    /// Human-readable name used in logs.
    fn label(&self) -> String;

    /// Run one redelivery pass.
    async fn drain_once(&self) -> Result<DrainReport, PersistError>;
}

enum Command {
    Start {
        key: PathBuf,
        interval: Duration,
        target: Weak<dyn RetryTarget>,
    },
    Stop {
        key: PathBuf,
    },
    ActiveTasks(oneshot::Sender<usize>),
    Shutdown,
}

/// Handle to the shared retry timer.
///
/// Cloning is cheap; all clones talk to the same background task.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    tx: mpsc::UnboundedSender<Command>,
}

impl RetryScheduler {
    /// Spawn the timer task on the current runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = SchedulerRunner::new(rx);

        tokio::spawn(async move {
            runner.run().await;
        });

        Self { tx }
    }

    /// Start periodic draining for `key` unless it is already running.
    ///
    /// The first drain happens one `interval` from now. The task ends on its
    /// own once `target` has been dropped.
    pub fn start(&self, key: PathBuf, interval: Duration, target: Weak<dyn RetryTarget>) {
        if self
            .tx
            .send(Command::Start {
                key,
                interval,
                target,
            })
            .is_err()
        {
            warn!("retry scheduler is not running; start request dropped");
        }
    }

    /// Stop periodic draining for `key`. A drain already in progress finishes.
    pub fn stop(&self, key: PathBuf) {
        if self.tx.send(Command::Stop { key }).is_err() {
            debug!("retry scheduler is not running; stop request dropped");
        }
    }

    /// Number of registered periodic tasks.
    pub async fn active_tasks(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::ActiveTasks(reply)).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Stop the timer task and every periodic drain.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

struct Task {
    interval: Duration,
    target: Weak<dyn RetryTarget>,
    generation: u64,
}

/// Heap entry for the next drain of a store.
struct Due {
    at: Instant,
    key: PathBuf,
    generation: u64,
}

impl PartialEq for Due {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.generation == other.generation
    }
}

impl Eq for Due {}

impl PartialOrd for Due {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Due {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for min-heap (earliest first)
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

struct SchedulerRunner {
    rx: mpsc::UnboundedReceiver<Command>,
    queue: BinaryHeap<Due>,
    tasks: HashMap<PathBuf, Task>,
    next_generation: u64,
}

impl SchedulerRunner {
    fn new(rx: mpsc::UnboundedReceiver<Command>) -> Self {
        Self {
            rx,
            queue: BinaryHeap::new(),
            tasks: HashMap::new(),
            next_generation: 0,
        }
    }

    async fn run(mut self) {
        debug!("retry scheduler started");

        loop {
            let next = self.queue.peek().map(|due| due.at);

            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(Command::Start { key, interval, target }) => {
                        self.start(key, interval, target);
                    }
                    Some(Command::Stop { key }) => {
                        if self.tasks.remove(&key).is_some() {
                            info!(store = %key.display(), "retry task stopped");
                        }
                    }
                    Some(Command::ActiveTasks(reply)) => {
                        let _ = reply.send(self.tasks.len());
                    }
                    Some(Command::Shutdown) | None => break,
                },

                _ = wait_until(next) => {
                    self.fire_due().await;
                }
            }
        }

        info!(tasks = self.tasks.len(), "retry scheduler stopped");
    }

    fn start(&mut self, key: PathBuf, interval: Duration, target: Weak<dyn RetryTarget>) {
        if self.tasks.contains_key(&key) {
            debug!(store = %key.display(), "retry task already running");
            return;
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        if interval > MAX_RETRY_INTERVAL {
            warn!(
                store = %key.display(),
                max = %humantime::format_duration(MAX_RETRY_INTERVAL),
                "retry interval clamped"
            );
        }

        self.queue.push(Due {
            at: next_due(interval),
            key: key.clone(),
            generation,
        });
        info!(
            store = %key.display(),
            interval = %humantime::format_duration(interval),
            "retry task started"
        );
        self.tasks.insert(
            key,
            Task {
                interval,
                target,
                generation,
            },
        );
    }

    async fn fire_due(&mut self) {
        let now = Instant::now();

        while self.queue.peek().is_some_and(|due| due.at <= now) {
            let Some(due) = self.queue.pop() else {
                break;
            };

            // Entries left behind by a stop (or stop + restart) are stale.
            let Some(task) = self.tasks.get(&due.key) else {
                continue;
            };
            if task.generation != due.generation {
                continue;
            }

            let Some(target) = task.target.upgrade() else {
                debug!(store = %due.key.display(), "retry target dropped");
                self.tasks.remove(&due.key);
                continue;
            };
            let interval = task.interval;

            drain(target).await;

            // A stop may have arrived while draining.
            if self
                .tasks
                .get(&due.key)
                .is_some_and(|t| t.generation == due.generation)
            {
                self.queue.push(Due {
                    at: next_due(interval),
                    key: due.key,
                    generation: due.generation,
                });
            }
        }
    }
}

async fn drain(target: Arc<dyn RetryTarget>) {
    match target.drain_once().await {
        Ok(report) => {
            debug!(
                target = %target.label(),
                delivered = report.delivered,
                remaining = report.remaining,
                "retry pass complete"
            );
        }
        Err(e) => {
            warn!(target = %target.label(), error = %e, "retry pass failed");
        }
    }
}

async fn wait_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn next_due(interval: Duration) -> Instant {
    Instant::now() + interval.min(MAX_RETRY_INTERVAL)
}
