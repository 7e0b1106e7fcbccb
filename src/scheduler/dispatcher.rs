//! Polling dispatcher and its bounded worker pool

use super::inspector::Inspector;
use crate::error::Result;
use crate::proxy::models::Task;
use crate::storage::TaskStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Default pause between claim attempts
const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// Default ceiling on concurrent workers per batch
const DEFAULT_MAX_WORKERS: usize = 256;

/// Default time a claimed task stays reserved
const DEFAULT_LEASE_SECS: u64 = 600;

/// Default worst case for one task: probe timeout plus enrichment timeout
const DEFAULT_TASK_BUDGET_MS: u64 = 8_000;

/// Configuration for the dispatcher loop
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub max_workers: usize,
    /// How long a claimed task stays reserved
    pub lease: Duration,
    /// Longest a single task can take. Claims are sized so that a full batch
    /// finishes within the lease even if every task takes this long.
    pub task_budget: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_workers: DEFAULT_MAX_WORKERS,
            lease: Duration::from_secs(DEFAULT_LEASE_SECS),
            task_budget: Duration::from_millis(DEFAULT_TASK_BUDGET_MS),
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_task_budget(mut self, budget: Duration) -> Self {
        self.task_budget = budget;
        self
    }

    /// Most tasks one claim may take
    pub fn claim_limit(&self) -> usize {
        claim_limit(self.max_workers, self.lease, self.task_budget)
    }
}

/// Workers to spawn for a batch: one per task, capped at the ceiling.
pub fn worker_count(batch_len: usize, max_workers: usize) -> usize {
    batch_len.min(max_workers.max(1))
}

/// Tasks a pool of `max_workers` can finish within `lease` when each takes
/// up to `task_budget`. At least one round per worker is always allowed.
pub fn claim_limit(max_workers: usize, lease: Duration, task_budget: Duration) -> usize {
    let rounds = if task_budget.is_zero() {
        usize::MAX
    } else {
        usize::try_from(lease.as_millis() / task_budget.as_millis().max(1)).unwrap_or(usize::MAX)
    };
    max_workers.max(1).saturating_mul(rounds.max(1))
}

/// Counters for one completed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub claimed: usize,
    pub workers: usize,
    pub working: usize,
    pub failed: usize,
    pub write_errors: usize,
}

impl BatchReport {
    fn merge(&mut self, other: WorkerReport) {
        self.working += other.working;
        self.failed += other.failed;
        self.write_errors += other.write_errors;
    }
}

#[derive(Debug, Default)]
struct WorkerReport {
    working: usize,
    failed: usize,
    write_errors: usize,
}

/// Claims pending tasks and runs them on a bounded worker pool
pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    inspector: Arc<dyn Inspector>,
    config: SchedulerConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn TaskStore>,
        inspector: Arc<dyn Inspector>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            inspector,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Main loop. Polls until `shutdown` broadcasts `true` or its sender is
    /// dropped.
    ///
    /// Shutdown is only observed between batches: a batch that has been
    /// claimed always runs to completion, so no lease is left dangling.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_workers = self.config.max_workers,
            claim_limit = self.config.claim_limit(),
            "dispatcher started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.poll_once().await {
                Ok(None) => debug!("no pending tasks"),
                Ok(Some(report)) => info!(
                    claimed = report.claimed,
                    workers = report.workers,
                    working = report.working,
                    failed = report.failed,
                    write_errors = report.write_errors,
                    "batch complete"
                ),
                Err(e) => error!(error = %e, "claiming pending tasks failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("dispatcher stopped");
    }

    /// One claim-and-process cycle. `None` when nothing was pending.
    pub async fn poll_once(&self) -> Result<Option<BatchReport>> {
        let tasks = self
            .store
            .claim_pending(self.config.lease, self.config.claim_limit())
            .await?;
        if tasks.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.dispatch(tasks).await))
    }

    /// Run `tasks` to completion and return once every worker has exited.
    pub async fn dispatch(&self, tasks: Vec<Task>) -> BatchReport {
        let claimed = tasks.len();
        let workers = worker_count(claimed, self.config.max_workers);
        let mut report = BatchReport {
            claimed,
            workers,
            ..BatchReport::default()
        };
        if claimed == 0 {
            return report;
        }

        // Sized to the batch, so queueing never waits on a worker.
        let (tx, rx) = mpsc::channel(claimed);
        for task in tasks {
            if tx.send(task).await.is_err() {
                break;
            }
        }
        drop(tx);

        let rx = Arc::new(Mutex::new(rx));
        let mut pool = JoinSet::new();
        for id in 0..workers {
            pool.spawn(run_worker(
                id,
                Arc::clone(&rx),
                Arc::clone(&self.store),
                Arc::clone(&self.inspector),
            ));
        }

        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(worker_report) => report.merge(worker_report),
                Err(e) => warn!(error = %e, "worker task aborted"),
            }
        }

        report
    }
}

async fn run_worker(
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<Task>>>,
    store: Arc<dyn TaskStore>,
    inspector: Arc<dyn Inspector>,
) -> WorkerReport {
    let mut report = WorkerReport::default();

    loop {
        let next = queue.lock().await.recv().await;
        let Some(task) = next else {
            break;
        };

        let outcome = inspector.inspect(&task).await;
        if outcome.working {
            report.working += 1;
        } else {
            report.failed += 1;
        }

        if let Err(e) = store.record_outcome(&task, &outcome).await {
            report.write_errors += 1;
            error!(
                worker = id,
                probe_id = %task.probe_id,
                proxy = %task.address(),
                error = %e,
                "recording outcome failed"
            );
        }
    }

    report
}
