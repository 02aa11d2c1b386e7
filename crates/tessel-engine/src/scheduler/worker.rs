use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::queues::TaskQueues;
use super::{Disposition, EventTask, Scheduler, TaskRunner};
use crate::instance::Phase;

/// Added to the idle wait for every consecutive empty pass
const IDLE_STEP: Duration = Duration::from_millis(5);
const MAX_IDLE_WAIT: Duration = Duration::from_millis(50);
/// Back-off before a task whose instance was busy is tried again
pub(super) const RETRY_DELAY: Duration = Duration::from_millis(1);

impl<R: TaskRunner> Scheduler<R> {
    /// Start a worker if demand calls for one and the pool has room
    pub(super) fn maybe_spawn(self: &Arc<Self>, immediate: usize, deferred: usize) {
        if self.is_shut_down() {
            return;
        }
        let demand = (immediate as f64 + deferred as f64 / 2.0) * self.config.performance_factor;
        loop {
            let active = self.active.load(Ordering::Acquire);
            if active >= self.config.max_threads {
                return;
            }
            if active != 0 && active as f64 >= demand {
                return;
            }
            if self
                .active
                .compare_exchange(active, active + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.peak.fetch_max(active + 1, Ordering::Relaxed);
                self.spawn_worker();
                return;
            }
        }
    }

    /// Spawn a thread for a worker slot already counted in `active`
    fn spawn_worker(self: &Arc<Self>) {
        let n = self.next_worker.fetch_add(1, Ordering::Relaxed);
        let scheduler = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("tessel-worker-{}", n))
            .spawn(move || scheduler.worker_loop());
        match spawned {
            Ok(handle) => {
                let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
                workers.retain(|w| !w.is_finished());
                workers.push(handle);
            }
            Err(e) => {
                self.active.fetch_sub(1, Ordering::AcqRel);
                warn!(target: "scheduler", "Failed to spawn worker: {}", e);
            }
        }
    }

    fn worker_loop(self: Arc<Self>) {
        trace!(target: "scheduler", "Worker started ({} active)", self.active_workers());
        let mut idle_passes: u32 = 0;
        loop {
            if self.is_shut_down() {
                break;
            }
            let task = {
                let mut queues = self.lock_queues();
                let now = Instant::now();
                match queues.pop_ready(now) {
                    Some(task) => {
                        // Counted before the lock drops so the task is never invisible
                        self.busy.fetch_add(1, Ordering::AcqRel);
                        Some(task)
                    }
                    None => {
                        idle_passes = idle_passes.saturating_add(1);
                        if idle_passes >= self.config.idle_passes_before_exit && self.try_retire(&queues) {
                            trace!(target: "scheduler", "Worker retired after {} idle passes", idle_passes);
                            return;
                        }
                        let mut wait = (IDLE_STEP * idle_passes).min(MAX_IDLE_WAIT);
                        if let Some(next) = queues.next_wake() {
                            wait = wait.min(next.saturating_duration_since(now));
                        }
                        let _ = self
                            .wake
                            .wait_timeout(queues, wait)
                            .unwrap_or_else(|e| e.into_inner());
                        None
                    }
                }
            };
            if let Some(task) = task {
                idle_passes = 0;
                self.execute(task);
                self.busy.fetch_sub(1, Ordering::AcqRel);
            }
        }
        self.active.fetch_sub(1, Ordering::AcqRel);
    }

    /// Give up this worker's slot; called with the queues locked
    fn try_retire(&self, queues: &TaskQueues) -> bool {
        loop {
            let active = self.active.load(Ordering::Acquire);
            if active <= self.config.min_threads {
                return false;
            }
            // Somebody has to be awake when the next sleeper is due
            if active == 1 && queues.deferred_len() > 0 {
                return false;
            }
            if self
                .active
                .compare_exchange(active, active - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn execute(self: &Arc<Self>, task: EventTask) {
        let instance = Arc::clone(&task.instance);
        let ticket = task.ticket;
        {
            let mut control = instance.control();
            if control.ticket != ticket {
                drop(control);
                self.discard(&task);
                return;
            }
            if task.is_stale() {
                control.phase = Phase::Idle;
                let next = self.next_task(&instance, &mut control);
                drop(control);
                self.discard(&task);
                if let Some(next) = next {
                    self.enqueue(next);
                }
                return;
            }
            control.phase = Phase::Running;
        }

        let disposition = self.runner.run(task, self);
        self.executed.fetch_add(1, Ordering::Relaxed);

        match disposition {
            Disposition::Done => self.complete(&instance, ticket),
            Disposition::Suspended {
                continuation,
                wake_at,
                detected,
            } => self.sleep(&instance, ticket, continuation, wake_at, detected),
            Disposition::Retry(task) => {
                debug!(target: "scheduler", "Requeueing {} for {}", task.describe(), instance.item);
                self.requeue(task);
            }
        }
    }
}
