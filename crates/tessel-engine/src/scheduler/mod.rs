//! Event scheduling
//!
//! Posted events wait in a per-instance mailbox. At most one task per
//! instance is ever queued or running; it carries a ticket, and the next
//! task is only released once the previous one's outcome is recorded. Ready
//! tasks sit in one FIFO per [`Priority`], suspended handlers in a deferred
//! queue ordered by wake time. Workers are spawned on demand up to
//! `max_threads` and retire after a run of empty passes.

mod command_pass;
mod load_queue;
mod queues;
mod timer;
mod worker;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Instant;

use strum_macros::Display;
use tessel_codegen::EventKind;
use tracing::{debug, trace, warn};

pub use command_pass::{CommandPass, CommandPlugin};
pub use load_queue::{LoadHandler, LoadQueue, LoadRequest};
pub use timer::TimerPlugin;

use crate::config::EngineConfig;
use crate::error::ScriptFault;
use crate::instance::{ControlBlock, Phase, QueuedEvent, ScriptInstance};
use crate::vm::{Continuation, Value};
use crate::world::DetectParams;
use queues::TaskQueues;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub const COUNT: usize = 3;

    fn lane(self) -> usize {
        self as usize
    }
}

/// Events delivered even when their version stamp is out of date
pub fn crosses_versions(event: EventKind) -> bool {
    matches!(event, EventKind::Changed | EventKind::Attach | EventKind::OnRez)
}

/// Events the minimum event delay never throttles
pub fn ignores_min_delay(event: EventKind) -> bool {
    matches!(
        event,
        EventKind::StateEntry | EventKind::StateExit | EventKind::OnRez | EventKind::Timer
    )
}

/// Drop mailbox entries invalidated by a version bump
pub(crate) fn discard_stale(mailbox: &mut VecDeque<QueuedEvent>) {
    mailbox.retain(|e| crosses_versions(e.event));
}

#[derive(Debug)]
pub enum TaskKind {
    Event(QueuedEvent),
    /// Continue a handler suspended at a delay-bearing call
    Resume {
        continuation: Continuation,
        detected: Vec<DetectParams>,
    },
    /// Re-initialise globals and re-enter the default state
    Reset,
}

/// One unit of scheduling work
#[derive(Debug)]
pub struct EventTask {
    pub instance: Arc<ScriptInstance>,
    pub kind: TaskKind,
    pub version: u64,
    pub ticket: u64,
    pub priority: Priority,
}

impl EventTask {
    pub fn is_stale(&self) -> bool {
        if self.version == self.instance.version() {
            return false;
        }
        !matches!(&self.kind, TaskKind::Event(e) if crosses_versions(e.event))
    }

    pub fn describe(&self) -> &'static str {
        match &self.kind {
            TaskKind::Event(e) => e.event.name(),
            TaskKind::Resume { .. } => "resume",
            TaskKind::Reset => "reset",
        }
    }
}

/// What a runner reports back after executing a task
#[derive(Debug)]
pub enum Disposition {
    Done,
    Suspended {
        continuation: Continuation,
        wake_at: Instant,
        detected: Vec<DetectParams>,
    },
    /// The task could not run now; queue it again
    Retry(EventTask),
}

/// Executes tasks on behalf of the scheduler
pub trait TaskRunner: Send + Sync + Sized + 'static {
    fn run(&self, task: EventTask, scheduler: &Arc<Scheduler<Self>>) -> Disposition;

    /// Called for tasks dropped without running
    fn discarded(&self, _task: &EventTask) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    Queued,
    /// The instance is stopped, stopping or not accepting new events
    Ignored,
    /// The instance's mailbox is at capacity
    Full,
    /// Dropped by the instance's minimum event delay
    Throttled,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_threads: usize,
    pub min_threads: usize,
    pub idle_passes_before_exit: u32,
    pub performance_factor: f64,
    pub max_queued_events: usize,
}

impl From<&EngineConfig> for SchedulerConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_threads: config.max_threads.max(1),
            min_threads: config.min_threads.min(config.max_threads),
            idle_passes_before_exit: config.idle_passes_before_exit.max(1),
            performance_factor: config.performance_factor,
            max_queued_events: config.max_queued_events.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SchedulerStats {
    pub active_workers: usize,
    pub peak_workers: usize,
    pub busy_workers: usize,
    pub immediate: usize,
    pub deferred: usize,
    pub executed: u64,
    pub stale: u64,
    pub throttled: u64,
}

pub struct Scheduler<R: TaskRunner> {
    runner: R,
    config: SchedulerConfig,
    queues: Mutex<TaskQueues>,
    wake: Condvar,
    active: AtomicUsize,
    peak: AtomicUsize,
    busy: AtomicUsize,
    executed: AtomicU64,
    stale: AtomicU64,
    throttled: AtomicU64,
    next_ticket: AtomicU64,
    next_worker: AtomicUsize,
    shutting_down: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<R: TaskRunner> Scheduler<R> {
    pub fn new(runner: R, config: SchedulerConfig) -> Arc<Self> {
        debug!(
            target: "scheduler",
            "Scheduler: {}..{} workers, performance factor {}",
            config.min_threads,
            config.max_threads,
            config.performance_factor
        );
        Arc::new(Self {
            runner,
            config,
            queues: Mutex::new(TaskQueues::default()),
            wake: Condvar::new(),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            executed: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            next_ticket: AtomicU64::new(1),
            next_worker: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn lock_queues(&self) -> MutexGuard<'_, TaskQueues> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn new_ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue an event for an instance
    ///
    /// Returns `Err(ScriptFault::MinDelay)` when the instance's minimum event
    /// delay has not elapsed since the last accepted event.
    pub fn post(
        self: &Arc<Self>,
        instance: &Arc<ScriptInstance>,
        event: EventKind,
        args: Vec<Value>,
        detected: Vec<DetectParams>,
        priority: Priority,
    ) -> Result<PostOutcome, ScriptFault> {
        if !instance.accepts_events() {
            trace!(target: "scheduler", "{} ignored {}", instance.item, event.name());
            return Ok(PostOutcome::Ignored);
        }
        let mut control = instance.control();

        if !ignores_min_delay(event) {
            let now = Instant::now();
            if !control.min_event_delay.is_zero() {
                if let Some(last) = control.last_accepted {
                    if now.duration_since(last) < control.min_event_delay {
                        drop(control);
                        instance.stats.throttled.fetch_add(1, Ordering::Relaxed);
                        self.throttled.fetch_add(1, Ordering::Relaxed);
                        return Err(ScriptFault::MinDelay);
                    }
                }
            }
            control.last_accepted = Some(now);
        }

        if control.mailbox.len() >= self.config.max_queued_events {
            debug!(
                target: "scheduler",
                "Mailbox of {} is full, dropping {}",
                instance.item,
                event.name()
            );
            return Ok(PostOutcome::Full);
        }

        control.mailbox.push_back(QueuedEvent {
            event,
            args,
            detected,
            priority,
            version: instance.version(),
        });
        let next = if control.phase == Phase::Idle {
            self.next_task(instance, &mut control)
        } else {
            None
        };
        drop(control);
        if let Some(task) = next {
            self.enqueue(task);
        }
        Ok(PostOutcome::Queued)
    }

    /// Pick the instance's next task, stamping a fresh ticket
    ///
    /// Must be called with the control block locked while no other task for
    /// the instance is queued or running.
    fn next_task(
        &self,
        instance: &Arc<ScriptInstance>,
        control: &mut ControlBlock,
    ) -> Option<EventTask> {
        if control.pending_reset {
            control.pending_reset = false;
            control.ticket = self.new_ticket();
            control.phase = Phase::Queued;
            return Some(EventTask {
                instance: Arc::clone(instance),
                kind: TaskKind::Reset,
                version: instance.version(),
                ticket: control.ticket,
                priority: Priority::High,
            });
        }
        if !instance.is_running() || instance.is_suspended() {
            control.phase = Phase::Idle;
            return None;
        }
        match control.mailbox.pop_front() {
            Some(event) => {
                control.ticket = self.new_ticket();
                control.phase = Phase::Queued;
                Some(EventTask {
                    instance: Arc::clone(instance),
                    version: event.version,
                    priority: event.priority,
                    ticket: control.ticket,
                    kind: TaskKind::Event(event),
                })
            }
            None => {
                control.phase = Phase::Idle;
                None
            }
        }
    }

    /// Release the next task of an idle instance, if it has one
    pub fn pump(self: &Arc<Self>, instance: &Arc<ScriptInstance>) {
        let mut control = instance.control();
        if control.phase != Phase::Idle {
            return;
        }
        let next = self.next_task(instance, &mut control);
        drop(control);
        if let Some(task) = next {
            self.enqueue(task);
        }
    }

    /// Move a freshly loaded instance out of `Loading` and start delivery
    pub fn activate(self: &Arc<Self>, instance: &Arc<ScriptInstance>) {
        let mut control = instance.control();
        if control.phase != Phase::Loading {
            return;
        }
        control.phase = Phase::Idle;
        let next = self.next_task(instance, &mut control);
        drop(control);
        if let Some(task) = next {
            self.enqueue(task);
        }
    }

    /// Invalidate queued work and re-initialise the instance
    ///
    /// A running handler is aborted and the reset follows once it returns.
    pub fn request_reset(self: &Arc<Self>, instance: &Arc<ScriptInstance>) {
        let mut control = instance.control();
        instance.bump_version();
        discard_stale(&mut control.mailbox);
        match control.phase {
            Phase::Running | Phase::Loading => {
                control.pending_reset = true;
                if control.phase == Phase::Running {
                    instance.abort.store(true, Ordering::Release);
                }
                debug!(target: "scheduler", "Reset of {} deferred until it is idle", instance.item);
            }
            Phase::Idle | Phase::Queued | Phase::Sleeping => {
                // Re-ticketing orphans any queued or sleeping task
                control.pending_reset = true;
                let next = self.next_task(instance, &mut control);
                drop(control);
                if let Some(task) = next {
                    self.enqueue(task);
                }
            }
        }
    }

    /// Record that the task holding `ticket` completed
    fn complete(self: &Arc<Self>, instance: &Arc<ScriptInstance>, ticket: u64) {
        let mut control = instance.control();
        if control.ticket != ticket {
            return;
        }
        control.phase = Phase::Idle;
        let next = self.next_task(instance, &mut control);
        drop(control);
        if let Some(task) = next {
            self.enqueue(task);
        }
    }

    /// Park a suspended handler until `wake_at`
    fn sleep(
        self: &Arc<Self>,
        instance: &Arc<ScriptInstance>,
        ticket: u64,
        continuation: Continuation,
        wake_at: Instant,
        detected: Vec<DetectParams>,
    ) {
        let mut control = instance.control();
        if control.ticket != ticket {
            return;
        }
        if control.pending_reset || !instance.is_running() {
            control.phase = Phase::Idle;
            let next = self.next_task(instance, &mut control);
            drop(control);
            if let Some(task) = next {
                self.enqueue(task);
            }
            return;
        }
        control.phase = Phase::Sleeping;
        drop(control);
        let task = EventTask {
            instance: Arc::clone(instance),
            kind: TaskKind::Resume {
                continuation,
                detected,
            },
            version: instance.version(),
            ticket,
            priority: Priority::Normal,
        };
        self.enqueue_at(task, wake_at);
    }

    fn requeue(self: &Arc<Self>, task: EventTask) {
        {
            let mut control = task.instance.control();
            if control.ticket != task.ticket {
                return;
            }
            control.phase = Phase::Queued;
        }
        self.enqueue_at(task, Instant::now() + worker::RETRY_DELAY);
    }

    fn enqueue(self: &Arc<Self>, task: EventTask) {
        let (immediate, deferred) = {
            let mut queues = self.lock_queues();
            queues.push_immediate(task);
            (queues.immediate_len(), queues.deferred_len())
        };
        self.wake.notify_one();
        self.maybe_spawn(immediate, deferred);
    }

    fn enqueue_at(self: &Arc<Self>, task: EventTask, wake_at: Instant) {
        if wake_at <= Instant::now() {
            self.enqueue(task);
            return;
        }
        let (immediate, deferred) = {
            let mut queues = self.lock_queues();
            queues.push_deferred(task, wake_at);
            (queues.immediate_len(), queues.deferred_len())
        };
        self.wake.notify_one();
        self.maybe_spawn(immediate, deferred);
    }

    fn discard(&self, task: &EventTask) {
        trace!(
            target: "scheduler",
            "Discarding stale {} for {} (v{} != v{})",
            task.describe(),
            task.instance.item,
            task.version,
            task.instance.version()
        );
        self.stale.fetch_add(1, Ordering::Relaxed);
        task.instance.stats.stale.fetch_add(1, Ordering::Relaxed);
        self.runner.discarded(task);
    }

    pub fn stats(&self) -> SchedulerStats {
        let (immediate, deferred) = {
            let queues = self.lock_queues();
            (queues.immediate_len(), queues.deferred_len())
        };
        SchedulerStats {
            active_workers: self.active.load(Ordering::Acquire),
            peak_workers: self.peak.load(Ordering::Relaxed),
            busy_workers: self.busy.load(Ordering::Acquire),
            immediate,
            deferred,
            executed: self.executed.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
        }
    }

    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn peak_workers(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// No task is queued, sleeping or executing
    pub fn is_quiescent(&self) -> bool {
        self.lock_queues().is_empty() && self.busy.load(Ordering::Acquire) == 0
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Stop every worker after its current task and drop what is still queued
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.wake.notify_all();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        let current = std::thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!(target: "scheduler", "A worker panicked");
            }
        }
        let leftover = self.lock_queues().drain();
        if !leftover.is_empty() {
            debug!(target: "scheduler", "Dropped {} queued task(s) at shutdown", leftover.len());
        }
        for task in &leftover {
            self.runner.discarded(task);
        }
    }
}
