//! Runtime state of one script bound to one object

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use chrono::Utc;
use strum_macros::Display;
use tessel_codegen::EventKind;
use tessel_events::{AgentId, ItemId, ObjectId};

use crate::persistence::{SavedGlobal, StateSnapshot};
use crate::sandbox::ScriptHandle;
use crate::scheduler::Priority;
use crate::vm::{CompiledModule, Value};
use crate::world::{DetectParams, ScriptEvents};

/// Where an instance is in its event lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    /// Globals are being initialised or restored
    Loading,
    Idle,
    /// A task for the instance sits in a scheduler queue
    Queued,
    Running,
    /// Suspended at a delay-bearing call until its wake time
    Sleeping,
}

/// An event waiting in an instance's mailbox
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub event: EventKind,
    pub args: Vec<Value>,
    pub detected: Vec<DetectParams>,
    pub priority: Priority,
    /// Instance version when the event was posted
    pub version: u64,
}

/// Scheduling bookkeeping, guarded by a short-held lock
#[derive(Debug)]
pub struct ControlBlock {
    pub phase: Phase,
    pub mailbox: VecDeque<QueuedEvent>,
    /// Stamp of the one task allowed to be queued or running
    pub ticket: u64,
    pub pending_reset: bool,
    pub min_event_delay: Duration,
    pub last_accepted: Option<Instant>,
}

/// State guest code runs against; held for the length of one dispatch
#[derive(Debug)]
pub struct ExecState {
    pub globals: Vec<Value>,
    pub state: usize,
    pub time_base: Instant,
}

#[derive(Debug, Default)]
pub struct ScriptStats {
    pub executed: AtomicU64,
    pub stale: AtomicU64,
    pub faults: AtomicU64,
    pub throttled: AtomicU64,
    exec_nanos: AtomicU64,
}

impl ScriptStats {
    pub fn add_exec_time(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.exec_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Accumulated guest execution time in milliseconds
    pub fn score_ms(&self) -> f64 {
        self.exec_nanos.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    pub fn reset_score(&self) {
        self.exec_nanos.store(0, Ordering::Relaxed);
    }
}

pub struct ScriptInstance {
    pub object: ObjectId,
    pub item: ItemId,
    pub name: String,
    pub owner: AgentId,
    pub start_param: i32,
    handle: ScriptHandle,
    version: AtomicU64,
    running: AtomicBool,
    suspended: AtomicBool,
    ignore_new: AtomicBool,
    stopping: AtomicBool,
    /// Checked by the interpreter; set to cut a running handler short
    pub(crate) abort: AtomicBool,
    pub(crate) delete_requested: AtomicBool,
    /// Events handled in the current state, as [`ScriptEvents`] bits
    event_flags: AtomicU32,
    control: Mutex<ControlBlock>,
    exec: Mutex<ExecState>,
    /// Snapshots holding or waiting for `exec`
    snapshots: AtomicU32,
    pub stats: ScriptStats,
}

impl std::fmt::Debug for ScriptInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptInstance")
            .field("object", &self.object)
            .field("item", &self.item)
            .field("name", &self.name)
            .field("version", &self.version())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ScriptInstance {
    pub fn new(
        object: ObjectId,
        item: ItemId,
        name: impl Into<String>,
        owner: AgentId,
        start_param: i32,
        handle: ScriptHandle,
        min_event_delay: Duration,
    ) -> Self {
        Self {
            object,
            item,
            name: name.into(),
            owner,
            start_param,
            handle,
            version: AtomicU64::new(0),
            running: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
            ignore_new: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            abort: AtomicBool::new(false),
            delete_requested: AtomicBool::new(false),
            event_flags: AtomicU32::new(0),
            control: Mutex::new(ControlBlock {
                phase: Phase::Loading,
                mailbox: VecDeque::new(),
                ticket: 0,
                pending_reset: false,
                min_event_delay,
                last_accepted: None,
            }),
            exec: Mutex::new(ExecState {
                globals: Vec::new(),
                state: 0,
                time_base: Instant::now(),
            }),
            snapshots: AtomicU32::new(0),
            stats: ScriptStats::default(),
        }
    }

    pub fn handle(&self) -> &ScriptHandle {
        &self.handle
    }

    pub fn module(&self) -> &Arc<CompiledModule> {
        self.handle.module()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Invalidate every task stamped with an earlier version
    pub fn bump_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn control(&self) -> MutexGuard<'_, ControlBlock> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn exec(&self) -> MutexGuard<'_, ExecState> {
        self.exec.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The execution lock, or `None` while another worker holds it
    pub fn try_exec(&self) -> Option<MutexGuard<'_, ExecState>> {
        match self.exec.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// A snapshot holds or is waiting for the execution lock
    pub fn is_snapshotting(&self) -> bool {
        self.snapshots.load(Ordering::Acquire) > 0
    }

    pub fn phase(&self) -> Phase {
        self.control().phase
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    pub fn set_suspended(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::Release);
    }

    pub fn set_ignore_new(&self, ignore: bool) {
        self.ignore_new.store(ignore, Ordering::Release);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Mark the instance as on its way out; returns false if it already was
    pub fn begin_stop(&self) -> bool {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.set_ignore_new(true);
        self.set_running(false);
        self.abort.store(true, Ordering::Release);
        self.control().mailbox.clear();
        true
    }

    /// Whether newly posted events should be queued
    pub fn accepts_events(&self) -> bool {
        self.is_running()
            && !self.ignore_new.load(Ordering::Acquire)
            && !self.stopping.load(Ordering::Acquire)
    }

    pub fn event_flags(&self) -> ScriptEvents {
        ScriptEvents::from_bits_truncate(self.event_flags.load(Ordering::Acquire))
    }

    pub fn set_event_flags(&self, flags: ScriptEvents) {
        self.event_flags.store(flags.bits(), Ordering::Release);
    }

    pub fn min_event_delay(&self) -> Duration {
        self.control().min_event_delay
    }

    pub fn state_name(&self) -> String {
        let state = self.exec().state;
        self.module().state_name(state).to_string()
    }

    /// Capture globals and state; blocks until no handler is running
    pub fn snapshot(&self, timer_interval: Option<Duration>) -> StateSnapshot {
        let min_event_delay = self.min_event_delay();
        self.snapshots.fetch_add(1, Ordering::AcqRel);
        let exec = self.exec();
        let module = self.module();
        let snapshot = StateSnapshot {
            item: self.item,
            module_hash: module.hash_hex(),
            state: module.state_name(exec.state).to_string(),
            min_event_delay_ms: u64::try_from(min_event_delay.as_millis()).unwrap_or(u64::MAX),
            timer_interval_ms: timer_interval
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            saved_at: Utc::now(),
            globals: module
                .globals
                .iter()
                .zip(&exec.globals)
                .map(|((name, _), value)| SavedGlobal {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
        };
        drop(exec);
        self.snapshots.fetch_sub(1, Ordering::AcqRel);
        snapshot
    }

    /// Apply a snapshot taken from the same module; false if it does not fit
    pub fn restore(&self, snapshot: &StateSnapshot) -> bool {
        let module = self.module();
        if snapshot.module_hash != module.hash_hex() {
            return false;
        }
        let Some(state) = module.state_index(&snapshot.state) else {
            return false;
        };
        let mut globals: Vec<Value> = module
            .globals
            .iter()
            .map(|(_, ty)| Value::default_for(*ty))
            .collect();
        for saved in &snapshot.globals {
            if let Some(index) = module.global_index(&saved.name) {
                let ty = module.globals[index].1;
                globals[index] = if saved.value.value_type() == ty {
                    saved.value.clone()
                } else {
                    saved.value.cast(ty)
                };
            }
        }
        {
            let mut exec = self.exec();
            exec.globals = globals;
            exec.state = state;
        }
        self.control().min_event_delay = Duration::from_millis(snapshot.min_event_delay_ms);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::HostApi;
    use crate::config::SandboxConfig;
    use crate::sandbox::SandboxManager;
    use crate::testing::compile;

    const COUNTER: &str = r#"
integer count = 7;
string label = "x";

default
{
    state_entry() { count = count + 1; }
}

state busy
{
    state_entry() { }
}
"#;

    fn instance() -> ScriptInstance {
        let manager = SandboxManager::new(SandboxConfig::default());
        let handle = manager
            .load(compile(COUNTER), &HostApi::standard())
            .unwrap();
        ScriptInstance::new(
            ObjectId(1),
            ItemId(2),
            "counter",
            AgentId(3),
            0,
            handle,
            Duration::ZERO,
        )
    }

    #[test]
    fn test_begin_stop_only_once() {
        let script = instance();
        script.set_running(true);
        assert!(script.accepts_events());
        assert!(script.begin_stop());
        assert!(!script.begin_stop());
        assert!(!script.accepts_events());
        assert!(script.abort.load(Ordering::Acquire));
    }

    #[test]
    fn test_try_exec_is_exclusive() {
        let script = instance();
        let held = script.try_exec();
        assert!(held.is_some());
        assert!(script.try_exec().is_none());
        drop(held);
        assert!(script.try_exec().is_some());
    }

    #[test]
    fn test_snapshot_restores_into_same_module() {
        let script = instance();
        {
            let mut exec = script.exec();
            exec.globals = vec![Value::Integer(11), Value::String("y".into())];
            exec.state = 1;
        }
        let snapshot = script.snapshot(Some(Duration::from_millis(500)));
        assert_eq!(snapshot.state, "busy");
        assert_eq!(snapshot.timer_interval_ms, Some(500));

        let fresh = instance();
        assert!(fresh.restore(&snapshot));
        assert_eq!(fresh.exec().globals[0], Value::Integer(11));
        assert_eq!(fresh.state_name(), "busy");

        let mut foreign = snapshot.clone();
        foreign.module_hash = "0".into();
        assert!(!fresh.restore(&foreign));
    }

    #[test]
    fn test_snapshot_waiting_on_exec_is_visible() {
        let script = instance();
        assert!(!script.is_snapshotting());
        let exec = script.exec();
        std::thread::scope(|s| {
            let saver = s.spawn(|| script.snapshot(None));
            let deadline = Instant::now() + Duration::from_secs(2);
            while !script.is_snapshotting() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            assert!(script.is_snapshotting());
            assert!(script.try_exec().is_none());
            drop(exec);
            assert_eq!(saver.join().unwrap().state, "default");
        });
        assert!(!script.is_snapshotting());
    }

    #[test]
    fn test_bump_version_is_monotonic() {
        let script = instance();
        assert_eq!(script.version(), 0);
        assert_eq!(script.bump_version(), 1);
        assert_eq!(script.bump_version(), 2);
        assert_eq!(script.version(), 2);
    }
}
