//! The engine façade
//!
//! [`Engine`] starts, stops, resets and updates scripts, funnels world
//! stimuli into the scheduler and exposes the query and administrative
//! surface. Structural changes go through the load queue; none of the
//! operations here wait for queues to drain.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tessel_codegen::EventKind;
use tessel_events::{
    AgentId, EngineNotification, ItemId, NotificationBus, NotificationEnvelope, NotificationSender,
    ObjectId, ScriptErrorKind,
};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::api::HostApi;
use crate::cache::{CompiledScript, ModuleCache};
use crate::config::{EngineConfig, SandboxMode};
use crate::error::{EngineError, EngineResult};
use crate::executor::Executor;
use crate::instance::ScriptInstance;
use crate::persistence::StatePersistence;
use crate::registry::ScriptRegistry;
use crate::sandbox::SandboxManager;
use crate::scheduler::{
    CommandPass, LoadQueue, LoadRequest, PostOutcome, Priority, Scheduler, TimerPlugin,
};
use crate::vm::Value;
use crate::world::{DetectParams, ScriptEvents, ScriptSource, SourceProvider, WorldHost};

/// How a script is brought up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartParams {
    /// Value handed to `on_rez` and `llGetStartParameter`
    pub start_param: i32,
    /// Queue `on_rez` after `state_entry`
    pub post_on_rez: bool,
    /// Restore a saved snapshot when one matches the module
    pub restore_state: bool,
    /// Overrides the owner recorded with the source
    pub owner: Option<AgentId>,
}

/// Which scripts a count covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptScope {
    All,
    Object(ObjectId),
    Owner(AgentId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptScore {
    pub item: ItemId,
    pub object: ObjectId,
    pub name: String,
    pub score_ms: f64,
}

/// Snapshot of engine counters for the stats dump
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStats {
    pub enabled: bool,
    pub scripts: usize,
    pub objects: usize,
    pub running: usize,
    pub suspended: usize,
    pub sandbox_mode: SandboxMode,
    pub domains: usize,
    pub domains_torn_down: u64,
    pub workers_active: usize,
    pub workers_peak: usize,
    pub workers_busy: usize,
    pub immediate_queued: usize,
    pub deferred_queued: usize,
    pub pending_loads: usize,
    pub executed: u64,
    pub stale: u64,
    pub throttled: u64,
    pub compiled_scripts: u64,
    pub cache_hits: u64,
    pub timers: usize,
    pub uptime: Duration,
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Engine:     {}", if self.enabled { "enabled" } else { "disabled" })?;
        writeln!(f, "Uptime:     {}s", self.uptime.as_secs())?;
        writeln!(
            f,
            "Scripts:    {} on {} object(s), {} running, {} suspended",
            self.scripts, self.objects, self.running, self.suspended
        )?;
        writeln!(
            f,
            "Sandbox:    {} mode, {} domain(s), {} torn down",
            self.sandbox_mode, self.domains, self.domains_torn_down
        )?;
        writeln!(
            f,
            "Workers:    {} active, {} busy, {} peak",
            self.workers_active, self.workers_busy, self.workers_peak
        )?;
        writeln!(
            f,
            "Queues:     {} immediate, {} deferred, {} load request(s)",
            self.immediate_queued, self.deferred_queued, self.pending_loads
        )?;
        writeln!(
            f,
            "Events:     {} executed, {} stale, {} throttled",
            self.executed, self.stale, self.throttled
        )?;
        writeln!(f, "Timers:     {}", self.timers)?;
        write!(
            f,
            "Compiled:   {} script(s), {} cache hit(s)",
            self.compiled_scripts, self.cache_hits
        )
    }
}

/// State shared by the façade, the executor and the load queue
pub(crate) struct EngineShared {
    pub config: EngineConfig,
    pub registry: ScriptRegistry,
    pub sandbox: Arc<SandboxManager>,
    pub cache: ModuleCache,
    pub world: Arc<dyn WorldHost>,
    pub sources: Option<Arc<dyn SourceProvider>>,
    pub store: Arc<dyn StatePersistence>,
    pub bus: NotificationBus,
    pub notifier: NotificationSender,
    pub timers: Arc<TimerPlugin>,
    pub commands: Arc<CommandPass>,
    pub loads: LoadQueue,
    pub enabled: AtomicBool,
    pub started_at: Instant,
}

impl EngineShared {
    pub fn api(&self) -> &HostApi {
        self.cache.api()
    }

    /// Stop an instance through the load queue; false if it was already stopping
    pub fn stop_instance(&self, instance: &Arc<ScriptInstance>) -> bool {
        if !instance.begin_stop() {
            return false;
        }
        debug!(target: "scripting", "Stopping {} ({})", instance.name, instance.item);
        if !self.loads.submit(LoadRequest::Stop {
            instance: Arc::clone(instance),
        }) {
            warn!(target: "scripting", "Load queue closed; {} was not torn down", instance.item);
        }
        true
    }

    /// Delete the instance's object once, however many of its scripts ask
    pub fn delete_object(&self, instance: &ScriptInstance) {
        let siblings = self.registry.on_object(instance.object);
        let mut already = instance.delete_requested.swap(true, Ordering::AcqRel);
        for sibling in &siblings {
            if !std::ptr::eq(Arc::as_ptr(sibling), instance) {
                already |= sibling.delete_requested.swap(true, Ordering::AcqRel);
            }
        }
        if already {
            debug!(target: "scripting", "Deletion of {} already requested", instance.object);
            return;
        }
        info!(
            target: "scripting",
            "{} ({}) deleted its object {}",
            instance.name,
            instance.item,
            instance.object
        );
        self.world.delete_object(instance.object);
        for sibling in siblings {
            self.stop_instance(&sibling);
        }
    }

    pub fn report_runtime_error(&self, instance: &ScriptInstance, line: u32, column: u32, message: &str) {
        instance.stats.faults.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "scripting",
            "Runtime error in {} ({}) at ({}, {}): {}",
            instance.name,
            instance.item,
            line,
            column,
            message
        );
        let text = format!(
            "Script '{}' run-time error at ({}, {}): {}",
            instance.name, line, column, message
        );
        self.world.notify_owner(instance.object, instance.owner, &text);
        self.notifier.publish(EngineNotification::ScriptError {
            object: instance.object,
            item: instance.item,
            owner: instance.owner,
            kind: ScriptErrorKind::Runtime,
            line,
            column,
            message: message.to_string(),
        });
    }

    /// Tell the object which events its scripts handle now
    pub fn refresh_object_flags(&self, object: ObjectId) {
        let Some(target) = self.world.find_object(object) else {
            return;
        };
        let flags = self
            .registry
            .on_object(object)
            .iter()
            .filter(|s| !s.is_stopping())
            .fold(ScriptEvents::empty(), |acc, s| acc | s.event_flags());
        target.set_script_event_flags(flags);
        target.schedule_update();
    }
}

pub struct Engine {
    pub(crate) shared: Arc<EngineShared>,
    pub(crate) scheduler: Arc<Scheduler<Executor>>,
    shut_down: AtomicBool,
}

impl Engine {
    pub(crate) fn from_parts(shared: Arc<EngineShared>, scheduler: Arc<Scheduler<Executor>>) -> Self {
        Self {
            shared,
            scheduler,
            shut_down: AtomicBool::new(false),
        }
    }

    fn ensure_enabled(&self) -> EngineResult<()> {
        if self.shut_down.load(Ordering::Acquire) {
            Err(EngineError::ShutDown)
        } else if self.shared.enabled.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EngineError::Disabled)
        }
    }

    /// Compile `source` without starting it
    pub fn compile_check(&self, source: &str) -> EngineResult<CompiledScript> {
        self.shared.cache.compile(source)
    }

    /// Compile and load a script and queue its initialisation
    ///
    /// Events posted to the item from here on are held until `state_entry`
    /// has been delivered.
    pub fn start(&self, source: ScriptSource, params: StartParams) -> EngineResult<ItemId> {
        self.ensure_enabled()?;
        if self.live(source.item).is_ok() {
            return Err(EngineError::AlreadyRunning(source.item));
        }
        let owner = params.owner.unwrap_or(source.owner);
        let instance = self.instantiate(&source, params.start_param, owner)?;
        instance.set_running(true);
        match self.shared.registry.insert_unless_live(Arc::clone(&instance)) {
            Ok(Some(previous)) => self.hand_over(previous, instance, params)?,
            Ok(None) => {
                let request = LoadRequest::Start {
                    instance: Arc::clone(&instance),
                    params,
                };
                self.submit_load(&instance, request)?;
            }
            Err(_) => {
                // Lost a race with another start for the same item
                instance.set_running(false);
                self.shared.sandbox.release(instance.handle());
                return Err(EngineError::AlreadyRunning(source.item));
            }
        }
        Ok(source.item)
    }

    fn instantiate(
        &self,
        source: &ScriptSource,
        start_param: i32,
        owner: AgentId,
    ) -> EngineResult<Arc<ScriptInstance>> {
        let compiled = self
            .shared
            .cache
            .compile(&source.source)
            .inspect_err(|e| self.report_start_failure(source, owner, e))?;
        for warning in &compiled.warnings {
            warn!(target: "codegen", "{} ({}): {}", source.name, source.item, warning);
        }
        let handle = self
            .shared
            .sandbox
            .load(Arc::clone(&compiled.module), self.shared.api())
            .map_err(EngineError::from)
            .inspect_err(|e| self.report_start_failure(source, owner, e))?;
        Ok(Arc::new(ScriptInstance::new(
            source.object,
            source.item,
            source.name.clone(),
            owner,
            start_param,
            handle,
            self.shared.config.default_min_event_delay(),
        )))
    }

    fn report_start_failure(&self, source: &ScriptSource, owner: AgentId, error: &EngineError) {
        let (kind, line, column, message) = match error {
            EngineError::Compile(e) => (ScriptErrorKind::Compile, e.line, e.column, e.message.clone()),
            other => (ScriptErrorKind::Load, 0, 0, other.to_string()),
        };
        warn!(
            target: "scripting",
            "Failed to start {} ({}): {}",
            source.name,
            source.item,
            error
        );
        self.shared.notifier.publish(EngineNotification::ScriptError {
            object: source.object,
            item: source.item,
            owner,
            kind,
            line,
            column,
            message,
        });
    }

    /// Swap `old` for `new` under the same item
    fn replace(
        &self,
        old: Arc<ScriptInstance>,
        new: Arc<ScriptInstance>,
        params: StartParams,
    ) -> EngineResult<()> {
        new.set_running(true);
        self.shared.registry.insert(Arc::clone(&new));
        self.hand_over(old, new, params)
    }

    /// Queue the load of `new`, which is already registered in place of `old`
    fn hand_over(
        &self,
        old: Arc<ScriptInstance>,
        new: Arc<ScriptInstance>,
        params: StartParams,
    ) -> EngineResult<()> {
        if old.begin_stop() {
            let request = LoadRequest::Reupload {
                old: Arc::clone(&old),
                new: Arc::clone(&new),
                params,
            };
            self.submit_load(&new, request)
                .inspect_err(|_| self.shared.sandbox.release(old.handle()))
        } else {
            // Already stopping; its own stop request tears it down
            let request = LoadRequest::Start {
                instance: Arc::clone(&new),
                params,
            };
            self.submit_load(&new, request)
        }
    }

    /// Queue a load for `instance`, undoing its registration once the queue is closed
    fn submit_load(&self, instance: &Arc<ScriptInstance>, request: LoadRequest) -> EngineResult<()> {
        if self.shared.loads.submit(request) {
            return Ok(());
        }
        warn!(target: "scripting", "Load queue closed; {} was not started", instance.item);
        instance.set_running(false);
        self.shared.registry.remove_exact(instance);
        self.shared.sandbox.release(instance.handle());
        Err(EngineError::ShutDown)
    }

    /// Stop a script; later calls for the same item do nothing
    pub fn stop(&self, item: ItemId) -> bool {
        match self.shared.registry.get(item) {
            Some(instance) => self.shared.stop_instance(&instance),
            None => false,
        }
    }

    fn live(&self, item: ItemId) -> EngineResult<Arc<ScriptInstance>> {
        self.shared
            .registry
            .get(item)
            .filter(|s| !s.is_stopping())
            .ok_or(EngineError::NotFound(item))
    }

    /// Discard queued events and globals and re-enter the default state
    pub fn reset(&self, item: ItemId) -> EngineResult<()> {
        let instance = self.live(item)?;
        self.scheduler.request_reset(&instance);
        Ok(())
    }

    /// Recompile a running script from new source and swap it in
    pub fn update(&self, item: ItemId, source: &str) -> EngineResult<()> {
        self.ensure_enabled()?;
        let old = self.live(item)?;
        let script = ScriptSource {
            object: old.object,
            item,
            name: old.name.clone(),
            owner: old.owner,
            source: source.to_string(),
        };
        let new = self.instantiate(&script, old.start_param, old.owner)?;
        let params = StartParams {
            start_param: old.start_param,
            ..StartParams::default()
        };
        self.replace(old, new, params)
    }

    /// Hold new event deliveries; a handler already running finishes
    pub fn suspend(&self, item: ItemId) -> EngineResult<()> {
        self.live(item)?.set_suspended(true);
        Ok(())
    }

    pub fn resume(&self, item: ItemId) -> EngineResult<()> {
        let instance = self.live(item)?;
        instance.set_suspended(false);
        self.scheduler.pump(&instance);
        Ok(())
    }

    /// Deliver a named event to one script
    pub fn post_event(
        &self,
        item: ItemId,
        event: &str,
        args: Vec<Value>,
        detected: Vec<DetectParams>,
        priority: Priority,
    ) -> EngineResult<PostOutcome> {
        self.ensure_enabled()?;
        let kind = EventKind::from_name(event).ok_or_else(|| EngineError::UnknownEvent(event.to_string()))?;
        let args = coerce_args(kind, args)?;
        let instance = self.shared.registry.get(item).ok_or(EngineError::NotFound(item))?;
        Ok(self.post_to(&instance, kind, args, detected, priority))
    }

    /// Deliver a named event to every script on an object; returns how many queued it
    pub fn post_object_event(
        &self,
        object: ObjectId,
        event: &str,
        args: Vec<Value>,
        detected: Vec<DetectParams>,
    ) -> EngineResult<usize> {
        self.ensure_enabled()?;
        let kind = EventKind::from_name(event).ok_or_else(|| EngineError::UnknownEvent(event.to_string()))?;
        let args = coerce_args(kind, args)?;
        Ok(self
            .shared
            .registry
            .on_object(object)
            .iter()
            .map(|s| self.post_to(s, kind, args.clone(), detected.clone(), Priority::Normal))
            .filter(|outcome| *outcome == PostOutcome::Queued)
            .count())
    }

    fn post_to(
        &self,
        instance: &Arc<ScriptInstance>,
        event: EventKind,
        args: Vec<Value>,
        detected: Vec<DetectParams>,
        priority: Priority,
    ) -> PostOutcome {
        match self.scheduler.post(instance, event, args, detected, priority) {
            Ok(outcome) => outcome,
            Err(fault) => {
                trace!(target: "scheduler", "{} dropped {}: {}", instance.item, event.name(), fault);
                PostOutcome::Throttled
            }
        }
    }

    /// The owning object went away; stop every script on it
    pub fn remove_object(&self, object: ObjectId) -> usize {
        self.shared
            .registry
            .on_object(object)
            .iter()
            .filter(|s| self.shared.stop_instance(s))
            .count()
    }

    pub fn is_running(&self, item: ItemId) -> bool {
        self.shared
            .registry
            .get(item)
            .is_some_and(|s| s.is_running())
    }

    fn in_scope(&self, scope: ScriptScope) -> Vec<Arc<ScriptInstance>> {
        match scope {
            ScriptScope::All => self.shared.registry.all(),
            ScriptScope::Object(object) => self.shared.registry.on_object(object),
            ScriptScope::Owner(owner) => self.shared.registry.owned_by(owner),
        }
    }

    /// Scripts in scope that are running and not suspended
    pub fn active_script_count(&self, scope: ScriptScope) -> usize {
        self.in_scope(scope)
            .iter()
            .filter(|s| s.is_running() && !s.is_suspended())
            .count()
    }

    pub fn total_script_count(&self, scope: ScriptScope) -> usize {
        self.in_scope(scope).len()
    }

    /// Milliseconds of guest execution since start or the last score reset
    pub fn script_execution_score(&self, item: ItemId) -> Option<f64> {
        self.shared.registry.get(item).map(|s| s.stats.score_ms())
    }

    pub fn top_scripts(&self, n: usize) -> Vec<ScriptScore> {
        let mut scores: Vec<ScriptScore> = self
            .shared
            .registry
            .all()
            .iter()
            .map(|s| ScriptScore {
                item: s.item,
                object: s.object,
                name: s.name.clone(),
                score_ms: s.stats.score_ms(),
            })
            .collect();
        scores.sort_by(|a, b| b.score_ms.total_cmp(&a.score_ms).then(a.item.cmp(&b.item)));
        scores.truncate(n);
        scores
    }

    pub fn reset_scores(&self) {
        for script in self.shared.registry.all() {
            script.stats.reset_score();
        }
    }

    /// Recompile every script the source provider knows and restart it
    pub fn restart_all(&self) -> usize {
        let Some(sources) = self.shared.sources.clone() else {
            warn!(target: "scripting", "Restart requested but no source provider is configured");
            return 0;
        };
        let mut restarted = 0;
        for source in sources.all_sources() {
            let result = match self.live(source.item) {
                Ok(old) => self
                    .instantiate(&source, old.start_param, old.owner)
                    .and_then(|new| {
                        let params = StartParams {
                            start_param: old.start_param,
                            ..StartParams::default()
                        };
                        self.replace(old, new, params)
                    }),
                Err(_) => self
                    .start(source.clone(), StartParams::default())
                    .map(|_| ()),
            };
            match result {
                Ok(()) => restarted += 1,
                Err(e) => warn!(target: "scripting", "Restart of {} failed: {}", source.name, e),
            }
        }
        info!(target: "scripting", "Restarted {} script(s)", restarted);
        restarted
    }

    pub fn stop_all(&self) -> usize {
        let stopped = self
            .shared
            .registry
            .all()
            .iter()
            .filter(|s| self.shared.stop_instance(s))
            .count();
        info!(target: "scripting", "Stopping {} script(s)", stopped);
        stopped
    }

    pub fn stats(&self) -> EngineStats {
        let scripts = self.shared.registry.all();
        let scheduler = self.scheduler.stats();
        EngineStats {
            enabled: self.is_enabled(),
            scripts: scripts.len(),
            objects: self.shared.registry.object_count(),
            running: scripts.iter().filter(|s| s.is_running()).count(),
            suspended: scripts.iter().filter(|s| s.is_suspended()).count(),
            sandbox_mode: self.shared.sandbox.mode(),
            domains: self.shared.sandbox.domain_count(),
            domains_torn_down: self.shared.sandbox.torn_down(),
            workers_active: scheduler.active_workers,
            workers_peak: scheduler.peak_workers,
            workers_busy: scheduler.busy_workers,
            immediate_queued: scheduler.immediate,
            deferred_queued: scheduler.deferred,
            pending_loads: self.shared.loads.pending(),
            executed: scheduler.executed,
            stale: scheduler.stale,
            throttled: scheduler.throttled,
            compiled_scripts: self.shared.cache.compiled_count(),
            cache_hits: self.shared.cache.hit_count(),
            timers: self.shared.timers.active_count(),
            uptime: self.shared.started_at.elapsed(),
        }
    }

    /// Temporarily refuse starts, updates and new events
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.shared.enabled.swap(enabled, Ordering::AcqRel);
        if was != enabled {
            info!(
                target: "scripting",
                "Scripting {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEnvelope> {
        self.shared.bus.subscribe()
    }

    pub fn notification_bus(&self) -> &NotificationBus {
        &self.shared.bus
    }

    pub fn save_state(&self, item: ItemId) -> EngineResult<()> {
        let instance = self.live(item)?;
        let snapshot = instance.snapshot(self.shared.timers.interval_of(item));
        self.shared
            .store
            .save_state(&snapshot)
            .map_err(EngineError::Persistence)
    }

    /// Persist every running script; returns how many were saved
    pub fn save_all_states(&self) -> usize {
        let mut saved = 0;
        for script in self.shared.registry.all() {
            if script.is_stopping() {
                continue;
            }
            let snapshot = script.snapshot(self.shared.timers.interval_of(script.item));
            match self.shared.store.save_state(&snapshot) {
                Ok(()) => saved += 1,
                Err(e) => warn!(target: "scripting", "Failed to save {}: {:#}", script.item, e),
            }
        }
        debug!(target: "scripting", "Saved {} script state(s)", saved);
        saved
    }

    /// Wait until no load request, queued task or running handler remains
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.shared.loads.pending() == 0 && self.scheduler.is_quiescent() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    /// Stop background threads and persist every script
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(target: "scripting", "Shutting down scripting engine");
        self.shared.commands.shutdown();
        self.shared.loads.shutdown();
        for script in self.shared.registry.all() {
            script.abort.store(true, Ordering::Release);
        }
        self.scheduler.shutdown();
        let saved = self.save_all_states();
        self.shared.sandbox.shutdown();
        info!(target: "scripting", "Engine stopped, {} state(s) saved", saved);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Check arity and convert arguments to the event's parameter types
fn coerce_args(event: EventKind, args: Vec<Value>) -> EngineResult<Vec<Value>> {
    let params = event.params();
    if params.len() != args.len() {
        return Err(EngineError::BadArguments {
            event: event.name().to_string(),
            expected: params.len(),
            found: args.len(),
        });
    }
    Ok(args
        .into_iter()
        .zip(params)
        .map(|(arg, ty)| if arg.value_type() == *ty { arg } else { arg.cast(*ty) })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_codegen::ValueType;

    use crate::world::MemoryWorld;

    #[test]
    fn test_coerce_args_checks_arity() {
        let err = coerce_args(EventKind::TouchStart, vec![]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::BadArguments {
                expected: 1,
                found: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_coerce_args_converts_types() {
        let args = coerce_args(
            EventKind::Listen,
            vec![
                Value::Float(3.0),
                Value::String("bob".into()),
                Value::String("00000000-0000-0000-0000-000000000001".into()),
                Value::String("hello".into()),
            ],
        )
        .unwrap();
        assert_eq!(args[0], Value::Integer(3));
        assert_eq!(args[2].value_type(), ValueType::Key);
    }

    #[test]
    fn test_start_is_undone_when_load_queue_closed() {
        let world = Arc::new(MemoryWorld::new());
        world.add_object(ObjectId(1), "object 1", AgentId(900));
        let engine = Engine::builder().with_memory_world(world).build().unwrap();
        engine.shared.loads.shutdown();

        let source = ScriptSource {
            object: ObjectId(1),
            item: ItemId(77),
            name: "late".to_string(),
            owner: AgentId(900),
            source: "default { state_entry() { } }".to_string(),
        };
        assert!(matches!(
            engine.start(source, StartParams::default()),
            Err(EngineError::ShutDown)
        ));
        assert!(!engine.is_running(ItemId(77)));
        assert!(engine.shared.registry.is_empty());
    }

    #[test]
    fn test_stats_display() {
        let stats = EngineStats {
            enabled: true,
            scripts: 2,
            objects: 1,
            running: 2,
            suspended: 0,
            sandbox_mode: SandboxMode::Isolated,
            domains: 2,
            domains_torn_down: 0,
            workers_active: 2,
            workers_peak: 3,
            workers_busy: 0,
            immediate_queued: 0,
            deferred_queued: 1,
            pending_loads: 0,
            executed: 10,
            stale: 1,
            throttled: 0,
            compiled_scripts: 1,
            cache_hits: 1,
            timers: 0,
            uptime: Duration::from_secs(5),
        };
        let text = stats.to_string();
        assert!(text.contains("2 on 1 object(s)"));
        assert!(text.contains("isolated mode, 2 domain(s)"));
        assert!(text.contains("10 executed, 1 stale"));
    }
}
