//! Runs scheduler tasks against script instances
//!
//! Each task executes under the instance's execution lock. Outcomes are
//! turned into dispositions for the scheduler; state changes and resets are
//! applied here, and faults are routed by kind.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tessel_codegen::EventKind;
use tessel_events::{EngineNotification, ItemId, ObjectId};
use tracing::{debug, info, trace, warn};

use crate::api::{HostServices, ScriptContext};
use crate::error::ScriptFault;
use crate::instance::{ExecState, QueuedEvent, ScriptInstance};
use crate::lifecycle::EngineShared;
use crate::scheduler::{
    discard_stale, Disposition, EventTask, Priority, Scheduler, TaskKind, TaskRunner,
};
use crate::vm::{Interpreter, Outcome, Value};
use crate::world::{DetectParams, ScriptEvents, WorldHost};

pub struct Executor {
    shared: Arc<EngineShared>,
}

/// Host services as seen from inside one task
struct TaskServices<'a> {
    shared: &'a EngineShared,
    scheduler: &'a Arc<Scheduler<Executor>>,
}

impl HostServices for TaskServices<'_> {
    fn world(&self) -> &dyn WorldHost {
        self.shared.world.as_ref()
    }

    fn notify(&self, notification: EngineNotification) {
        self.shared.notifier.publish(notification);
    }

    fn set_timer(&self, item: ItemId, interval: Option<Duration>) {
        match interval {
            Some(interval) => {
                self.shared.timers.schedule(item, interval);
                self.shared.commands.kick();
            }
            None => {
                self.shared.timers.cancel(item);
            }
        }
    }

    fn post_object_event(&self, object: ObjectId, event: EventKind, args: Vec<Value>) {
        for script in self.shared.registry.on_object(object) {
            if let Err(fault) =
                self.scheduler
                    .post(&script, event, args.clone(), Vec::new(), Priority::Normal)
            {
                trace!(target: "scheduler", "{} dropped {}: {}", script.item, event.name(), fault);
            }
        }
    }
}

fn entry_event(event: EventKind, args: Vec<Value>, version: u64) -> QueuedEvent {
    QueuedEvent {
        event,
        args,
        detected: Vec::new(),
        priority: Priority::High,
        version,
    }
}

impl Executor {
    pub(crate) fn new(shared: Arc<EngineShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    /// Run `f` with an interpreter and context bound to the instance
    fn invoke<T>(
        &self,
        instance: &ScriptInstance,
        exec: &mut ExecState,
        detected: &[DetectParams],
        scheduler: &Arc<Scheduler<Executor>>,
        f: impl FnOnce(&Interpreter<'_>, &mut [Value], &mut ScriptContext<'_>) -> T,
    ) -> T {
        let handle = instance.handle();
        let interpreter = Interpreter::new(
            &handle.linked,
            self.shared.api(),
            handle.limits,
            &instance.abort,
        );
        let services = TaskServices {
            shared: &self.shared,
            scheduler,
        };
        let ExecState {
            globals, time_base, ..
        } = exec;
        let mut ctx = ScriptContext::new(
            &services,
            instance.object,
            instance.item,
            instance.owner,
            &instance.name,
            instance.start_param,
            detected,
            time_base,
        );
        let result = f(&interpreter, globals.as_mut_slice(), &mut ctx);
        if let Some(delay) = ctx.requested_min_event_delay() {
            instance.control().min_event_delay = delay;
        }
        result
    }

    /// Fresh globals from the module initializer, in the default state
    pub(crate) fn initialise(
        &self,
        instance: &ScriptInstance,
        exec: &mut ExecState,
        scheduler: &Arc<Scheduler<Executor>>,
    ) {
        exec.time_base = Instant::now();
        exec.state = 0;
        let result = self.invoke(instance, exec, &[], scheduler, |interpreter, _, ctx| {
            interpreter.init_globals(ctx)
        });
        exec.globals = match result {
            Ok(globals) => globals,
            Err(fault) => {
                self.route_fault(instance, fault);
                instance
                    .module()
                    .globals
                    .iter()
                    .map(|(_, ty)| Value::default_for(*ty))
                    .collect()
            }
        };
    }

    fn dispatch(
        &self,
        instance: &Arc<ScriptInstance>,
        exec: &mut ExecState,
        event: QueuedEvent,
        scheduler: &Arc<Scheduler<Executor>>,
    ) -> Disposition {
        let Some(func) = instance.module().dispatch(exec.state, event.event) else {
            trace!(
                target: "scheduler",
                "{} has no {} handler in state {}",
                instance.item,
                event.event.name(),
                instance.module().state_name(exec.state)
            );
            return Disposition::Done;
        };
        instance.stats.executed.fetch_add(1, Ordering::Relaxed);
        let QueuedEvent { args, detected, .. } = event;
        let result = self.invoke(instance, exec, &detected, scheduler, |interpreter, globals, ctx| {
            interpreter.call(func, args, globals, ctx)
        });
        self.settle(instance, exec, result, detected, scheduler)
    }

    fn settle(
        &self,
        instance: &Arc<ScriptInstance>,
        exec: &mut ExecState,
        result: Result<Outcome, ScriptFault>,
        detected: Vec<DetectParams>,
        scheduler: &Arc<Scheduler<Executor>>,
    ) -> Disposition {
        match result {
            Ok(Outcome::Completed) => Disposition::Done,
            Ok(Outcome::Suspended {
                continuation,
                wake_at,
            }) => Disposition::Suspended {
                continuation,
                wake_at,
                detected,
            },
            Ok(Outcome::StateChange(target)) => {
                self.change_state(instance, exec, target, scheduler);
                Disposition::Done
            }
            Ok(Outcome::Reset) => {
                scheduler.request_reset(instance);
                Disposition::Done
            }
            Err(fault) => {
                self.route_fault(instance, fault);
                Disposition::Done
            }
        }
    }

    /// Leave the current state through `state_exit` and queue the target's `state_entry`
    fn change_state(
        &self,
        instance: &Arc<ScriptInstance>,
        exec: &mut ExecState,
        target: usize,
        scheduler: &Arc<Scheduler<Executor>>,
    ) {
        if target == exec.state {
            return;
        }
        let module = Arc::clone(instance.module());
        if let Some(exit) = module.dispatch(exec.state, EventKind::StateExit) {
            let result = self.invoke(instance, exec, &[], scheduler, |interpreter, globals, ctx| {
                interpreter.call(exit, Vec::new(), globals, ctx)
            });
            match result {
                Ok(Outcome::Completed) | Ok(Outcome::StateChange(_)) => {}
                Ok(Outcome::Suspended { .. }) => {
                    debug!(target: "scheduler", "state_exit of {} suspended; not resumed", instance.item);
                }
                Ok(Outcome::Reset) => {
                    scheduler.request_reset(instance);
                    return;
                }
                Err(fault) => self.route_fault(instance, fault),
            }
        }

        debug!(
            target: "scripting",
            "{} state {} -> {}",
            instance.item,
            module.state_name(exec.state),
            module.state_name(target)
        );
        exec.state = target;
        let version = instance.bump_version();
        {
            let mut control = instance.control();
            discard_stale(&mut control.mailbox);
            control
                .mailbox
                .push_front(entry_event(EventKind::StateEntry, Vec::new(), version));
        }
        instance.set_event_flags(ScriptEvents::handled_in(&module, target));
        self.shared.refresh_object_flags(instance.object);
    }

    fn reset(
        &self,
        instance: &Arc<ScriptInstance>,
        exec: &mut ExecState,
        scheduler: &Arc<Scheduler<Executor>>,
    ) {
        instance.abort.store(false, Ordering::Release);
        if !instance.is_running() {
            return;
        }
        self.shared.timers.cancel(instance.item);
        self.initialise(instance, exec, scheduler);
        {
            let mut control = instance.control();
            control.min_event_delay = self.shared.config.default_min_event_delay();
            control.last_accepted = None;
            control.mailbox.push_front(entry_event(
                EventKind::StateEntry,
                Vec::new(),
                instance.version(),
            ));
        }
        instance.set_event_flags(ScriptEvents::handled_in(instance.module(), 0));
        self.shared.refresh_object_flags(instance.object);
        info!(target: "scripting", "Reset {} ({})", instance.name, instance.item);
    }

    pub(crate) fn route_fault(&self, instance: &ScriptInstance, fault: ScriptFault) {
        match fault {
            ScriptFault::SelfDelete => self.shared.delete_object(instance),
            ScriptFault::ScriptDelete => {
                info!(
                    target: "scripting",
                    "{} removed itself from {}",
                    instance.name,
                    instance.object
                );
                self.shared
                    .world
                    .remove_inventory(instance.object, &instance.name);
                if let Some(current) = self.shared.registry.get(instance.item) {
                    if std::ptr::eq(Arc::as_ptr(&current), instance) {
                        self.shared.stop_instance(&current);
                    }
                }
            }
            ScriptFault::Abort => {
                trace!(target: "scheduler", "Handler of {} aborted", instance.item);
            }
            ScriptFault::MinDelay => {
                trace!(target: "scheduler", "Event for {} throttled", instance.item);
            }
            ScriptFault::Unclassified {
                message,
                line,
                column,
            } => self
                .shared
                .report_runtime_error(instance, line, column, &message),
        }
    }
}

impl TaskRunner for Executor {
    fn run(&self, task: EventTask, scheduler: &Arc<Scheduler<Self>>) -> Disposition {
        let instance = Arc::clone(&task.instance);
        if instance.is_stopping() {
            return Disposition::Done;
        }
        let Some(mut exec) = instance.try_exec() else {
            if instance.is_snapshotting() {
                debug!(
                    target: "scheduler",
                    "{} is being saved; requeueing {}",
                    instance.item,
                    task.describe()
                );
            } else {
                warn!(
                    target: "scheduler",
                    "{} is already executing; requeueing {}",
                    instance.item,
                    task.describe()
                );
            }
            return Disposition::Retry(task);
        };

        let started = Instant::now();
        let disposition = match task.kind {
            TaskKind::Reset => {
                self.reset(&instance, &mut exec, scheduler);
                Disposition::Done
            }
            TaskKind::Event(event) => self.dispatch(&instance, &mut exec, event, scheduler),
            TaskKind::Resume {
                continuation,
                detected,
            } => {
                let result =
                    self.invoke(&instance, &mut exec, &detected, scheduler, |interpreter, globals, ctx| {
                        interpreter.resume(continuation, globals, ctx)
                    });
                self.settle(&instance, &mut exec, result, detected, scheduler)
            }
        };
        drop(exec);
        instance.stats.add_exec_time(started.elapsed());
        disposition
    }

    fn discarded(&self, task: &EventTask) {
        trace!(
            target: "scheduler",
            "{} for {} completed without running",
            task.describe(),
            task.instance.item
        );
    }
}
