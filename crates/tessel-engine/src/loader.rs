//! Applies load requests on the load queue thread

use std::sync::Arc;
use std::time::Duration;

use tessel_codegen::EventKind;
use tessel_events::EngineNotification;
use tracing::{debug, info, warn};

use crate::executor::Executor;
use crate::instance::{QueuedEvent, ScriptInstance};
use crate::lifecycle::{EngineShared, StartParams};
use crate::scheduler::{LoadHandler, LoadRequest, Priority, Scheduler};
use crate::vm::Value;
use crate::world::ScriptEvents;

pub(crate) struct Loader {
    shared: Arc<EngineShared>,
    scheduler: Arc<Scheduler<Executor>>,
}

impl Loader {
    pub(crate) fn new(shared: Arc<EngineShared>, scheduler: Arc<Scheduler<Executor>>) -> Self {
        Self { shared, scheduler }
    }

    /// Try the saved snapshot; true if the instance now carries it
    fn restore(&self, instance: &ScriptInstance) -> bool {
        let snapshot = match self.shared.store.load_state(instance.item) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return false,
            Err(e) => {
                warn!(target: "scripting", "Failed to load state of {}: {:#}", instance.item, e);
                return false;
            }
        };
        if !instance.restore(&snapshot) {
            debug!(
                target: "scripting",
                "Saved state of {} does not match its module; starting fresh",
                instance.item
            );
            return false;
        }
        if let Some(ms) = snapshot.timer_interval_ms.filter(|ms| *ms > 0) {
            self.shared.timers.schedule(instance.item, Duration::from_millis(ms));
            self.shared.commands.kick();
        }
        true
    }

    fn start(&self, instance: Arc<ScriptInstance>, params: StartParams) {
        if instance.is_stopping() {
            debug!(target: "scripting", "{} stopped before it started", instance.item);
            return;
        }
        let restored = params.restore_state && self.restore(&instance);
        let state = {
            let mut exec = instance.exec();
            if !restored {
                self.scheduler
                    .runner()
                    .initialise(&instance, &mut exec, &self.scheduler);
            }
            exec.state
        };

        {
            let version = instance.version();
            let mut control = instance.control();
            if params.post_on_rez {
                control.mailbox.push_front(QueuedEvent {
                    event: EventKind::OnRez,
                    args: vec![Value::Integer(params.start_param)],
                    detected: Vec::new(),
                    priority: Priority::High,
                    version,
                });
            }
            if !restored {
                control.mailbox.push_front(QueuedEvent {
                    event: EventKind::StateEntry,
                    args: Vec::new(),
                    detected: Vec::new(),
                    priority: Priority::High,
                    version,
                });
            }
        }
        instance.set_event_flags(ScriptEvents::handled_in(instance.module(), state));
        self.shared.refresh_object_flags(instance.object);
        self.scheduler.activate(&instance);

        self.shared.notifier.publish(EngineNotification::ScriptStarted {
            object: instance.object,
            item: instance.item,
            name: instance.name.clone(),
        });
        info!(
            target: "scripting",
            "Started {} ({}) on {}{}",
            instance.name,
            instance.item,
            instance.object,
            if restored { " from saved state" } else { "" }
        );
    }

    /// Wait out a running handler and give back the sandbox slot
    fn tear_down(&self, instance: &ScriptInstance) {
        drop(instance.exec());
        self.shared.sandbox.release(instance.handle());
    }

    fn stop(&self, instance: Arc<ScriptInstance>) {
        self.tear_down(&instance);
        let Some(last_on_object) = self.shared.registry.remove_exact(&instance) else {
            debug!(target: "scripting", "{} was replaced before it stopped", instance.item);
            return;
        };
        self.shared.timers.cancel(instance.item);
        if let Err(e) = self.shared.store.delete_state(instance.item) {
            warn!(target: "scripting", "Failed to delete state of {}: {:#}", instance.item, e);
        }
        self.shared.notifier.publish(EngineNotification::ScriptRemoved {
            object: instance.object,
            item: instance.item,
        });
        if last_on_object {
            self.shared.notifier.publish(EngineNotification::ObjectRemoved {
                object: instance.object,
            });
        } else {
            self.shared.refresh_object_flags(instance.object);
        }
        info!(target: "scripting", "Stopped {} ({})", instance.name, instance.item);
    }

    fn reupload(&self, old: Arc<ScriptInstance>, new: Arc<ScriptInstance>, params: StartParams) {
        self.tear_down(&old);
        self.shared.timers.cancel(old.item);
        debug!(target: "scripting", "Replacing {} with recompiled module", old.item);
        self.start(new, params);
    }
}

impl LoadHandler for Loader {
    fn apply(&mut self, request: LoadRequest) {
        match request {
            LoadRequest::Start { instance, params } => self.start(instance, params),
            LoadRequest::Stop { instance } => self.stop(instance),
            LoadRequest::Reupload { old, new, params } => self.reupload(old, new, params),
        }
    }

    fn startup_complete(&mut self) {
        let scripts = self.shared.registry.len();
        info!(target: "scripting", "Startup complete, {} script(s) loaded", scripts);
        self.shared
            .notifier
            .publish(EngineNotification::StartupComplete { scripts });
    }
}
