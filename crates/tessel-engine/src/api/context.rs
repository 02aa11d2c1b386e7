use std::time::{Duration, Instant};

use tessel_codegen::EventKind;
use tessel_events::{AgentId, EngineNotification, ItemId, ObjectId};

use crate::vm::Value;
use crate::world::{DetectParams, WorldHost};

/// Engine services reachable from inside a host API call
pub trait HostServices: Send + Sync {
    fn world(&self) -> &dyn WorldHost;
    fn notify(&self, notification: EngineNotification);
    /// Start, replace or (with `None`) cancel the script's repeating timer
    fn set_timer(&self, item: ItemId, interval: Option<Duration>);
    /// Deliver an event to every script on an object
    fn post_object_event(&self, object: ObjectId, event: EventKind, args: Vec<Value>);
}

/// Per-call view of the running script handed to host API functions
pub struct ScriptContext<'a> {
    pub services: &'a dyn HostServices,
    pub object: ObjectId,
    pub item: ItemId,
    pub owner: AgentId,
    pub script_name: &'a str,
    pub start_param: i32,
    pub detected: &'a [DetectParams],
    /// Reference point of `llGetTime`
    pub time_base: &'a mut Instant,
    pub(crate) pending_delay: Option<Duration>,
    pub(crate) reset_requested: bool,
    pub(crate) min_event_delay: Option<Duration>,
}

impl<'a> ScriptContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        services: &'a dyn HostServices,
        object: ObjectId,
        item: ItemId,
        owner: AgentId,
        script_name: &'a str,
        start_param: i32,
        detected: &'a [DetectParams],
        time_base: &'a mut Instant,
    ) -> Self {
        Self {
            services,
            object,
            item,
            owner,
            script_name,
            start_param,
            detected,
            time_base,
            pending_delay: None,
            reset_requested: false,
            min_event_delay: None,
        }
    }

    pub fn world(&self) -> &dyn WorldHost {
        self.services.world()
    }

    /// Suspend the caller for `delay` once the current call returns
    pub fn delay(&mut self, delay: Duration) {
        self.pending_delay = Some(self.pending_delay.unwrap_or_default().max(delay));
    }

    pub fn take_delay(&mut self) -> Option<Duration> {
        self.pending_delay.take().filter(|d| !d.is_zero())
    }

    pub fn request_reset(&mut self) {
        self.reset_requested = true;
    }

    pub fn reset_requested(&self) -> bool {
        self.reset_requested
    }

    /// Minimum event delay the script asked for during this call
    pub fn requested_min_event_delay(&self) -> Option<Duration> {
        self.min_event_delay
    }

    pub fn detected(&self, index: i32) -> Option<&DetectParams> {
        usize::try_from(index).ok().and_then(|i| self.detected.get(i))
    }
}
