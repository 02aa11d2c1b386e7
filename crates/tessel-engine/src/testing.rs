//! Helpers shared by unit tests

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tessel_codegen::EventKind;
use tessel_events::{EngineNotification, ItemId, ObjectId};

use crate::api::{HostApi, HostServices};
use crate::vm::{self, CompiledModule, Value};
use crate::world::{MemoryWorld, WorldHost};

/// Host services that record every side effect
#[derive(Default)]
pub struct Recorder {
    pub world: MemoryWorld,
    pub notes: Mutex<Vec<EngineNotification>>,
    pub timers: Mutex<Vec<(ItemId, Option<Duration>)>>,
    pub posts: Mutex<Vec<(ObjectId, EventKind, Vec<Value>)>>,
}

impl HostServices for Recorder {
    fn world(&self) -> &dyn WorldHost {
        &self.world
    }

    fn notify(&self, notification: EngineNotification) {
        self.notes.lock().unwrap().push(notification);
    }

    fn set_timer(&self, item: ItemId, interval: Option<Duration>) {
        self.timers.lock().unwrap().push((item, interval));
    }

    fn post_object_event(&self, object: ObjectId, event: EventKind, args: Vec<Value>) {
        self.posts.lock().unwrap().push((object, event, args));
    }
}

pub fn compile(source: &str) -> Arc<CompiledModule> {
    let api = HostApi::standard();
    let generated = tessel_codegen::compile_source(source, &api).expect("script compiles");
    Arc::new(vm::assemble(&generated.host_source, generated.positions).expect("module assembles"))
}
