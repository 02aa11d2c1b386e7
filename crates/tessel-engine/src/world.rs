//! Contracts with the world the engine is embedded in
//!
//! The engine never owns scene objects or inventory. It reaches them through
//! [`WorldHost`] and [`ObjectRef`], and resolves script sources through
//! [`SourceProvider`]. [`MemoryWorld`] is an in-memory implementation used by
//! the CLI and by tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bitflags::bitflags;
use tessel_codegen::EventKind;
use tessel_events::{AgentId, ItemId, ObjectId};
use tracing::info;

use crate::vm::{CompiledModule, Quat, Vector3};

/// Who or what triggered a detection event
#[derive(Debug, Clone, PartialEq)]
pub struct DetectParams {
    pub key: String,
    pub name: String,
    pub owner: String,
    pub position: Vector3,
    pub rotation: Quat,
    pub velocity: Vector3,
    pub detect_type: i32,
    pub link_number: i32,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            key: tessel_codegen::constants::NULL_KEY.to_string(),
            name: String::new(),
            owner: tessel_codegen::constants::NULL_KEY.to_string(),
            position: Vector3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: Vector3::ZERO,
            detect_type: 0,
            link_number: 0,
        }
    }
}

impl DetectParams {
    pub fn agent(key: AgentId, name: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            name: name.into(),
            owner: key.to_string(),
            detect_type: 1,
            ..Self::default()
        }
    }
}

bitflags! {
    /// Events the object must forward because some script handles them
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ScriptEvents: u32 {
        const TOUCH = 1 << 0;
        const COLLISION = 1 << 1;
        const LAND_COLLISION = 1 << 2;
        const LISTEN = 1 << 3;
        const SENSOR = 1 << 4;
        const CONTROL = 1 << 5;
        const MONEY = 1 << 6;
        const EMAIL = 1 << 7;
        const AT_TARGET = 1 << 8;
        const HTTP = 1 << 9;
        const LINK_MESSAGE = 1 << 10;
        const MOVING = 1 << 11;
    }
}

impl ScriptEvents {
    pub fn for_event(event: EventKind) -> ScriptEvents {
        use EventKind::*;
        match event {
            TouchStart | Touch | TouchEnd => ScriptEvents::TOUCH,
            CollisionStart | Collision | CollisionEnd => ScriptEvents::COLLISION,
            LandCollisionStart | LandCollision | LandCollisionEnd => ScriptEvents::LAND_COLLISION,
            Listen => ScriptEvents::LISTEN,
            Sensor | NoSensor => ScriptEvents::SENSOR,
            Control => ScriptEvents::CONTROL,
            Money | TransactionResult => ScriptEvents::MONEY,
            Email => ScriptEvents::EMAIL,
            AtTarget | NotAtTarget | AtRotTarget | NotAtRotTarget => ScriptEvents::AT_TARGET,
            HttpRequest | HttpResponse => ScriptEvents::HTTP,
            LinkMessage => ScriptEvents::LINK_MESSAGE,
            MovingStart | MovingEnd => ScriptEvents::MOVING,
            _ => ScriptEvents::empty(),
        }
    }

    /// Events handled by `module` while in `state`
    pub fn handled_in(module: &CompiledModule, state: usize) -> ScriptEvents {
        EventKind::ALL
            .iter()
            .filter(|kind| module.handles(state, **kind))
            .fold(ScriptEvents::empty(), |acc, kind| acc | ScriptEvents::for_event(*kind))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatVolume {
    Whisper,
    Say,
    Shout,
    Region,
}

/// A scene object as seen by the engine
pub trait ObjectRef: Send + Sync {
    fn id(&self) -> ObjectId;
    fn name(&self) -> String;
    fn owner(&self) -> AgentId;
    fn position(&self) -> Vector3;
    fn set_position(&self, position: Vector3);
    fn set_text(&self, text: &str, color: Vector3, alpha: f64);
    /// Which events the object must forward to its scripts
    fn set_script_event_flags(&self, flags: ScriptEvents);
    fn schedule_update(&self);
}

/// Services of the world consumed by scripts and by the engine
pub trait WorldHost: Send + Sync {
    fn find_object(&self, id: ObjectId) -> Option<Arc<dyn ObjectRef>>;
    fn chat(&self, object: ObjectId, channel: i32, volume: ChatVolume, text: &str);
    fn instant_message(&self, object: ObjectId, to: &str, text: &str);
    fn send_email(&self, object: ObjectId, address: &str, subject: &str, body: &str);
    /// Start an outbound request; returns the request key
    fn http_request(&self, object: ObjectId, url: &str, method: &str, body: &str) -> String;
    fn delete_object(&self, object: ObjectId);
    fn remove_inventory(&self, object: ObjectId, name: &str);
    fn notify_owner(&self, object: ObjectId, owner: AgentId, text: &str);
}

/// Source of one script item
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptSource {
    pub object: ObjectId,
    pub item: ItemId,
    pub name: String,
    pub owner: AgentId,
    pub source: String,
}

/// Resolves item ids to guest source for (re)compilation
pub trait SourceProvider: Send + Sync {
    fn source_for(&self, item: ItemId) -> Option<ScriptSource>;
    fn all_sources(&self) -> Vec<ScriptSource>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatLine {
    pub object: ObjectId,
    pub channel: i32,
    pub volume: ChatVolume,
    pub text: String,
}

#[derive(Debug, Default)]
struct ObjectState {
    position: Vector3,
    text: String,
    flags: ScriptEvents,
    updates: u32,
}

/// Object kept by [`MemoryWorld`]
#[derive(Debug)]
pub struct MemoryObject {
    id: ObjectId,
    name: String,
    owner: AgentId,
    state: Mutex<ObjectState>,
}

impl MemoryObject {
    fn state(&self) -> MutexGuard<'_, ObjectState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn text(&self) -> String {
        self.state().text.clone()
    }

    pub fn flags(&self) -> ScriptEvents {
        self.state().flags
    }

    pub fn update_count(&self) -> u32 {
        self.state().updates
    }
}

impl ObjectRef for MemoryObject {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn owner(&self) -> AgentId {
        self.owner
    }

    fn position(&self) -> Vector3 {
        self.state().position
    }

    fn set_position(&self, position: Vector3) {
        self.state().position = position;
    }

    fn set_text(&self, text: &str, _color: Vector3, _alpha: f64) {
        self.state().text = text.to_string();
    }

    fn set_script_event_flags(&self, flags: ScriptEvents) {
        self.state().flags = flags;
    }

    fn schedule_update(&self) {
        self.state().updates += 1;
    }
}

#[derive(Debug, Default)]
struct WorldLog {
    chat: Vec<ChatLine>,
    instant_messages: Vec<(ObjectId, String, String)>,
    emails: Vec<(ObjectId, String, String)>,
    http: Vec<(ObjectId, String, String)>,
    deleted: Vec<ObjectId>,
    removed_inventory: Vec<(ObjectId, String)>,
    owner_notices: Vec<(ObjectId, AgentId, String)>,
}

/// In-memory world: objects, a log of everything scripts did, and sources
#[derive(Default)]
pub struct MemoryWorld {
    objects: Mutex<HashMap<ObjectId, Arc<MemoryObject>>>,
    sources: Mutex<HashMap<ItemId, ScriptSource>>,
    log: Mutex<WorldLog>,
    next_request: AtomicU64,
    echo: bool,
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// A world that also writes chat and notices to the log output
    pub fn echoing() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    fn log(&self) -> MutexGuard<'_, WorldLog> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_object(&self, id: ObjectId, name: impl Into<String>, owner: AgentId) -> Arc<MemoryObject> {
        let object = Arc::new(MemoryObject {
            id,
            name: name.into(),
            owner,
            state: Mutex::new(ObjectState::default()),
        });
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::clone(&object));
        object
    }

    pub fn object(&self, id: ObjectId) -> Option<Arc<MemoryObject>> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn set_source(&self, source: ScriptSource) {
        self.sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(source.item, source);
    }

    pub fn chat_lines(&self) -> Vec<ChatLine> {
        self.log().chat.clone()
    }

    pub fn chat_text(&self) -> Vec<String> {
        self.log().chat.iter().map(|c| c.text.clone()).collect()
    }

    pub fn instant_messages(&self) -> Vec<(ObjectId, String, String)> {
        self.log().instant_messages.clone()
    }

    pub fn emails(&self) -> Vec<(ObjectId, String, String)> {
        self.log().emails.clone()
    }

    pub fn deleted_objects(&self) -> Vec<ObjectId> {
        self.log().deleted.clone()
    }

    pub fn removed_inventory(&self) -> Vec<(ObjectId, String)> {
        self.log().removed_inventory.clone()
    }

    pub fn owner_notices(&self) -> Vec<(ObjectId, AgentId, String)> {
        self.log().owner_notices.clone()
    }
}

impl WorldHost for MemoryWorld {
    fn find_object(&self, id: ObjectId) -> Option<Arc<dyn ObjectRef>> {
        self.object(id).map(|o| o as Arc<dyn ObjectRef>)
    }

    fn chat(&self, object: ObjectId, channel: i32, volume: ChatVolume, text: &str) {
        if self.echo {
            info!(target: "scripting", "[{} ch{}] {}", object, channel, text);
        }
        self.log().chat.push(ChatLine {
            object,
            channel,
            volume,
            text: text.to_string(),
        });
    }

    fn instant_message(&self, object: ObjectId, to: &str, text: &str) {
        self.log()
            .instant_messages
            .push((object, to.to_string(), text.to_string()));
    }

    fn send_email(&self, object: ObjectId, address: &str, subject: &str, _body: &str) {
        self.log()
            .emails
            .push((object, address.to_string(), subject.to_string()));
    }

    fn http_request(&self, object: ObjectId, url: &str, method: &str, _body: &str) -> String {
        let n = self.next_request.fetch_add(1, Ordering::Relaxed) + 1;
        self.log()
            .http
            .push((object, method.to_string(), url.to_string()));
        ItemId(n).to_string()
    }

    fn delete_object(&self, object: ObjectId) {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&object);
        self.log().deleted.push(object);
    }

    fn remove_inventory(&self, object: ObjectId, name: &str) {
        self.log()
            .removed_inventory
            .push((object, name.to_string()));
    }

    fn notify_owner(&self, object: ObjectId, owner: AgentId, text: &str) {
        if self.echo {
            info!(target: "scripting", "[{} -> {}] {}", object, owner, text);
        }
        self.log()
            .owner_notices
            .push((object, owner, text.to_string()));
    }
}

impl SourceProvider for MemoryWorld {
    fn source_for(&self, item: ItemId) -> Option<ScriptSource> {
        self.sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&item)
            .cloned()
    }

    fn all_sources(&self) -> Vec<ScriptSource> {
        let mut all: Vec<ScriptSource> = self
            .sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|s| s.item);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_events_share_a_flag() {
        assert_eq!(ScriptEvents::for_event(EventKind::Touch), ScriptEvents::TOUCH);
        assert_eq!(ScriptEvents::for_event(EventKind::TouchEnd), ScriptEvents::TOUCH);
        assert!(ScriptEvents::for_event(EventKind::StateEntry).is_empty());
    }

    #[test]
    fn test_memory_world_records_deletions() {
        let world = MemoryWorld::new();
        world.add_object(ObjectId(1), "box", AgentId(9));
        assert!(world.find_object(ObjectId(1)).is_some());

        world.delete_object(ObjectId(1));
        assert!(world.find_object(ObjectId(1)).is_none());
        assert_eq!(world.deleted_objects(), vec![ObjectId(1)]);
    }

    #[test]
    fn test_http_request_keys_are_distinct() {
        let world = MemoryWorld::new();
        let a = world.http_request(ObjectId(1), "http://a", "GET", "");
        let b = world.http_request(ObjectId(1), "http://b", "GET", "");
        assert_ne!(a, b);
    }
}
