use std::sync::Arc;
use std::time::Duration;

use tessel_engine::{
    Engine, EngineConfig, MemoryWorld, Priority, ScriptSource, StartParams, StatePersistence,
    TomlStateStore, Value,
};
use tessel_events::{AgentId, ItemId, ObjectId};

const COUNTER: &str = r#"
integer count;

default
{
    state_entry() { llSay(0, "entry"); }
    touch_start(integer n)
    {
        count++;
        llSay(0, "count " + (string)count);
        if (count == 2) state counting;
    }
}

state counting
{
    touch_start(integer n)
    {
        count++;
        llSay(0, "counting " + (string)count);
    }
}
"#;

fn engine(store: Arc<TomlStateStore>) -> (Engine, Arc<MemoryWorld>) {
    let world = Arc::new(MemoryWorld::new());
    world.add_object(ObjectId(1), "counter", AgentId(5));
    let engine = Engine::builder()
        .with_engine_config(EngineConfig {
            command_pass_interval_ms: 5,
            ..EngineConfig::default()
        })
        .with_memory_world(Arc::clone(&world))
        .with_persistence(store)
        .build()
        .unwrap();
    (engine, world)
}

fn source() -> ScriptSource {
    ScriptSource {
        object: ObjectId(1),
        item: ItemId(3),
        name: "counter".into(),
        owner: AgentId(5),
        source: COUNTER.into(),
    }
}

fn touch(engine: &Engine) {
    engine
        .post_event(ItemId(3), "touch_start", vec![Value::Integer(1)], Vec::new(), Priority::Normal)
        .unwrap();
    assert!(engine.wait_idle(Duration::from_secs(5)));
}

fn restoring() -> StartParams {
    StartParams {
        restore_state: true,
        ..StartParams::default()
    }
}

#[test]
fn test_state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(TomlStateStore::new(dir.path()));

    let (first, world) = engine(Arc::clone(&store));
    first.start(source(), StartParams::default()).unwrap();
    assert!(first.wait_idle(Duration::from_secs(5)));
    touch(&first);
    touch(&first);
    assert_eq!(world.chat_text(), vec!["entry", "count 1", "count 2"]);
    first.shutdown();

    let saved = store.load_state(ItemId(3)).unwrap().unwrap();
    assert_eq!(saved.state, "counting");

    let (second, world) = engine(Arc::clone(&store));
    second.start(source(), restoring()).unwrap();
    assert!(second.wait_idle(Duration::from_secs(5)));
    touch(&second);
    assert_eq!(world.chat_text(), vec!["counting 3"]);
}

#[test]
fn test_changed_source_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(TomlStateStore::new(dir.path()));

    let (first, _world) = engine(Arc::clone(&store));
    first.start(source(), StartParams::default()).unwrap();
    assert!(first.wait_idle(Duration::from_secs(5)));
    touch(&first);
    first.save_state(ItemId(3)).unwrap();
    first.shutdown();

    let (second, world) = engine(Arc::clone(&store));
    let mut edited = source();
    edited.source = COUNTER.replace("\"entry\"", "\"fresh entry\"");
    second.start(edited, restoring()).unwrap();
    assert!(second.wait_idle(Duration::from_secs(5)));
    touch(&second);
    assert_eq!(world.chat_text(), vec!["fresh entry", "count 1"]);
}

#[test]
fn test_stop_deletes_saved_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(TomlStateStore::new(dir.path()));

    let (engine, _world) = engine(Arc::clone(&store));
    engine.start(source(), StartParams::default()).unwrap();
    assert!(engine.wait_idle(Duration::from_secs(5)));
    engine.save_state(ItemId(3)).unwrap();
    assert!(store.load_state(ItemId(3)).unwrap().is_some());

    engine.stop(ItemId(3));
    assert!(engine.wait_idle(Duration::from_secs(5)));
    assert!(store.load_state(ItemId(3)).unwrap().is_none());
}
