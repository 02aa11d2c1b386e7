//! Drives whole scripts through the engine against an in-memory world

use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use tessel_engine::{
    Engine, EngineConfig, EngineError, LoadError, MemoryWorld, PostOutcome, Priority,
    SandboxConfig, ScriptScope, ScriptSource, StartParams, Value,
};
use tessel_events::{
    AgentId, EngineNotification, ItemId, NotificationEnvelope, ObjectId, ScriptErrorKind,
};
use tokio::sync::broadcast;

const OWNER: AgentId = AgentId(900);

fn fast_config() -> EngineConfig {
    EngineConfig {
        command_pass_interval_ms: 5,
        ..EngineConfig::default()
    }
}

fn setup_with(config: EngineConfig, sandbox: SandboxConfig) -> (Engine, Arc<MemoryWorld>) {
    let world = Arc::new(MemoryWorld::new());
    for n in 1..=3 {
        world.add_object(ObjectId(n), format!("object {}", n), OWNER);
    }
    let engine = Engine::builder()
        .with_engine_config(config)
        .with_sandbox_config(sandbox)
        .with_memory_world(Arc::clone(&world))
        .build()
        .unwrap();
    (engine, world)
}

fn setup() -> (Engine, Arc<MemoryWorld>) {
    setup_with(fast_config(), SandboxConfig::default())
}

fn script(object: u64, item: u64, source: &str) -> ScriptSource {
    ScriptSource {
        object: ObjectId(object),
        item: ItemId(item),
        name: format!("script{}", item),
        owner: OWNER,
        source: source.to_string(),
    }
}

fn wait_until(what: &str, timeout: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        sleep(Duration::from_millis(5));
    }
}

fn settle(engine: &Engine) {
    assert!(engine.wait_idle(Duration::from_secs(10)), "engine never went idle");
}

fn drain(rx: &mut broadcast::Receiver<NotificationEnvelope>) -> Vec<EngineNotification> {
    let mut out = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        out.push(envelope.notification);
    }
    out
}

fn touch(engine: &Engine, item: u64) -> PostOutcome {
    engine
        .post_event(
            ItemId(item),
            "touch_start",
            vec![Value::Integer(1)],
            Vec::new(),
            Priority::Normal,
        )
        .unwrap()
}

const GREETER: &str = r#"
default
{
    state_entry()
    {
        llSay(0, "entry");
    }

    touch_start(integer n)
    {
        llSay(0, "touch");
    }
}
"#;

#[test]
fn test_state_entry_precedes_events_posted_right_after_start() {
    let (engine, world) = setup();
    let src = r#"
default
{
    state_entry() { llSay(0, llGetScriptName() + " entry"); }
    touch_start(integer n) { llSay(0, llGetScriptName() + " touch"); }
}
"#;
    for item in 10..15 {
        engine.start(script(1, item, src), StartParams::default()).unwrap();
        assert_eq!(touch(&engine, item), PostOutcome::Queued);
    }
    settle(&engine);

    let chat = world.chat_text();
    assert_eq!(chat.len(), 10);
    for item in 10..15 {
        let entry = format!("script{} entry", item);
        let touched = format!("script{} touch", item);
        assert_eq!(chat.iter().filter(|l| **l == entry).count(), 1);
        let entry_at = chat.iter().position(|l| *l == entry).unwrap();
        let touch_at = chat.iter().position(|l| *l == touched).unwrap();
        assert!(entry_at < touch_at, "item {}", item);
    }
}

#[test]
fn test_delay_suspends_and_resumes_after_the_call() {
    let (engine, world) = setup();
    let src = r#"
integer count;

default
{
    touch_start(integer n)
    {
        count++;
        llSay(0, "start " + (string)count);
        llSleep(2.0);
        llSay(0, "done " + (string)count);
    }
}
"#;
    engine.start(script(1, 1, src), StartParams::default()).unwrap();
    settle(&engine);

    let began = Instant::now();
    touch(&engine, 1);
    touch(&engine, 1);
    wait_until("second handler", Duration::from_secs(10), || {
        world.chat_text().iter().any(|l| l == "start 2")
    });
    assert!(began.elapsed() >= Duration::from_secs(2));
    settle(&engine);

    assert_eq!(
        world.chat_text(),
        vec!["start 1", "done 1", "start 2", "done 2"]
    );
}

#[test]
fn test_150_instances_with_100_workers() {
    let config = EngineConfig {
        max_threads: 100,
        ..fast_config()
    };
    let (engine, world) = setup_with(config, SandboxConfig::default());
    let src = r#"
default
{
    touch_start(integer n)
    {
        integer i;
        for (i = 0; i < 200; i++) { }
        llSay(0, "ok");
    }
}
"#;
    for item in 1..=150 {
        world.add_object(ObjectId(1000 + item), "crate", OWNER);
        engine
            .start(script(1000 + item, item, src), StartParams::default())
            .unwrap();
    }
    settle(&engine);
    for item in 1..=150 {
        touch(&engine, item);
    }
    settle(&engine);

    assert_eq!(world.chat_text().len(), 150);
    let stats = engine.stats();
    assert!(stats.workers_peak <= 100);
    assert_eq!(stats.scripts, 150);
}

#[test]
fn test_self_delete_deletes_the_object_once() {
    let (engine, world) = setup();
    let mut rx = engine.subscribe();
    let src = r#"
default
{
    touch_start(integer n)
    {
        llDie();
    }
}
"#;
    engine.start(script(2, 1, src), StartParams::default()).unwrap();
    engine.start(script(2, 2, src), StartParams::default()).unwrap();
    settle(&engine);

    let queued = engine
        .post_object_event(ObjectId(2), "touch_start", vec![Value::Integer(1)], Vec::new())
        .unwrap();
    assert_eq!(queued, 2);
    wait_until("object teardown", Duration::from_secs(5), || {
        engine.total_script_count(ScriptScope::Object(ObjectId(2))) == 0
    });
    settle(&engine);

    assert_eq!(world.deleted_objects(), vec![ObjectId(2)]);
    let notes = drain(&mut rx);
    assert!(!notes
        .iter()
        .any(|n| matches!(n, EngineNotification::ScriptError { .. })));
    assert_eq!(
        notes
            .iter()
            .filter(|n| matches!(n, EngineNotification::ObjectRemoved { object } if *object == ObjectId(2)))
            .count(),
        1
    );
}

#[test]
fn test_stop_is_idempotent() {
    let (engine, _world) = setup();
    let mut rx = engine.subscribe();
    engine.start(script(1, 5, GREETER), StartParams::default()).unwrap();
    settle(&engine);

    assert!(engine.stop(ItemId(5)));
    assert!(!engine.stop(ItemId(5)));
    settle(&engine);
    assert!(!engine.stop(ItemId(5)));
    assert!(!engine.is_running(ItemId(5)));

    let notes = drain(&mut rx);
    let removed = notes
        .iter()
        .filter(|n| matches!(n, EngineNotification::ScriptRemoved { item, .. } if *item == ItemId(5)))
        .count();
    assert_eq!(removed, 1);
    let late = engine.post_event(
        ItemId(5),
        "touch_start",
        vec![Value::Integer(1)],
        Vec::new(),
        Priority::Normal,
    );
    assert!(matches!(late, Err(EngineError::NotFound(_))));
}

#[test]
fn test_post_to_unknown_item_is_not_found() {
    let (engine, _world) = setup();
    let err = engine
        .post_event(ItemId(77), "touch_start", vec![Value::Integer(1)], Vec::new(), Priority::Normal)
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(ItemId(77))));

    let err = engine
        .post_event(ItemId(77), "poke", Vec::new(), Vec::new(), Priority::Normal)
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownEvent(_)));
}

#[test]
fn test_state_change_runs_exit_then_entry() {
    let (engine, world) = setup();
    let src = r#"
default
{
    state_entry() { llSay(0, "default entry"); }
    state_exit() { llSay(0, "default exit"); }
    touch_start(integer n) { state busy; }
}

state busy
{
    state_entry() { llSay(0, "busy entry"); }
}
"#;
    engine.start(script(1, 1, src), StartParams::default()).unwrap();
    settle(&engine);
    touch(&engine, 1);
    settle(&engine);
    // busy has no touch handler
    touch(&engine, 1);
    settle(&engine);

    assert_eq!(
        world.chat_text(),
        vec!["default entry", "default exit", "busy entry"]
    );
}

#[test]
fn test_reset_reinitialises_globals() {
    let (engine, world) = setup();
    let src = r#"
integer count = 10;

default
{
    state_entry() { llSay(0, "count " + (string)count); }
    touch_start(integer n)
    {
        count = count + 5;
        if (count > 20) llResetScript();
        llSay(0, "count " + (string)count);
    }
}
"#;
    engine.start(script(1, 1, src), StartParams::default()).unwrap();
    settle(&engine);
    touch(&engine, 1);
    settle(&engine);
    touch(&engine, 1);
    settle(&engine);
    touch(&engine, 1);
    settle(&engine);

    assert_eq!(
        world.chat_text(),
        vec!["count 10", "count 15", "count 20", "count 10"]
    );

    engine.reset(ItemId(1)).unwrap();
    settle(&engine);
    assert_eq!(world.chat_text().last().map(String::as_str), Some("count 10"));
}

#[test]
fn test_min_event_delay_throttles_posts() {
    let (engine, world) = setup();
    let src = r#"
default
{
    state_entry() { llMinEventDelay(60.0); }
    touch_start(integer n) { llSay(0, "touched"); }
}
"#;
    engine.start(script(1, 1, src), StartParams::default()).unwrap();
    settle(&engine);

    assert_eq!(touch(&engine, 1), PostOutcome::Queued);
    assert_eq!(touch(&engine, 1), PostOutcome::Throttled);
    settle(&engine);
    assert_eq!(world.chat_text(), vec!["touched"]);
    assert_eq!(engine.stats().throttled, 1);
}

#[test]
fn test_timer_fires_until_cancelled() {
    let (engine, world) = setup();
    let src = r#"
integer ticks;

default
{
    state_entry() { llSetTimerEvent(0.05); }
    timer()
    {
        ticks++;
        llSay(0, "tick " + (string)ticks);
        if (ticks == 3) llSetTimerEvent(0.0);
    }
}
"#;
    engine.start(script(1, 1, src), StartParams::default()).unwrap();
    wait_until("three ticks", Duration::from_secs(5), || world.chat_text().len() >= 3);
    sleep(Duration::from_millis(200));
    settle(&engine);

    assert_eq!(world.chat_text(), vec!["tick 1", "tick 2", "tick 3"]);
    assert_eq!(engine.stats().timers, 0);
}

#[test]
fn test_runtime_error_is_reported_to_the_owner() {
    let (engine, world) = setup();
    let mut rx = engine.subscribe();
    let src = r#"
integer zero;

default
{
    touch_start(integer n)
    {
        integer x = 1 / zero;
        llSay(0, "unreachable");
    }
}
"#;
    engine.start(script(1, 1, src), StartParams::default()).unwrap();
    settle(&engine);
    touch(&engine, 1);
    settle(&engine);

    assert!(world.chat_text().is_empty());
    let notices = world.owner_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].1, OWNER);
    assert!(notices[0].2.starts_with("Script 'script1' run-time error at (8, "));
    assert!(notices[0].2.ends_with("Math Error"));

    let notes = drain(&mut rx);
    assert!(notes.iter().any(|n| matches!(
        n,
        EngineNotification::ScriptError { kind: ScriptErrorKind::Runtime, line: 8, .. }
    )));
    // The script keeps running
    assert!(engine.is_running(ItemId(1)));
}

#[test]
fn test_compile_error_is_reported() {
    let (engine, _world) = setup();
    let mut rx = engine.subscribe();
    let err = engine
        .start(script(1, 1, "default { state_entry() { x = 1; } }"), StartParams::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::Compile(_)));
    assert!(!engine.is_running(ItemId(1)));

    let notes = drain(&mut rx);
    assert!(matches!(
        notes.as_slice(),
        [EngineNotification::ScriptError { kind: ScriptErrorKind::Compile, line: 1, .. }]
    ));
}

#[test]
fn test_domain_capacity_limits_starts() {
    let sandbox = SandboxConfig {
        max_domains: 2,
        ..SandboxConfig::default()
    };
    let (engine, _world) = setup_with(fast_config(), sandbox);
    engine.start(script(1, 1, GREETER), StartParams::default()).unwrap();
    engine.start(script(1, 2, GREETER), StartParams::default()).unwrap();
    let err = engine
        .start(script(1, 3, GREETER), StartParams::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::Load(LoadError::SandboxUnavailable)));

    engine.stop(ItemId(1));
    settle(&engine);
    wait_until("domain teardown", Duration::from_secs(5), || engine.stats().domains < 2);
    engine.start(script(1, 3, GREETER), StartParams::default()).unwrap();
}

#[test]
fn test_disabled_engine_refuses_work() {
    let (engine, _world) = setup();
    engine.start(script(1, 1, GREETER), StartParams::default()).unwrap();
    settle(&engine);

    engine.set_enabled(false);
    assert!(!engine.is_enabled());
    assert!(matches!(
        engine.start(script(1, 2, GREETER), StartParams::default()),
        Err(EngineError::Disabled)
    ));
    assert!(matches!(
        engine.post_event(ItemId(1), "touch_start", vec![Value::Integer(1)], Vec::new(), Priority::Normal),
        Err(EngineError::Disabled)
    ));

    engine.set_enabled(true);
    assert_eq!(touch(&engine, 1), PostOutcome::Queued);
}

#[test]
fn test_start_after_shutdown_is_refused() {
    let (engine, _world) = setup();
    engine.shutdown();
    assert!(matches!(
        engine.start(script(1, 77, GREETER), StartParams::default()),
        Err(EngineError::ShutDown)
    ));
    assert!(!engine.is_running(ItemId(77)));
    assert_eq!(engine.total_script_count(ScriptScope::All), 0);
}

#[test]
fn test_already_running() {
    let (engine, _world) = setup();
    engine.start(script(1, 1, GREETER), StartParams::default()).unwrap();
    assert!(matches!(
        engine.start(script(1, 1, GREETER), StartParams::default()),
        Err(EngineError::AlreadyRunning(ItemId(1)))
    ));
}

#[test]
fn test_on_rez_follows_state_entry() {
    let (engine, world) = setup();
    let src = r#"
default
{
    state_entry() { llSay(0, "entry " + (string)llGetStartParameter()); }
    on_rez(integer param) { llSay(0, "rez " + (string)param); }
}
"#;
    let params = StartParams {
        start_param: 42,
        post_on_rez: true,
        ..StartParams::default()
    };
    engine.start(script(1, 1, src), params).unwrap();
    settle(&engine);
    assert_eq!(world.chat_text(), vec!["entry 42", "rez 42"]);
}

#[test]
fn test_update_swaps_in_new_source() {
    let (engine, world) = setup();
    engine.start(script(1, 1, GREETER), StartParams::default()).unwrap();
    settle(&engine);

    let updated = r#"
default
{
    state_entry() { llSay(0, "version two"); }
}
"#;
    engine.update(ItemId(1), updated).unwrap();
    settle(&engine);
    touch(&engine, 1);
    settle(&engine);

    assert_eq!(world.chat_text(), vec!["entry", "version two"]);
    assert!(engine.is_running(ItemId(1)));
    assert_eq!(engine.total_script_count(ScriptScope::All), 1);
}

#[test]
fn test_restart_all_recompiles_from_sources() {
    let (engine, world) = setup();
    let source = script(1, 1, GREETER);
    world.set_source(source.clone());
    engine.start(source, StartParams::default()).unwrap();
    settle(&engine);

    world.set_source(script(1, 1, "default { state_entry() { llSay(0, \"fresh\"); } }"));
    world.set_source(script(2, 2, "default { state_entry() { llSay(0, \"new\"); } }"));
    assert_eq!(engine.restart_all(), 2);
    settle(&engine);

    let chat = world.chat_text();
    assert!(chat.contains(&"fresh".to_string()));
    assert!(chat.contains(&"new".to_string()));
    assert_eq!(engine.total_script_count(ScriptScope::All), 2);
}

#[test]
fn test_remove_inventory_of_itself_stops_the_script() {
    let (engine, world) = setup();
    let src = r#"
default
{
    touch_start(integer n) { llRemoveInventory(llGetScriptName()); }
}
"#;
    engine.start(script(3, 8, src), StartParams::default()).unwrap();
    settle(&engine);
    touch(&engine, 8);
    wait_until("script removal", Duration::from_secs(5), || !engine.is_running(ItemId(8)));

    assert_eq!(
        world.removed_inventory(),
        vec![(ObjectId(3), "script8".to_string())]
    );
    assert!(world.deleted_objects().is_empty());
}

#[test]
fn test_link_message_reaches_siblings() {
    let (engine, world) = setup();
    let sender = r#"
default
{
    touch_start(integer n) { llMessageLinked(-1, 7, "ping", NULL_KEY); }
}
"#;
    let listener = r#"
default
{
    link_message(integer sender, integer num, string text, key id)
    {
        llSay(0, text + " " + (string)num);
    }
}
"#;
    engine.start(script(1, 1, sender), StartParams::default()).unwrap();
    engine.start(script(1, 2, listener), StartParams::default()).unwrap();
    settle(&engine);
    touch(&engine, 1);
    settle(&engine);

    assert_eq!(world.chat_text(), vec!["ping 7"]);
}

#[test]
fn test_counts_scores_and_suspend() {
    let (engine, world) = setup();
    engine.start(script(1, 1, GREETER), StartParams::default()).unwrap();
    engine.start(script(1, 2, GREETER), StartParams::default()).unwrap();
    engine.start(script(2, 3, GREETER), StartParams::default()).unwrap();
    settle(&engine);

    assert_eq!(engine.total_script_count(ScriptScope::All), 3);
    assert_eq!(engine.total_script_count(ScriptScope::Object(ObjectId(1))), 2);
    assert_eq!(engine.active_script_count(ScriptScope::Owner(OWNER)), 3);

    engine.suspend(ItemId(2)).unwrap();
    assert_eq!(engine.active_script_count(ScriptScope::All), 2);
    touch(&engine, 2);
    settle(&engine);
    assert_eq!(world.chat_text().iter().filter(|l| *l == "touch").count(), 0);

    engine.resume(ItemId(2)).unwrap();
    settle(&engine);
    assert_eq!(world.chat_text().iter().filter(|l| *l == "touch").count(), 1);

    let top = engine.top_scripts(2);
    assert_eq!(top.len(), 2);
    assert!(top[0].score_ms >= top[1].score_ms);
    assert!(engine.script_execution_score(ItemId(1)).unwrap() >= 0.0);
    engine.reset_scores();
    assert_eq!(engine.script_execution_score(ItemId(1)), Some(0.0));

    let dump = engine.stats().to_string();
    assert!(dump.contains("3 on 2 object(s)"));
}

#[test]
fn test_remove_object_stops_its_scripts() {
    let (engine, _world) = setup();
    let mut rx = engine.subscribe();
    engine.start(script(1, 1, GREETER), StartParams::default()).unwrap();
    engine.start(script(1, 2, GREETER), StartParams::default()).unwrap();
    engine.start(script(2, 3, GREETER), StartParams::default()).unwrap();
    settle(&engine);

    assert_eq!(engine.remove_object(ObjectId(1)), 2);
    settle(&engine);
    assert_eq!(engine.total_script_count(ScriptScope::All), 1);

    let notes = drain(&mut rx);
    assert!(notes
        .iter()
        .any(|n| matches!(n, EngineNotification::ObjectRemoved { object } if *object == ObjectId(1))));
    assert!(!notes
        .iter()
        .any(|n| matches!(n, EngineNotification::ObjectRemoved { object } if *object == ObjectId(2))));
}

#[test]
fn test_stop_all() {
    let (engine, _world) = setup();
    for item in 1..=4 {
        engine.start(script(1, item, GREETER), StartParams::default()).unwrap();
    }
    settle(&engine);
    assert_eq!(engine.stop_all(), 4);
    settle(&engine);
    assert_eq!(engine.total_script_count(ScriptScope::All), 0);
}

#[tokio::test]
async fn test_startup_complete_is_published() {
    let (engine, _world) = setup();
    let mut rx = engine.subscribe();
    engine.start(script(1, 1, GREETER), StartParams::default()).unwrap();

    let found = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    if let EngineNotification::StartupComplete { scripts } = envelope.notification {
                        return scripts;
                    }
                }
                Err(_) => return 0,
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(found, 1);
}
