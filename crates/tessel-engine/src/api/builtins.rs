use std::ops::Range;
use std::time::{Duration, Instant};

use rand::Rng;
use tessel_codegen::constants::NULL_KEY;
use tessel_codegen::EventKind;
use tessel_codegen::ValueType::{Float, Integer, Key, List, Rotation, String as Str, Vector, Void};
use tessel_events::EngineNotification;

use super::{Capability, Delay, HostApi, ScriptContext};
use crate::error::ScriptFault;
use crate::vm::{Quat, Value, Vector3};
use crate::world::ChatVolume;

type CallResult = Result<Value, ScriptFault>;

pub(super) fn register(api: &mut HostApi) {
    use Capability::*;
    let none = Delay::None;

    // Chat and messaging
    api.register("llSay", &[Integer, Str], Void, World, none, ll_say);
    api.register("llWhisper", &[Integer, Str], Void, World, none, ll_whisper);
    api.register("llShout", &[Integer, Str], Void, World, none, ll_shout);
    api.register("llRegionSay", &[Integer, Str], Void, World, none, ll_region_say);
    api.register("llOwnerSay", &[Str], Void, Core, none, ll_owner_say);
    api.register("llMessageLinked", &[Integer, Integer, Str, Key], Void, World, none, ll_message_linked);
    api.register(
        "llInstantMessage",
        &[Key, Str],
        Void,
        Network,
        Delay::Fixed(Duration::from_secs(2)),
        ll_instant_message,
    );
    api.register(
        "llEmail",
        &[Str, Str, Str],
        Void,
        Network,
        Delay::Fixed(Duration::from_secs(20)),
        ll_email,
    );
    api.register("llHTTPRequest", &[Str, List, Str], Key, Network, none, ll_http_request);

    // Script control
    api.register("llSleep", &[Float], Void, Core, Delay::FromArg(0), ll_sleep);
    api.register("llSetTimerEvent", &[Float], Void, Core, none, ll_set_timer_event);
    api.register("llMinEventDelay", &[Float], Void, Core, none, ll_min_event_delay);
    api.register("llResetScript", &[], Void, Core, none, ll_reset_script);
    api.register("llDie", &[], Void, World, none, ll_die);
    api.register("llRemoveInventory", &[Str], Void, Inventory, none, ll_remove_inventory);
    api.register("llGetScriptName", &[], Str, Core, none, ll_get_script_name);
    api.register("llGetStartParameter", &[], Integer, Core, none, ll_get_start_parameter);

    // Object
    api.register("llGetKey", &[], Key, Core, none, ll_get_key);
    api.register("llGetOwner", &[], Key, Core, none, ll_get_owner);
    api.register("llGetObjectName", &[], Str, World, none, ll_get_object_name);
    api.register("llGetPos", &[], Vector, World, none, ll_get_pos);
    api.register(
        "llSetPos",
        &[Vector],
        Void,
        World,
        Delay::Fixed(Duration::from_millis(200)),
        ll_set_pos,
    );
    api.register("llSetText", &[Str, Vector, Float], Void, World, none, ll_set_text);

    // Detection
    api.register("llDetectedName", &[Integer], Str, Core, none, ll_detected_name);
    api.register("llDetectedKey", &[Integer], Key, Core, none, ll_detected_key);
    api.register("llDetectedOwner", &[Integer], Key, Core, none, ll_detected_owner);
    api.register("llDetectedPos", &[Integer], Vector, Core, none, ll_detected_pos);
    api.register("llDetectedRot", &[Integer], Rotation, Core, none, ll_detected_rot);
    api.register("llDetectedVel", &[Integer], Vector, Core, none, ll_detected_vel);
    api.register("llDetectedType", &[Integer], Integer, Core, none, ll_detected_type);
    api.register("llDetectedLinkNumber", &[Integer], Integer, Core, none, ll_detected_link_number);

    // Time
    api.register("llGetTime", &[], Float, Core, none, ll_get_time);
    api.register("llResetTime", &[], Void, Core, none, ll_reset_time);
    api.register("llGetAndResetTime", &[], Float, Core, none, ll_get_and_reset_time);
    api.register("llGetUnixTime", &[], Integer, Core, none, ll_get_unix_time);
    api.register("llGetTimestamp", &[], Str, Core, none, ll_get_timestamp);

    // Math
    api.register("llAbs", &[Integer], Integer, Core, none, ll_abs);
    api.register("llFabs", &[Float], Float, Core, none, ll_fabs);
    api.register("llFloor", &[Float], Integer, Core, none, ll_floor);
    api.register("llCeil", &[Float], Integer, Core, none, ll_ceil);
    api.register("llRound", &[Float], Integer, Core, none, ll_round);
    api.register("llSqrt", &[Float], Float, Core, none, ll_sqrt);
    api.register("llPow", &[Float, Float], Float, Core, none, ll_pow);
    api.register("llSin", &[Float], Float, Core, none, ll_sin);
    api.register("llCos", &[Float], Float, Core, none, ll_cos);
    api.register("llTan", &[Float], Float, Core, none, ll_tan);
    api.register("llAtan2", &[Float, Float], Float, Core, none, ll_atan2);
    api.register("llFrand", &[Float], Float, Core, none, ll_frand);
    api.register("llVecMag", &[Vector], Float, Core, none, ll_vec_mag);
    api.register("llVecNorm", &[Vector], Vector, Core, none, ll_vec_norm);
    api.register("llVecDist", &[Vector, Vector], Float, Core, none, ll_vec_dist);
    api.register("llEuler2Rot", &[Vector], Rotation, Core, none, ll_euler2rot);
    api.register("llRot2Euler", &[Rotation], Vector, Core, none, ll_rot2euler);

    // Strings
    api.register("llStringLength", &[Str], Integer, Core, none, ll_string_length);
    api.register("llGetSubString", &[Str, Integer, Integer], Str, Core, none, ll_get_sub_string);
    api.register("llSubStringIndex", &[Str, Str], Integer, Core, none, ll_sub_string_index);
    api.register("llToUpper", &[Str], Str, Core, none, ll_to_upper);
    api.register("llToLower", &[Str], Str, Core, none, ll_to_lower);
    api.register("llStringTrim", &[Str, Integer], Str, Core, none, ll_string_trim);

    // Lists
    api.register("llGetListLength", &[List], Integer, Core, none, ll_get_list_length);
    api.register("llList2String", &[List, Integer], Str, Core, none, ll_list2string);
    api.register("llList2Integer", &[List, Integer], Integer, Core, none, ll_list2integer);
    api.register("llList2Float", &[List, Integer], Float, Core, none, ll_list2float);
    api.register("llList2Key", &[List, Integer], Key, Core, none, ll_list2key);
    api.register("llList2Vector", &[List, Integer], Vector, Core, none, ll_list2vector);
    api.register("llList2List", &[List, Integer, Integer], List, Core, none, ll_list2list);
    api.register("llDumpList2String", &[List, Str], Str, Core, none, ll_dump_list2string);
    api.register("llList2CSV", &[List], Str, Core, none, ll_list2csv);
    api.register("llCSV2List", &[Str], List, Core, none, ll_csv2list);
    api.register("llParseString2List", &[Str, List, List], List, Core, none, ll_parse_string2list);
}

fn nothing() -> CallResult {
    Ok(Value::Integer(0))
}

fn int(args: &[Value], i: usize) -> i32 {
    args.get(i).map(Value::as_integer).unwrap_or(0)
}

fn float(args: &[Value], i: usize) -> f64 {
    args.get(i).map(Value::as_float).unwrap_or(0.0)
}

fn text(args: &[Value], i: usize) -> String {
    args.get(i).map(Value::to_text).unwrap_or_default()
}

fn vector(args: &[Value], i: usize) -> Vector3 {
    args.get(i).map(Value::as_vector).unwrap_or(Vector3::ZERO)
}

fn list(args: &[Value], i: usize) -> &[Value] {
    match args.get(i) {
        Some(Value::List(items)) => items,
        _ => &[],
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Ranges selected by inclusive, possibly negative, possibly inverted indices
fn select(len: usize, start: i32, end: i32) -> Vec<Range<usize>> {
    let n = len as i64;
    let mut s = start as i64;
    let mut e = end as i64;
    if s < 0 {
        s += n;
    }
    if e < 0 {
        e += n;
    }
    if s <= e {
        let lo = s.max(0);
        let hi = e.min(n - 1);
        if lo > hi {
            Vec::new()
        } else {
            vec![lo as usize..hi as usize + 1]
        }
    } else {
        // Inverted indices exclude the middle
        let mut ranges = Vec::new();
        if e >= 0 {
            ranges.push(0..(e.min(n - 1) + 1) as usize);
        }
        if s < n {
            ranges.push(s.max(0) as usize..len);
        }
        ranges
    }
}

fn list_item(items: &[Value], index: i32) -> Option<&Value> {
    let i = if index < 0 {
        items.len() as i64 + index as i64
    } else {
        index as i64
    };
    usize::try_from(i).ok().and_then(|i| items.get(i))
}

fn chat(ctx: &mut ScriptContext<'_>, args: &[Value], volume: ChatVolume) -> CallResult {
    ctx.world()
        .chat(ctx.object, int(args, 0), volume, &text(args, 1));
    nothing()
}

fn ll_say(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    chat(ctx, args, ChatVolume::Say)
}

fn ll_whisper(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    chat(ctx, args, ChatVolume::Whisper)
}

fn ll_shout(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    chat(ctx, args, ChatVolume::Shout)
}

fn ll_region_say(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    if int(args, 0) == 0 {
        // Region-wide chat is not allowed on the public channel
        return nothing();
    }
    chat(ctx, args, ChatVolume::Region)
}

fn ll_owner_say(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    ctx.services.notify(EngineNotification::OwnerMessage {
        object: ctx.object,
        item: ctx.item,
        owner: ctx.owner,
        text: text(args, 0),
    });
    nothing()
}

fn ll_message_linked(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    // Objects are single-part, so every link target is the object itself
    let payload = vec![
        Value::Integer(0),
        Value::Integer(int(args, 1)),
        Value::String(text(args, 2)),
        Value::Key(text(args, 3)),
    ];
    ctx.services
        .post_object_event(ctx.object, EventKind::LinkMessage, payload);
    nothing()
}

fn ll_instant_message(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    ctx.world()
        .instant_message(ctx.object, &text(args, 0), &text(args, 1));
    nothing()
}

fn ll_email(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    ctx.world()
        .send_email(ctx.object, &text(args, 0), &text(args, 1), &text(args, 2));
    nothing()
}

fn ll_http_request(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let params = list(args, 1);
    let mut method = "GET".to_string();
    for pair in params.chunks(2) {
        if let [Value::Integer(0), value] = pair {
            method = value.to_text();
        }
    }
    let key = ctx
        .world()
        .http_request(ctx.object, &text(args, 0), &method, &text(args, 2));
    Ok(Value::Key(key))
}

fn ll_sleep(_ctx: &mut ScriptContext<'_>, _args: &[Value]) -> CallResult {
    // The suspension itself comes from the declared delay
    nothing()
}

fn ll_set_timer_event(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let interval = float(args, 0);
    let interval = (interval > 0.0).then(|| seconds(interval));
    ctx.services.set_timer(ctx.item, interval);
    nothing()
}

fn ll_min_event_delay(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    ctx.min_event_delay = Some(seconds(float(args, 0)));
    nothing()
}

fn ll_reset_script(ctx: &mut ScriptContext<'_>, _args: &[Value]) -> CallResult {
    ctx.request_reset();
    nothing()
}

fn ll_die(_ctx: &mut ScriptContext<'_>, _args: &[Value]) -> CallResult {
    Err(ScriptFault::SelfDelete)
}

fn ll_remove_inventory(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let name = text(args, 0);
    if name == ctx.script_name {
        return Err(ScriptFault::ScriptDelete);
    }
    ctx.world().remove_inventory(ctx.object, &name);
    nothing()
}

fn ll_get_script_name(ctx: &mut ScriptContext<'_>, _args: &[Value]) -> CallResult {
    Ok(Value::String(ctx.script_name.to_string()))
}

fn ll_get_start_parameter(ctx: &mut ScriptContext<'_>, _args: &[Value]) -> CallResult {
    Ok(Value::Integer(ctx.start_param))
}

fn ll_get_key(ctx: &mut ScriptContext<'_>, _args: &[Value]) -> CallResult {
    Ok(Value::Key(ctx.object.to_string()))
}

fn ll_get_owner(ctx: &mut ScriptContext<'_>, _args: &[Value]) -> CallResult {
    Ok(Value::Key(ctx.owner.to_string()))
}

fn ll_get_object_name(ctx: &mut ScriptContext<'_>, _args: &[Value]) -> CallResult {
    let name = ctx
        .world()
        .find_object(ctx.object)
        .map(|o| o.name())
        .unwrap_or_default();
    Ok(Value::String(name))
}

fn ll_get_pos(ctx: &mut ScriptContext<'_>, _args: &[Value]) -> CallResult {
    let pos = ctx
        .world()
        .find_object(ctx.object)
        .map(|o| o.position())
        .unwrap_or(Vector3::ZERO);
    Ok(Value::Vector(pos))
}

fn ll_set_pos(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    if let Some(object) = ctx.world().find_object(ctx.object) {
        object.set_position(vector(args, 0));
        object.schedule_update();
    }
    nothing()
}

fn ll_set_text(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    if let Some(object) = ctx.world().find_object(ctx.object) {
        object.set_text(&text(args, 0), vector(args, 1), float(args, 2));
        object.schedule_update();
    }
    nothing()
}

fn ll_detected_name(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let name = ctx.detected(int(args, 0)).map(|d| d.name.clone());
    Ok(Value::String(name.unwrap_or_default()))
}

fn ll_detected_key(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let key = ctx.detected(int(args, 0)).map(|d| d.key.clone());
    Ok(Value::Key(key.unwrap_or_else(|| NULL_KEY.to_string())))
}

fn ll_detected_owner(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let key = ctx.detected(int(args, 0)).map(|d| d.owner.clone());
    Ok(Value::Key(key.unwrap_or_else(|| NULL_KEY.to_string())))
}

fn ll_detected_pos(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let pos = ctx.detected(int(args, 0)).map(|d| d.position);
    Ok(Value::Vector(pos.unwrap_or(Vector3::ZERO)))
}

fn ll_detected_rot(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let rot = ctx.detected(int(args, 0)).map(|d| d.rotation);
    Ok(Value::Rotation(rot.unwrap_or(Quat::IDENTITY)))
}

fn ll_detected_vel(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let vel = ctx.detected(int(args, 0)).map(|d| d.velocity);
    Ok(Value::Vector(vel.unwrap_or(Vector3::ZERO)))
}

fn ll_detected_type(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    Ok(Value::Integer(
        ctx.detected(int(args, 0)).map(|d| d.detect_type).unwrap_or(0),
    ))
}

fn ll_detected_link_number(ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    Ok(Value::Integer(
        ctx.detected(int(args, 0)).map(|d| d.link_number).unwrap_or(0),
    ))
}

fn ll_get_time(ctx: &mut ScriptContext<'_>, _args: &[Value]) -> CallResult {
    Ok(Value::Float(ctx.time_base.elapsed().as_secs_f64()))
}

fn ll_reset_time(ctx: &mut ScriptContext<'_>, _args: &[Value]) -> CallResult {
    *ctx.time_base = Instant::now();
    nothing()
}

fn ll_get_and_reset_time(ctx: &mut ScriptContext<'_>, _args: &[Value]) -> CallResult {
    let elapsed = ctx.time_base.elapsed().as_secs_f64();
    *ctx.time_base = Instant::now();
    Ok(Value::Float(elapsed))
}

fn ll_get_unix_time(_ctx: &mut ScriptContext<'_>, _args: &[Value]) -> CallResult {
    Ok(Value::Integer(chrono::Utc::now().timestamp() as i32))
}

fn ll_get_timestamp(_ctx: &mut ScriptContext<'_>, _args: &[Value]) -> CallResult {
    let now = chrono::Utc::now();
    Ok(Value::String(now.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()))
}

fn ll_abs(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    Ok(Value::Integer(int(args, 0).wrapping_abs()))
}

fn ll_fabs(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    Ok(Value::Float(float(args, 0).abs()))
}

fn ll_floor(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    Ok(Value::Integer(float(args, 0).floor() as i32))
}

fn ll_ceil(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    Ok(Value::Integer(float(args, 0).ceil() as i32))
}

fn ll_round(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    Ok(Value::Integer((float(args, 0) + 0.5).floor() as i32))
}

fn ll_sqrt(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let v = float(args, 0);
    if v < 0.0 {
        return Err(ScriptFault::runtime("Math Error"));
    }
    Ok(Value::Float(v.sqrt()))
}

fn ll_pow(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    Ok(Value::Float(float(args, 0).powf(float(args, 1))))
}

fn ll_sin(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    Ok(Value::Float(float(args, 0).sin()))
}

fn ll_cos(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    Ok(Value::Float(float(args, 0).cos()))
}

fn ll_tan(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    Ok(Value::Float(float(args, 0).tan()))
}

fn ll_atan2(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    Ok(Value::Float(float(args, 0).atan2(float(args, 1))))
}

fn ll_frand(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let scale = float(args, 0);
    Ok(Value::Float(rand::thread_rng().gen::<f64>() * scale))
}

fn ll_vec_mag(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    Ok(Value::Float(vector(args, 0).magnitude()))
}

fn ll_vec_norm(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let v = vector(args, 0);
    let mag = v.magnitude();
    if mag == 0.0 {
        return Ok(Value::Vector(Vector3::ZERO));
    }
    Ok(Value::Vector(v.scale(1.0 / mag)))
}

fn ll_vec_dist(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let (a, b) = (vector(args, 0), vector(args, 1));
    Ok(Value::Float(Vector3::new(a.x - b.x, a.y - b.y, a.z - b.z).magnitude()))
}

fn ll_euler2rot(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let v = vector(args, 0);
    let (sx, cx) = (v.x / 2.0).sin_cos();
    let (sy, cy) = (v.y / 2.0).sin_cos();
    let (sz, cz) = (v.z / 2.0).sin_cos();
    Ok(Value::Rotation(Quat::new(
        sx * cy * cz + cx * sy * sz,
        cx * sy * cz - sx * cy * sz,
        cx * cy * sz + sx * sy * cz,
        cx * cy * cz - sx * sy * sz,
    )))
}

fn ll_rot2euler(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let q = args.first().map(Value::as_rotation).unwrap_or(Quat::IDENTITY);
    let sin_y = (2.0 * (q.x * q.z + q.y * q.s)).clamp(-1.0, 1.0);
    let y = sin_y.asin();
    let x = (2.0 * (q.x * q.s - q.y * q.z)).atan2(1.0 - 2.0 * (q.x * q.x + q.y * q.y));
    let z = (2.0 * (q.z * q.s - q.x * q.y)).atan2(1.0 - 2.0 * (q.y * q.y + q.z * q.z));
    Ok(Value::Vector(Vector3::new(x, y, z)))
}

fn ll_string_length(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    Ok(Value::Integer(text(args, 0).chars().count() as i32))
}

fn ll_get_sub_string(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let chars: Vec<char> = text(args, 0).chars().collect();
    let out: String = select(chars.len(), int(args, 1), int(args, 2))
        .into_iter()
        .flat_map(|r| chars[r].iter().copied().collect::<Vec<_>>())
        .collect();
    Ok(Value::String(out))
}

fn ll_sub_string_index(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let haystack = text(args, 0);
    let needle = text(args, 1);
    let index = haystack
        .find(&needle)
        .map(|byte| haystack[..byte].chars().count() as i32)
        .unwrap_or(-1);
    Ok(Value::Integer(index))
}

fn ll_to_upper(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    Ok(Value::String(text(args, 0).to_uppercase()))
}

fn ll_to_lower(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    Ok(Value::String(text(args, 0).to_lowercase()))
}

fn ll_string_trim(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let s = text(args, 0);
    let out = match int(args, 1) {
        1 => s.trim_start(),
        2 => s.trim_end(),
        3 => s.trim(),
        _ => s.as_str(),
    };
    Ok(Value::String(out.to_string()))
}

fn ll_get_list_length(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    Ok(Value::Integer(list(args, 0).len() as i32))
}

fn ll_list2string(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let item = list_item(list(args, 0), int(args, 1));
    Ok(Value::String(item.map(Value::to_text).unwrap_or_default()))
}

fn ll_list2integer(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let item = list_item(list(args, 0), int(args, 1));
    Ok(Value::Integer(item.map(Value::as_integer).unwrap_or(0)))
}

fn ll_list2float(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let item = list_item(list(args, 0), int(args, 1));
    Ok(Value::Float(item.map(Value::as_float).unwrap_or(0.0)))
}

fn ll_list2key(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let item = list_item(list(args, 0), int(args, 1));
    Ok(Value::Key(item.map(Value::to_text).unwrap_or_default()))
}

fn ll_list2vector(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let item = list_item(list(args, 0), int(args, 1));
    Ok(Value::Vector(item.map(Value::as_vector).unwrap_or(Vector3::ZERO)))
}

fn ll_list2list(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let items = list(args, 0);
    let out = select(items.len(), int(args, 1), int(args, 2))
        .into_iter()
        .flat_map(|r| items[r].to_vec())
        .collect();
    Ok(Value::List(out))
}

fn ll_dump_list2string(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let joined = list(args, 0)
        .iter()
        .map(Value::to_text)
        .collect::<Vec<_>>()
        .join(&text(args, 1));
    Ok(Value::String(joined))
}

fn ll_list2csv(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let joined = list(args, 0)
        .iter()
        .map(Value::to_text)
        .collect::<Vec<_>>()
        .join(", ");
    Ok(Value::String(joined))
}

fn ll_csv2list(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let source = text(args, 0);
    if source.is_empty() {
        return Ok(Value::List(Vec::new()));
    }
    // Commas inside <...> belong to a vector or rotation
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in source.chars() {
        match c {
            '<' => {
                depth += 1;
                current.push(c);
            }
            '>' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                items.push(Value::String(current.trim().to_string()));
                current.clear();
            }
            _ => current.push(c),
        }
    }
    items.push(Value::String(current.trim().to_string()));
    Ok(Value::List(items))
}

fn ll_parse_string2list(_ctx: &mut ScriptContext<'_>, args: &[Value]) -> CallResult {
    let source = text(args, 0);
    let separators: Vec<String> = list(args, 1).iter().map(Value::to_text).filter(|s| !s.is_empty()).collect();
    let spacers: Vec<String> = list(args, 2).iter().map(Value::to_text).filter(|s| !s.is_empty()).collect();

    let mut out = Vec::new();
    let mut rest = source.as_str();
    let mut current = String::new();
    'scan: while !rest.is_empty() {
        for sep in &separators {
            if let Some(after) = rest.strip_prefix(sep.as_str()) {
                if !current.is_empty() {
                    out.push(Value::String(std::mem::take(&mut current)));
                }
                rest = after;
                continue 'scan;
            }
        }
        for spacer in &spacers {
            if let Some(after) = rest.strip_prefix(spacer.as_str()) {
                if !current.is_empty() {
                    out.push(Value::String(std::mem::take(&mut current)));
                }
                out.push(Value::String(spacer.clone()));
                rest = after;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            current.push(c);
        }
        rest = chars.as_str();
    }
    if !current.is_empty() {
        out.push(Value::String(current));
    }
    Ok(Value::List(out))
}
