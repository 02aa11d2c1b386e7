use std::collections::HashMap;

use tracing::debug;

use crate::error::CompileError;
use crate::position_map::PositionMap;
use crate::types::ValueType;

macro_rules! event_kinds {
    ($($variant:ident => $name:literal ($($ty:ident),*)),* $(,)?) => {
        /// Every event a script may handle
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EventKind {
            $($variant),*
        }

        impl EventKind {
            pub const ALL: &'static [EventKind] = &[$(EventKind::$variant),*];
            pub const COUNT: usize = Self::ALL.len();

            pub fn name(self) -> &'static str {
                match self {
                    $(EventKind::$variant => $name),*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(EventKind::$variant),)*
                    _ => None,
                }
            }

            /// Parameter types in declaration order
            pub fn params(self) -> &'static [ValueType] {
                match self {
                    $(EventKind::$variant => &[$(ValueType::$ty),*]),*
                }
            }
        }
    };
}

event_kinds! {
    StateEntry => "state_entry" (),
    StateExit => "state_exit" (),
    TouchStart => "touch_start" (Integer),
    Touch => "touch" (Integer),
    TouchEnd => "touch_end" (Integer),
    CollisionStart => "collision_start" (Integer),
    Collision => "collision" (Integer),
    CollisionEnd => "collision_end" (Integer),
    LandCollisionStart => "land_collision_start" (Vector),
    LandCollision => "land_collision" (Vector),
    LandCollisionEnd => "land_collision_end" (Vector),
    Timer => "timer" (),
    Listen => "listen" (Integer, String, Key, String),
    Sensor => "sensor" (Integer),
    NoSensor => "no_sensor" (),
    Control => "control" (Key, Integer, Integer),
    AtTarget => "at_target" (Integer, Vector, Vector),
    NotAtTarget => "not_at_target" (),
    AtRotTarget => "at_rot_target" (Integer, Rotation, Rotation),
    NotAtRotTarget => "not_at_rot_target" (),
    Money => "money" (Key, Integer),
    Email => "email" (String, String, String, String, Integer),
    RunTimePermissions => "run_time_permissions" (Integer),
    Changed => "changed" (Integer),
    Attach => "attach" (Key),
    Dataserver => "dataserver" (Key, String),
    LinkMessage => "link_message" (Integer, Integer, String, Key),
    MovingStart => "moving_start" (),
    MovingEnd => "moving_end" (),
    ObjectRez => "object_rez" (Key),
    RemoteData => "remote_data" (Integer, Key, Key, String, Integer, String),
    HttpResponse => "http_response" (Key, Integer, List, String),
    HttpRequest => "http_request" (Key, String, String),
    OnRez => "on_rez" (Integer),
    TransactionResult => "transaction_result" (Key, Integer, String),
    PathUpdate => "path_update" (Integer, List),
    ExperiencePermissions => "experience_permissions" (Key),
    ExperiencePermissionsDenied => "experience_permissions_denied" (Key, Integer),
}

impl EventKind {
    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

struct ProcParams {
    params: Vec<(ValueType, u32)>,
}

fn describe(types: &[ValueType]) -> String {
    types
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Check every `.handler` entry in generated host text against the event table
///
/// Errors are reported at guest positions recovered through `positions`.
pub fn validate_handlers(host_source: &str, positions: &PositionMap) -> Result<(), CompileError> {
    let mut procs: HashMap<&str, ProcParams> = HashMap::new();
    let mut current: Option<&str> = None;
    let mut handlers = 0usize;

    for (idx, line) in host_source.lines().enumerate() {
        let line_no = idx as u32 + 1;
        let mut words = line.split_whitespace();
        match words.next() {
            Some(".func") => {
                let name = words.next().unwrap_or_default();
                procs.insert(name, ProcParams { params: Vec::new() });
                current = Some(name);
            }
            Some(".param") => {
                let ty = words.nth(1).and_then(ValueType::from_name);
                if let (Some(proc_name), Some(ty)) = (current, ty) {
                    if let Some(entry) = procs.get_mut(proc_name) {
                        entry.params.push((ty, line_no));
                    }
                }
            }
            Some(".end") => current = None,
            Some(".handler") => {
                handlers += 1;
                let _state = words.next();
                let event = words.next().unwrap_or_default();
                let proc_name = words.next().unwrap_or_default();
                let at = positions.translate(line_no, 1);

                let Some(kind) = EventKind::from_name(event) else {
                    return Err(CompileError::at(
                        at,
                        format!("'{}' is not a valid event name", event),
                    ));
                };
                let Some(declared) = procs.get(proc_name) else {
                    return Err(CompileError::at(
                        at,
                        format!("handler procedure '{}' is missing", proc_name),
                    ));
                };
                let expected = kind.params();
                if declared.params.len() != expected.len() {
                    return Err(CompileError::at(
                        at,
                        format!(
                            "event '{}' takes {} parameter(s) ({}), found {}",
                            event,
                            expected.len(),
                            describe(expected),
                            declared.params.len()
                        ),
                    ));
                }
                for (i, ((ty, param_line), want)) in
                    declared.params.iter().zip(expected.iter()).enumerate()
                {
                    if ty != want {
                        let param_at = positions
                            .lookup(*param_line, 1)
                            .unwrap_or(at);
                        return Err(CompileError::at(
                            param_at,
                            format!(
                                "parameter {} of event '{}' must be {}, found {}",
                                i + 1,
                                event,
                                want,
                                ty
                            ),
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    debug!(target: "codegen", "Validated {} handler(s)", handlers);
    Ok(())
}

#[cfg(test)]
mod tests {
    use tessel_syntax::Span;

    use super::*;

    #[test]
    fn test_table_lookups() {
        assert_eq!(EventKind::from_name("touch_start"), Some(EventKind::TouchStart));
        assert_eq!(EventKind::TouchStart.params(), &[ValueType::Integer]);
        assert_eq!(EventKind::Listen.params().len(), 4);
        assert_eq!(EventKind::from_name("on_touch"), None);
        assert_eq!(EventKind::COUNT, EventKind::ALL.len());
        assert_eq!(EventKind::ALL[EventKind::Timer.index()], EventKind::Timer);
    }

    #[test]
    fn test_validate_rejects_wrong_arity() {
        let host = ".func ev.default.touch_start void\n  ret\n.end\n.handler default touch_start ev.default.touch_start\n";
        let mut positions = PositionMap::new();
        positions.record(4, 1, Span::new(3, 5));
        let err = validate_handlers(host, &positions).unwrap_err();
        assert_eq!((err.line, err.column), (3, 5));
        assert!(err.message.contains("touch_start"));
    }

    #[test]
    fn test_validate_rejects_wrong_param_type() {
        let host = ".func ev.default.timer void\n.param x integer\n  ret\n.end\n.handler default timer ev.default.timer\n";
        assert!(validate_handlers(host, &PositionMap::new()).is_err());

        let host = ".func ev.default.changed void\n.param c float\n  ret\n.end\n.handler default changed ev.default.changed\n";
        let mut positions = PositionMap::new();
        positions.record(2, 1, Span::new(7, 13));
        let err = validate_handlers(host, &positions).unwrap_err();
        assert_eq!((err.line, err.column), (7, 13));
    }
}
