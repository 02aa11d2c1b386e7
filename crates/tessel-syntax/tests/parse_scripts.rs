//! Parses complete scripts of the kind found in object inventories

use tessel_syntax::{parse, ExprKind, GlobalItem, StmtKind, TypeName};

const DOOR_SCRIPT: &str = r#"
// Simple swinging door
integer open = FALSE;
float swing = 90.;
rotation closed_rot;

toggle()
{
    open = !open;
    if (open) llSetText("open", <1, 1, 1>, 1.0);
    else llSetText("", ZERO_VECTOR, .0);
}

default
{
    state_entry()
    {
        closed_rot = <0, 0, 0, 1>;
        llSetTimerEvent(30.0);
    }

    touch_start(integer total_number)
    {
        integer i;
        for (i = 0; i < total_number; ++i)
        {
            llSay(0, llDetectedName(i) + " touched the door");
        }
        toggle();
    }

    timer()
    {
        if (open) toggle();
    }
}
"#;

#[test]
fn test_parse_door_script() {
    let script = parse(DOOR_SCRIPT).expect("door script parses");

    assert_eq!(script.globals.len(), 4);
    let GlobalItem::Variable(swing) = &script.globals[1] else {
        panic!("expected a variable");
    };
    assert_eq!(swing.ty, TypeName::Float);
    assert!(matches!(
        swing.init.as_ref().map(|e| &e.kind),
        Some(ExprKind::Float(text)) if text == "90."
    ));

    let default = &script.states[0];
    let names: Vec<&str> = default
        .handlers
        .iter()
        .map(|h| h.name.name.as_str())
        .collect();
    assert_eq!(names, vec!["state_entry", "touch_start", "timer"]);

    let touch = &default.handlers[1];
    assert_eq!(touch.params.len(), 1);
    assert!(matches!(touch.body.stmts[1].kind, StmtKind::For { .. }));
}

#[test]
fn test_handler_positions_are_one_based() {
    let script = parse(DOOR_SCRIPT).unwrap();
    let touch = &script.states[0].handlers[1];
    assert_eq!(touch.span.line, 22);
    assert_eq!(touch.span.column, 5);
}

#[test]
fn test_multiple_states() {
    let src = r#"
        default { touch_start(integer n) { state busy; } }
        state busy { state_entry() { llSleep(2.0); state default; } }
    "#;
    let script = parse(src).unwrap();
    assert_eq!(script.states.len(), 2);
    assert_eq!(script.states[1].name.name, "busy");
}
