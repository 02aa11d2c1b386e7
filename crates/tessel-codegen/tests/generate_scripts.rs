//! Generates host modules from whole scripts and checks the diagnostics

use tessel_codegen::{compile_source, ApiSignature, CompileError, ValueType};

fn catalog() -> Vec<ApiSignature> {
    vec![
        ApiSignature::new("llSay", &[ValueType::Integer, ValueType::String], ValueType::Void),
        ApiSignature::new("llOwnerSay", &[ValueType::String], ValueType::Void),
        ApiSignature::new("llSleep", &[ValueType::Float], ValueType::Void).delayed(),
        ApiSignature::new("llSetTimerEvent", &[ValueType::Float], ValueType::Void),
        ApiSignature::new("llDetectedName", &[ValueType::Integer], ValueType::String),
    ]
}

fn compile(src: &str) -> Result<tessel_codegen::Generated, CompileError> {
    compile_source(src, &catalog())
}

#[test]
fn test_counter_script() {
    let src = r#"
integer count;

default
{
    state_entry()
    {
        llSetTimerEvent(1.0);
    }

    timer()
    {
        count += 1;
        llOwnerSay("tick " + (string)count);
    }
}
"#;
    let out = compile(src).unwrap();
    assert!(out.host_source.contains(".global count integer"));
    assert!(out.host_source.contains(".state default"));
    assert!(out.host_source.contains(".handler default timer ev.default.timer"));
    assert!(out.host_source.contains("  cast string"));
    assert!(out.warnings.is_empty());
}

#[test]
fn test_handler_with_wrong_arity_is_rejected_at_its_position() {
    let src = "default\n{\n    touch_start()\n    {\n    }\n}\n";
    let err = compile(src).unwrap_err();
    assert_eq!((err.line, err.column), (3, 5));
    assert!(err.message.contains("touch_start"));
}

#[test]
fn test_unknown_event_is_rejected() {
    let err = compile("default { on_click(integer n) { } }").unwrap_err();
    assert!(err.message.contains("not a valid event"));
    assert_eq!(err.line, 1);
}

#[test]
fn test_handler_parameter_type_is_checked() {
    let src = "default\n{\n    changed(string what)\n    {\n    }\n}\n";
    let err = compile(src).unwrap_err();
    assert_eq!((err.line, err.column), (3, 20));
    assert!(err.message.contains("must be integer"));
}

#[test]
fn test_syntax_error_carries_position() {
    let err = compile("default {\n  state_entry() {\n    llSay(0 \"x\");\n  }\n}").unwrap_err();
    assert_eq!(err.line, 3);
    assert!(err.message.starts_with("syntax error"));
}

#[test]
fn test_sleep_creates_continuation_point() {
    let src = r#"
default
{
    touch_start(integer n)
    {
        llSay(0, "one");
        llSleep(2.0);
        llSay(0, "two");
    }
}
"#;
    let out = compile(src).unwrap();
    assert_eq!(out.continuation_points, 1);
    let body: Vec<&str> = out
        .host_source
        .lines()
        .skip_while(|l| !l.starts_with(".func ev.default.touch_start"))
        .collect();
    assert_eq!(body[0], ".func ev.default.touch_start void resumable");
    let sleep = body.iter().position(|l| *l == "  api llSleep 1").unwrap();
    assert_eq!(body[sleep + 1], "  yield 0");
}

#[test]
fn test_position_map_points_back_to_source() {
    let src = "default\n{\n    state_entry()\n    {\n        llOwnerSay(\"hi\");\n    }\n}\n";
    let out = compile(src).unwrap();
    let (idx, _) = out
        .host_source
        .lines()
        .enumerate()
        .find(|(_, l)| l.trim() == "api llOwnerSay 1")
        .unwrap();
    let span = out.positions.lookup(idx as u32 + 1, 3).unwrap();
    assert_eq!((span.line, span.column), (5, 9));
}

#[test]
fn test_evaluation_order_warning() {
    let src = "default { state_entry() { integer i; llSay(i++, (string)i); } }";
    let out = compile(src).unwrap();
    assert_eq!(out.warnings.len(), 1);
    assert!(out.warnings[0].to_string().contains("WARNING"));
}
