use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tessel_codegen::host::INSTRUCTION_COLUMN;
use tessel_codegen::ValueType;

use super::module::{FuncId, Instr};
use super::ops;
use super::value::{Quat, Value, Vector3};
use crate::api::{HostApi, ScriptContext};
use crate::error::ScriptFault;
use crate::sandbox::LinkedModule;

/// Instructions between checks of the abort flag
const ABORT_CHECK_INTERVAL: u64 = 1000;

/// Bounds on one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecLimits {
    /// Instructions per dispatch; `None` runs unbounded
    pub fuel: Option<u64>,
    pub max_call_depth: usize,
    pub max_stack: usize,
    pub max_string_len: usize,
    pub max_list_len: usize,
}

impl ExecLimits {
    pub fn unlimited() -> Self {
        Self {
            fuel: None,
            max_call_depth: usize::MAX,
            max_stack: usize::MAX,
            max_string_len: usize::MAX,
            max_list_len: usize::MAX,
        }
    }
}

#[derive(Debug, Clone)]
struct Frame {
    func: FuncId,
    pc: usize,
    locals: Vec<Value>,
    /// Operand stack height when the frame was entered
    base: usize,
}

/// Where a suspended handler stopped: its frames and operand stack
#[derive(Debug, Clone, Default)]
pub struct Continuation {
    frames: Vec<Frame>,
    stack: Vec<Value>,
}

impl Continuation {
    /// Procedure the suspended handler started in
    pub fn entry(&self) -> Option<FuncId> {
        self.frames.first().map(|f| f.func)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// How a dispatch ended
#[derive(Debug)]
pub enum Outcome {
    Completed,
    /// Paused after a delay-bearing call; resume once `wake_at` has passed
    Suspended {
        continuation: Continuation,
        wake_at: Instant,
    },
    /// `state x;` executed; carries the target state index
    StateChange(usize),
    /// The script asked to be reset
    Reset,
}

enum Step {
    Next,
    Call(FuncId, Vec<Value>),
    Return(Option<Value>),
    Suspend(Instant),
    State(usize),
    Reset,
}

fn collision() -> ScriptFault {
    ScriptFault::runtime("Stack-Heap Collision")
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, ScriptFault> {
    stack
        .pop()
        .ok_or_else(|| ScriptFault::runtime("operand stack underflow"))
}

fn pop_n(stack: &mut Vec<Value>, n: usize) -> Result<Vec<Value>, ScriptFault> {
    if stack.len() < n {
        return Err(ScriptFault::runtime("operand stack underflow"));
    }
    Ok(stack.split_off(stack.len() - n))
}

/// Runs one linked module against a script's globals
pub struct Interpreter<'a> {
    linked: &'a LinkedModule,
    api: &'a HostApi,
    limits: ExecLimits,
    abort: &'a AtomicBool,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        linked: &'a LinkedModule,
        api: &'a HostApi,
        limits: ExecLimits,
        abort: &'a AtomicBool,
    ) -> Self {
        Self {
            linked,
            api,
            limits,
            abort,
        }
    }

    /// Fresh globals produced by the module's initializer
    pub fn init_globals(&self, ctx: &mut ScriptContext<'_>) -> Result<Vec<Value>, ScriptFault> {
        let module = &self.linked.module;
        let mut globals: Vec<Value> = module
            .globals
            .iter()
            .map(|(_, ty)| Value::default_for(*ty))
            .collect();
        self.call(module.init, Vec::new(), &mut globals, ctx)?;
        Ok(globals)
    }

    /// Start a procedure from its first instruction
    pub fn call(
        &self,
        func: FuncId,
        args: Vec<Value>,
        globals: &mut [Value],
        ctx: &mut ScriptContext<'_>,
    ) -> Result<Outcome, ScriptFault> {
        let frame = self.enter(func, args, 0)?;
        self.run(vec![frame], Vec::new(), globals, ctx)
    }

    /// Continue a suspended handler after the call it paused on
    pub fn resume(
        &self,
        continuation: Continuation,
        globals: &mut [Value],
        ctx: &mut ScriptContext<'_>,
    ) -> Result<Outcome, ScriptFault> {
        self.run(continuation.frames, continuation.stack, globals, ctx)
    }

    fn enter(&self, func: FuncId, args: Vec<Value>, base: usize) -> Result<Frame, ScriptFault> {
        let function = self
            .linked
            .module
            .functions
            .get(func)
            .ok_or_else(|| ScriptFault::runtime("call to unknown procedure"))?;
        if args.len() != function.params.len() {
            return Err(ScriptFault::runtime(format!(
                "{} expects {} argument(s), got {}",
                function.name,
                function.params.len(),
                args.len()
            )));
        }
        let mut locals: Vec<Value> = function
            .locals
            .iter()
            .map(|(_, ty)| Value::default_for(*ty))
            .collect();
        for (i, (arg, ty)) in args.into_iter().zip(&function.params).enumerate() {
            locals[i] = if arg.value_type() == *ty {
                arg
            } else {
                arg.cast(*ty)
            };
        }
        Ok(Frame {
            func,
            pc: 0,
            locals,
            base,
        })
    }

    fn run(
        &self,
        mut frames: Vec<Frame>,
        mut stack: Vec<Value>,
        globals: &mut [Value],
        ctx: &mut ScriptContext<'_>,
    ) -> Result<Outcome, ScriptFault> {
        let module = &*self.linked.module;
        let mut executed: u64 = 0;

        loop {
            let Some(frame) = frames.last_mut() else {
                return Ok(Outcome::Completed);
            };
            let function = &module.functions[frame.func];
            let at = frame.pc;

            executed += 1;
            if executed % ABORT_CHECK_INTERVAL == 0 && self.abort.load(Ordering::Acquire) {
                return Err(ScriptFault::Abort);
            }
            if self.limits.fuel.is_some_and(|fuel| executed > fuel) {
                return Err(self.locate(
                    ScriptFault::runtime("execution budget exhausted"),
                    frame.func,
                    at,
                ));
            }

            let step = match function.code.get(at) {
                Some(instr) => {
                    frame.pc += 1;
                    let func = frame.func;
                    self.step(instr, frame, &mut stack, globals, ctx)
                        .map_err(|fault| self.locate(fault, func, at))?
                }
                // Falling off the end returns
                None => Step::Return(None),
            };

            match step {
                Step::Next => {}
                Step::Call(func, args) => {
                    if frames.len() >= self.limits.max_call_depth {
                        let caller = frames.last().map(|f| f.func).unwrap_or(func);
                        return Err(self.locate(collision(), caller, at));
                    }
                    let frame = self.enter(func, args, stack.len())?;
                    frames.push(frame);
                }
                Step::Return(value) => {
                    if let Some(done) = frames.pop() {
                        stack.truncate(done.base);
                    }
                    if frames.is_empty() {
                        return Ok(Outcome::Completed);
                    }
                    if let Some(value) = value {
                        stack.push(value);
                    }
                }
                Step::Suspend(wake_at) => {
                    return Ok(Outcome::Suspended {
                        continuation: Continuation { frames, stack },
                        wake_at,
                    });
                }
                Step::State(index) => return Ok(Outcome::StateChange(index)),
                Step::Reset => return Ok(Outcome::Reset),
            }
        }
    }

    /// Fill in the guest position of a runtime fault
    fn locate(&self, fault: ScriptFault, func: FuncId, at: usize) -> ScriptFault {
        match fault {
            ScriptFault::Unclassified {
                message,
                line: 0,
                column: 0,
            } => {
                let module = &self.linked.module;
                let gen_line = module
                    .functions
                    .get(func)
                    .and_then(|f| f.lines.get(at))
                    .copied()
                    .unwrap_or(0);
                let span = module.positions.translate(gen_line, INSTRUCTION_COLUMN);
                ScriptFault::Unclassified {
                    message,
                    line: span.line,
                    column: span.column,
                }
            }
            other => other,
        }
    }

    fn push(&self, stack: &mut Vec<Value>, value: Value) -> Result<(), ScriptFault> {
        let too_big = match &value {
            Value::String(s) | Value::Key(s) => s.len() > self.limits.max_string_len,
            Value::List(l) => l.len() > self.limits.max_list_len,
            _ => false,
        };
        if too_big || stack.len() >= self.limits.max_stack {
            return Err(collision());
        }
        stack.push(value);
        Ok(())
    }

    fn step(
        &self,
        instr: &Instr,
        frame: &mut Frame,
        stack: &mut Vec<Value>,
        globals: &mut [Value],
        ctx: &mut ScriptContext<'_>,
    ) -> Result<Step, ScriptFault> {
        match instr {
            Instr::PushInt(v) => self.push(stack, Value::Integer(*v))?,
            Instr::PushFloat(v) => self.push(stack, Value::Float(*v))?,
            Instr::PushStr(s) => self.push(stack, Value::String(s.clone()))?,
            Instr::PushKey(s) => self.push(stack, Value::Key(s.clone()))?,
            Instr::MkVec => {
                let parts = pop_n(stack, 3)?;
                let v = Vector3::new(parts[0].as_float(), parts[1].as_float(), parts[2].as_float());
                self.push(stack, Value::Vector(v))?;
            }
            Instr::MkRot => {
                let parts = pop_n(stack, 4)?;
                let q = Quat::new(
                    parts[0].as_float(),
                    parts[1].as_float(),
                    parts[2].as_float(),
                    parts[3].as_float(),
                );
                self.push(stack, Value::Rotation(q))?;
            }
            Instr::MkList(n) => {
                let items = pop_n(stack, *n)?;
                self.push(stack, Value::List(items))?;
            }
            Instr::Load(i) => {
                let v = frame.locals.get(*i).cloned().unwrap_or(Value::Integer(0));
                self.push(stack, v)?;
            }
            Instr::Store(i) => {
                let v = pop(stack)?;
                if let Some(slot) = frame.locals.get_mut(*i) {
                    *slot = v;
                }
            }
            Instr::GLoad(i) => {
                let v = globals.get(*i).cloned().unwrap_or(Value::Integer(0));
                self.push(stack, v)?;
            }
            Instr::GStore(i) => {
                let v = pop(stack)?;
                if let Some(slot) = globals.get_mut(*i) {
                    *slot = v;
                }
            }
            Instr::Dup => {
                let top = stack
                    .last()
                    .cloned()
                    .ok_or_else(|| ScriptFault::runtime("operand stack underflow"))?;
                self.push(stack, top)?;
            }
            Instr::Pop => {
                pop(stack)?;
            }
            Instr::GetField(field) => {
                let v = pop(stack)?;
                self.push(stack, ops::get_field(&v, *field)?)?;
            }
            Instr::SetField(field) => {
                let component = pop(stack)?;
                let target = pop(stack)?;
                self.push(stack, ops::set_field(target, *field, &component)?)?;
            }
            Instr::Binary(op) => {
                let b = pop(stack)?;
                let a = pop(stack)?;
                self.push(stack, ops::binary(*op, a, b)?)?;
            }
            Instr::Unary(op) => {
                let v = pop(stack)?;
                self.push(stack, ops::unary(*op, v)?)?;
            }
            Instr::Cast(ty) => {
                let v = pop(stack)?;
                self.push(stack, v.cast(*ty))?;
            }
            Instr::Jmp(target) => frame.pc = *target,
            Instr::Jz(target) => {
                if !pop(stack)?.is_true() {
                    frame.pc = *target;
                }
            }
            Instr::Call { func, argc } => {
                let args = pop_n(stack, *argc)?;
                return Ok(Step::Call(*func, args));
            }
            Instr::Api { import, argc } => {
                let args = pop_n(stack, *argc)?;
                let function = self
                    .linked
                    .imports
                    .get(*import)
                    .and_then(|&i| self.api.get(i))
                    .ok_or_else(|| ScriptFault::runtime("call to unlinked host function"))?;
                if let Some(delay) = function.delay.resolve(&args) {
                    ctx.delay(delay);
                }
                let result = (function.func)(ctx, &args)?;
                if function.signature.ret != ValueType::Void {
                    self.push(stack, result)?;
                }
                if ctx.reset_requested() {
                    return Ok(Step::Reset);
                }
            }
            Instr::Yield(_) => {
                if let Some(delay) = ctx.take_delay() {
                    return Ok(Step::Suspend(Instant::now() + delay));
                }
            }
            Instr::Ret => return Ok(Step::Return(None)),
            Instr::RetV => return Ok(Step::Return(Some(pop(stack)?))),
            Instr::State(index) => return Ok(Step::State(*index)),
        }
        Ok(Step::Next)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tessel_codegen::EventKind;
    use tessel_events::{AgentId, ItemId, ObjectId};

    use super::*;
    use crate::config::PermissionTier;
    use crate::sandbox::{Sandbox, TrustedSandbox};
    use crate::testing::{compile, Recorder};
    use crate::vm::CompiledModule;

    struct Harness {
        api: HostApi,
        linked: LinkedModule,
        services: Recorder,
        abort: AtomicBool,
        limits: ExecLimits,
    }

    impl Harness {
        fn new(source: &str) -> Self {
            let api = HostApi::standard();
            let module = compile(source);
            let linked = TrustedSandbox
                .link(module, &api, PermissionTier::Full)
                .unwrap();
            Self {
                api,
                linked,
                services: Recorder::default(),
                abort: AtomicBool::new(false),
                limits: ExecLimits::unlimited(),
            }
        }

        fn module(&self) -> &Arc<CompiledModule> {
            &self.linked.module
        }

        fn with<R>(&self, f: impl FnOnce(&Interpreter<'_>, &mut ScriptContext<'_>) -> R) -> R {
            let interp = Interpreter::new(&self.linked, &self.api, self.limits, &self.abort);
            let mut base = Instant::now();
            let mut ctx = ScriptContext::new(
                &self.services,
                ObjectId(1),
                ItemId(2),
                AgentId(3),
                "test",
                0,
                &[],
                &mut base,
            );
            f(&interp, &mut ctx)
        }

        fn fire(&self, globals: &mut Vec<Value>, event: EventKind, args: Vec<Value>) -> Result<Outcome, ScriptFault> {
            let func = self.module().dispatch(0, event).expect("handler exists");
            self.with(|interp, ctx| interp.call(func, args, globals, ctx))
        }

        fn globals(&self) -> Vec<Value> {
            self.with(|interp, ctx| interp.init_globals(ctx)).unwrap()
        }

        fn chat(&self) -> Vec<String> {
            self.services.world.chat_text()
        }
    }

    #[test]
    fn test_globals_initialized_in_order() {
        let h = Harness::new(
            "integer a = 2; float b = 1.5; vector v = <1, 2, 3>; list l = [a, b];\n\
             default { state_entry() { } }",
        );
        let globals = h.globals();
        assert_eq!(globals[0], Value::Integer(2));
        assert_eq!(globals[1], Value::Float(1.5));
        assert_eq!(globals[2], Value::Vector(Vector3::new(1.0, 2.0, 3.0)));
        assert_eq!(globals[3], Value::List(vec![Value::Integer(2), Value::Float(1.5)]));
    }

    #[test]
    fn test_loops_and_calls() {
        let h = Harness::new(
            r#"
integer square(integer x) { return x * x; }
default
{
    touch_start(integer n)
    {
        integer i;
        integer total = 0;
        for (i = 1; i <= n; ++i) total += square(i);
        llSay(0, (string)total);
    }
}
"#,
        );
        let mut globals = h.globals();
        let outcome = h
            .fire(&mut globals, EventKind::TouchStart, vec![Value::Integer(3)])
            .unwrap();
        assert!(matches!(outcome, Outcome::Completed));
        assert_eq!(h.chat(), vec!["14"]);
    }

    #[test]
    fn test_suspend_and_resume_after_the_call() {
        let h = Harness::new(
            r#"
integer count;
default
{
    touch_start(integer n)
    {
        count += 1;
        llSay(0, "before");
        llSleep(2.0);
        llSay(0, "after " + (string)count);
    }
}
"#,
        );
        let mut globals = h.globals();
        let started = Instant::now();
        let outcome = h
            .fire(&mut globals, EventKind::TouchStart, vec![Value::Integer(1)])
            .unwrap();
        let Outcome::Suspended {
            continuation,
            wake_at,
        } = outcome
        else {
            panic!("expected suspension");
        };
        assert!(wake_at >= started + Duration::from_secs(2));
        assert_eq!(h.chat(), vec!["before"]);

        let outcome = h
            .with(|interp, ctx| interp.resume(continuation, &mut globals, ctx))
            .unwrap();
        assert!(matches!(outcome, Outcome::Completed));
        assert_eq!(h.chat(), vec!["before", "after 1"]);
    }

    #[test]
    fn test_suspension_inside_user_function() {
        let h = Harness::new(
            r#"
nap(float t) { llSleep(t); llSay(0, "woke"); }
default { touch_start(integer n) { nap(0.5); llSay(0, "done"); } }
"#,
        );
        let mut globals = h.globals();
        let outcome = h
            .fire(&mut globals, EventKind::TouchStart, vec![Value::Integer(1)])
            .unwrap();
        let Outcome::Suspended { continuation, .. } = outcome else {
            panic!("expected suspension");
        };
        assert_eq!(continuation.depth(), 2);
        h.with(|interp, ctx| interp.resume(continuation, &mut globals, ctx))
            .unwrap();
        assert_eq!(h.chat(), vec!["woke", "done"]);
    }

    #[test]
    fn test_state_change_outcome() {
        let h = Harness::new(
            "default { touch_start(integer n) { state other; } }\n\
             state other { state_entry() { } }",
        );
        let mut globals = h.globals();
        let outcome = h
            .fire(&mut globals, EventKind::TouchStart, vec![Value::Integer(1)])
            .unwrap();
        assert!(matches!(outcome, Outcome::StateChange(1)));
    }

    #[test]
    fn test_math_error_position_is_translated() {
        let h = Harness::new(
            "default\n{\n    touch_start(integer n)\n    {\n        integer z = n / 0;\n    }\n}\n",
        );
        let mut globals = h.globals();
        let fault = h
            .fire(&mut globals, EventKind::TouchStart, vec![Value::Integer(1)])
            .unwrap_err();
        match fault {
            ScriptFault::Unclassified {
                message,
                line,
                column,
            } => {
                assert_eq!(message, "Math Error");
                assert_eq!(line, 5);
                assert_eq!(column, 21);
            }
            other => panic!("unexpected fault {:?}", other),
        }
    }

    #[test]
    fn test_fuel_exhaustion_faults() {
        let mut h = Harness::new("default { touch_start(integer n) { while (TRUE) { } } }");
        h.limits.fuel = Some(500);
        let mut globals = h.globals();
        let fault = h
            .fire(&mut globals, EventKind::TouchStart, vec![Value::Integer(1)])
            .unwrap_err();
        assert!(matches!(fault, ScriptFault::Unclassified { .. }));
    }

    #[test]
    fn test_abort_flag_stops_a_runaway_handler() {
        let h = Harness::new("default { touch_start(integer n) { while (TRUE) { } } }");
        h.abort.store(true, Ordering::Release);
        let mut globals = h.globals();
        let fault = h
            .fire(&mut globals, EventKind::TouchStart, vec![Value::Integer(1)])
            .unwrap_err();
        assert_eq!(fault, ScriptFault::Abort);
    }

    #[test]
    fn test_reset_request_ends_the_handler() {
        let h = Harness::new(
            "default { touch_start(integer n) { llResetScript(); llSay(0, \"unreachable\"); } }",
        );
        let mut globals = h.globals();
        let outcome = h
            .fire(&mut globals, EventKind::TouchStart, vec![Value::Integer(1)])
            .unwrap();
        assert!(matches!(outcome, Outcome::Reset));
        assert!(h.chat().is_empty());
    }

    #[test]
    fn test_recursion_depth_is_bounded() {
        let mut h = Harness::new(
            "integer f(integer x) { return f(x + 1); }\n\
             default { touch_start(integer n) { f(0); } }",
        );
        h.limits.max_call_depth = 16;
        let mut globals = h.globals();
        let fault = h
            .fire(&mut globals, EventKind::TouchStart, vec![Value::Integer(1)])
            .unwrap_err();
        assert!(matches!(fault, ScriptFault::Unclassified { ref message, .. } if message == "Stack-Heap Collision"));
    }
}
