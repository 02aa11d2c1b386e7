use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use tessel_codegen::host::{self, INIT_PROCEDURE};
use tessel_codegen::literal::unquote;
use tessel_codegen::{EventKind, PositionMap, ValueType};
use tessel_syntax::{BinaryOp, Field, UnaryOp};
use thiserror::Error;
use tracing::debug;

pub type FuncId = usize;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line}: {message}")]
pub struct AssembleError {
    pub line: u32,
    pub message: String,
}

impl AssembleError {
    fn new(line: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    PushInt(i32),
    PushFloat(f64),
    PushStr(String),
    PushKey(String),
    MkVec,
    MkRot,
    MkList(usize),
    Load(usize),
    Store(usize),
    GLoad(usize),
    GStore(usize),
    Dup,
    Pop,
    GetField(Field),
    SetField(Field),
    Binary(BinaryOp),
    Unary(UnaryOp),
    Cast(ValueType),
    Jmp(usize),
    Jz(usize),
    Call { func: FuncId, argc: usize },
    Api { import: usize, argc: usize },
    Yield(u32),
    Ret,
    RetV,
    State(usize),
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<ValueType>,
    /// Parameters first, then declared locals
    pub locals: Vec<(String, ValueType)>,
    pub ret: ValueType,
    pub resumable: bool,
    pub code: Vec<Instr>,
    /// Host text line of each instruction
    pub lines: Vec<u32>,
}

/// An assembled host module, shared by every instance of the same script
#[derive(Debug, Clone)]
pub struct CompiledModule {
    pub hash: u64,
    pub globals: Vec<(String, ValueType)>,
    pub states: Vec<String>,
    pub functions: Vec<Function>,
    pub init: FuncId,
    /// Per state, the procedure handling each event kind
    pub dispatch: Vec<[Option<FuncId>; EventKind::COUNT]>,
    /// Host API names the module calls, in first-use order
    pub imports: Vec<String>,
    pub positions: PositionMap,
}

impl CompiledModule {
    pub fn dispatch(&self, state: usize, event: EventKind) -> Option<FuncId> {
        self.dispatch.get(state)?[event.index()]
    }

    pub fn handles(&self, state: usize, event: EventKind) -> bool {
        self.dispatch(state, event).is_some()
    }

    pub fn state_index(&self, name: &str) -> Option<usize> {
        self.states.iter().position(|s| s == name)
    }

    pub fn state_name(&self, index: usize) -> &str {
        self.states.get(index).map(String::as_str).unwrap_or("default")
    }

    pub fn global_index(&self, name: &str) -> Option<usize> {
        self.globals.iter().position(|(n, _)| n == name)
    }

    /// Whether any procedure may suspend mid-event
    pub fn is_resumable(&self) -> bool {
        self.functions.iter().any(|f| f.resumable)
    }

    pub fn hash_hex(&self) -> String {
        format!("{:016x}", self.hash)
    }
}

struct Pending {
    func: Function,
    labels: HashMap<String, usize>,
    /// (instruction index, label, line) of jumps awaiting resolution
    fixups: Vec<(usize, String, u32)>,
}

/// Assemble host text produced by the code generator
pub fn assemble(text: &str, positions: PositionMap) -> Result<CompiledModule, AssembleError> {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    let hash = hasher.finish();

    // Procedures may call forward, so index them first
    let mut func_index = HashMap::new();
    let mut states = Vec::new();
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some(".func") => {
                if let Some(name) = parts.next() {
                    let next = func_index.len();
                    func_index.entry(name.to_string()).or_insert(next);
                }
            }
            Some(".state") => {
                if let Some(name) = parts.next() {
                    states.push(name.to_string());
                }
            }
            _ => {}
        }
    }

    let mut globals: Vec<(String, ValueType)> = Vec::new();
    let mut functions: Vec<Function> = Vec::new();
    let mut dispatch = vec![[None; EventKind::COUNT]; states.len()];
    let mut imports: Vec<String> = Vec::new();
    let mut current: Option<Pending> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx as u32 + 1;
        if raw.trim().is_empty() {
            continue;
        }

        if let Some(body) = raw.strip_prefix("  ") {
            let pending = current
                .as_mut()
                .ok_or_else(|| AssembleError::new(line_no, "instruction outside a procedure"))?;
            let instr = parse_instr(
                body.trim(),
                line_no,
                pending,
                &globals,
                &states,
                &func_index,
                &mut imports,
            )?;
            pending.func.code.push(instr);
            pending.func.lines.push(line_no);
            continue;
        }

        if let Some(label) = raw.strip_suffix(':') {
            let pending = current
                .as_mut()
                .ok_or_else(|| AssembleError::new(line_no, "label outside a procedure"))?;
            pending.labels.insert(label.to_string(), pending.func.code.len());
            continue;
        }

        let mut parts = raw.split_whitespace();
        let directive = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();
        match (directive, args.as_slice()) {
            (".global", [name, ty]) => {
                globals.push((name.to_string(), parse_type(ty, line_no)?));
            }
            (".state", [_]) => {}
            (".func", [name, ret, rest @ ..]) => {
                if current.is_some() {
                    return Err(AssembleError::new(line_no, "nested .func"));
                }
                current = Some(Pending {
                    func: Function {
                        name: name.to_string(),
                        params: Vec::new(),
                        locals: Vec::new(),
                        ret: parse_type(ret, line_no)?,
                        resumable: rest.first() == Some(&"resumable"),
                        code: Vec::new(),
                        lines: Vec::new(),
                    },
                    labels: HashMap::new(),
                    fixups: Vec::new(),
                });
            }
            (".param", [name, ty]) | (".local", [name, ty]) => {
                let pending = current
                    .as_mut()
                    .ok_or_else(|| AssembleError::new(line_no, "declaration outside a procedure"))?;
                let ty = parse_type(ty, line_no)?;
                if directive == ".param" {
                    pending.func.params.push(ty);
                }
                pending.func.locals.push((name.to_string(), ty));
            }
            (".end", []) => {
                let pending = current
                    .take()
                    .ok_or_else(|| AssembleError::new(line_no, ".end without .func"))?;
                functions.push(finish(pending)?);
            }
            (".handler", [state, event, proc_name]) => {
                let state = states
                    .iter()
                    .position(|s| s == state)
                    .ok_or_else(|| AssembleError::new(line_no, format!("unknown state {}", state)))?;
                let event = EventKind::from_name(event)
                    .ok_or_else(|| AssembleError::new(line_no, format!("unknown event {}", event)))?;
                let func = *func_index.get(*proc_name).ok_or_else(|| {
                    AssembleError::new(line_no, format!("unknown procedure {}", proc_name))
                })?;
                dispatch[state][event.index()] = Some(func);
            }
            _ => {
                return Err(AssembleError::new(
                    line_no,
                    format!("malformed line '{}'", raw.trim()),
                ))
            }
        }
    }

    if current.is_some() {
        return Err(AssembleError::new(text.lines().count() as u32, "missing .end"));
    }
    if states.is_empty() {
        return Err(AssembleError::new(1, "module declares no states"));
    }
    // Declaration order and index order must agree for calls to resolve
    for (name, &index) in &func_index {
        if functions.get(index).map(|f| &f.name) != Some(name) {
            return Err(AssembleError::new(0, format!("procedure {} declared twice", name)));
        }
    }
    let init = *func_index
        .get(INIT_PROCEDURE)
        .ok_or_else(|| AssembleError::new(0, "module has no initializer"))?;

    debug!(
        target: "scripting",
        "Assembled module {:016x}: {} procedure(s), {} import(s)",
        hash,
        functions.len(),
        imports.len()
    );

    Ok(CompiledModule {
        hash,
        globals,
        states,
        functions,
        init,
        dispatch,
        imports,
        positions,
    })
}

fn finish(mut pending: Pending) -> Result<Function, AssembleError> {
    for (at, label, line) in std::mem::take(&mut pending.fixups) {
        let target = *pending
            .labels
            .get(&label)
            .ok_or_else(|| AssembleError::new(line, format!("unknown label {}", label)))?;
        match &mut pending.func.code[at] {
            Instr::Jmp(t) | Instr::Jz(t) => *t = target,
            _ => {}
        }
    }
    Ok(pending.func)
}

fn parse_type(text: &str, line: u32) -> Result<ValueType, AssembleError> {
    ValueType::from_name(text).ok_or_else(|| AssembleError::new(line, format!("unknown type {}", text)))
}

fn parse_instr(
    body: &str,
    line: u32,
    pending: &mut Pending,
    globals: &[(String, ValueType)],
    states: &[String],
    funcs: &HashMap<String, FuncId>,
    imports: &mut Vec<String>,
) -> Result<Instr, AssembleError> {
    let (op, arg) = match body.split_once(' ') {
        Some((op, arg)) => (op, arg.trim()),
        None => (body, ""),
    };
    let bad = |what: &str| AssembleError::new(line, format!("bad operand for {}: {}", what, arg));

    let local = |name: &str| {
        pending
            .func
            .locals
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| AssembleError::new(line, format!("unknown local {}", name)))
    };
    let global = |name: &str| {
        globals
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| AssembleError::new(line, format!("unknown global {}", name)))
    };
    let count = |text: &str| text.parse::<usize>().map_err(|_| bad(op));

    let instr = match op {
        "push.i" => Instr::PushInt(arg.parse().map_err(|_| bad(op))?),
        "push.f" => Instr::PushFloat(arg.parse().map_err(|_| bad(op))?),
        "push.s" => Instr::PushStr(unquote(arg).ok_or_else(|| bad(op))?),
        "push.k" => Instr::PushKey(unquote(arg).ok_or_else(|| bad(op))?),
        "mkvec" => Instr::MkVec,
        "mkrot" => Instr::MkRot,
        "mklist" => Instr::MkList(count(arg)?),
        "load" => Instr::Load(local(arg)?),
        "store" => Instr::Store(local(arg)?),
        "gload" => Instr::GLoad(global(arg)?),
        "gstore" => Instr::GStore(global(arg)?),
        "dup" => Instr::Dup,
        "pop" => Instr::Pop,
        "getf" => Instr::GetField(host::field_from_mnemonic(arg).ok_or_else(|| bad(op))?),
        "setf" => Instr::SetField(host::field_from_mnemonic(arg).ok_or_else(|| bad(op))?),
        "cast" => Instr::Cast(parse_type(arg, line)?),
        "jmp" | "jz" => {
            pending
                .fixups
                .push((pending.func.code.len(), arg.to_string(), line));
            if op == "jmp" {
                Instr::Jmp(0)
            } else {
                Instr::Jz(0)
            }
        }
        "call" => {
            let (name, argc) = arg.split_once(' ').ok_or_else(|| bad(op))?;
            let func = *funcs
                .get(name)
                .ok_or_else(|| AssembleError::new(line, format!("unknown procedure {}", name)))?;
            Instr::Call {
                func,
                argc: count(argc.trim())?,
            }
        }
        "api" => {
            let (name, argc) = arg.split_once(' ').ok_or_else(|| bad(op))?;
            let import = match imports.iter().position(|i| i == name) {
                Some(i) => i,
                None => {
                    imports.push(name.to_string());
                    imports.len() - 1
                }
            };
            Instr::Api {
                import,
                argc: count(argc.trim())?,
            }
        }
        "yield" => Instr::Yield(arg.parse().map_err(|_| bad(op))?),
        "ret" => Instr::Ret,
        "retv" => Instr::RetV,
        "state" => Instr::State(
            states
                .iter()
                .position(|s| s == arg)
                .ok_or_else(|| AssembleError::new(line, format!("unknown state {}", arg)))?,
        ),
        other => {
            if let Some(bop) = host::binary_from_mnemonic(other) {
                Instr::Binary(bop)
            } else if let Some(uop) = host::unary_from_mnemonic(other) {
                Instr::Unary(uop)
            } else {
                return Err(AssembleError::new(line, format!("unknown instruction {}", other)));
            }
        }
    };
    Ok(instr)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODULE: &str = "\
.global count integer
.state default
.state busy
.func $init void
  push.i 0
  gstore count
  ret
.end
.func fn.bump integer
.param by integer
  gload count
  load by
  add
  dup
  gstore count
  retv
.end
.func ev.default.touch_start void resumable
.param n integer
.local i integer
L1:
  load n
  jz L2
  push.i 1
  call fn.bump 1
  pop
  push.f 0.5
  api llSleep 1
  yield 0
L2:
  state busy
  ret
.end
.handler default touch_start ev.default.touch_start
";

    #[test]
    fn test_assemble_resolves_names() {
        let module = assemble(MODULE, PositionMap::new()).unwrap();
        assert_eq!(module.globals, vec![("count".to_string(), ValueType::Integer)]);
        assert_eq!(module.states, vec!["default", "busy"]);
        assert_eq!(module.init, 0);
        assert_eq!(module.imports, vec!["llSleep"]);

        let handler = module.dispatch(0, EventKind::TouchStart).unwrap();
        let func = &module.functions[handler];
        assert!(func.resumable);
        assert_eq!(func.params, vec![ValueType::Integer]);
        assert_eq!(func.locals.len(), 2);
        assert_eq!(func.code[1], Instr::Jz(8));
        assert_eq!(func.code[3], Instr::Call { func: 1, argc: 1 });
        assert_eq!(func.code[8], Instr::State(1));
        assert!(module.dispatch(1, EventKind::TouchStart).is_none());
    }

    #[test]
    fn test_instruction_lines_are_recorded() {
        let module = assemble(MODULE, PositionMap::new()).unwrap();
        assert_eq!(module.functions[0].lines, vec![5, 6, 7]);
    }

    #[test]
    fn test_unknown_label_is_an_error() {
        let text = ".state default\n.func $init void\n  jmp L9\n.end\n";
        let err = assemble(text, PositionMap::new()).unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_same_text_same_hash() {
        let a = assemble(MODULE, PositionMap::new()).unwrap();
        let b = assemble(MODULE, PositionMap::new()).unwrap();
        assert_eq!(a.hash, b.hash);
    }
}
