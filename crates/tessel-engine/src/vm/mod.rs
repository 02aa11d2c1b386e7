//! In-process host VM: module assembly, values and the interpreter

mod interp;
mod module;
mod ops;
mod value;

pub use interp::{Continuation, ExecLimits, Interpreter, Outcome};
pub use module::{assemble, AssembleError, CompiledModule, FuncId, Function, Instr};
pub use value::{is_valid_key, Quat, Value, Vector3};
