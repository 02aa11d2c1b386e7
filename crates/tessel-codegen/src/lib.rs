/// Code generator for tessel guest scripts
///
/// Turns a parsed [`tessel_syntax::Script`] into host module text: one
/// resumable procedure per event handler and user function, a dispatch table
/// mapping `(state, event)` to procedures, and a [`PositionMap`] that lets
/// runtime faults be reported in guest source coordinates.
pub mod api;
pub mod constants;
mod emit;
pub mod error;
pub mod events;
mod generator;
pub mod host;
pub mod literal;
mod order;
pub mod position_map;
mod scope;
pub mod types;

pub use api::{ApiCatalog, ApiSignature};
pub use error::{CompileError, CompileWarning};
pub use events::{validate_handlers, EventKind};
pub use generator::{generate, Generated};
pub use position_map::{PositionEntry, PositionMap};
pub use types::ValueType;

/// Parse and generate in one step
pub fn compile_source(
    source: &str,
    catalog: &dyn ApiCatalog,
) -> Result<Generated, CompileError> {
    let script = tessel_syntax::parse(source)?;
    generate(&script, catalog)
}
