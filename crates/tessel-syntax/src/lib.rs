/// Syntax tree for tessel guest scripts
///
/// The engine treats the parser as an external collaborator: anything that can
/// produce a [`Script`] can feed the code generator. This crate ships the
/// reference lexer and parser so the pipeline is usable end to end.
pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod span;

pub use ast::*;
pub use error::ParseError;
pub use parser::parse;
pub use span::Span;
