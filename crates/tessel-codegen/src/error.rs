use std::fmt;

use tessel_syntax::{ParseError, Span};
use thiserror::Error;

/// A guest script that cannot be turned into a host module
///
/// Line and column are 1-based and refer to the guest source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("({line}, {column}): ERROR: {message}")]
pub struct CompileError {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl CompileError {
    pub fn at(span: Span, message: impl Into<String>) -> Self {
        Self {
            line: span.line,
            column: span.column,
            message: message.into(),
        }
    }
}

impl From<ParseError> for CompileError {
    fn from(err: ParseError) -> Self {
        Self::at(err.span, format!("syntax error: {}", err.message))
    }
}

/// Non-fatal diagnostic produced while generating
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileWarning {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl CompileWarning {
    pub fn at(span: Span, message: impl Into<String>) -> Self {
        Self {
            line: span.line,
            column: span.column,
            message: message.into(),
        }
    }
}

impl fmt::Display for CompileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}): WARNING: {}", self.line, self.column, self.message)
    }
}
