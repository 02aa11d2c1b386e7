use thiserror::Error;

use crate::span::Span;

/// Failure to turn guest source into a syntax tree
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("({}, {}): syntax error: {message}", span.line, span.column)]
pub struct ParseError {
    pub span: Span,
    pub message: String,
}

impl ParseError {
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
        }
    }
}
