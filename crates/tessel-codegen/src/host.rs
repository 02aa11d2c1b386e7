//! Mnemonics of the host instruction text shared by the generator and the
//! engine's assembler.
//!
//! A module is a sequence of lines. Directives start at column 1 with a dot,
//! labels end with a colon, instructions are indented by two spaces:
//!
//! ```text
//! .global count integer
//! .state default
//! .func ev.default.touch_start void resumable
//! .param n integer
//!   gload count
//!   push.i 1
//!   add
//!   gstore count
//!   ret
//! .end
//! .handler default touch_start ev.default.touch_start
//! ```

use tessel_syntax::{BinaryOp, Field, UnaryOp};

/// Prefix of procedures generated from user functions
pub const FUNCTION_PREFIX: &str = "fn.";
/// Prefix of procedures generated from event handlers
pub const HANDLER_PREFIX: &str = "ev.";
/// Procedure that initializes globals on load and on reset
pub const INIT_PROCEDURE: &str = "$init";
/// Column at which instruction text starts
pub const INSTRUCTION_COLUMN: u32 = 3;

pub fn handler_procedure(state: &str, event: &str) -> String {
    format!("{HANDLER_PREFIX}{state}.{event}")
}

pub fn function_procedure(name: &str) -> String {
    format!("{FUNCTION_PREFIX}{name}")
}

pub fn binary_mnemonic(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "add",
        BinaryOp::Sub => "sub",
        BinaryOp::Mul => "mul",
        BinaryOp::Div => "div",
        BinaryOp::Mod => "mod",
        BinaryOp::Eq => "eq",
        BinaryOp::Ne => "ne",
        BinaryOp::Lt => "lt",
        BinaryOp::Le => "le",
        BinaryOp::Gt => "gt",
        BinaryOp::Ge => "ge",
        BinaryOp::And => "land",
        BinaryOp::Or => "lor",
        BinaryOp::BitAnd => "band",
        BinaryOp::BitOr => "bor",
        BinaryOp::BitXor => "bxor",
        BinaryOp::Shl => "shl",
        BinaryOp::Shr => "shr",
    }
}

pub fn binary_from_mnemonic(text: &str) -> Option<BinaryOp> {
    Some(match text {
        "add" => BinaryOp::Add,
        "sub" => BinaryOp::Sub,
        "mul" => BinaryOp::Mul,
        "div" => BinaryOp::Div,
        "mod" => BinaryOp::Mod,
        "eq" => BinaryOp::Eq,
        "ne" => BinaryOp::Ne,
        "lt" => BinaryOp::Lt,
        "le" => BinaryOp::Le,
        "gt" => BinaryOp::Gt,
        "ge" => BinaryOp::Ge,
        "land" => BinaryOp::And,
        "lor" => BinaryOp::Or,
        "band" => BinaryOp::BitAnd,
        "bor" => BinaryOp::BitOr,
        "bxor" => BinaryOp::BitXor,
        "shl" => BinaryOp::Shl,
        "shr" => BinaryOp::Shr,
        _ => return None,
    })
}

pub fn unary_mnemonic(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Neg => "neg",
        UnaryOp::Not => "not",
        UnaryOp::BitNot => "bnot",
    }
}

pub fn unary_from_mnemonic(text: &str) -> Option<UnaryOp> {
    Some(match text {
        "neg" => UnaryOp::Neg,
        "not" => UnaryOp::Not,
        "bnot" => UnaryOp::BitNot,
        _ => return None,
    })
}

pub fn field_from_mnemonic(text: &str) -> Option<Field> {
    Field::from_name(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_mnemonics_are_reversible() {
        for op in [BinaryOp::Add, BinaryOp::And, BinaryOp::Shr, BinaryOp::Ge] {
            assert_eq!(binary_from_mnemonic(binary_mnemonic(op)), Some(op));
        }
        assert_eq!(binary_from_mnemonic("and"), None);
    }

    #[test]
    fn test_procedure_names() {
        assert_eq!(handler_procedure("default", "timer"), "ev.default.timer");
        assert_eq!(function_procedure("toggle"), "fn.toggle");
    }
}
