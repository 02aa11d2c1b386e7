use std::collections::HashSet;

use tessel_syntax::{Expr, ExprKind, LValue};

use crate::error::CompileWarning;

#[derive(Default)]
struct Effects<'a> {
    reads: HashSet<&'a str>,
    writes: HashSet<&'a str>,
}

fn effects(expr: &Expr) -> Effects<'_> {
    let mut fx = Effects::default();
    collect(expr, &mut fx);
    fx
}

fn collect<'a>(expr: &'a Expr, fx: &mut Effects<'a>) {
    match &expr.kind {
        ExprKind::Integer(_) | ExprKind::Float(_) | ExprKind::Str(_) => {}
        ExprKind::Ident(name) => {
            fx.reads.insert(name);
        }
        ExprKind::Vector(items) | ExprKind::Rotation(items) | ExprKind::List(items) => {
            items.iter().for_each(|e| collect(e, fx));
        }
        ExprKind::Call { args, .. } => args.iter().for_each(|e| collect(e, fx)),
        ExprKind::Member { target, .. } => collect(target, fx),
        ExprKind::Unary { operand, .. } | ExprKind::Cast { operand, .. } => collect(operand, fx),
        ExprKind::Binary { lhs, rhs, .. } => {
            collect(lhs, fx);
            collect(rhs, fx);
        }
        ExprKind::Assign { target, value, .. } => {
            write(target, fx);
            collect(value, fx);
        }
        ExprKind::IncDec { target, .. } => {
            fx.reads.insert(&target.name.name);
            write(target, fx);
        }
    }
}

fn write<'a>(target: &'a LValue, fx: &mut Effects<'a>) {
    fx.writes.insert(&target.name.name);
}

fn conflicts<'a>(a: &Effects<'a>, b: &Effects<'a>) -> Option<&'a str> {
    a.writes
        .iter()
        .find(|name| b.reads.contains(*name) || b.writes.contains(*name))
        .or_else(|| b.writes.iter().find(|name| a.reads.contains(*name)))
        .copied()
}

/// Warn where sibling operands of one expression modify a variable that
/// another operand reads or modifies. Operands are evaluated left to right.
pub fn check(expr: &Expr, warnings: &mut Vec<CompileWarning>) {
    let operands: Vec<&Expr> = match &expr.kind {
        ExprKind::Binary { lhs, rhs, .. } => vec![lhs.as_ref(), rhs.as_ref()],
        ExprKind::Vector(items) | ExprKind::Rotation(items) | ExprKind::List(items) => {
            items.iter().collect()
        }
        ExprKind::Call { args, .. } => args.iter().collect(),
        _ => Vec::new(),
    };

    if operands.len() > 1 {
        let fx: Vec<Effects<'_>> = operands.iter().map(|e| effects(e)).collect();
        'outer: for i in 0..fx.len() {
            for j in i + 1..fx.len() {
                if let Some(name) = conflicts(&fx[i], &fx[j]) {
                    warnings.push(CompileWarning::at(
                        expr.span,
                        format!(
                            "'{}' is modified and used by different operands; evaluation is left to right",
                            name
                        ),
                    ));
                    break 'outer;
                }
            }
        }
    }

    if let ExprKind::Assign { target, value, .. } = &expr.kind {
        let fx = effects(value);
        if fx.writes.contains(target.name.name.as_str()) {
            warnings.push(CompileWarning::at(
                expr.span,
                format!(
                    "'{}' is assigned while its new value also modifies it",
                    target.name.name
                ),
            ));
        }
    }

    match &expr.kind {
        ExprKind::Vector(items) | ExprKind::Rotation(items) | ExprKind::List(items) => {
            items.iter().for_each(|e| check(e, warnings));
        }
        ExprKind::Call { args, .. } => args.iter().for_each(|e| check(e, warnings)),
        ExprKind::Member { target, .. } => check(target, warnings),
        ExprKind::Unary { operand, .. } | ExprKind::Cast { operand, .. } => check(operand, warnings),
        ExprKind::Binary { lhs, rhs, .. } => {
            check(lhs, warnings);
            check(rhs, warnings);
        }
        ExprKind::Assign { value, .. } => check(value, warnings),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warnings_for(src: &str) -> Vec<CompileWarning> {
        let script = format!("default {{ state_entry() {{ integer i; integer j; {}; }} }}", src);
        let parsed = tessel_syntax::parse(&script).unwrap();
        let body = &parsed.states[0].handlers[0].body;
        let tessel_syntax::StmtKind::Expr(expr) = &body.stmts[2].kind else {
            panic!("expected expression statement");
        };
        let mut out = Vec::new();
        check(expr, &mut out);
        out
    }

    #[test]
    fn test_increment_beside_read_warns() {
        assert_eq!(warnings_for("j = i++ + i").len(), 1);
    }

    #[test]
    fn test_independent_operands_are_quiet() {
        assert!(warnings_for("j = i + 1").is_empty());
        assert!(warnings_for("i = i + 1").is_empty());
    }

    #[test]
    fn test_self_modifying_assignment_warns() {
        assert_eq!(warnings_for("i = i++").len(), 1);
    }
}
