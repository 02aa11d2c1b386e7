//! Operator semantics on guest values

use tessel_syntax::{BinaryOp, Field, UnaryOp};

use super::value::{Quat, Value, Vector3};
use crate::error::ScriptFault;

fn mismatch(op: BinaryOp, a: &Value, b: &Value) -> ScriptFault {
    ScriptFault::runtime(format!(
        "Type mismatch: {} {} {}",
        a.value_type(),
        op,
        b.value_type()
    ))
}

fn math_error() -> ScriptFault {
    ScriptFault::runtime("Math Error")
}

pub fn binary(op: BinaryOp, a: Value, b: Value) -> Result<Value, ScriptFault> {
    use Value::*;

    let result = match op {
        BinaryOp::Add => match (a, b) {
            (List(mut l), List(r)) => {
                l.extend(r);
                List(l)
            }
            (List(mut l), v) => {
                l.push(v);
                List(l)
            }
            (v, List(mut r)) => {
                r.insert(0, v);
                List(r)
            }
            (String(l) | Key(l), String(r) | Key(r)) => String(l + &r),
            (Integer(l), Integer(r)) => Integer(l.wrapping_add(r)),
            (Vector(l), Vector(r)) => Vector(Vector3::new(l.x + r.x, l.y + r.y, l.z + r.z)),
            (Rotation(l), Rotation(r)) => {
                Rotation(Quat::new(l.x + r.x, l.y + r.y, l.z + r.z, l.s + r.s))
            }
            (l, r) => float_op(op, &l, &r, |x, y| Ok(x + y))?,
        },
        BinaryOp::Sub => match (a, b) {
            (Integer(l), Integer(r)) => Integer(l.wrapping_sub(r)),
            (Vector(l), Vector(r)) => Vector(Vector3::new(l.x - r.x, l.y - r.y, l.z - r.z)),
            (Rotation(l), Rotation(r)) => {
                Rotation(Quat::new(l.x - r.x, l.y - r.y, l.z - r.z, l.s - r.s))
            }
            (l, r) => float_op(op, &l, &r, |x, y| Ok(x - y))?,
        },
        BinaryOp::Mul => match (a, b) {
            (Integer(l), Integer(r)) => Integer(l.wrapping_mul(r)),
            (Vector(l), Vector(r)) => Float(l.dot(r)),
            (Vector(v), s @ (Integer(_) | Float(_))) | (s @ (Integer(_) | Float(_)), Vector(v)) => {
                Vector(v.scale(s.as_float()))
            }
            (Vector(v), Rotation(q)) => Vector(v.rotate(q)),
            (Rotation(l), Rotation(r)) => Rotation(l.compose(r)),
            (l, r) => float_op(op, &l, &r, |x, y| Ok(x * y))?,
        },
        BinaryOp::Div => match (a, b) {
            (Integer(_), Integer(0)) => return Err(math_error()),
            (Integer(l), Integer(r)) => Integer(l.wrapping_div(r)),
            (Vector(v), s @ (Integer(_) | Float(_))) => {
                let d = s.as_float();
                if d == 0.0 {
                    return Err(math_error());
                }
                Vector(v.scale(1.0 / d))
            }
            (Vector(v), Rotation(q)) => Vector(v.rotate(q.conjugate())),
            (Rotation(l), Rotation(r)) => Rotation(l.compose(r.conjugate())),
            (l, r) => float_op(op, &l, &r, |x, y| {
                if y == 0.0 {
                    Err(math_error())
                } else {
                    Ok(x / y)
                }
            })?,
        },
        BinaryOp::Mod => match (a, b) {
            (Integer(_), Integer(0)) => return Err(math_error()),
            (Integer(l), Integer(r)) => Integer(l.wrapping_rem(r)),
            (Vector(l), Vector(r)) => Vector(l.cross(r)),
            (l, r) => return Err(mismatch(op, &l, &r)),
        },
        BinaryOp::Eq => Integer(equals(&a, &b)? as i32),
        BinaryOp::Ne => match (&a, &b) {
            (List(l), List(r)) => Integer(l.len() as i32 - r.len() as i32),
            _ => Integer(!equals(&a, &b)? as i32),
        },
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&a, &b) {
                (Integer(l), Integer(r)) => (*l as f64).partial_cmp(&(*r as f64)),
                (Integer(_) | Float(_), Integer(_) | Float(_)) => {
                    a.as_float().partial_cmp(&b.as_float())
                }
                _ => return Err(mismatch(op, &a, &b)),
            };
            let holds = match ordering {
                None => false,
                Some(ord) => match op {
                    BinaryOp::Lt => ord.is_lt(),
                    BinaryOp::Le => ord.is_le(),
                    BinaryOp::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                },
            };
            Integer(holds as i32)
        }
        BinaryOp::And => Integer((a.is_true() && b.is_true()) as i32),
        BinaryOp::Or => Integer((a.is_true() || b.is_true()) as i32),
        BinaryOp::BitAnd => int_op(op, a, b, |l, r| l & r)?,
        BinaryOp::BitOr => int_op(op, a, b, |l, r| l | r)?,
        BinaryOp::BitXor => int_op(op, a, b, |l, r| l ^ r)?,
        BinaryOp::Shl => int_op(op, a, b, |l, r| l.wrapping_shl(r as u32 & 31))?,
        BinaryOp::Shr => int_op(op, a, b, |l, r| l.wrapping_shr(r as u32 & 31))?,
    };
    Ok(result)
}

fn float_op(
    op: BinaryOp,
    a: &Value,
    b: &Value,
    f: impl Fn(f64, f64) -> Result<f64, ScriptFault>,
) -> Result<Value, ScriptFault> {
    match (a, b) {
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            Ok(Value::Float(f(a.as_float(), b.as_float())?))
        }
        _ => Err(mismatch(op, a, b)),
    }
}

fn int_op(op: BinaryOp, a: Value, b: Value, f: impl Fn(i32, i32) -> i32) -> Result<Value, ScriptFault> {
    match (a, b) {
        (Value::Integer(l), Value::Integer(r)) => Ok(Value::Integer(f(l, r))),
        (l, r) => Err(mismatch(op, &l, &r)),
    }
}

fn equals(a: &Value, b: &Value) -> Result<bool, ScriptFault> {
    use Value::*;
    Ok(match (a, b) {
        (Integer(l), Integer(r)) => l == r,
        (Integer(_) | Float(_), Integer(_) | Float(_)) => a.as_float() == b.as_float(),
        (String(l) | Key(l), String(r) | Key(r)) => l == r,
        (Vector(l), Vector(r)) => l == r,
        (Rotation(l), Rotation(r)) => l == r,
        // Lists compare by length only
        (List(l), List(r)) => l.len() == r.len(),
        _ => return Err(mismatch(BinaryOp::Eq, a, b)),
    })
}

pub fn unary(op: UnaryOp, v: Value) -> Result<Value, ScriptFault> {
    Ok(match (op, v) {
        (UnaryOp::Neg, Value::Integer(i)) => Value::Integer(i.wrapping_neg()),
        (UnaryOp::Neg, Value::Float(f)) => Value::Float(-f),
        (UnaryOp::Neg, Value::Vector(v)) => Value::Vector(v.scale(-1.0)),
        (UnaryOp::Neg, Value::Rotation(q)) => Value::Rotation(Quat::new(-q.x, -q.y, -q.z, -q.s)),
        (UnaryOp::Not, v) => Value::Integer(!v.is_true() as i32),
        (UnaryOp::BitNot, Value::Integer(i)) => Value::Integer(!i),
        (op, v) => {
            return Err(ScriptFault::runtime(format!(
                "Type mismatch: {}{}",
                op,
                v.value_type()
            )))
        }
    })
}

pub fn get_field(v: &Value, field: Field) -> Result<Value, ScriptFault> {
    let component = match (v, field) {
        (Value::Vector(v), Field::X) => v.x,
        (Value::Vector(v), Field::Y) => v.y,
        (Value::Vector(v), Field::Z) => v.z,
        (Value::Rotation(q), Field::X) => q.x,
        (Value::Rotation(q), Field::Y) => q.y,
        (Value::Rotation(q), Field::Z) => q.z,
        (Value::Rotation(q), Field::S) => q.s,
        (other, _) => {
            return Err(ScriptFault::runtime(format!(
                "{} has no component",
                other.value_type()
            )))
        }
    };
    Ok(Value::Float(component))
}

pub fn set_field(target: Value, field: Field, component: &Value) -> Result<Value, ScriptFault> {
    let c = component.as_float();
    Ok(match (target, field) {
        (Value::Vector(mut v), Field::X) => {
            v.x = c;
            Value::Vector(v)
        }
        (Value::Vector(mut v), Field::Y) => {
            v.y = c;
            Value::Vector(v)
        }
        (Value::Vector(mut v), Field::Z) => {
            v.z = c;
            Value::Vector(v)
        }
        (Value::Rotation(mut q), field) => {
            match field {
                Field::X => q.x = c,
                Field::Y => q.y = c,
                Field::Z => q.z = c,
                Field::S => q.s = c,
            }
            Value::Rotation(q)
        }
        (other, _) => {
            return Err(ScriptFault::runtime(format!(
                "{} has no component",
                other.value_type()
            )))
        }
    })
}
